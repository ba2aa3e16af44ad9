// Bank Normalizer - Core Library
// Heterogeneous bank exports in, one canonical schema out

pub mod error;          // Error taxonomy
pub mod table;          // In-memory tabular data
pub mod sheet;          // Spreadsheet loading
pub mod config;         // Configuration directory
pub mod rules;          // Rule shapes → compiled plans
pub mod classifier;     // Header fingerprint → (source, categories)
pub mod transform;      // Plan execution
pub mod enrichment;     // Account → statement join
pub mod storage;        // Per category/person/source output files
pub mod batch;          // Batch orchestration

// Re-export commonly used types
pub use error::{NormalizeError, Result};
pub use table::{Cell, Table};
pub use sheet::{CellMode, SheetLocation, expand_inputs};
pub use config::{Category, ConfigSet, OutputDirs, OutputFormat, StatementColumns};
pub use rules::{
    compile, CompiledPlan, PlanRegistry, RawRule, AccountRelation, CreditDebitSplit,
};
pub use classifier::{Classification, FileClassifier, FileFingerprint};
pub use transform::TransformEngine;
pub use enrichment::{enrich, AccountIndex};
pub use storage::{OutputStore, SaveMode};
pub use batch::{
    check_config, AlwaysContinue, BatchContext, BatchReport, ConfirmPolicy, ConsolePrompt,
    Decision,
};
