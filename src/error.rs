// ⚠️ Error taxonomy for the normalization pipeline
// Every failure a single file can hit, plus the one that is not file-scoped (Config)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Errors that can occur while classifying, transforming, enriching or storing a file.
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// Header digest has no entry in the registry
    #[error("no registered format matches the header of {}", path.display())]
    ClassificationMiss { path: PathBuf },

    /// Malformed rule shape or missing rule set
    #[error("configuration error in '{column}': {message}")]
    Config { column: String, message: String },

    /// Required column contains null, or a value failed coercion
    #[error("validation failed for column '{column}': {message}")]
    Validation { column: String, message: String },

    /// Account-side key maps to more than one value
    #[error("account relation for '{column}' is not many-to-one: key '{key}' has {matches} distinct values")]
    JoinValidation {
        column: String,
        key: String,
        matches: usize,
    },

    /// Configured rename source is absent, or the rename collides
    #[error("cannot rename column '{column}': {message}")]
    Rename { column: String, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read spreadsheet {}: {message}", path.display())]
    Spreadsheet { path: PathBuf, message: String },

    #[error("xlsx write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NormalizeError {
    pub fn config(column: impl Into<String>, message: impl Into<String>) -> Self {
        NormalizeError::Config {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn validation(column: impl Into<String>, message: impl Into<String>) -> Self {
        NormalizeError::Validation {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NormalizeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the batch loop may record this error and move on to the next file.
    ///
    /// A `Config` error means no valid plan exists for the whole (source, category)
    /// pair, so it stops that pair instead of a single file.
    pub fn is_file_scoped(&self) -> bool {
        !matches!(self, NormalizeError::Config { .. })
    }

    /// Short kind label used in batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizeError::ClassificationMiss { .. } => "classification",
            NormalizeError::Config { .. } => "config",
            NormalizeError::Validation { .. } => "validation",
            NormalizeError::JoinValidation { .. } => "join",
            NormalizeError::Rename { .. } => "rename",
            NormalizeError::Io { .. } => "io",
            NormalizeError::Spreadsheet { .. } => "spreadsheet",
            NormalizeError::Xlsx(_) => "xlsx",
            NormalizeError::Csv(_) => "csv",
            NormalizeError::Json(_) => "json",
        }
    }
}
