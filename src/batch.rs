// 📦 Batch - classify, transform, enrich and store a list of files
// One file's failure is recorded and the batch moves on

use crate::classifier::{Classification, FileClassifier};
use crate::config::{Category, ConfigSet};
use crate::enrichment::{self, AccountIndex};
use crate::error::{NormalizeError, Result};
use crate::rules::{self, PlanRegistry};
use crate::sheet::SheetLocation;
use crate::storage::{OutputStore, SaveMode};
use crate::table::Table;
use crate::transform::TransformEngine;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// CONFIRMATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort,
}

/// Asked at batch checkpoints (unclassified files, failed account files)
pub trait ConfirmPolicy {
    fn confirm(&mut self, question: &str) -> Decision;
}

/// Non-interactive: every checkpoint continues
pub struct AlwaysContinue;

impl ConfirmPolicy for AlwaysContinue {
    fn confirm(&mut self, question: &str) -> Decision {
        log::info!("{} -> continuing", question);
        Decision::Continue
    }
}

/// Asks on stderr, reads y/N from stdin. Anything but yes aborts.
pub struct ConsolePrompt;

impl ConfirmPolicy for ConsolePrompt {
    fn confirm(&mut self, question: &str) -> Decision {
        eprint!("{} [y/N] ", question);
        let _ = io::stderr().flush();

        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return Decision::Abort;
        }
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Decision::Continue,
            _ => Decision::Abort,
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Failing file → error message
    pub errors: BTreeMap<PathBuf, String>,
    pub files_processed: usize,
    pub rows_written: usize,
    pub aborted: bool,
}

impl BatchReport {
    /// A file failing under several categories keeps every message
    fn record(&mut self, path: &Path, message: String) {
        self.errors
            .entry(path.to_path_buf())
            .and_modify(|existing| {
                existing.push_str("; ");
                existing.push_str(&message);
            })
            .or_insert(message);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.aborted
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} files processed, {} rows written, {} failed{}",
            self.files_processed,
            self.rows_written,
            self.errors.len(),
            if self.aborted { " (aborted)" } else { "" }
        );
        for (path, message) in &self.errors {
            out.push_str(&format!("\n  {}: {}", path.display(), message));
        }
        out
    }
}

fn describe(error: &NormalizeError) -> String {
    format!("[{}] {}", error.kind(), error)
}

// ============================================================================
// BATCH CONTEXT
// ============================================================================

/// Everything one batch shares: configuration, compiled plans, the classifier
/// and the output store
pub struct BatchContext {
    config: ConfigSet,
    plans: PlanRegistry,
    classifier: FileClassifier,
    engine: TransformEngine,
    store: OutputStore,
    /// (source, category label) → message of the config error that broke it
    broken_plans: HashMap<(String, String), String>,
}

impl BatchContext {
    pub fn new<P: Into<PathBuf>>(config: ConfigSet, output_root: P) -> Result<Self> {
        let classifier = FileClassifier::from_config(&config)?;
        let store = OutputStore::new(output_root, &config);
        Ok(BatchContext {
            config,
            plans: PlanRegistry::new(),
            classifier,
            engine: TransformEngine::new(),
            store,
            broken_plans: HashMap::new(),
        })
    }

    pub fn with_statement_mode(mut self, mode: SaveMode) -> Self {
        self.store = self.store.with_statement_mode(mode);
        self
    }

    /// Read headers and data from another sheet or header row than the default
    pub fn with_location(mut self, location: SheetLocation) -> Self {
        self.classifier = self.classifier.with_location(location);
        self.engine = TransformEngine::with_location(location);
        self
    }

    // ========================================================================
    // ENTRY POINTS
    // ========================================================================

    /// Each file in order, every category it carries, statements without enrichment
    pub fn process_one_by_one(&mut self, files: &[PathBuf], doc_ref: Option<&str>) -> BatchReport {
        let mut report = BatchReport::default();

        for path in files {
            let Some(found) = self.classify(path, &mut report) else {
                continue;
            };
            for label in &found.categories {
                self.run(&mut report, path, &found.source, label, None, doc_ref);
            }
        }

        self.finish(report, files)
    }

    /// Classify everything first, then per source: account files (building the
    /// account index), customer files, statement files enriched from the index.
    pub fn process_accounts_then_statements(
        &mut self,
        files: &[PathBuf],
        doc_ref: Option<&str>,
        policy: &mut dyn ConfirmPolicy,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        let mut by_source: Vec<(String, Vec<(PathBuf, String)>)> = Vec::new();
        let mut unclassified = 0;
        for path in files {
            let Some(found) = self.classify(path, &mut report) else {
                unclassified += 1;
                continue;
            };
            let slot = match by_source.iter().position(|(s, _)| *s == found.source) {
                Some(i) => i,
                None => {
                    by_source.push((found.source.clone(), Vec::new()));
                    by_source.len() - 1
                }
            };
            for label in found.categories {
                by_source[slot].1.push((path.clone(), label));
            }
        }

        if unclassified > 0 {
            let question = format!(
                "{} of {} files have no registered format. Continue with the rest?",
                unclassified,
                files.len()
            );
            if policy.confirm(&question) == Decision::Abort {
                log::warn!("batch aborted at classification checkpoint");
                report.aborted = true;
                return self.finish(report, files);
            }
        }

        for (source, jobs) in &by_source {
            let phase = |category: Option<Category>| {
                jobs.iter()
                    .filter(move |(_, label)| Category::from_label(label) == category)
            };

            let mut index = AccountIndex::new();
            let mut account_failures = 0;
            for (path, label) in phase(Some(Category::Account)) {
                match self.run(&mut report, path, source, label, None, doc_ref) {
                    Some(accounts) => index.extend(&accounts),
                    None => account_failures += 1,
                }
            }
            log::info!("{}: {} account rows indexed", source, index.len());

            if account_failures > 0 {
                let question = format!(
                    "{} account files of {} failed. Continue with its customer and statement files?",
                    account_failures, source
                );
                if policy.confirm(&question) == Decision::Abort {
                    log::warn!("skipping remaining files of {}", source);
                    for (path, _) in jobs.iter().filter(|(_, l)| {
                        Category::from_label(l) != Some(Category::Account)
                    }) {
                        report.record(
                            path,
                            format!("[skipped] account files of {} failed", source),
                        );
                    }
                    continue;
                }
            }

            for (path, label) in phase(Some(Category::Customer)) {
                self.run(&mut report, path, source, label, None, doc_ref);
            }
            for (path, label) in phase(Some(Category::Statement)) {
                self.run(&mut report, path, source, label, Some(&index), doc_ref);
            }
            // unsupported labels only produce their error
            for (path, label) in phase(None) {
                self.run(&mut report, path, source, label, None, doc_ref);
            }
        }

        self.finish(report, files)
    }

    // ========================================================================
    // PER FILE
    // ========================================================================

    fn classify(&self, path: &Path, report: &mut BatchReport) -> Option<Classification> {
        let found = self.classifier.classify(path);
        if found.is_none() {
            let miss = NormalizeError::ClassificationMiss {
                path: path.to_path_buf(),
            };
            report.record(path, describe(&miss));
        }
        found
    }

    /// Process one (file, category) and record the outcome. Returns the
    /// normalized table on success.
    fn run(
        &mut self,
        report: &mut BatchReport,
        path: &Path,
        source: &str,
        label: &str,
        index: Option<&AccountIndex>,
        doc_ref: Option<&str>,
    ) -> Option<Table> {
        let key = (source.to_string(), label.to_string());
        if let Some(message) = self.broken_plans.get(&key) {
            report.record(path, message.clone());
            return None;
        }

        match self.process(path, source, label, index, doc_ref) {
            Ok(table) => {
                report.rows_written += table.len();
                Some(table)
            }
            Err(e) => {
                let message = describe(&e);
                if e.is_file_scoped() {
                    log::warn!("{} ({}:{}): {}", path.display(), source, label, e);
                } else {
                    log::error!("{}:{} unusable: {}", source, label, e);
                    self.broken_plans.insert(key, message.clone());
                }
                report.record(path, message);
                None
            }
        }
    }

    fn process(
        &mut self,
        path: &Path,
        source: &str,
        label: &str,
        index: Option<&AccountIndex>,
        doc_ref: Option<&str>,
    ) -> Result<Table> {
        let category = Category::from_label(label).ok_or_else(|| {
            NormalizeError::config(format!("{}:{}", source, label), "unsupported category")
        })?;
        let plan = self.plans.get_or_compile(&self.config, source, label)?;
        let table = self.engine.transform(path, &plan)?;

        match category {
            Category::Account | Category::Customer => {
                self.store.save_account_like(&table, category, source)?;
                Ok(table)
            }
            Category::Statement => {
                let enriched = enrichment::enrich(table, index, &plan.account_relations)?;
                let groups = self.group_statements(&enriched)?;
                self.store
                    .save_statements(&groups, category, source, doc_ref)?;
                Ok(enriched)
            }
        }
    }

    /// One group per account; a table without the account column is one group
    fn group_statements(&self, table: &Table) -> Result<Vec<Table>> {
        let account = &self.config.statement_columns.account;
        if table.has_column(account) {
            table.group_by(account)
        } else {
            Ok(vec![table.clone()])
        }
    }

    fn finish(&self, mut report: BatchReport, files: &[PathBuf]) -> BatchReport {
        if !report.aborted {
            report.files_processed = files
                .iter()
                .filter(|f| !report.errors.contains_key(*f))
                .count();
        }
        log::info!("{}", report.summary());
        report
    }
}

// ============================================================================
// CONFIG CHECK
// ============================================================================

/// Compile every rule set and check every registry entry points at one.
/// Returns "source:category" → error message for each problem found.
pub fn check_config(config: &ConfigSet) -> BTreeMap<String, String> {
    let mut problems = BTreeMap::new();

    if let Err(e) = FileClassifier::from_config(config) {
        problems.insert("header_hash".to_string(), e.to_string());
    }

    for (source, label) in config.rule_set_keys() {
        let key = format!("{}:{}", source, label);
        if Category::from_label(&label).is_none() {
            problems.insert(key, "unsupported category".to_string());
            continue;
        }
        let compiled = config
            .rule_set(&source, &label)
            .and_then(rules::compile);
        if let Err(e) = compiled {
            problems.insert(key, e.to_string());
        }
    }

    for entry in config.header_hash.values() {
        if let Some((source, labels)) = entry.split_first() {
            for label in labels {
                if config.rule_set(source, label).is_err() {
                    problems
                        .entry(format!("{}:{}", source, label))
                        .or_insert_with(|| "registered in header_hash but has no rule set".to_string());
                }
            }
        }
    }

    problems
}

// ============================================================================
// TESTS
// ============================================================================
