// ⚙️ Configuration - directory of JSON documents merged into one ConfigSet
// Reserved keys configure the pipeline, every other top-level key is a source

use crate::error::{NormalizeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// CATEGORY
// ============================================================================

/// Role of a file within one source's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Account,
    Statement,
    Customer,
}

impl Category {
    /// Accepts both the English and the Chinese labels used in registries
    pub fn from_label(label: &str) -> Option<Category> {
        match label {
            "account" | "账户" => Some(Category::Account),
            "statement" | "流水" => Some(Category::Statement),
            "customer" | "客户" => Some(Category::Customer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Account => "account",
            Category::Statement => "statement",
            Category::Customer => "customer",
        }
    }
}

// ============================================================================
// AMBIENT SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Csv => "csv",
        }
    }
}

/// Directory name per category under the output root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDirs {
    pub account: String,
    pub statement: String,
    pub customer: String,
}

impl Default for OutputDirs {
    fn default() -> Self {
        OutputDirs {
            account: "0银行账户".to_string(),
            statement: "人员流水".to_string(),
            customer: "0客户信息".to_string(),
        }
    }
}

impl OutputDirs {
    pub fn for_category(&self, category: Category) -> &str {
        match category {
            Category::Account => &self.account,
            Category::Statement => &self.statement,
            Category::Customer => &self.customer,
        }
    }
}

/// Canonical statement column names the store and the batch rely on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementColumns {
    pub person: String,
    pub account: String,
    pub card: String,
    pub date: String,
    pub time: String,
    pub credit: String,
    pub debit: String,
    pub balance: String,
}

impl Default for StatementColumns {
    fn default() -> Self {
        StatementColumns {
            person: "姓名".to_string(),
            account: "账号".to_string(),
            card: "卡号".to_string(),
            date: "日期".to_string(),
            time: "时间".to_string(),
            credit: "入账金额".to_string(),
            debit: "出账金额".to_string(),
            balance: "余额".to_string(),
        }
    }
}

fn default_doc_log() -> String {
    "0查询文号.csv".to_string()
}

// ============================================================================
// CONFIG SET
// ============================================================================

/// Everything loaded from the configuration directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSet {
    /// digest → [source, category, category, ...]
    #[serde(default)]
    pub header_hash: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub output_format: OutputFormat,

    #[serde(default)]
    pub output_dirs: OutputDirs,

    #[serde(default)]
    pub statement_columns: StatementColumns,

    #[serde(default = "default_doc_log")]
    pub doc_log: String,

    /// source → category label → rule set
    #[serde(flatten)]
    pub sources: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
}

impl Default for ConfigSet {
    fn default() -> Self {
        ConfigSet {
            header_hash: BTreeMap::new(),
            output_format: OutputFormat::default(),
            output_dirs: OutputDirs::default(),
            statement_columns: StatementColumns::default(),
            doc_log: default_doc_log(),
            sources: BTreeMap::new(),
        }
    }
}

impl ConfigSet {
    /// Load every `*.json` document in `dir` (names starting with `#` are
    /// disabled), in file-name order, merging top-level keys.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| NormalizeError::io(dir, e))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with('#'))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut documents = Vec::with_capacity(files.len());
        for file in &files {
            let content = fs::read_to_string(file).map_err(|e| NormalizeError::io(file, e))?;
            let value: Value = serde_json::from_str(&content)?;
            match value {
                Value::Object(map) => documents.push(map),
                _ => {
                    return Err(NormalizeError::config(
                        file.display().to_string(),
                        "configuration document must be a JSON object",
                    ))
                }
            }
            log::debug!("loaded configuration document {}", file.display());
        }

        Self::from_documents(documents)
    }

    /// Merge documents: a later document's top-level key replaces an earlier one
    pub fn from_documents(documents: Vec<Map<String, Value>>) -> Result<Self> {
        let mut merged = Map::new();
        for document in documents {
            for (key, value) in document {
                merged.insert(key, value);
            }
        }
        Ok(serde_json::from_value(Value::Object(merged))?)
    }

    /// Rule set for (source, category label)
    pub fn rule_set(&self, source: &str, category: &str) -> Result<&Map<String, Value>> {
        self.sources
            .get(source)
            .and_then(|categories| categories.get(category))
            .ok_or_else(|| {
                NormalizeError::config(
                    format!("{}:{}", source, category),
                    "no rule set configured",
                )
            })
    }

    /// Every (source, category label) pair that has a rule set
    pub fn rule_set_keys(&self) -> Vec<(String, String)> {
        self.sources
            .iter()
            .flat_map(|(source, categories)| {
                categories
                    .keys()
                    .map(move |category| (source.clone(), category.clone()))
            })
            .collect()
    }
}
