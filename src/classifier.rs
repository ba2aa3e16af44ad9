// 🔍 File Classifier - identify a file's source format from its header alone
// Header row → canonical JSON rendering → SHA-256 → registry lookup

use crate::config::ConfigSet;
use crate::error::{NormalizeError, Result};
use crate::sheet::{self, SheetLocation};
use calamine::Data;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

// ============================================================================
// FINGERPRINT
// ============================================================================

/// Rendered header row and its digest.
///
/// The rendering keeps cell order, whitespace and cell type (`"1"` and `1`
/// differ), so any header drift yields a different digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub rendered: String,
    pub digest: String,
}

impl FileFingerprint {
    pub fn from_row(row: &[Data]) -> Self {
        let values: Vec<Value> = row.iter().map(header_value).collect();
        let rendered = Value::Array(values).to_string();
        Self::from_rendered(rendered)
    }

    pub fn from_rendered(rendered: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(rendered.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        FileFingerprint { rendered, digest }
    }

    /// Fingerprint of the header row of a file
    pub fn read(path: &Path, location: SheetLocation) -> Result<Self> {
        let row = sheet::read_row(path, location)?;
        Ok(Self::from_row(&row))
    }
}

fn header_value(data: &Data) -> Value {
    match data {
        Data::Empty => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(n) => Value::from(*n),
        Data::Float(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::Error(e) => Value::String(format!("#{:?}", e)),
        other => sheet::render_data(other)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Source name plus the category labels that apply to files with this header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub source: String,
    pub categories: Vec<String>,
}

pub struct FileClassifier {
    registry: HashMap<String, Classification>,
    location: SheetLocation,
}

impl FileClassifier {
    pub fn new(registry: HashMap<String, Classification>) -> Self {
        FileClassifier {
            registry,
            location: SheetLocation::default(),
        }
    }

    /// Build the registry from the `header_hash` configuration key.
    /// Each entry must name a source and at least one category.
    pub fn from_config(config: &ConfigSet) -> Result<Self> {
        let mut registry = HashMap::new();
        for (digest, entry) in &config.header_hash {
            let (source, categories) = entry.split_first().ok_or_else(|| {
                NormalizeError::config(format!("header_hash.{}", digest), "empty entry")
            })?;
            if categories.is_empty() {
                return Err(NormalizeError::config(
                    format!("header_hash.{}", digest),
                    "entry needs a source and at least one category",
                ));
            }
            registry.insert(
                digest.clone(),
                Classification {
                    source: source.clone(),
                    categories: categories.to_vec(),
                },
            );
        }
        Ok(Self::new(registry))
    }

    /// Read headers from another sheet/row than the first row of the first sheet
    pub fn with_location(mut self, location: SheetLocation) -> Self {
        self.location = location;
        self
    }

    pub fn lookup(&self, fingerprint: &FileFingerprint) -> Option<&Classification> {
        self.registry.get(&fingerprint.digest)
    }

    /// Resolve a file to (source, categories). Unreadable files and unknown
    /// headers are both a miss; this never fails.
    pub fn classify(&self, path: &Path) -> Option<Classification> {
        let fingerprint = match FileFingerprint::read(path, self.location) {
            Ok(fp) => fp,
            Err(e) => {
                log::warn!("cannot read header of {}: {}", path.display(), e);
                return None;
            }
        };

        match self.lookup(&fingerprint) {
            Some(found) => {
                log::info!(
                    "{} => {}:{}",
                    path.display(),
                    found.source,
                    found.categories.join(":")
                );
                Some(found.clone())
            }
            None => {
                log::warn!(
                    "{}: no registered format for header digest {}",
                    path.display(),
                    fingerprint.digest
                );
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
