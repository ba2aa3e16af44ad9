// 🔗 Enrichment - backfill statement columns from parsed account records
// Left join, validated many-to-one, joined value wins when present

use crate::error::{NormalizeError, Result};
use crate::rules::AccountRelation;
use crate::table::{Cell, Table};
use std::collections::HashMap;

// ============================================================================
// ACCOUNT INDEX
// ============================================================================

/// Union of every account table parsed for one source in the current batch
#[derive(Debug, Clone, Default)]
pub struct AccountIndex {
    table: Table,
}

impl AccountIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one parsed account table; exact duplicate rows collapse
    pub fn extend(&mut self, accounts: &Table) {
        let merged = Table::concat(&[std::mem::take(&mut self.table), accounts.clone()]);
        self.table = merged.deduplicated();
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// ============================================================================
// JOIN
// ============================================================================

/// Apply every relation in order. Without an index or relations the
/// statements pass through unchanged.
pub fn enrich(
    statements: Table,
    index: Option<&AccountIndex>,
    relations: &[AccountRelation],
) -> Result<Table> {
    let index = match index {
        Some(index) if !index.is_empty() && !relations.is_empty() => index,
        _ => return Ok(statements),
    };

    let mut table = statements;
    for relation in relations {
        table = apply_relation(table, index.table(), relation)?;
    }
    Ok(table)
}

/// key → value from the account side, after dropping duplicate (key, value)
/// pairs. A key left with more than one value breaks many-to-one.
fn lookup_table(accounts: &Table, relation: &AccountRelation) -> Result<HashMap<String, Cell>> {
    let keys = accounts.require_column(&relation.account_key)?;
    let values = accounts.require_column(&relation.account_value)?;

    let mut distinct: HashMap<String, Vec<Cell>> = HashMap::new();
    for (key, value) in keys.into_iter().zip(values) {
        let Some(key) = key.render() else { continue };
        let seen = distinct.entry(key).or_default();
        if !seen.iter().any(|v| v.render() == value.render()) {
            seen.push(value.clone());
        }
    }

    let mut lookup = HashMap::with_capacity(distinct.len());
    for (key, mut candidates) in distinct {
        if candidates.len() > 1 {
            return Err(NormalizeError::JoinValidation {
                column: relation.target.clone(),
                key,
                matches: candidates.len(),
            });
        }
        if let Some(value) = candidates.pop() {
            lookup.insert(key, value);
        }
    }
    Ok(lookup)
}

fn apply_relation(statements: Table, accounts: &Table, relation: &AccountRelation) -> Result<Table> {
    let lookup = lookup_table(accounts, relation)?;

    let values: Vec<Cell> = {
        let join_keys = statements.require_column(&relation.statement_key)?;
        let existing = statements.column(&relation.target);

        join_keys
            .iter()
            .enumerate()
            .map(|(row, key)| {
                let joined = key
                    .render()
                    .and_then(|k| lookup.get(&k))
                    .filter(|v| !v.is_null());
                match joined {
                    Some(value) => value.clone(),
                    None => existing
                        .as_ref()
                        .map(|cells| cells[row].clone())
                        .unwrap_or(Cell::Null),
                }
            })
            .collect()
    };

    let matched = values.iter().filter(|v| !v.is_null()).count();
    log::debug!(
        "relation {} <- {}.{}: {}/{} rows have a value",
        relation.target,
        relation.account_key,
        relation.account_value,
        matched,
        statements.len()
    );

    Ok(statements.with_column(&relation.target, values))
}

// ============================================================================
// TESTS
// ============================================================================
