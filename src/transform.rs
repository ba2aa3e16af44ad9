// 🔄 Transform Engine - compiled plan + raw sheet → canonical table
// Step order is fixed: later steps read columns produced by earlier ones

use crate::error::{NormalizeError, Result};
use crate::rules::{CompiledPlan, ConditionalFill, CreditDebitSplit, DateTimeRule, PathPart, PathToken};
use crate::sheet::{self, CellMode, SheetLocation};
use crate::table::{Cell, Table};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::path::Path;

// ============================================================================
// DATE / TIME PARSING
// ============================================================================

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y%m%d %H:%M:%S",
    "%Y%m%d %H%M%S",
    "%Y%m%d%H%M%S",
    "%Y年%m月%d日 %H:%M:%S",
    "%Y年%m月%d日 %H时%M分%S秒",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%Y.%m.%d",
    "%Y年%m月%d日",
    "%m/%d/%Y",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%H%M%S", "%H.%M.%S", "%H时%M分%S秒"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Parsed {
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

fn parse_with(text: &str, format: &str) -> Option<Parsed> {
    NaiveDateTime::parse_from_str(text, format)
        .map(Parsed::DateTime)
        .or_else(|_| NaiveDate::parse_from_str(text, format).map(Parsed::Date))
        .or_else(|_| NaiveTime::parse_from_str(text, format).map(Parsed::Time))
        .ok()
}

/// Mixed-format parsing used when a rule gives no explicit format
fn parse_lenient(text: &str) -> Option<Parsed> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok().map(Parsed::DateTime))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok().map(Parsed::Date))
        })
        .or_else(|| {
            TIME_FORMATS
                .iter()
                .find_map(|f| NaiveTime::parse_from_str(text, f).ok().map(Parsed::Time))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemporalPart {
    Date,
    Time,
}

fn temporal_cell(cell: &Cell, rule: &DateTimeRule, part: TemporalPart) -> Result<Cell> {
    let text = match cell {
        Cell::Null => return Ok(Cell::Null),
        Cell::Date(d) if part == TemporalPart::Date => return Ok(Cell::Date(*d)),
        Cell::Time(t) if part == TemporalPart::Time => return Ok(Cell::Time(*t)),
        other => other.render().unwrap_or_default(),
    };
    let text = text.trim();

    let parsed = match &rule.format {
        Some(format) => parse_with(text, format),
        None => parse_lenient(text),
    };

    let converted = match (parsed, part) {
        (Some(Parsed::DateTime(dt)), TemporalPart::Date) => Some(Cell::Date(dt.date())),
        (Some(Parsed::Date(d)), TemporalPart::Date) => Some(Cell::Date(d)),
        (Some(Parsed::DateTime(dt)), TemporalPart::Time) => Some(Cell::Time(dt.time())),
        (Some(Parsed::Time(t)), TemporalPart::Time) => Some(Cell::Time(t)),
        (Some(Parsed::Date(_)), TemporalPart::Time) => NaiveTime::from_hms_opt(0, 0, 0).map(Cell::Time),
        (Some(Parsed::Time(_)), TemporalPart::Date) | (None, _) => None,
    };

    converted.ok_or_else(|| {
        NormalizeError::validation(
            &rule.source,
            format!(
                "cannot parse '{}' as a {}",
                text,
                if part == TemporalPart::Date { "date" } else { "time" }
            ),
        )
    })
}

// ============================================================================
// COLUMN DERIVATIONS
// ============================================================================

/// Merge one row's source values.
///
/// Two sources: `"<a> <b>"` trimmed, or a single copy when both are equal
/// (nulls count as empty). More sources: distinct non-empty values in
/// first-seen order. An empty result is null.
pub fn merge_values(values: &[&Cell]) -> Cell {
    let merged = if let [first, second] = values {
        let a = first.render().unwrap_or_default();
        let b = second.render().unwrap_or_default();
        if a == b {
            b
        } else {
            format!("{} {}", a, b).trim().to_string()
        }
    } else {
        let mut distinct: Vec<String> = Vec::new();
        for value in values {
            if let Some(text) = value.render() {
                if !text.is_empty() && !distinct.contains(&text) {
                    distinct.push(text);
                }
            }
        }
        distinct.join(" ")
    };

    if merged.is_empty() {
        Cell::Null
    } else {
        Cell::Text(merged)
    }
}

fn merge_column(table: &Table, sources: &[String]) -> Result<Vec<Cell>> {
    let columns = sources
        .iter()
        .map(|s| table.require_column(s))
        .collect::<Result<Vec<_>>>()?;

    Ok((0..table.len())
        .map(|row| {
            let values: Vec<&Cell> = columns.iter().map(|col| col[row]).collect();
            merge_values(&values)
        })
        .collect())
}

fn numeric_cell(column: &str, cell: &Cell) -> Result<Cell> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Number(n) => Ok(Cell::Number(*n)),
        Cell::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Cell::Number)
            .ok_or_else(|| {
                NormalizeError::validation(column, format!("cannot convert '{}' to a number", s))
            }),
        other => Err(NormalizeError::validation(
            column,
            format!("cannot convert '{}' to a number", other),
        )),
    }
}

/// (credit column, debit column): the amount goes to credit when the
/// indicator equals the credit tag, to debit otherwise
fn split_credit_debit(table: &Table, split: &CreditDebitSplit) -> Result<(Vec<Cell>, Vec<Cell>)> {
    let indicator = table.require_column(&split.indicator)?;
    let amount = table.require_column(&split.amount)?;

    let mut credit = Vec::with_capacity(table.len());
    let mut debit = Vec::with_capacity(table.len());
    for (flag, value) in indicator.iter().zip(amount) {
        if flag.render().as_deref() == Some(split.credit_tag.as_str()) {
            credit.push(value.clone());
            debit.push(Cell::Null);
        } else {
            credit.push(Cell::Null);
            debit.push(value.clone());
        }
    }
    Ok((credit, debit))
}

fn fill_column(table: &Table, target: &str, fill: &ConditionalFill) -> Result<Vec<Cell>> {
    let criteria = table.require_column(&fill.criteria_column)?;
    let source = table.require_column(&fill.source)?;
    let current: Vec<Cell> = match table.column(target) {
        Some(cells) => cells.into_iter().cloned().collect(),
        None => vec![Cell::Null; table.len()],
    };

    Ok(current
        .into_iter()
        .enumerate()
        .map(|(i, existing)| {
            let selected = match &fill.criteria_value {
                None => criteria[i].is_null(),
                Some(value) => criteria[i].render().as_deref() == Some(value.as_str()),
            };
            if selected {
                source[i].clone()
            } else {
                existing
            }
        })
        .collect())
}

/// Token from the parent directory name or the file stem
pub fn path_token(path: &Path, token: &PathToken) -> Cell {
    let text = match token.part {
        PathPart::Dir => path.parent().and_then(|p| p.file_name()),
        PathPart::Stem => path.file_stem(),
    }
    .and_then(|s| s.to_str())
    .unwrap_or("");

    let parts: Vec<&str> = if token.delimiter.is_empty() {
        vec![text]
    } else {
        text.split(token.delimiter.as_str()).collect()
    };

    let index = if token.index < 0 {
        parts.len() as i64 + token.index
    } else {
        token.index
    };
    if index < 0 {
        return Cell::Null;
    }

    parts
        .get(index as usize)
        .filter(|p| !p.is_empty())
        .map(|p| Cell::text(*p))
        .unwrap_or(Cell::Null)
}

// ============================================================================
// TRANSFORM ENGINE
// ============================================================================

pub struct TransformEngine {
    location: SheetLocation,
}

impl TransformEngine {
    pub fn new() -> Self {
        TransformEngine {
            location: SheetLocation::default(),
        }
    }

    pub fn with_location(location: SheetLocation) -> Self {
        TransformEngine { location }
    }

    /// Load `path` as an all-text sheet and run the plan over it
    pub fn transform(&self, path: &Path, plan: &CompiledPlan) -> Result<Table> {
        let raw = sheet::load_table(path, self.location, CellMode::Text)?;
        self.apply(raw, plan, path)
    }

    /// Run the plan over an already loaded raw table. `path` feeds the
    /// derive-from-path rules only.
    pub fn apply(&self, raw: Table, plan: &CompiledPlan, path: &Path) -> Result<Table> {
        validate_required(&raw, &plan.required)?;

        let mut table = raw;
        let rows = table.len();

        for (column, value) in &plan.constants {
            table = table.with_column(column, vec![Cell::text(value.as_str()); rows]);
        }

        for (column, token) in &plan.path_tokens {
            table = table.with_column(column, vec![path_token(path, token); rows]);
        }

        for (column, sources) in &plan.merges {
            let values = merge_column(&table, sources)?;
            table = table.with_column(column, values);
        }

        for (column, rule) in &plan.dates {
            let values = temporal_column(&table, rule, TemporalPart::Date)?;
            table = table.with_column(column, values);
        }

        for (column, rule) in &plan.times {
            let values = temporal_column(&table, rule, TemporalPart::Time)?;
            table = table.with_column(column, values);
        }

        for column in &plan.numeric {
            let values = table
                .require_column(column)?
                .into_iter()
                .map(|cell| numeric_cell(column, cell))
                .collect::<Result<Vec<_>>>()?;
            table = table.with_column(column, values);
        }

        if let Some(split) = &plan.credit_debit {
            let (credit, debit) = split_credit_debit(&table, split)?;
            table = table
                .with_column(&split.credit_column, credit)
                .with_column(&split.debit_column, debit);
        }

        for (column, fill) in &plan.fills {
            let values = fill_column(&table, column, fill)?;
            table = table.with_column(column, values);
        }

        let table = table.renamed(&plan.renames)?;
        Ok(table.select(&plan.column_order).deduplicated())
    }
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First required column that is missing or holds a null aborts the file
fn validate_required(table: &Table, required: &[String]) -> Result<()> {
    for column in required {
        let cells = table.require_column(column)?;
        if let Some(row) = cells.iter().position(|c| c.is_null()) {
            return Err(NormalizeError::validation(
                column,
                format!("null value in data row {}", row + 1),
            ));
        }
    }
    Ok(())
}

fn temporal_column(table: &Table, rule: &DateTimeRule, part: TemporalPart) -> Result<Vec<Cell>> {
    table
        .require_column(&rule.source)?
        .into_iter()
        .map(|cell| temporal_cell(cell, rule, part))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
