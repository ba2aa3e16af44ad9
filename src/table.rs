// 📋 Table - the in-memory record set every stage passes along
// Column derivations never mutate through views: each operation hands back a new table

use crate::error::{NormalizeError, Result};
use chrono::{NaiveDate, NaiveTime};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

// ============================================================================
// CELL
// ============================================================================

/// One value in a table. Raw sheets only ever contain `Null` and `Text`;
/// the typed variants appear after date/time/numeric rules run.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Text form of the cell, `None` for null.
    ///
    /// This is also the identity used for row de-duplication, so it must be
    /// stable across a write/read cycle of the output store.
    pub fn render(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            Cell::Time(t) => Some(t.format(TIME_FORMAT).to_string()),
        }
    }

    /// Numeric view: numbers as-is, text if it parses
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Ordering used when sorting statements: nulls last, numbers numerically,
    /// everything else by rendered text (ISO dates and times sort correctly that way).
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Null, Cell::Null) => Ordering::Equal,
            (Cell::Null, _) => Ordering::Greater,
            (_, Cell::Null) => Ordering::Less,
            (Cell::Number(a), Cell::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            _ => self.render().cmp(&other.render()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render().unwrap_or_default())
    }
}

/// Integral values print without a decimal part
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Whole-row identity for exact duplicate removal
pub fn row_key(row: &[Cell]) -> Vec<Option<String>> {
    row.iter().map(Cell::render).collect()
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table, padding short rows with nulls and cutting long ones
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Null);
                row
            })
            .collect();
        Table { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cells of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Same as [`Table::column`] but a missing column is a validation error
    pub fn require_column(&self, name: &str) -> Result<Vec<&Cell>> {
        self.column(name)
            .ok_or_else(|| NormalizeError::validation(name, "column not found"))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Replace a column's values, or append it when absent.
    /// `values` must have one entry per row.
    pub fn with_column(mut self, name: &str, values: Vec<Cell>) -> Table {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        self
    }

    /// Rename columns simultaneously. Every source must exist and the result
    /// must not contain two columns with the same name.
    pub fn renamed(mut self, mapping: &[(String, String)]) -> Result<Table> {
        let mut names = self.columns.clone();
        for (from, to) in mapping {
            let idx = self.column_index(from).ok_or_else(|| NormalizeError::Rename {
                column: from.clone(),
                message: "source column not found".to_string(),
            })?;
            names[idx] = to.clone();
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(NormalizeError::Rename {
                    column: name.clone(),
                    message: "renaming would produce a duplicate column".to_string(),
                });
            }
        }

        self.columns = names;
        Ok(self)
    }

    /// Reindex to the given column order: absent columns become null,
    /// columns not listed are dropped.
    pub fn select(&self, order: &[String]) -> Table {
        let indices: Vec<Option<usize>> = order.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();
        Table {
            columns: order.to_vec(),
            rows,
        }
    }

    /// Drop exact full-row duplicates, keeping the first occurrence
    pub fn deduplicated(mut self) -> Table {
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row_key(row)));
        self
    }

    /// Stack tables vertically. Columns are the union in first-seen order.
    pub fn concat(tables: &[Table]) -> Table {
        let mut columns: Vec<String> = Vec::new();
        for table in tables {
            for col in &table.columns {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
        }

        let mut out = Table::new(columns.clone());
        for table in tables {
            let aligned = table.select(&columns);
            out.rows.extend(aligned.rows);
        }
        out
    }

    /// Split into one table per distinct value of `column`, in first-seen order.
    /// Rows with a null key form their own group.
    pub fn group_by(&self, column: &str) -> Result<Vec<Table>> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| NormalizeError::validation(column, "group column not found"))?;

        let mut positions: HashMap<Option<String>, usize> = HashMap::new();
        let mut groups: Vec<Table> = Vec::new();
        for row in &self.rows {
            let key = row[idx].render();
            let pos = *positions.entry(key).or_insert_with(|| {
                groups.push(Table::new(self.columns.clone()));
                groups.len() - 1
            });
            groups[pos].rows.push(row.clone());
        }
        Ok(groups)
    }

    /// Stable sort by the given columns; columns the table lacks are skipped
    pub fn sorted_by(mut self, columns: &[&str]) -> Table {
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        self.rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| a[i].sort_cmp(&b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================
