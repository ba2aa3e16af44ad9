// 💾 Output Store - per category / person / source files, append-safe
// Writing the same rows twice leaves the file unchanged: merge then drop exact duplicates

use crate::config::{Category, ConfigSet, OutputDirs, OutputFormat, StatementColumns};
use crate::error::{NormalizeError, Result};
use crate::sheet::{self, CellMode, SheetLocation};
use crate::table::{Cell, Table};
use rust_xlsxwriter::Workbook;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Directory name used when a statement group has no person name
pub const UNKNOWN_PERSON: &str = "未知姓名";

/// What to do when the target file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Load, concatenate, drop exact duplicate rows, rewrite
    Merge,
    /// Append `_` to the file stem until the name is free
    NewFile,
}

pub struct OutputStore {
    root: PathBuf,
    format: OutputFormat,
    dirs: OutputDirs,
    columns: StatementColumns,
    doc_log: String,
    statement_mode: SaveMode,
}

impl OutputStore {
    pub fn new<P: Into<PathBuf>>(root: P, config: &ConfigSet) -> Self {
        OutputStore {
            root: root.into(),
            format: config.output_format,
            dirs: config.output_dirs.clone(),
            columns: config.statement_columns.clone(),
            doc_log: config.doc_log.clone(),
            statement_mode: SaveMode::Merge,
        }
    }

    pub fn with_statement_mode(mut self, mode: SaveMode) -> Self {
        self.statement_mode = mode;
        self
    }

    // ========================================================================
    // SAVE OPERATIONS
    // ========================================================================

    /// One file per source under the category directory, merged with any
    /// existing content. Returns the number of rows now in the file.
    pub fn save_account_like(&self, records: &Table, category: Category, source: &str) -> Result<usize> {
        let dir = self.root.join(self.dirs.for_category(category));
        fs::create_dir_all(&dir).map_err(|e| NormalizeError::io(&dir, e))?;

        let written = self.write_table(records, &dir, &sanitize(source), SaveMode::Merge, &[])?;
        log::info!("{}: {} rows in {} file", source, written, category.as_str());
        Ok(written)
    }

    /// One file per account group under `<person>/<source>/`, rows sorted by
    /// date then time. With a document reference, one line is appended to the
    /// running document log.
    pub fn save_statements(
        &self,
        groups: &[Table],
        category: Category,
        source: &str,
        doc_ref: Option<&str>,
    ) -> Result<usize> {
        let mut written = 0;
        let mut persons = BTreeSet::new();

        for group in groups.iter().filter(|g| !g.is_empty()) {
            let person = group
                .get(0, &self.columns.person)
                .and_then(Cell::render)
                .unwrap_or_else(|| UNKNOWN_PERSON.to_string());

            let dir = self
                .root
                .join(self.dirs.for_category(category))
                .join(sanitize(&person))
                .join(sanitize(source));
            fs::create_dir_all(&dir).map_err(|e| NormalizeError::io(&dir, e))?;

            let stem = format!(
                "{}_{}_{}",
                brief(group, &self.columns),
                source,
                masked_suffix(group, &self.columns)
            );
            let order = [self.columns.date.as_str(), self.columns.time.as_str()];
            written += self.write_table(group, &dir, &sanitize(&stem), self.statement_mode, &order)?;
            persons.insert(person);
        }

        if let Some(doc_ref) = doc_ref {
            self.append_doc_log(doc_ref, source, &persons)?;
        }

        log::info!("{}: {} statement rows in {} files", source, written, groups.len());
        Ok(written)
    }

    fn append_doc_log(&self, doc_ref: &str, source: &str, persons: &BTreeSet<String>) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| NormalizeError::io(&self.root, e))?;
        let path = self.root.join(&self.doc_log);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| NormalizeError::io(&path, e))?;

        let persons = persons.iter().cloned().collect::<Vec<_>>().join(" ");
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record([doc_ref, source, persons.as_str()])?;
        writer.flush().map_err(|e| NormalizeError::io(&path, e))?;
        Ok(())
    }

    // ========================================================================
    // FILE I/O
    // ========================================================================

    fn file_path(&self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.{}", stem, self.format.extension()))
    }

    /// Rows are sorted by `order` after any merge, so merged files stay ordered
    fn write_table(
        &self,
        records: &Table,
        dir: &Path,
        stem: &str,
        mode: SaveMode,
        order: &[&str],
    ) -> Result<usize> {
        let records = blank_to_null(records);
        let mut path = self.file_path(dir, stem);

        let output = match mode {
            SaveMode::Merge if path.exists() => {
                let existing = self.read_table(&path)?;
                log::debug!(
                    "merging {} new rows into {} ({} rows)",
                    records.len(),
                    path.display(),
                    existing.len()
                );
                Table::concat(&[existing, records]).deduplicated()
            }
            SaveMode::Merge => records,
            SaveMode::NewFile => {
                let mut stem = stem.to_string();
                while path.exists() {
                    stem.push('_');
                    path = self.file_path(dir, &stem);
                }
                records
            }
        }
        .sorted_by(order);

        match self.format {
            OutputFormat::Xlsx => write_xlsx(&path, &output)?,
            OutputFormat::Csv => write_csv(&path, &output)?,
        }
        Ok(output.len())
    }

    /// Read back a file this store wrote
    pub fn read_table(&self, path: &Path) -> Result<Table> {
        match self.format {
            OutputFormat::Xlsx => sheet::load_table(path, SheetLocation::default(), CellMode::Typed),
            OutputFormat::Csv => read_csv(path),
        }
    }
}

fn write_xlsx(path: &Path, table: &Table) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in table.columns().iter().enumerate() {
        worksheet.write_string(0, col as u16, name)?;
    }
    for (row_idx, row) in table.rows().iter().enumerate() {
        let row32 = (row_idx + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let col16 = col as u16;
            match cell {
                Cell::Null => {}
                Cell::Number(n) => {
                    worksheet.write_number(row32, col16, *n)?;
                }
                other => {
                    if let Some(text) = other.render() {
                        worksheet.write_string(row32, col16, text)?;
                    }
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|c| c.render().unwrap_or_default()))?;
    }
    writer.flush().map_err(|e| NormalizeError::io(path, e))?;
    Ok(())
}

fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record?;
        table.push_row(
            record
                .iter()
                .map(|v| if v.is_empty() { Cell::Null } else { Cell::text(v) })
                .collect(),
        );
    }
    Ok(table)
}

/// Empty text would come back as null after a write/read cycle
fn blank_to_null(table: &Table) -> Table {
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Cell::Text(s) if s.is_empty() => Cell::Null,
                    other => other.clone(),
                })
                .collect()
        })
        .collect();
    Table::from_rows(table.columns().to_vec(), rows)
}

// ============================================================================
// NAMING
// ============================================================================

/// `最大<N>万,共<R>条`: N = floor(max / 10000) + 1 over the debit, credit and
/// balance columns (0 when none hold a number), R = row count
pub fn brief(table: &Table, columns: &StatementColumns) -> String {
    let max = [&columns.debit, &columns.credit, &columns.balance]
        .iter()
        .filter_map(|name| table.column(name))
        .flat_map(|cells| cells.into_iter().filter_map(Cell::as_f64))
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

    let units = (max.unwrap_or(0.0) / 10000.0).floor() as i64 + 1;
    format!("最大{}万,共{}条", units, table.len())
}

/// `尾号<tail>,<tail>`: last 5 characters of each distinct card number,
/// falling back to the account column when no card number is present
pub fn masked_suffix(table: &Table, columns: &StatementColumns) -> String {
    let distinct = |name: &str| -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for cell in table.column(name).unwrap_or_default() {
            if let Some(text) = cell.render() {
                if !seen.contains(&text) {
                    seen.push(text);
                }
            }
        }
        seen
    };

    let mut numbers = distinct(&columns.card);
    if numbers.is_empty() {
        numbers = distinct(&columns.account);
    }

    let tails: Vec<String> = numbers
        .iter()
        .map(|n| {
            let chars: Vec<char> = n.chars().collect();
            chars[chars.len().saturating_sub(5)..].iter().collect()
        })
        .collect();
    format!("尾号{}", tails.join(","))
}

/// Keep a name usable as a single path component inside its parent:
/// separators are replaced, and blank or dot-only names (`.`, `..`) become `_`
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.trim().trim_matches('.').is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// TESTS
// ============================================================================
