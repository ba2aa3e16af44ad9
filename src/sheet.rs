// 📂 Sheet Loader - spreadsheet files → Table
// Input sheets are read as text only; no numeric or date inference at read time

use crate::error::{NormalizeError, Result};
use crate::table::{format_number, Cell, Table};
use calamine::{open_workbook_auto, Data, Range, Reader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Extensions calamine can open
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How cell values are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellMode {
    /// Everything becomes `Cell::Text` (raw input files)
    Text,
    /// Numbers stay `Cell::Number` (re-reading our own output files)
    Typed,
}

/// Where the table sits inside the workbook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLocation {
    /// Zero-based sheet index
    pub sheet: usize,
    /// Header row, counted from the first used row of the sheet
    pub header_row: usize,
}

impl Default for SheetLocation {
    fn default() -> Self {
        SheetLocation {
            sheet: 0,
            header_row: 0,
        }
    }
}

fn open_range(path: &Path, sheet: usize) -> Result<Range<Data>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| NormalizeError::Spreadsheet {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    workbook
        .worksheet_range_at(sheet)
        .ok_or_else(|| NormalizeError::Spreadsheet {
            path: path.to_path_buf(),
            message: format!("workbook has no sheet at index {}", sheet),
        })?
        .map_err(|e| NormalizeError::Spreadsheet {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Raw cell values of one row, or an empty vector when the sheet is shorter
pub fn read_row(path: &Path, location: SheetLocation) -> Result<Vec<Data>> {
    let range = open_range(path, location.sheet)?;
    Ok(range
        .rows()
        .nth(location.header_row)
        .map(|row| row.to_vec())
        .unwrap_or_default())
}

/// Load a sheet as a table whose header is the row at `location.header_row`
pub fn load_table(path: &Path, location: SheetLocation, mode: CellMode) -> Result<Table> {
    let range = open_range(path, location.sheet)?;
    let mut rows = range.rows().skip(location.header_row);

    let header = match rows.next() {
        Some(row) => header_names(row),
        None => return Ok(Table::default()),
    };

    let mut table = Table::new(header);
    for row in rows {
        let cells: Vec<Cell> = row.iter().map(|d| convert(d, mode)).collect();
        if cells.iter().all(Cell::is_null) {
            continue;
        }
        table.push_row(cells);
    }

    log::debug!(
        "loaded {} rows x {} columns from {}",
        table.len(),
        table.columns().len(),
        path.display()
    );
    Ok(table)
}

/// Text rendering of a single raw value, `None` for empty cells
pub fn render_data(data: &Data) -> Option<String> {
    match data {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(n) => Some(format_number(*n)),
        Data::Int(n) => Some(n.to_string()),
        Data::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => Some(match dt.as_datetime() {
            Some(naive) => naive.format(DATETIME_FORMAT).to_string(),
            None => format_number(dt.as_f64()),
        }),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

fn convert(data: &Data, mode: CellMode) -> Cell {
    match (mode, data) {
        (CellMode::Typed, Data::Float(n)) => Cell::Number(*n),
        (CellMode::Typed, Data::Int(n)) => Cell::Number(*n as f64),
        _ => render_data(data).map(Cell::Text).unwrap_or(Cell::Null),
    }
}

/// Column names from the header row. Blank cells get `Unnamed: <n>`,
/// repeated names get `.1`, `.2`, ... suffixes so every name is unique.
fn header_names(row: &[Data]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    row.iter()
        .enumerate()
        .map(|(i, data)| {
            let base = render_data(data).unwrap_or_else(|| format!("Unnamed: {}", i));
            let seen = counts.entry(base.clone()).or_insert(0);
            let name = if *seen == 0 {
                base
            } else {
                format!("{}.{}", base, seen)
            };
            *seen += 1;
            name
        })
        .collect()
}

pub fn is_spreadsheet(path: &Path) -> bool {
    let is_lock_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('~'))
        .unwrap_or(true);

    !is_lock_file
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
}

/// Expand directories into their spreadsheet files (not recursive), sorted by name
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries = std::fs::read_dir(input).map_err(|e| NormalizeError::io(input, e))?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_spreadsheet(p))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn write_fixture(path: &Path) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "账号").unwrap();
        sheet.write_string(0, 1, "金额").unwrap();
        sheet.write_string(0, 3, "金额").unwrap();
        sheet.write_string(1, 0, "6222001").unwrap();
        sheet.write_number(1, 1, 1500.0).unwrap();
        sheet.write_number(1, 3, 12.25).unwrap();
        sheet.write_string(3, 0, "6222002").unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_load_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.xlsx");
        write_fixture(&path);

        let table = load_table(&path, SheetLocation::default(), CellMode::Text).unwrap();
        assert_eq!(table.columns(), &["账号", "金额", "Unnamed: 2", "金额.1"]);
        // blank row 3 is dropped
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "金额"), Some(&Cell::text("1500")));
        assert_eq!(table.get(0, "金额.1"), Some(&Cell::text("12.25")));
        assert_eq!(table.get(1, "金额"), Some(&Cell::Null));
    }

    #[test]
    fn test_load_typed_keeps_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.xlsx");
        write_fixture(&path);

        let table = load_table(&path, SheetLocation::default(), CellMode::Typed).unwrap();
        assert_eq!(table.get(0, "金额"), Some(&Cell::Number(1500.0)));
    }

    /// Title row above the header on the first sheet, plain header on the second
    fn write_titled_fixture(path: &Path) {
        let mut workbook = Workbook::new();
        {
            let sheet = workbook.add_worksheet();
            sheet.write_string(0, 0, "建设银行交易明细").unwrap();
            sheet.write_string(1, 0, "账号").unwrap();
            sheet.write_string(1, 1, "金额").unwrap();
            sheet.write_string(2, 0, "6222001").unwrap();
            sheet.write_string(2, 1, "88").unwrap();
        }
        {
            let sheet = workbook.add_worksheet();
            sheet.write_string(0, 0, "卡号").unwrap();
            sheet.write_string(1, 0, "C1").unwrap();
            sheet.write_string(2, 0, "C2").unwrap();
        }
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_header_below_title_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titled.xlsx");
        write_titled_fixture(&path);

        let location = SheetLocation {
            header_row: 1,
            ..SheetLocation::default()
        };
        let table = load_table(&path, location, CellMode::Text).unwrap();
        assert_eq!(table.columns(), &["账号", "金额"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0, "金额"), Some(&Cell::text("88")));

        let header = read_row(&path, location).unwrap();
        assert_eq!(header, vec![Data::String("账号".into()), Data::String("金额".into())]);
    }

    #[test]
    fn test_second_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titled.xlsx");
        write_titled_fixture(&path);

        let location = SheetLocation {
            sheet: 1,
            header_row: 0,
        };
        let table = load_table(&path, location, CellMode::Text).unwrap();
        assert_eq!(table.columns(), &["卡号"]);
        assert_eq!(table.len(), 2);

        let missing = SheetLocation {
            sheet: 5,
            header_row: 0,
        };
        assert!(matches!(
            load_table(&path, missing, CellMode::Text),
            Err(NormalizeError::Spreadsheet { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_table(
            Path::new("/nonexistent/in.xlsx"),
            SheetLocation::default(),
            CellMode::Text,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::Spreadsheet { .. }));
    }

    #[test]
    fn test_spreadsheet_filter() {
        assert!(is_spreadsheet(Path::new("a/流水.xlsx")));
        assert!(is_spreadsheet(Path::new("a/b.XLS")));
        assert!(!is_spreadsheet(Path::new("a/~$b.xlsx")));
        assert!(!is_spreadsheet(Path::new("a/b.csv")));
    }
}
