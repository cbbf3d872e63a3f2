//! Tabular source model shared by every reader.
//!
//! A source is a single sheet: row 1 holds the column headings, rows 2..N
//! are data. Data rows are addressed 1-based (data row 1 = sheet row 2),
//! columns by spreadsheet letters.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// File could not be read.
    Io(String),
    /// File was read but its content is malformed.
    Parse(String),
    /// Extension not handled by any reader.
    UnsupportedFormat(String),
    /// Workbook has no sheets.
    EmptyWorkbook,
    /// Requested data row does not exist.
    RowOutOfRange { row: usize, rows: usize },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::UnsupportedFormat(ext) => write!(f, "unsupported file format: '{ext}'"),
            Self::EmptyWorkbook => write!(f, "workbook contains no sheets"),
            Self::RowOutOfRange { row, rows } => {
                write!(f, "data row {row} out of range (file has {rows} data rows)")
            }
        }
    }
}

impl std::error::Error for SourceError {}

// ---------------------------------------------------------------------------
// Column ids
// ---------------------------------------------------------------------------

/// Spreadsheet column letters: A..Z, AA..AZ, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnId(String);

impl ColumnId {
    /// Column id for a 0-based column index.
    pub fn from_index(index: usize) -> Self {
        let mut n = index + 1;
        let mut letters = Vec::new();
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push(b'A' + rem as u8);
            n = (n - 1) / 26;
        }
        letters.reverse();
        Self(String::from_utf8(letters).unwrap_or_default())
    }

    /// 0-based column index.
    pub fn index(&self) -> usize {
        self.0
            .bytes()
            .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
            - 1
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ColumnId {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SourceError::Parse(format!("invalid column id '{s}'")));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl PartialOrd for ColumnId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColumnId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Cells and rows
// ---------------------------------------------------------------------------

/// Raw cell value as delivered by the reader. No coercion is applied:
/// CSV cells are always text, Excel cells keep their stored type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(s) => f.write_str(s),
            // Integers without decimals, like the grid shows them
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

static EMPTY_CELL: CellValue = CellValue::Empty;

/// One data row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    number: usize,
    cells: Vec<CellValue>,
}

impl Row {
    pub fn new(number: usize, cells: Vec<CellValue>) -> Self {
        Self { number, cells }
    }

    /// 1-based data row number (header excluded).
    pub fn number(&self) -> usize {
        self.number
    }

    /// Cell at `column`, `Empty` when the row is shorter.
    pub fn cell(&self, column: &ColumnId) -> &CellValue {
        self.cells.get(column.index()).unwrap_or(&EMPTY_CELL)
    }

    /// Every cell in column order.
    pub fn cells(&self) -> impl Iterator<Item = (ColumnId, &CellValue)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, value)| (ColumnId::from_index(i), value))
    }
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

pub trait TabularSource {
    /// Heading text of row 1, keyed by column id, in column order.
    fn columns(&self) -> Vec<(ColumnId, String)>;

    /// Number of data rows (header excluded).
    fn row_count(&self) -> usize;

    /// Data row by 1-based number.
    fn row(&self, number: usize) -> Result<Row, SourceError>;

    /// All data rows in file order.
    fn rows(&self) -> Box<dyn Iterator<Item = Result<Row, SourceError>> + '_> {
        Box::new((1..=self.row_count()).map(move |n| self.row(n)))
    }
}

// ---------------------------------------------------------------------------
// In-memory table
// ---------------------------------------------------------------------------

/// A fully loaded sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headings: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Build a table from a raw grid whose first row holds the headings.
    /// Trailing empty rows are dropped and every row is padded to the
    /// widest data column.
    pub fn from_grid(mut grid: Vec<Vec<CellValue>>) -> Self {
        while grid
            .last()
            .is_some_and(|row| row.iter().all(CellValue::is_empty))
        {
            grid.pop();
        }

        let width = grid
            .iter()
            .map(|row| {
                row.iter()
                    .rposition(|c| !c.is_empty())
                    .map_or(0, |last| last + 1)
            })
            .max()
            .unwrap_or(0);

        let mut iter = grid.into_iter();
        let headings = iter
            .next()
            .map(|row| {
                let mut headings: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                headings.resize(width, String::new());
                headings
            })
            .unwrap_or_default();

        let rows = iter
            .map(|mut row| {
                row.resize(width, CellValue::Empty);
                row
            })
            .collect();

        Self { headings, rows }
    }

    /// Open a file, picking the reader from its extension.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let table = match ext.as_str() {
            "csv" | "txt" => crate::csv::import(path)?,
            "tsv" => crate::csv::import_tsv(path)?,
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => crate::xlsx::import(path)?,
            _ => return Err(SourceError::UnsupportedFormat(ext)),
        };

        log::debug!(
            "loaded {}: {} columns, {} data rows",
            path.display(),
            table.headings.len(),
            table.rows.len()
        );
        Ok(table)
    }
}

impl TabularSource for Table {
    fn columns(&self) -> Vec<(ColumnId, String)> {
        self.headings
            .iter()
            .enumerate()
            .map(|(i, h)| (ColumnId::from_index(i), h.clone()))
            .collect()
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, number: usize) -> Result<Row, SourceError> {
        if number == 0 || number > self.rows.len() {
            return Err(SourceError::RowOutOfRange {
                row: number,
                rows: self.rows.len(),
            });
        }
        Ok(Row::new(number, self.rows[number - 1].clone()))
    }
}
