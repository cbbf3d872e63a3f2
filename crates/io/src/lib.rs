// Tabular sources for spreadsheet imports

pub mod csv;
pub mod source;
pub mod xlsx;

pub use source::{CellValue, ColumnId, Row, SourceError, Table, TabularSource};
