//! Purpose: Resolve a per-column scanning strategy from result-set metadata.
//! Exports: `ColumnPlan`, `resolve_scanner`.
//! Role: Built once per result shape per mapper, then reused for every row scanned.
//! Invariants: Resolution order per column: custom scanner from mappings, JSON database
//! type, decimal-family database type, then the driver's native scan type.
//! Invariants: With decimals disabled, numeric columns are passed through untouched.
use crate::core::cache::Shaped;
use crate::core::db::{ColumnType, ScanType};
use crate::core::error::{Error, ErrorKind};
use crate::core::mapping::Mappings;
use crate::core::scan::Scanner;
use crate::core::value::Value;

#[derive(Debug)]
pub struct ColumnPlan {
    columns: Vec<ColumnType>,
    scanners: Vec<Scanner>,
}

impl ColumnPlan {
    pub fn resolve(columns: Vec<ColumnType>, mappings: &Mappings, use_decimals: bool) -> Self {
        let scanners = columns
            .iter()
            .map(|column| resolve_scanner(column, mappings, use_decimals))
            .collect();
        tracing::debug!(
            columns = columns.len(),
            use_decimals,
            "resolved column plan"
        );
        Self { columns, scanners }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnType] {
        &self.columns
    }

    pub fn scanners(&self) -> &[Scanner] {
        &self.scanners
    }

    /// Scans one row of raw cells into normalized values, in column order.
    pub fn scan(&self, raw: Vec<Value>) -> Result<Vec<Value>, Error> {
        if raw.len() != self.columns.len() {
            return Err(Error::new(ErrorKind::Internal).with_message(format!(
                "row has {} cells, expected {}",
                raw.len(),
                self.columns.len()
            )));
        }
        raw.into_iter()
            .zip(self.scanners.iter().zip(&self.columns))
            .map(|(cell, (scanner, column))| {
                scanner
                    .scan(cell)
                    .map_err(|err| with_column_context(err, &column.name))
            })
            .collect()
    }
}

impl Shaped for ColumnPlan {
    fn matches(&self, columns: &[ColumnType]) -> bool {
        self.columns == columns
    }
}

fn with_column_context(err: Error, column: &str) -> Error {
    if err.column().is_some() {
        err
    } else {
        err.with_column(column)
    }
}

pub fn resolve_scanner(column: &ColumnType, mappings: &Mappings, use_decimals: bool) -> Scanner {
    if let Some(scanner) = mappings.get(&column.name).and_then(|m| m.scanner.clone()) {
        return Scanner::Custom(scanner);
    }
    let db_type = column.database_type.as_str();
    if matches!(db_type, "JSON" | "JSONB") {
        return Scanner::Json;
    }
    if use_decimals && is_decimal_type(db_type) {
        return Scanner::Decimal;
    }
    match column.scan_type {
        ScanType::Text => Scanner::Text,
        ScanType::Float if use_decimals => Scanner::Decimal,
        _ => Scanner::Raw,
    }
}

fn is_decimal_type(db_type: &str) -> bool {
    matches!(db_type, "DECIMAL" | "FLOAT" | "DOUBLE" | "NUMERIC") || db_type.starts_with("FLOAT")
}
