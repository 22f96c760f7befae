//! Purpose: Narrow database collaborator interface consumed by the mapping core.
//! Exports: `Database`, `RowCursor`, `ColumnType`, `ScanType`.
//! Role: The core never opens, closes or pools connections; callers supply a handle.
//! Invariants: `Database::query` scopes the cursor to the reader closure; it is
//! released on every exit path (end of rows, early stop, or error).
//! Invariants: Cells and bind arguments share the `Value` model.
use crate::core::context::Context;
use crate::core::error::Error;
use crate::core::value::Value;

/// Driver-native scan type of a result column.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScanType {
    Text,
    Bytes,
    Int,
    Float,
    Bool,
    Unknown,
}

/// Column metadata reported by the driver for one result column.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ColumnType {
    pub name: String,
    /// Upper-case database type name without parameters (e.g. `DECIMAL`, `JSONB`).
    pub database_type: String,
    pub scan_type: ScanType,
}

impl ColumnType {
    pub fn new(
        name: impl Into<String>,
        database_type: impl Into<String>,
        scan_type: ScanType,
    ) -> Self {
        Self {
            name: name.into(),
            database_type: database_type.into(),
            scan_type,
        }
    }
}

/// Live result cursor, valid only inside a `Database::query` reader.
pub trait RowCursor {
    fn column_types(&self) -> Result<Vec<ColumnType>, Error>;

    /// Raw cells of the next row, in column order; `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, Error>;
}

pub type CursorReader<'r> = dyn FnMut(&mut dyn RowCursor) -> Result<(), Error> + 'r;

pub trait Database {
    /// Runs `query` and hands the cursor to `reader`. Errors from `reader`
    /// are returned unchanged.
    fn query(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
        reader: &mut CursorReader<'_>,
    ) -> Result<(), Error>;

    /// Runs `query` and returns at most one row of raw cells.
    fn query_row(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
    ) -> Result<Option<Vec<Value>>, Error>;

    /// Runs a statement without a result set, returning the affected row count.
    fn execute(&self, ctx: &Context, query: &str, args: &[Value]) -> Result<u64, Error>;
}

impl<D: Database + ?Sized> Database for &D {
    fn query(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
        reader: &mut CursorReader<'_>,
    ) -> Result<(), Error> {
        (**self).query(ctx, query, args, reader)
    }

    fn query_row(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
    ) -> Result<Option<Vec<Value>>, Error> {
        (**self).query_row(ctx, query, args)
    }

    fn execute(&self, ctx: &Context, query: &str, args: &[Value]) -> Result<u64, Error> {
        (**self).execute(ctx, query, args)
    }
}
