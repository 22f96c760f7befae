//! Purpose: `Database` implementation over a `rusqlite::Connection`.
//! Exports: `column_type`, `Database for rusqlite::Connection`, `ToSql for Value`.
//! Role: Reference collaborator used by the CLI and the integration tests.
//! Invariants: Column metadata comes from declared types, upper-cased with parameters
//! stripped (`DECIMAL(10,2)` becomes `DECIMAL`).
//! Invariants: The context is checked before each statement and before each row.
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Statement, params_from_iter};

use crate::core::context::Context;
use crate::core::db::{ColumnType, CursorReader, Database, RowCursor, ScanType};
use crate::core::error::{Error, ErrorKind};
use crate::core::value::Value;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Value::Decimal(d) => ToSqlOutput::Owned(Sql::Text(d.normalize().to_string())),
            Value::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Value::Bytes(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Value::List(_) | Value::Object(_) => {
                let encoded = serde_json::to_string(self)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                ToSqlOutput::Owned(Sql::Text(encoded))
            }
        })
    }
}

/// Column metadata for a declared SQLite type (`None` for expressions).
pub fn column_type(name: &str, decl_type: Option<&str>) -> ColumnType {
    let database_type = decl_type
        .and_then(|decl| decl.split('(').next())
        .map(|base| base.trim().to_ascii_uppercase())
        .unwrap_or_default();
    let scan_type = scan_type_for(&database_type);
    ColumnType::new(name, database_type, scan_type)
}

// SQLite type affinity rules, plus BOOL and JSON as text.
fn scan_type_for(database_type: &str) -> ScanType {
    if database_type.contains("INT") {
        ScanType::Int
    } else if database_type.contains("CHAR")
        || database_type.contains("CLOB")
        || database_type.contains("TEXT")
        || database_type.starts_with("JSON")
    {
        ScanType::Text
    } else if database_type.contains("BLOB") {
        ScanType::Bytes
    } else if database_type.contains("REAL")
        || database_type.contains("FLOA")
        || database_type.contains("DOUB")
    {
        ScanType::Float
    } else if database_type.starts_with("BOOL") {
        ScanType::Bool
    } else {
        ScanType::Unknown
    }
}

fn value_from_ref(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

fn driver_error(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found().with_source(err),
        other => Error::new(ErrorKind::Database)
            .with_message(other.to_string())
            .with_source(other),
    }
}

fn column_types(stmt: &Statement<'_>) -> Vec<ColumnType> {
    stmt.columns()
        .iter()
        .map(|column| column_type(column.name(), column.decl_type()))
        .collect()
}

fn read_cells(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<Value>, Error> {
    (0..width)
        .map(|idx| row.get_ref(idx).map(value_from_ref).map_err(driver_error))
        .collect()
}

struct SqliteCursor<'s, 'c> {
    columns: Vec<ColumnType>,
    rows: rusqlite::Rows<'s>,
    ctx: &'c Context,
}

impl RowCursor for SqliteCursor<'_, '_> {
    fn column_types(&self) -> Result<Vec<ColumnType>, Error> {
        Ok(self.columns.clone())
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, Error> {
        self.ctx.check()?;
        let width = self.columns.len();
        match self.rows.next().map_err(driver_error)? {
            Some(row) => read_cells(row, width).map(Some),
            None => Ok(None),
        }
    }
}

impl Database for Connection {
    fn query(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
        reader: &mut CursorReader<'_>,
    ) -> Result<(), Error> {
        ctx.check()?;
        tracing::trace!(sql = query, args = args.len(), "sqlite query");
        let mut stmt = self.prepare(query).map_err(driver_error)?;
        let columns = column_types(&stmt);
        let rows = stmt.query(params_from_iter(args)).map_err(driver_error)?;
        let mut cursor = SqliteCursor { columns, rows, ctx };
        reader(&mut cursor)
    }

    fn query_row(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
    ) -> Result<Option<Vec<Value>>, Error> {
        ctx.check()?;
        let mut stmt = self.prepare(query).map_err(driver_error)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(args)).map_err(driver_error)?;
        match rows.next().map_err(driver_error)? {
            Some(row) => read_cells(row, width).map(Some),
            None => Ok(None),
        }
    }

    fn execute(&self, ctx: &Context, query: &str, args: &[Value]) -> Result<u64, Error> {
        ctx.check()?;
        let changed =
            Connection::execute(self, query, params_from_iter(args)).map_err(driver_error)?;
        Ok(changed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::column_type;
    use crate::core::context::Context;
    use crate::core::db::{Database, ScanType};
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;
    use rusqlite::Connection;

    #[test]
    fn declared_types_are_normalized() {
        let decimal = column_type("price", Some("decimal(10, 2)"));
        assert_eq!(decimal.database_type, "DECIMAL");
        assert_eq!(decimal.scan_type, ScanType::Unknown);
        assert_eq!(column_type("n", Some("BIGINT")).scan_type, ScanType::Int);
        assert_eq!(column_type("s", Some("varchar(20)")).scan_type, ScanType::Text);
        assert_eq!(column_type("d", Some("JSON")).database_type, "JSON");
        assert_eq!(column_type("r", Some("DOUBLE")).scan_type, ScanType::Float);
        assert_eq!(column_type("e", None).database_type, "");
    }

    #[test]
    fn query_row_execute_and_args() {
        let conn = Connection::open_in_memory().expect("open");
        let ctx = Context::new();
        Database::execute(&conn, &ctx, "CREATE TABLE t (id INTEGER, name TEXT, raw BLOB)", &[])
            .expect("create");
        let changed = Database::execute(
            &conn,
            &ctx,
            "INSERT INTO t VALUES (?, ?, ?)",
            &[Value::Int(1), Value::from("a"), Value::Bytes(vec![1, 2])],
        )
        .expect("insert");
        assert_eq!(changed, 1);

        let row = Database::query_row(
            &conn,
            &ctx,
            "SELECT id, name, raw FROM t WHERE id = ?",
            &[Value::Int(1)],
        )
        .expect("query")
        .expect("row");
        assert_eq!(row, vec![Value::Int(1), Value::from("a"), Value::Bytes(vec![1, 2])]);
        let missing =
            Database::query_row(&conn, &ctx, "SELECT id FROM t WHERE id = ?", &[Value::Int(2)])
                .expect("query");
        assert!(missing.is_none());
    }

    #[test]
    fn errors_and_cancellation() {
        let conn = Connection::open_in_memory().expect("open");
        let ctx = Context::new();
        let err = Database::query_row(&conn, &ctx, "SELECT * FROM missing", &[])
            .expect_err("missing table");
        assert_eq!(err.kind(), ErrorKind::Database);

        ctx.cancel();
        let err = Database::query_row(&conn, &ctx, "SELECT 1", &[]).expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
