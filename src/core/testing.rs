// Scripted in-memory database for unit tests; records every statement it sees.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::context::Context;
use crate::core::db::{ColumnType, CursorReader, Database, RowCursor, ScanType};
use crate::core::error::{Error, ErrorKind};
use crate::core::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Call {
    pub(crate) query: String,
    pub(crate) args: Vec<Value>,
}

enum Scripted {
    Rows {
        columns: Vec<ColumnType>,
        rows: Vec<Vec<Value>>,
    },
    Fail(Error),
}

/// Answers queries in the order they were scripted.
#[derive(Default)]
pub(crate) struct MockDatabase {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<Call>>,
    fetched: AtomicUsize,
}

impl MockDatabase {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Next query returns `rows` under text columns named `names`.
    pub(crate) fn expect_rows(self, names: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = names
            .iter()
            .map(|name| ColumnType::new(*name, "TEXT", ScanType::Text))
            .collect();
        self.expect_typed_rows(columns, rows)
    }

    pub(crate) fn expect_typed_rows(self, columns: Vec<ColumnType>, rows: Vec<Vec<Value>>) -> Self {
        self.push(Scripted::Rows { columns, rows });
        self
    }

    pub(crate) fn expect_error(self, err: Error) -> Self {
        self.push(Scripted::Fail(err));
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Rows handed out through cursors so far.
    pub(crate) fn rows_fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    fn push(&self, scripted: Scripted) {
        self.script.lock().expect("script lock").push_back(scripted);
    }

    fn next(&self, ctx: &Context, query: &str, args: &[Value]) -> Result<Scripted, Error> {
        self.calls.lock().expect("calls lock").push(Call {
            query: query.to_string(),
            args: args.to_vec(),
        });
        ctx.check()?;
        match self.script.lock().expect("script lock").pop_front() {
            Some(Scripted::Fail(err)) => Err(err),
            Some(scripted) => Ok(scripted),
            None => Err(Error::new(ErrorKind::Internal)
                .with_message(format!("unexpected query: {query}"))),
        }
    }
}

struct MockCursor<'a> {
    columns: Vec<ColumnType>,
    rows: std::vec::IntoIter<Vec<Value>>,
    fetched: &'a AtomicUsize,
}

impl RowCursor for MockCursor<'_> {
    fn column_types(&self) -> Result<Vec<ColumnType>, Error> {
        Ok(self.columns.clone())
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, Error> {
        let row = self.rows.next();
        if row.is_some() {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }
        Ok(row)
    }
}

impl Database for MockDatabase {
    fn query(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
        reader: &mut CursorReader<'_>,
    ) -> Result<(), Error> {
        match self.next(ctx, query, args)? {
            Scripted::Rows { columns, rows } => {
                let mut cursor = MockCursor {
                    columns,
                    rows: rows.into_iter(),
                    fetched: &self.fetched,
                };
                reader(&mut cursor)
            }
            Scripted::Fail(err) => Err(err),
        }
    }

    fn query_row(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
    ) -> Result<Option<Vec<Value>>, Error> {
        match self.next(ctx, query, args)? {
            Scripted::Rows { rows, .. } => Ok(rows.into_iter().next()),
            Scripted::Fail(err) => Err(err),
        }
    }

    fn execute(&self, ctx: &Context, query: &str, args: &[Value]) -> Result<u64, Error> {
        self.next(ctx, query, args)?;
        Ok(0)
    }
}
