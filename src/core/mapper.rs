//! Purpose: The row mapper: query execution plus assembly into JSON-shaped rows.
//! Exports: `Mapper`, `ColumnList`.
//! Role: Public read surface (`rows`, `first_row`, `exactly_one_row`, `write_*`, `iterate`).
//! Invariants: A mapper is immutable after construction; only its plan cache mutates.
//! Invariants: Column plans are built at most once per result shape per mapper.
//! Invariants: The cursor is released on every exit path (the `Database::query` scope).
//! Invariants: Errors pass through the error translator exactly once, at this boundary.
//! Notes: Writers receive `[`, rows joined by `,` each ending in `\n`, then `]`.
use std::io::Write;
use std::sync::Arc;

use crate::core::assemble::Assembly;
use crate::core::cache::ShapeCache;
use crate::core::columns::ColumnPlan;
use crate::core::context::Context;
use crate::core::db::{Database, RowCursor};
use crate::core::error::{Error, ErrorKind};
use crate::core::exclude::PropertyExclusions;
use crate::core::limit::{Limiter, Unlimited};
use crate::core::mapping::Mappings;
use crate::core::options::{DefaultQuery, MapOption, MapperDefaults, ReadPlan, resolve_read};
use crate::core::post::RowPostProcessor;
use crate::core::subquery::SubQuery;
use crate::core::translate::translate_result;
use crate::core::value::{Row, Value};

/// Select list of a mapper; a list of names is joined with `,`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnList(pub String);

impl From<&str> for ColumnList {
    fn from(value: &str) -> Self {
        ColumnList(value.to_string())
    }
}

impl From<String> for ColumnList {
    fn from(value: String) -> Self {
        ColumnList(value)
    }
}

impl From<&[&str]> for ColumnList {
    fn from(value: &[&str]) -> Self {
        ColumnList(value.join(","))
    }
}

impl<const N: usize> From<[&str; N]> for ColumnList {
    fn from(value: [&str; N]) -> Self {
        ColumnList(value.join(","))
    }
}

impl From<Vec<&str>> for ColumnList {
    fn from(value: Vec<&str>) -> Self {
        ColumnList(value.join(","))
    }
}

impl From<Vec<String>> for ColumnList {
    fn from(value: Vec<String>) -> Self {
        ColumnList(value.join(","))
    }
}

/// Per-read settings that differ between a top-level read and a nested one.
pub(crate) struct ReadScope<'a> {
    pub(crate) exclusions: &'a PropertyExclusions,
    pub(crate) base_path: &'a [String],
    pub(crate) limiter: &'a dyn Limiter,
}

/// Receives assembled rows in result order.
pub(crate) trait RowSink {
    /// Called once the result set is open, before any row.
    fn begin(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Returns `Ok(false)` to stop reading.
    fn accept(&mut self, row: Row) -> Result<bool, Error>;
}

#[derive(Default)]
pub(crate) struct CollectRows {
    pub(crate) rows: Vec<Row>,
}

impl RowSink for CollectRows {
    fn accept(&mut self, row: Row) -> Result<bool, Error> {
        self.rows.push(row);
        Ok(true)
    }
}

#[derive(Default)]
pub(crate) struct FirstRow {
    pub(crate) row: Option<Row>,
}

impl RowSink for FirstRow {
    fn accept(&mut self, row: Row) -> Result<bool, Error> {
        self.row = Some(row);
        Ok(false)
    }
}

struct HandlerSink<F>(F);

impl<F> RowSink for HandlerSink<F>
where
    F: FnMut(Row) -> Result<bool, Error>,
{
    fn accept(&mut self, row: Row) -> Result<bool, Error> {
        (self.0)(row)
    }
}

struct JsonArraySink<'w, W: ?Sized> {
    writer: &'w mut W,
    opened: bool,
    written: usize,
}

impl<W: Write + ?Sized> JsonArraySink<'_, W> {
    fn finish(self) -> Result<(), Error> {
        if !self.opened {
            self.writer.write_all(b"[").map_err(write_error)?;
        }
        self.writer.write_all(b"]").map_err(write_error)
    }
}

impl<W: Write + ?Sized> RowSink for JsonArraySink<'_, W> {
    fn begin(&mut self) -> Result<(), Error> {
        self.opened = true;
        self.writer.write_all(b"[").map_err(write_error)
    }

    fn accept(&mut self, row: Row) -> Result<bool, Error> {
        if self.written > 0 {
            self.writer.write_all(b",").map_err(write_error)?;
        }
        write_row(&mut *self.writer, &row)?;
        self.written += 1;
        Ok(true)
    }
}

fn write_row<W: Write + ?Sized>(writer: &mut W, row: &Row) -> Result<(), Error> {
    serde_json::to_writer(&mut *writer, row).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to encode row")
            .with_source(err)
    })?;
    writer.write_all(b"\n").map_err(write_error)
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write rows")
        .with_source(err)
}

pub struct Mapper {
    defaults: MapperDefaults,
    plans: ShapeCache<ColumnPlan>,
}

impl Mapper {
    /// Creates a mapper over `columns`.
    ///
    /// Accepted options: `Query`, `Mappings`, `PostProcessor`, `SubQuery`,
    /// `UseDecimals`, `ErrorTranslator`.
    pub fn new(columns: impl Into<ColumnList>, options: Vec<MapOption>) -> Result<Self, Error> {
        let mut defaults = MapperDefaults::new(columns.into().0);
        defaults.apply(options)?;
        Ok(Self::from_defaults(defaults))
    }

    fn from_defaults(defaults: MapperDefaults) -> Self {
        Self {
            defaults,
            plans: ShapeCache::default(),
        }
    }

    pub(crate) fn for_sub_query(
        query: String,
        mappings: Mappings,
        sub_queries: Vec<Arc<SubQuery>>,
        post_processors: Vec<Arc<dyn RowPostProcessor>>,
        use_decimals: bool,
    ) -> Self {
        let mut defaults = MapperDefaults::new(String::new());
        defaults.default_query = Some(DefaultQuery::Full(query));
        defaults.mappings = mappings;
        defaults.sub_queries = sub_queries;
        defaults.post_processors = post_processors;
        defaults.use_decimals = use_decimals;
        Self::from_defaults(defaults)
    }

    pub fn columns(&self) -> &str {
        &self.defaults.columns
    }

    /// New mapper with `add_columns` appended, `mappings` merged over the
    /// current ones, and `options` applied as construction options.
    pub fn extend<I, S>(
        &self,
        add_columns: I,
        mappings: Mappings,
        options: Vec<MapOption>,
    ) -> Result<Mapper, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut defaults = self.defaults.clone();
        for column in add_columns {
            if !defaults.columns.is_empty() {
                defaults.columns.push(',');
            }
            defaults.columns.push_str(column.as_ref());
        }
        defaults.mappings.extend(mappings);
        defaults.apply(options)?;
        Ok(Self::from_defaults(defaults))
    }

    /// All rows, honoring any `Limiter` option.
    pub fn rows(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
    ) -> Result<Vec<Row>, Error> {
        self.run(ctx, db, args, options, true, CollectRows::default(), |sink| Ok(sink.rows))
    }

    /// The first row, or `None` for an empty result.
    pub fn first_row(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
    ) -> Result<Option<Row>, Error> {
        self.run(ctx, db, args, options, false, FirstRow::default(), |sink| Ok(sink.row))
    }

    /// The first row; an empty result is a not-found error.
    pub fn exactly_one_row(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
    ) -> Result<Row, Error> {
        self.run(ctx, db, args, options, false, FirstRow::default(), |sink| {
            sink.row.ok_or_else(Error::not_found)
        })
    }

    /// Streams all rows to `writer` as a JSON array.
    pub fn write_rows<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
    ) -> Result<(), Error> {
        let sink = JsonArraySink {
            writer,
            opened: false,
            written: 0,
        };
        self.run(ctx, db, args, options, true, sink, JsonArraySink::finish)
    }

    /// Writes the first row as a JSON object; writes nothing for an empty result.
    pub fn write_first_row<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
    ) -> Result<(), Error> {
        self.run(ctx, db, args, options, false, FirstRow::default(), |sink| {
            match sink.row {
                Some(row) => write_row(writer, &row),
                None => Ok(()),
            }
        })
    }

    /// Writes the first row as a JSON object; an empty result is a not-found
    /// error and nothing is written.
    pub fn write_exactly_one_row<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
    ) -> Result<(), Error> {
        self.run(ctx, db, args, options, false, FirstRow::default(), |sink| {
            let row = sink.row.ok_or_else(Error::not_found)?;
            write_row(writer, &row)
        })
    }

    /// Hands each row to `handler` until it returns `Ok(false)`, an error,
    /// or the limiter stops the read.
    pub fn iterate<F>(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        handler: F,
        options: &[MapOption],
    ) -> Result<(), Error>
    where
        F: FnMut(Row) -> Result<bool, Error>,
    {
        self.run(ctx, db, args, options, true, HandlerSink(handler), |_| Ok(()))
    }

    #[allow(clippy::too_many_arguments)]
    fn run<S, T>(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[MapOption],
        limited: bool,
        mut sink: S,
        finish: impl FnOnce(S) -> Result<T, Error>,
    ) -> Result<T, Error>
    where
        S: RowSink,
    {
        let plan = match resolve_read(&self.defaults, options) {
            Ok(plan) => plan,
            Err(err) => return Err(self.defaults.translator.translate(err)),
        };
        let scope = ReadScope {
            exclusions: &plan.exclusions,
            base_path: &[],
            limiter: if limited { plan.limiter.as_ref() } else { &Unlimited },
        };
        let result = self
            .read_into(ctx, db, args, &plan, &scope, &mut sink)
            .and_then(|()| finish(sink));
        translate_result(result, plan.translator.as_ref())
    }

    /// Plan for a nested read (sub-query mappers take no call options).
    pub(crate) fn nested_plan(&self) -> Result<ReadPlan<'_>, Error> {
        resolve_read(&self.defaults, &[])
    }

    pub(crate) fn read_into(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        plan: &ReadPlan<'_>,
        scope: &ReadScope<'_>,
        sink: &mut dyn RowSink,
    ) -> Result<(), Error> {
        let mappings: &Mappings = &plan.mappings;
        db.query(ctx, &plan.query, args, &mut |cursor: &mut dyn RowCursor| {
            let columns = cursor.column_types()?;
            let column_plan = if plan.has_call_mappings() {
                // call-time mappings may carry their own scanners
                Arc::new(ColumnPlan::resolve(
                    columns,
                    mappings,
                    self.defaults.use_decimals,
                ))
            } else {
                self.plans.get_or_build(&columns, || {
                    Ok(ColumnPlan::resolve(
                        columns.clone(),
                        mappings,
                        self.defaults.use_decimals,
                    ))
                })?
            };

            sink.begin()?;
            let assembly = Assembly {
                ctx,
                db,
                mappings,
                exclusions: scope.exclusions,
                sub_queries: &plan.sub_queries,
                post_processors: &plan.post_processors,
                base_path: scope.base_path,
            };
            let mut row_count = 0;
            while let Some(raw) = cursor.next_row()? {
                row_count += 1;
                if scope.limiter.limit_reached(row_count) {
                    tracing::debug!(rows = row_count - 1, "row limit reached");
                    break;
                }
                let values = column_plan.scan(raw)?;
                let row = assembly.assemble(column_plan.columns(), values)?;
                if !sink.accept(row)? {
                    break;
                }
            }
            Ok(())
        })
    }

    #[cfg(test)]
    pub(crate) fn cached_plans(&self) -> usize {
        self.plans.len()
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("columns", &self.defaults.columns)
            .field("default_query", &self.defaults.default_query)
            .field("mappings", &self.defaults.mappings.len())
            .field("sub_queries", &self.defaults.sub_queries.len())
            .field("post_processors", &self.defaults.post_processors.len())
            .field("use_decimals", &self.defaults.use_decimals)
            .finish()
    }
}
