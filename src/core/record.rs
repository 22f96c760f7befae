//! Purpose: Map result rows into caller-defined record types instead of JSON-shaped rows.
//! Exports: `Record`, `Field`, `FromValue`, `RecordMapper`, `RecordOption`,
//! `RecordPostProcessor`, `FieldColumnNamer`, `record_fields!`.
//! Role: Typed counterpart of `Mapper`; fields are declared once through `Record::fields`.
//! Invariants: Two fields resolving to the same column is a construction error.
//! Invariants: A field whose column resolves to `-` (or nothing) is never set.
//! Invariants: Result columns without a field are discarded unless
//! `ErrorOnUnmappedColumns` is set.
use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bstr::ByteSlice;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::core::cache::{ShapeCache, Shaped};
use crate::core::context::Context;
use crate::core::db::{ColumnType, Database, RowCursor};
use crate::core::error::{Error, ErrorKind};
use crate::core::limit::{Limiter, MaxRows, Unlimited};
use crate::core::mapper::ColumnList;
use crate::core::options::{AddClause, Query, check_forged_columns};
use crate::core::scan::{bool_column, scan_decimal, scan_text};
use crate::core::translate::{ErrorTranslator, PassThrough, translate_result};
use crate::core::value::Value;
use crate::json::parse;

/// Converts one raw cell into a field type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Error>;
}

fn unsupported<T>(value: &Value) -> Error {
    Error::decode(format!(
        "cannot convert {} to {}",
        value.type_name(),
        type_name::<T>()
    ))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Error> {
        match scan_text(value) {
            Value::Text(text) => Ok(text),
            value @ (Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Decimal(_)) => {
                Ok(value.to_string())
            }
            other => Err(unsupported::<String>(&other)),
        }
    }
}

// Whole floats in `[min, max)`; `as` would saturate anything outside.
fn whole_float_in(f: f64, min: f64, max: f64) -> bool {
    f.fract() == 0.0 && f >= min && f < max
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            Value::Float(f) if whole_float_in(f, i64::MIN as f64, i64::MAX as f64) => {
                Ok(f as i64)
            }
            Value::Decimal(d) if d.fract().is_zero() => {
                d.to_i64().ok_or_else(|| unsupported::<i64>(&Value::Decimal(d)))
            }
            Value::Text(ref text) => text
                .trim()
                .parse()
                .map_err(|err| unsupported::<i64>(&value).with_source(err)),
            Value::Bytes(ref bytes) => bytes
                .to_str_lossy()
                .trim()
                .parse()
                .map_err(|err| unsupported::<i64>(&value).with_source(err)),
            other => Err(unsupported::<i64>(&other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, Error> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|err| {
            Error::decode(format!("value {wide} out of range for i32")).with_source(err)
        })
    }
}

impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Float(f) if whole_float_in(f, 0.0, u64::MAX as f64) => Ok(f as u64),
            Value::Float(_) => Err(unsupported::<u64>(&value)),
            Value::Decimal(d) if d.fract().is_zero() => {
                d.to_u64().ok_or_else(|| unsupported::<u64>(&Value::Decimal(d)))
            }
            Value::Text(ref text) => text
                .trim()
                .parse()
                .map_err(|err| unsupported::<u64>(&value).with_source(err)),
            other => {
                let wide = i64::from_value(other)?;
                u64::try_from(wide).map_err(|err| {
                    Error::decode(format!("value {wide} out of range for u64")).with_source(err)
                })
            }
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::Decimal(d) => d.to_f64().ok_or_else(|| unsupported::<f64>(&Value::Decimal(d))),
            Value::Text(ref text) => text
                .trim()
                .parse()
                .map_err(|err| unsupported::<f64>(&value).with_source(err)),
            other => Err(unsupported::<f64>(&other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Error> {
        if value.is_null() {
            return Err(unsupported::<bool>(&value));
        }
        match bool_column(value)? {
            Value::Bool(b) => Ok(b),
            other => Err(unsupported::<bool>(&other)),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, Error> {
        match scan_decimal(value)? {
            Value::Decimal(d) => Ok(d),
            other => Err(unsupported::<Decimal>(&other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(bytes) => Ok(bytes),
            Value::Text(text) => Ok(text.into_bytes()),
            other => Err(unsupported::<Vec<u8>>(&other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Text(text) => parse::from_str(&text)
                .map_err(|err| Error::decode("invalid json column value").with_source(err)),
            Value::Bytes(bytes) => parse::from_slice(&bytes)
                .map_err(|err| Error::decode("invalid json column value").with_source(err)),
            other => Ok(other.to_json()),
        }
    }
}

type FieldSetter<T> = Arc<dyn Fn(&mut T, Value) -> Result<(), Error> + Send + Sync>;

/// One settable field of a record, with its declared column.
pub struct Field<T> {
    name: String,
    column: String,
    set: FieldSetter<T>,
}

impl<T: 'static> Field<T> {
    /// `column` is the declared column; empty means undeclared, `-` means never mapped.
    pub fn new<V, F>(name: impl Into<String>, column: impl Into<String>, set: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            column: column.into(),
            set: Arc::new(move |record: &mut T, value: Value| -> Result<(), Error> {
                set(record, V::from_value(value)?);
                Ok(())
            }),
        }
    }

    /// Fields of an embedded record, reached through `access`.
    pub fn flatten<U, F>(access: F) -> Vec<Field<T>>
    where
        U: Record,
        F: Fn(&mut T) -> &mut U + Send + Sync + 'static,
    {
        let access = Arc::new(access);
        U::fields()
            .into_iter()
            .map(|inner| {
                let access = Arc::clone(&access);
                let inner_set = inner.set;
                Field {
                    name: inner.name,
                    column: inner.column,
                    set: Arc::new(move |record: &mut T, value: Value| {
                        inner_set(access(record), value)
                    }),
                }
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column)
            .finish()
    }
}

/// A type rows can be mapped into.
pub trait Record: Default + 'static {
    fn fields() -> Vec<Field<Self>>;
}

/// Declares simple record fields: `record_fields![Person; id => "id", name => "name"]`.
#[macro_export]
macro_rules! record_fields {
    ($record:ty; $($field:ident => $column:expr),* $(,)?) => {
        vec![$(
            $crate::core::record::Field::new(
                stringify!($field),
                $column,
                |record: &mut $record, value| record.$field = value,
            )
        ),*]
    };
}

/// Derives the column for a field; the first namer returning `Some` decides.
pub trait FieldColumnNamer: Send + Sync {
    fn column_name(&self, record: &str, field: &str, declared: Option<&str>) -> Option<String>;
}

impl<F> FieldColumnNamer for F
where
    F: Fn(&str, &str, Option<&str>) -> Option<String> + Send + Sync,
{
    fn column_name(&self, record: &str, field: &str, declared: Option<&str>) -> Option<String> {
        self(record, field, declared)
    }
}

/// Uses the column declared with the field.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeclaredColumnNamer;

impl FieldColumnNamer for DeclaredColumnNamer {
    fn column_name(&self, _record: &str, _field: &str, declared: Option<&str>) -> Option<String> {
        declared.map(str::to_string)
    }
}

pub trait RecordPostProcessor<T>: Send + Sync {
    fn post_process(&self, ctx: &Context, db: &dyn Database, record: &mut T) -> Result<(), Error>;
}

impl<T, F> RecordPostProcessor<T> for F
where
    F: Fn(&Context, &dyn Database, &mut T) -> Result<(), Error> + Send + Sync,
{
    fn post_process(&self, ctx: &Context, db: &dyn Database, record: &mut T) -> Result<(), Error> {
        self(ctx, db, record)
    }
}

pub enum RecordOption<T> {
    Query(Query),
    AddClause(AddClause),
    PostProcessor(Arc<dyn RecordPostProcessor<T>>),
    Limiter(Arc<dyn Limiter>),
    ErrorTranslator(Arc<dyn ErrorTranslator>),
    ErrorOnUnknownColumns(bool),
    ErrorOnUnmappedColumns(bool),
    ColumnNamer(Arc<dyn FieldColumnNamer>),
}

impl<T> Clone for RecordOption<T> {
    fn clone(&self) -> Self {
        match self {
            RecordOption::Query(query) => RecordOption::Query(query.clone()),
            RecordOption::AddClause(clause) => RecordOption::AddClause(clause.clone()),
            RecordOption::PostProcessor(p) => RecordOption::PostProcessor(Arc::clone(p)),
            RecordOption::Limiter(l) => RecordOption::Limiter(Arc::clone(l)),
            RecordOption::ErrorTranslator(t) => RecordOption::ErrorTranslator(Arc::clone(t)),
            RecordOption::ErrorOnUnknownColumns(flag) => RecordOption::ErrorOnUnknownColumns(*flag),
            RecordOption::ErrorOnUnmappedColumns(flag) => {
                RecordOption::ErrorOnUnmappedColumns(*flag)
            }
            RecordOption::ColumnNamer(n) => RecordOption::ColumnNamer(Arc::clone(n)),
        }
    }
}

impl<T> RecordOption<T> {
    pub fn query(clause: impl Into<String>) -> Self {
        RecordOption::Query(Query(clause.into()))
    }

    pub fn add_clause(clause: impl Into<String>) -> Self {
        RecordOption::AddClause(AddClause(clause.into()))
    }

    pub fn post_processor(processor: impl RecordPostProcessor<T> + 'static) -> Self {
        RecordOption::PostProcessor(Arc::new(processor))
    }

    pub fn limiter(limiter: impl Limiter + 'static) -> Self {
        RecordOption::Limiter(Arc::new(limiter))
    }

    pub fn limit(max_rows: usize) -> Self {
        Self::limiter(MaxRows(max_rows))
    }

    pub fn translate(translator: impl ErrorTranslator + 'static) -> Self {
        RecordOption::ErrorTranslator(Arc::new(translator))
    }

    pub fn column_namer(namer: impl FieldColumnNamer + 'static) -> Self {
        RecordOption::ColumnNamer(Arc::new(namer))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RecordOption::Query(_) => "Query",
            RecordOption::AddClause(_) => "AddClause",
            RecordOption::PostProcessor(_) => "RecordPostProcessor",
            RecordOption::Limiter(_) => "Limiter",
            RecordOption::ErrorTranslator(_) => "ErrorTranslator",
            RecordOption::ErrorOnUnknownColumns(_) => "ErrorOnUnknownColumns",
            RecordOption::ErrorOnUnmappedColumns(_) => "ErrorOnUnmappedColumns",
            RecordOption::ColumnNamer(_) => "FieldColumnNamer",
        }
    }
}

impl<T> fmt::Debug for RecordOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOption::Query(query) => f.debug_tuple("Query").field(&query.0).finish(),
            RecordOption::AddClause(clause) => f.debug_tuple("AddClause").field(&clause.0).finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

fn unknown_record_option<T>(option: &RecordOption<T>) -> Error {
    Error::config(format!("unknown option type: {}", option.kind_name()))
}

/// A field bound to the column it reads.
struct Binding<T> {
    column: String,
    set: FieldSetter<T>,
}

/// Setter per result column for one result shape.
struct FieldPlan<T> {
    columns: Vec<ColumnType>,
    setters: Vec<Option<FieldSetter<T>>>,
}

impl<T> Shaped for FieldPlan<T> {
    fn matches(&self, columns: &[ColumnType]) -> bool {
        self.columns == columns
    }
}

impl<T> FieldPlan<T> {
    fn fill(&self, record: &mut T, raw: Vec<Value>) -> Result<(), Error> {
        if raw.len() != self.columns.len() {
            return Err(Error::new(ErrorKind::Internal).with_message(format!(
                "row has {} cells, expected {}",
                raw.len(),
                self.columns.len()
            )));
        }
        for ((cell, setter), column) in raw.into_iter().zip(&self.setters).zip(&self.columns) {
            if let Some(set) = setter {
                set(record, cell).map_err(|err| {
                    if err.column().is_some() {
                        err
                    } else {
                        err.with_column(column.name.as_str())
                    }
                })?;
            }
        }
        Ok(())
    }
}

struct RecordReadPlan<T> {
    query: String,
    post_processors: Vec<Arc<dyn RecordPostProcessor<T>>>,
    limiter: Arc<dyn Limiter>,
    translator: Arc<dyn ErrorTranslator>,
}

pub struct RecordMapper<T: Record> {
    columns: String,
    default_clause: Option<String>,
    post_processors: Vec<Arc<dyn RecordPostProcessor<T>>>,
    translator: Arc<dyn ErrorTranslator>,
    error_on_unknown: bool,
    error_on_unmapped: bool,
    bindings: Vec<Binding<T>>,
    plans: ShapeCache<FieldPlan<T>>,
}

impl<T: Record> RecordMapper<T> {
    /// Accepted options: `Query`, `PostProcessor`, `ErrorTranslator`,
    /// `ErrorOnUnknownColumns`, `ErrorOnUnmappedColumns`, `ColumnNamer`.
    pub fn new(columns: impl Into<ColumnList>, options: Vec<RecordOption<T>>) -> Result<Self, Error> {
        let mut default_clause = None;
        let mut post_processors = Vec::new();
        let mut translator: Arc<dyn ErrorTranslator> = Arc::new(PassThrough);
        let mut error_on_unknown = false;
        let mut error_on_unmapped = false;
        let mut namers: Vec<Arc<dyn FieldColumnNamer>> = Vec::new();

        for option in options {
            match option {
                RecordOption::Query(Query(clause)) => {
                    if default_clause.is_some() {
                        return Err(Error::config("cannot use multiple default queries"));
                    }
                    check_forged_columns(&clause)?;
                    default_clause = Some(clause);
                }
                RecordOption::PostProcessor(p) => post_processors.push(p),
                RecordOption::ErrorTranslator(t) => translator = t,
                RecordOption::ErrorOnUnknownColumns(flag) => error_on_unknown = flag,
                RecordOption::ErrorOnUnmappedColumns(flag) => error_on_unmapped = flag,
                RecordOption::ColumnNamer(namer) => namers.push(namer),
                other => return Err(unknown_record_option(&other)),
            }
        }
        namers.push(Arc::new(DeclaredColumnNamer));

        Ok(Self {
            columns: columns.into().0,
            default_clause,
            post_processors,
            translator,
            error_on_unknown,
            error_on_unmapped,
            bindings: bind_fields::<T>(&namers)?,
            plans: ShapeCache::default(),
        })
    }

    pub fn columns(&self) -> &str {
        &self.columns
    }

    /// Columns the record's fields read, in declaration order.
    pub fn mapped_columns(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|binding| binding.column.as_str())
    }

    pub fn rows(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[RecordOption<T>],
    ) -> Result<Vec<T>, Error> {
        let mut records = Vec::new();
        self.run(ctx, db, args, options, true, &mut |record: T| -> Result<bool, Error> {
            records.push(record);
            Ok(true)
        })?;
        Ok(records)
    }

    /// Hands each record to `handler` until it returns `Ok(false)`.
    pub fn iterate<F>(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        mut handler: F,
        options: &[RecordOption<T>],
    ) -> Result<(), Error>
    where
        F: FnMut(T) -> Result<bool, Error>,
    {
        self.run(ctx, db, args, options, true, &mut handler)
    }

    pub fn first_row(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[RecordOption<T>],
    ) -> Result<Option<T>, Error> {
        let mut first = None;
        self.run(ctx, db, args, options, false, &mut |record: T| -> Result<bool, Error> {
            first = Some(record);
            Ok(false)
        })?;
        Ok(first)
    }

    pub fn exactly_one_row(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[RecordOption<T>],
    ) -> Result<T, Error> {
        let plan = self.resolve(options).map_err(|err| self.translator.translate(err))?;
        let mut first = None;
        let read = self.read(ctx, db, args, &plan, false, &mut |record: T| -> Result<bool, Error> {
            first = Some(record);
            Ok(false)
        });
        let result = read.and_then(|()| first.ok_or_else(Error::not_found));
        translate_result(result, plan.translator.as_ref())
    }

    fn run(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        options: &[RecordOption<T>],
        limited: bool,
        handler: &mut dyn FnMut(T) -> Result<bool, Error>,
    ) -> Result<(), Error> {
        let plan = self.resolve(options).map_err(|err| self.translator.translate(err))?;
        let result = self.read(ctx, db, args, &plan, limited, handler);
        translate_result(result, plan.translator.as_ref())
    }

    fn resolve(&self, options: &[RecordOption<T>]) -> Result<RecordReadPlan<T>, Error> {
        let mut query = self
            .default_clause
            .as_deref()
            .map(|clause| self.select(clause));
        let mut post_processors = self.post_processors.clone();
        let mut limiter: Arc<dyn Limiter> = Arc::new(Unlimited);
        let mut translator = Arc::clone(&self.translator);

        for option in options {
            match option {
                RecordOption::Query(Query(clause)) => {
                    check_forged_columns(clause)?;
                    query = Some(self.select(clause));
                }
                RecordOption::AddClause(AddClause(clause)) => match query.as_mut() {
                    Some(text) => {
                        text.push(' ');
                        text.push_str(clause);
                    }
                    None => return Err(Error::config("add clause must have a query set")),
                },
                RecordOption::PostProcessor(p) => post_processors.push(Arc::clone(p)),
                RecordOption::Limiter(l) => limiter = Arc::clone(l),
                RecordOption::ErrorTranslator(t) => translator = Arc::clone(t),
                other => return Err(unknown_record_option(other)),
            }
        }

        Ok(RecordReadPlan {
            query: query.ok_or_else(|| Error::config("no default query"))?,
            post_processors,
            limiter,
            translator,
        })
    }

    fn select(&self, clause: &str) -> String {
        format!("SELECT {} {}", self.columns, clause)
    }

    fn read(
        &self,
        ctx: &Context,
        db: &dyn Database,
        args: &[Value],
        plan: &RecordReadPlan<T>,
        limited: bool,
        handler: &mut dyn FnMut(T) -> Result<bool, Error>,
    ) -> Result<(), Error> {
        db.query(ctx, &plan.query, args, &mut |cursor: &mut dyn RowCursor| {
            let columns = cursor.column_types()?;
            let field_plan = self
                .plans
                .get_or_build(&columns, || self.build_plan(columns.clone()))?;
            let mut row_count = 0;
            while let Some(raw) = cursor.next_row()? {
                row_count += 1;
                if limited && plan.limiter.limit_reached(row_count) {
                    tracing::debug!(rows = row_count - 1, "row limit reached");
                    break;
                }
                let mut record = T::default();
                field_plan.fill(&mut record, raw)?;
                for processor in &plan.post_processors {
                    processor.post_process(ctx, db, &mut record)?;
                }
                if !handler(record)? {
                    break;
                }
            }
            Ok(())
        })
    }

    fn build_plan(&self, columns: Vec<ColumnType>) -> Result<FieldPlan<T>, Error> {
        let setters: Vec<Option<FieldSetter<T>>> = columns
            .iter()
            .map(|column| {
                self.bindings
                    .iter()
                    .find(|binding| binding.column == column.name)
                    .map(|binding| Arc::clone(&binding.set))
            })
            .collect();

        if self.error_on_unmapped {
            let unmapped: Vec<&str> = columns
                .iter()
                .zip(&setters)
                .filter(|(_, setter)| setter.is_none())
                .map(|(column, _)| column.name.as_str())
                .collect();
            if !unmapped.is_empty() {
                return Err(Error::config(format!(
                    "unmapped column(s): {}",
                    quoted_list(&unmapped)
                )));
            }
        }
        if self.error_on_unknown {
            let present: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            let unknown: Vec<&str> = self
                .mapped_columns()
                .filter(|column| !present.contains(column))
                .collect();
            if !unknown.is_empty() {
                return Err(Error::config(format!(
                    "unknown column(s): {}",
                    quoted_list(&unknown)
                )));
            }
        }

        tracing::debug!(
            record = type_name::<T>(),
            columns = columns.len(),
            "resolved field plan"
        );
        Ok(FieldPlan { columns, setters })
    }
}

impl<T: Record> fmt::Debug for RecordMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordMapper")
            .field("record", &type_name::<T>())
            .field("columns", &self.columns)
            .field("default_clause", &self.default_clause)
            .field("mapped_columns", &self.mapped_columns().collect::<Vec<_>>())
            .finish()
    }
}

fn quoted_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(",")
}

fn bind_fields<T: Record>(namers: &[Arc<dyn FieldColumnNamer>]) -> Result<Vec<Binding<T>>, Error> {
    let record = type_name::<T>();
    let mut seen = HashSet::new();
    let mut bindings = Vec::new();
    for field in T::fields() {
        let declared = Some(field.column.as_str()).filter(|c| !c.is_empty());
        let column = namers
            .iter()
            .find_map(|namer| namer.column_name(record, &field.name, declared));
        let Some(column) = column.filter(|c| !c.is_empty() && c != "-") else {
            continue;
        };
        if !seen.insert(column.clone()) {
            return Err(Error::config(format!("duplicate column mapping {column:?}"))
                .with_column(column));
        }
        bindings.push(Binding {
            column,
            set: field.set,
        });
    }
    Ok(bindings)
}
