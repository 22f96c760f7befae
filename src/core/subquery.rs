//! Purpose: Nested parameterized queries executed once per parent row.
//! Exports: `SubQuery`.
//! Role: Contributes an array, an object, or merged properties to the parent row,
//! reusing the row assembler through a lazily built nested mapper.
//! Invariants: Bind arguments come from the parent row; a missing one aborts the row
//! before any query runs.
//! Invariants: The nested mapper (and its column plans) is built once per instance.
//! Invariants: Nested rows are assembled under `parent path + property` so exclusion
//! predicates see the full path from the root row.
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::core::context::Context;
use crate::core::db::Database;
use crate::core::error::{Error, ErrorKind};
use crate::core::exclude::PropertyExclusions;
use crate::core::limit::Unlimited;
use crate::core::mapper::{CollectRows, FirstRow, Mapper, ReadScope};
use crate::core::mapping::Mappings;
use crate::core::post::RowPostProcessor;
use crate::core::value::{Row, Value};

#[derive(Clone, Debug, Eq, PartialEq)]
enum Placement {
    Array(String),
    Object(String),
    ExactlyOne(String),
    Merge { overwrite: bool },
}

pub struct SubQuery {
    placement: Placement,
    query: String,
    arg_columns: Vec<String>,
    mappings: Mappings,
    empty_null: bool,
    use_decimals: bool,
    sub_queries: Vec<Arc<SubQuery>>,
    post_processors: Vec<Arc<dyn RowPostProcessor>>,
    nested: OnceLock<Mapper>,
}

impl SubQuery {
    fn with_placement<I, S>(placement: Placement, query: impl Into<String>, arg_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            placement,
            query: query.into(),
            arg_columns: arg_columns.into_iter().map(Into::into).collect(),
            mappings: Mappings::new(),
            empty_null: false,
            use_decimals: true,
            sub_queries: Vec::new(),
            post_processors: Vec::new(),
            nested: OnceLock::new(),
        }
    }

    /// All result rows, as a list under `property`.
    pub fn array<I, S>(property: impl Into<String>, query: impl Into<String>, arg_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_placement(Placement::Array(property.into()), query, arg_columns)
    }

    /// First result row, as an object under `property`.
    pub fn object<I, S>(property: impl Into<String>, query: impl Into<String>, arg_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_placement(Placement::Object(property.into()), query, arg_columns)
    }

    /// Like [`SubQuery::object`], but no rows is a not-found error.
    pub fn exactly_one<I, S>(
        property: impl Into<String>,
        query: impl Into<String>,
        arg_columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_placement(Placement::ExactlyOne(property.into()), query, arg_columns)
    }

    /// First result row, merged key by key into the parent row.
    pub fn merge<I, S>(query: impl Into<String>, arg_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_placement(Placement::Merge { overwrite: true }, query, arg_columns)
    }

    pub fn with_mappings(mut self, mappings: Mappings) -> Self {
        self.mappings.extend(mappings);
        self
    }

    /// No rows yields `null` instead of an empty list or object.
    pub fn empty_null(mut self) -> Self {
        self.empty_null = true;
        self
    }

    /// Merge mode only: keys already in the parent row are kept.
    pub fn no_overwrite(mut self) -> Self {
        if let Placement::Merge { overwrite } = &mut self.placement {
            *overwrite = false;
        }
        self
    }

    /// Independent of the parent mapper's `UseDecimals`; defaults to true.
    pub fn use_decimals(mut self, use_decimals: bool) -> Self {
        self.use_decimals = use_decimals;
        self
    }

    pub fn with_sub_query(mut self, sub_query: SubQuery) -> Self {
        self.sub_queries.push(Arc::new(sub_query));
        self
    }

    pub fn with_post_processor(mut self, processor: impl RowPostProcessor + 'static) -> Self {
        self.post_processors.push(Arc::new(processor));
        self
    }

    /// Property this sub-query fills in; `None` in merge mode.
    pub fn provides_property(&self) -> Option<&str> {
        match &self.placement {
            Placement::Array(property)
            | Placement::Object(property)
            | Placement::ExactlyOne(property) => Some(property.as_str()),
            Placement::Merge { .. } => None,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn arg_columns(&self) -> &[String] {
        &self.arg_columns
    }

    fn nested_mapper(&self) -> &Mapper {
        self.nested.get_or_init(|| {
            Mapper::for_sub_query(
                self.query.clone(),
                self.mappings.clone(),
                self.sub_queries.clone(),
                self.post_processors.clone(),
                self.use_decimals,
            )
        })
    }

    fn resolve_args(&self, row: &Row) -> Result<Vec<Value>, Error> {
        self.arg_columns
            .iter()
            .map(|column| {
                row.get(column).cloned().ok_or_else(|| {
                    Error::new(ErrorKind::Argument)
                        .with_message(format!("sub-query arg property '{column}' does not exist"))
                        .with_column(column.as_str())
                })
            })
            .collect()
    }

    pub(crate) fn execute(
        &self,
        ctx: &Context,
        db: &dyn Database,
        row: &mut Row,
        exclusions: &PropertyExclusions,
        base_path: &[String],
    ) -> Result<(), Error> {
        let args = self.resolve_args(row)?;
        let mut nested_path = base_path.to_vec();
        if let Some(property) = self.provides_property() {
            nested_path.push(property.to_string());
        }
        tracing::trace!(
            property = self.provides_property().unwrap_or(""),
            args = args.len(),
            "executing sub-query"
        );

        let mapper = self.nested_mapper();
        let plan = mapper.nested_plan()?;
        let scope = ReadScope {
            exclusions,
            base_path: &nested_path,
            limiter: &Unlimited,
        };

        match &self.placement {
            Placement::Array(property) => {
                let mut sink = CollectRows::default();
                mapper.read_into(ctx, db, &args, &plan, &scope, &mut sink)?;
                let value = if sink.rows.is_empty() && self.empty_null {
                    Value::Null
                } else {
                    Value::List(sink.rows.into_iter().map(Value::Object).collect())
                };
                row.insert(property.clone(), value);
            }
            Placement::Object(property) => {
                let mut sink = FirstRow::default();
                mapper.read_into(ctx, db, &args, &plan, &scope, &mut sink)?;
                let value = match sink.row {
                    Some(found) => Value::Object(found),
                    None if self.empty_null => Value::Null,
                    None => Value::Object(Row::new()),
                };
                row.insert(property.clone(), value);
            }
            Placement::ExactlyOne(property) => {
                let mut sink = FirstRow::default();
                mapper.read_into(ctx, db, &args, &plan, &scope, &mut sink)?;
                let found = sink.row.ok_or_else(Error::not_found)?;
                row.insert(property.clone(), Value::Object(found));
            }
            Placement::Merge { overwrite } => {
                let mut sink = FirstRow::default();
                mapper.read_into(ctx, db, &args, &plan, &scope, &mut sink)?;
                for (key, value) in sink.row.unwrap_or_default() {
                    if *overwrite || !row.contains_key(&key) {
                        row.insert(key, value);
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubQuery")
            .field("placement", &self.placement)
            .field("query", &self.query)
            .field("arg_columns", &self.arg_columns)
            .field("empty_null", &self.empty_null)
            .field("sub_queries", &self.sub_queries.len())
            .field("post_processors", &self.post_processors.len())
            .finish()
    }
}
