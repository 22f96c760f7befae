//! Purpose: Tagged-union mapper options and their resolution into an execution plan.
//! Exports: `MapOption`, `Query`, `AddClause`, `MapperDefaults`, `ReadPlan`.
//! Role: Merge a mapper's baked-in defaults with call-time options, without side effects.
//! Invariants: Base mappings are never mutated by a call; call mappings merge into a copy.
//! Invariants: Configuration errors are detected before any query runs.
//! Invariants: A query clause starting with `,` (column forging) is always rejected.
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::exclude::{AllowedProperties, PropertyExcluder, PropertyExclusions};
use crate::core::limit::{Limiter, MaxRows, Unlimited};
use crate::core::mapping::Mappings;
use crate::core::post::RowPostProcessor;
use crate::core::subquery::SubQuery;
use crate::core::translate::{ErrorTranslator, PassThrough};

/// Query clause following `SELECT <columns>` (e.g. `FROM t WHERE id = ?`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query(pub String);

/// Clause appended to the established query (e.g. `ORDER BY name`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddClause(pub String);

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Query(value.to_string())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Query(value)
    }
}

impl From<&str> for AddClause {
    fn from(value: &str) -> Self {
        AddClause(value.to_string())
    }
}

impl From<String> for AddClause {
    fn from(value: String) -> Self {
        AddClause(value)
    }
}

#[derive(Clone)]
pub enum MapOption {
    Query(Query),
    AddClause(AddClause),
    Mappings(Mappings),
    Exclude(Arc<dyn PropertyExcluder>),
    Exclusions(PropertyExclusions),
    Allowed(AllowedProperties),
    PostProcessor(Arc<dyn RowPostProcessor>),
    SubQuery(Arc<SubQuery>),
    Limiter(Arc<dyn Limiter>),
    UseDecimals(bool),
    ErrorTranslator(Arc<dyn ErrorTranslator>),
}

impl MapOption {
    pub fn query(clause: impl Into<String>) -> Self {
        MapOption::Query(Query(clause.into()))
    }

    pub fn add_clause(clause: impl Into<String>) -> Self {
        MapOption::AddClause(AddClause(clause.into()))
    }

    pub fn exclude(excluder: impl PropertyExcluder + 'static) -> Self {
        MapOption::Exclude(Arc::new(excluder))
    }

    pub fn post_processor(processor: impl RowPostProcessor + 'static) -> Self {
        MapOption::PostProcessor(Arc::new(processor))
    }

    pub fn sub_query(sub_query: SubQuery) -> Self {
        MapOption::SubQuery(Arc::new(sub_query))
    }

    pub fn limiter(limiter: impl Limiter + 'static) -> Self {
        MapOption::Limiter(Arc::new(limiter))
    }

    pub fn limit(max_rows: usize) -> Self {
        Self::limiter(MaxRows(max_rows))
    }

    pub fn translate(translator: impl ErrorTranslator + 'static) -> Self {
        MapOption::ErrorTranslator(Arc::new(translator))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            MapOption::Query(_) => "Query",
            MapOption::AddClause(_) => "AddClause",
            MapOption::Mappings(_) => "Mappings",
            MapOption::Exclude(_) => "PropertyExcluder",
            MapOption::Exclusions(_) => "PropertyExclusions",
            MapOption::Allowed(_) => "AllowedProperties",
            MapOption::PostProcessor(_) => "RowPostProcessor",
            MapOption::SubQuery(_) => "SubQuery",
            MapOption::Limiter(_) => "Limiter",
            MapOption::UseDecimals(_) => "UseDecimals",
            MapOption::ErrorTranslator(_) => "ErrorTranslator",
        }
    }
}

impl fmt::Debug for MapOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapOption::Query(query) => f.debug_tuple("Query").field(&query.0).finish(),
            MapOption::AddClause(clause) => f.debug_tuple("AddClause").field(&clause.0).finish(),
            MapOption::UseDecimals(flag) => f.debug_tuple("UseDecimals").field(flag).finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

impl From<Query> for MapOption {
    fn from(value: Query) -> Self {
        MapOption::Query(value)
    }
}

impl From<AddClause> for MapOption {
    fn from(value: AddClause) -> Self {
        MapOption::AddClause(value)
    }
}

impl From<Mappings> for MapOption {
    fn from(value: Mappings) -> Self {
        MapOption::Mappings(value)
    }
}

impl From<PropertyExclusions> for MapOption {
    fn from(value: PropertyExclusions) -> Self {
        MapOption::Exclusions(value)
    }
}

impl From<AllowedProperties> for MapOption {
    fn from(value: AllowedProperties) -> Self {
        MapOption::Allowed(value)
    }
}

impl From<SubQuery> for MapOption {
    fn from(value: SubQuery) -> Self {
        MapOption::sub_query(value)
    }
}

impl From<MaxRows> for MapOption {
    fn from(value: MaxRows) -> Self {
        MapOption::limiter(value)
    }
}

/// Where a mapper's default query comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum DefaultQuery {
    /// Clause appended to `SELECT <columns>`; regenerated when columns change.
    Clause(String),
    /// Complete query text (sub-query mappers).
    Full(String),
}

/// Baked-in configuration of a mapper, fixed after construction.
#[derive(Clone)]
pub(crate) struct MapperDefaults {
    pub(crate) columns: String,
    pub(crate) default_query: Option<DefaultQuery>,
    pub(crate) mappings: Mappings,
    pub(crate) post_processors: Vec<Arc<dyn RowPostProcessor>>,
    pub(crate) sub_queries: Vec<Arc<SubQuery>>,
    pub(crate) use_decimals: bool,
    pub(crate) translator: Arc<dyn ErrorTranslator>,
}

impl MapperDefaults {
    pub(crate) fn new(columns: String) -> Self {
        Self {
            columns,
            default_query: None,
            mappings: Mappings::new(),
            post_processors: Vec::new(),
            sub_queries: Vec::new(),
            use_decimals: true,
            translator: Arc::new(PassThrough),
        }
    }

    /// Applies construction-time options; at most one `Query` per call.
    pub(crate) fn apply(&mut self, options: Vec<MapOption>) -> Result<(), Error> {
        let mut seen_query = false;
        for option in options {
            match option {
                MapOption::Query(Query(clause)) => {
                    if seen_query {
                        return Err(Error::config("cannot use multiple default queries"));
                    }
                    seen_query = true;
                    check_forged_columns(&clause)?;
                    self.default_query = Some(DefaultQuery::Clause(clause));
                }
                MapOption::Mappings(mappings) => self.mappings.extend(mappings),
                MapOption::PostProcessor(processor) => self.post_processors.push(processor),
                MapOption::SubQuery(sub_query) => self.sub_queries.push(sub_query),
                MapOption::UseDecimals(flag) => self.use_decimals = flag,
                MapOption::ErrorTranslator(translator) => self.translator = translator,
                other => return Err(unknown_option(&other)),
            }
        }
        Ok(())
    }

    fn select(&self, clause: &str) -> String {
        format!("SELECT {} {}", self.columns, clause)
    }

    fn default_query_text(&self) -> Option<String> {
        match &self.default_query {
            Some(DefaultQuery::Clause(clause)) => Some(self.select(clause)),
            Some(DefaultQuery::Full(query)) => Some(query.clone()),
            None => None,
        }
    }
}

/// Concrete execution plan for one read call.
pub(crate) struct ReadPlan<'m> {
    pub(crate) query: String,
    pub(crate) mappings: Cow<'m, Mappings>,
    pub(crate) post_processors: Vec<Arc<dyn RowPostProcessor>>,
    pub(crate) sub_queries: Vec<Arc<SubQuery>>,
    pub(crate) exclusions: PropertyExclusions,
    pub(crate) limiter: Arc<dyn Limiter>,
    pub(crate) translator: Arc<dyn ErrorTranslator>,
}

impl ReadPlan<'_> {
    /// True when call options replaced or added column mappings.
    pub(crate) fn has_call_mappings(&self) -> bool {
        matches!(self.mappings, Cow::Owned(_))
    }
}

pub(crate) fn resolve_read<'m>(
    defaults: &'m MapperDefaults,
    options: &[MapOption],
) -> Result<ReadPlan<'m>, Error> {
    let mut query = defaults.default_query_text();
    let mut mappings = Cow::Borrowed(&defaults.mappings);
    let mut post_processors = defaults.post_processors.clone();
    let mut sub_queries = defaults.sub_queries.clone();
    let mut exclusions = PropertyExclusions::new();
    let mut limiter: Arc<dyn Limiter> = Arc::new(Unlimited);
    let mut translator = Arc::clone(&defaults.translator);

    for option in options {
        match option {
            MapOption::Query(Query(clause)) => {
                check_forged_columns(clause)?;
                query = Some(defaults.select(clause));
            }
            MapOption::AddClause(AddClause(clause)) => match query.as_mut() {
                Some(text) => {
                    text.push(' ');
                    text.push_str(clause);
                }
                None => return Err(Error::config("add clause must have a query set")),
            },
            MapOption::Mappings(extra) => {
                let merged = mappings.to_mut();
                for (column, mapping) in extra {
                    merged.insert(column.clone(), mapping.clone());
                }
            }
            MapOption::Exclude(excluder) => exclusions.push(Arc::clone(excluder)),
            MapOption::Exclusions(list) => exclusions.extend_from(list),
            MapOption::Allowed(allowed) => exclusions.push(Arc::new(allowed.clone())),
            MapOption::PostProcessor(processor) => post_processors.push(Arc::clone(processor)),
            MapOption::SubQuery(sub_query) => sub_queries.push(Arc::clone(sub_query)),
            MapOption::Limiter(l) => limiter = Arc::clone(l),
            MapOption::ErrorTranslator(t) => translator = Arc::clone(t),
            MapOption::UseDecimals(_) => return Err(unknown_option(option)),
        }
    }

    let query = query.ok_or_else(|| Error::config("no default query"))?;
    Ok(ReadPlan {
        query,
        mappings,
        post_processors,
        sub_queries,
        exclusions,
        limiter,
        translator,
    })
}

pub(crate) fn check_forged_columns(clause: &str) -> Result<(), Error> {
    if clause.trim_start().starts_with(',') {
        return Err(Error::config("cannot forge extra columns using Query")
            .with_hint("Query must start after the select list, e.g. `FROM table`."));
    }
    Ok(())
}

pub(crate) fn unknown_option(option: &MapOption) -> Error {
    Error::config(format!("unknown option type: {}", option.kind_name()))
}

#[cfg(test)]
mod tests {
    use super::{DefaultQuery, MapOption, MapperDefaults, Query, resolve_read};
    use crate::core::error::ErrorKind;
    use crate::core::exclude::{AllowedProperties, PropertyExcluder, PropertyExclusions};
    use crate::core::mapping::{Mapping, Mappings};
    use std::borrow::Cow;

    fn defaults(columns: &str, clause: Option<&str>) -> MapperDefaults {
        let mut d = MapperDefaults::new(columns.to_string());
        d.default_query = clause.map(|c| DefaultQuery::Clause(c.to_string()));
        d
    }

    #[test]
    fn default_query_is_generated_from_columns() {
        let d = defaults("a,b", Some("FROM t"));
        let plan = resolve_read(&d, &[]).expect("plan");
        assert_eq!(plan.query, "SELECT a,b FROM t");
    }

    #[test]
    fn query_option_replaces_and_clause_appends() {
        let d = defaults("a", Some("FROM t"));
        let plan = resolve_read(
            &d,
            &[
                MapOption::query("FROM other"),
                MapOption::add_clause("WHERE a = ?"),
                MapOption::add_clause("LIMIT 1"),
            ],
        )
        .expect("plan");
        assert_eq!(plan.query, "SELECT a FROM other WHERE a = ? LIMIT 1");

        let plan = resolve_read(&d, &[MapOption::query("FROM x"), MapOption::query("FROM y")])
            .expect("repeat override");
        assert_eq!(plan.query, "SELECT a FROM y");
    }

    #[test]
    fn clause_without_query_is_config_error() {
        let d = defaults("a", None);
        let err = resolve_read(&d, &[MapOption::add_clause("WHERE 1")])
            .err()
            .expect("error");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.message(), Some("add clause must have a query set"));
    }

    #[test]
    fn missing_query_is_config_error() {
        let d = defaults("a", None);
        let err = resolve_read(&d, &[]).err().expect("error");
        assert_eq!(err.message(), Some("no default query"));
    }

    #[test]
    fn forged_columns_rejected_at_call_and_construction() {
        let d = defaults("a", Some("FROM t"));
        let err = resolve_read(&d, &[MapOption::query("  \n, secret FROM users")])
            .err()
            .expect("forged");
        assert_eq!(err.kind(), ErrorKind::Config);

        let mut d = defaults("a", None);
        let err = d
            .apply(vec![MapOption::Query(Query::from(",b FROM t"))])
            .expect_err("forged");
        assert_eq!(err.message(), Some("cannot forge extra columns using Query"));
    }

    #[test]
    fn construction_rejects_multiple_queries_and_call_only_options() {
        let mut d = defaults("a", None);
        let err = d
            .apply(vec![MapOption::query("FROM a"), MapOption::query("FROM b")])
            .expect_err("multiple");
        assert_eq!(err.message(), Some("cannot use multiple default queries"));

        let mut d = defaults("a", None);
        let err = d.apply(vec![MapOption::limit(3)]).expect_err("limiter");
        assert_eq!(err.message(), Some("unknown option type: Limiter"));
    }

    #[test]
    fn call_rejects_use_decimals() {
        let d = defaults("a", Some("FROM t"));
        let err = resolve_read(&d, &[MapOption::UseDecimals(false)])
            .err()
            .expect("error");
        assert_eq!(err.message(), Some("unknown option type: UseDecimals"));
    }

    #[test]
    fn call_mappings_are_copy_on_write() {
        let mut d = defaults("a,b", Some("FROM t"));
        let mut base = Mappings::new();
        base.insert("a".to_string(), Mapping::new().rename("x"));
        d.mappings = base;

        let plan = resolve_read(&d, &[]).expect("plan");
        assert!(matches!(plan.mappings, Cow::Borrowed(_)));

        let mut extra = Mappings::new();
        extra.insert("b".to_string(), Mapping::new().rename("y"));
        let plan = resolve_read(&d, &[MapOption::Mappings(extra)]).expect("plan");
        assert!(matches!(plan.mappings, Cow::Owned(_)));
        assert_eq!(plan.mappings.len(), 2);
        assert_eq!(d.mappings.len(), 1);
    }

    #[test]
    fn exclusion_representations_normalize_into_one_list() {
        let d = defaults("a", Some("FROM t"));
        let plan = resolve_read(
            &d,
            &[
                MapOption::Allowed(AllowedProperties::new().allow("a").allow("b")),
                MapOption::Exclusions(
                    PropertyExclusions::new().with(|p: &str, _: &[String]| p == "b"),
                ),
                MapOption::exclude(|p: &str, _: &[String]| p == "c"),
            ],
        )
        .expect("plan");
        assert_eq!(plan.exclusions.len(), 3);
        assert!(!plan.exclusions.exclude("a", &[]));
        assert!(plan.exclusions.exclude("b", &[]));
        assert!(plan.exclusions.exclude("c", &[]));
        assert!(plan.exclusions.exclude("d", &[]));
    }

    #[test]
    fn full_default_query_is_used_verbatim() {
        let mut d = defaults("", None);
        d.default_query = Some(DefaultQuery::Full("SELECT * FROM sub WHERE id = ?".to_string()));
        let plan = resolve_read(&d, &[]).expect("plan");
        assert_eq!(plan.query, "SELECT * FROM sub WHERE id = ?");
    }
}
