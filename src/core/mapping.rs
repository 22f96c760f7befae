//! Purpose: Per-column mapping configuration (rename, nesting, null policy, hooks).
//! Exports: `Mapping`, `Mappings`, `PostProcess`.
//! Role: Input to the column plan (custom scanners) and the row assembler.
//! Invariants: When a value is null, `omit_null` wins over `null_default`.
//! Invariants: Mappings are keyed by source column name, never by property name.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::db::Database;
use crate::core::error::Error;
use crate::core::scan::ColumnScanner;
use crate::core::value::{Row, Value};

/// Column-level hook run after the value is placed.
///
/// Receives the whole row under construction and the placed value; returning
/// `Some(v)` replaces the placed value.
pub type PostProcess = Arc<
    dyn Fn(&Context, &dyn Database, &mut Row, &Value) -> Result<Option<Value>, Error>
        + Send
        + Sync,
>;

pub type Mappings = HashMap<String, Mapping>;

#[derive(Clone, Default)]
pub struct Mapping {
    pub property_name: Option<String>,
    pub path: Vec<String>,
    pub omit_null: bool,
    pub null_default: Option<Value>,
    pub post_process: Option<PostProcess>,
    pub scanner: Option<ColumnScanner>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, property_name: impl Into<String>) -> Self {
        self.property_name = Some(property_name.into());
        self
    }

    pub fn at_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn omit_null(mut self) -> Self {
        self.omit_null = true;
        self
    }

    pub fn null_default(mut self, value: impl Into<Value>) -> Self {
        self.null_default = Some(value.into());
        self
    }

    pub fn post_process<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &dyn Database, &mut Row, &Value) -> Result<Option<Value>, Error>
            + Send
            + Sync
            + 'static,
    {
        self.post_process = Some(Arc::new(f));
        self
    }

    pub fn scanner<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.scanner = Some(Arc::new(f));
        self
    }

    /// Output property name for `column`.
    pub fn property<'a>(&'a self, column: &'a str) -> &'a str {
        self.property_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(column)
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("property_name", &self.property_name)
            .field("path", &self.path)
            .field("omit_null", &self.omit_null)
            .field("null_default", &self.null_default)
            .field("post_process", &self.post_process.is_some())
            .field("scanner", &self.scanner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Mapping;
    use crate::core::value::Value;

    #[test]
    fn builder_sets_fields() {
        let mapping = Mapping::new()
            .rename("name")
            .at_path(["x", "y"])
            .omit_null()
            .null_default("n/a");
        assert_eq!(mapping.property("col"), "name");
        assert_eq!(mapping.path, vec!["x".to_string(), "y".to_string()]);
        assert!(mapping.omit_null);
        assert_eq!(mapping.null_default, Some(Value::from("n/a")));
    }

    #[test]
    fn empty_rename_keeps_column_name() {
        assert_eq!(Mapping::new().property("col"), "col");
        assert_eq!(Mapping::new().rename("").property("col"), "col");
    }
}
