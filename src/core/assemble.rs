//! Purpose: Build one JSON-shaped output row from one scanned result row.
//! Exports: `Assembly`, `place`.
//! Role: Applies mappings (rename, path nesting, null policy, column hooks), exclusions,
//! then sub-queries and row post-processors, in that order.
//! Invariants: Columns sharing a path prefix land in the same nested container.
//! Invariants: Excluded properties are never placed, and their column hooks never run.
//! Invariants: Any hook or sub-query error aborts the row; no partial row escapes.
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::db::{ColumnType, Database};
use crate::core::error::Error;
use crate::core::exclude::{PropertyExcluder, PropertyExclusions};
use crate::core::mapping::{Mapping, Mappings};
use crate::core::post::RowPostProcessor;
use crate::core::subquery::SubQuery;
use crate::core::value::{Row, Value};

pub(crate) struct Assembly<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) db: &'a dyn Database,
    pub(crate) mappings: &'a Mappings,
    pub(crate) exclusions: &'a PropertyExclusions,
    pub(crate) sub_queries: &'a [Arc<SubQuery>],
    pub(crate) post_processors: &'a [Arc<dyn RowPostProcessor>],
    /// Path of the row being built, relative to the root row.
    pub(crate) base_path: &'a [String],
}

impl Assembly<'_> {
    pub(crate) fn assemble(&self, columns: &[ColumnType], values: Vec<Value>) -> Result<Row, Error> {
        let mut row = Row::new();
        for (column, value) in columns.iter().zip(values) {
            match self.mappings.get(&column.name) {
                Some(mapping) => self.place_mapped(&mut row, &column.name, mapping, value)?,
                None => {
                    if !self.exclusions.exclude(&column.name, self.base_path) {
                        row.insert(column.name.clone(), value);
                    }
                }
            }
        }

        for sub_query in self.sub_queries {
            if self.provided_is_excluded(sub_query.provides_property()) {
                continue;
            }
            sub_query.execute(self.ctx, self.db, &mut row, self.exclusions, self.base_path)?;
        }
        for processor in self.post_processors {
            if self.provided_is_excluded(processor.provides_property()) {
                continue;
            }
            processor.post_process(self.ctx, self.db, &mut row)?;
        }
        Ok(row)
    }

    fn place_mapped(
        &self,
        row: &mut Row,
        column: &str,
        mapping: &Mapping,
        mut value: Value,
    ) -> Result<(), Error> {
        if value.is_null() {
            if mapping.omit_null {
                return Ok(());
            }
            if let Some(default) = &mapping.null_default {
                value = default.clone();
            }
        }

        let property = mapping.property(column);
        let full_path = [self.base_path, mapping.path.as_slice()].concat();
        if self.exclusions.exclude(property, &full_path) {
            return Ok(());
        }

        match &mapping.post_process {
            None => place(row, &mapping.path, property, value),
            Some(post_process) => {
                place(row, &mapping.path, property, value.clone());
                if let Some(replacement) = post_process(self.ctx, self.db, row, &value)? {
                    place(row, &mapping.path, property, replacement);
                }
            }
        }
        Ok(())
    }

    fn provided_is_excluded(&self, property: Option<&str>) -> bool {
        match property {
            Some(property) if !property.is_empty() => {
                self.exclusions.exclude(property, self.base_path)
            }
            _ => false,
        }
    }
}

/// Puts `value` at `path` + `property`, creating or reusing nested containers.
///
/// A non-object value sitting where a container is needed is replaced.
pub(crate) fn place(container: &mut Row, path: &[String], property: &str, value: Value) {
    match path.split_first() {
        None => {
            container.insert(property.to_string(), value);
        }
        Some((key, rest)) => {
            let slot = container
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Row::new()));
            match slot {
                Value::Object(child) => place(child, rest, property, value),
                other => {
                    let mut child = Row::new();
                    place(&mut child, rest, property, value);
                    *other = Value::Object(child);
                }
            }
        }
    }
}
