// Row-level post-processors run after columns and sub-queries are placed.
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::db::Database;
use crate::core::error::Error;
use crate::core::value::Row;

pub trait RowPostProcessor: Send + Sync {
    fn post_process(&self, ctx: &Context, db: &dyn Database, row: &mut Row) -> Result<(), Error>;

    /// Property this processor fills in; when that property is excluded the
    /// processor is skipped. `None` means it always runs.
    fn provides_property(&self) -> Option<&str> {
        None
    }
}

impl<F> RowPostProcessor for F
where
    F: Fn(&Context, &dyn Database, &mut Row) -> Result<(), Error> + Send + Sync,
{
    fn post_process(&self, ctx: &Context, db: &dyn Database, row: &mut Row) -> Result<(), Error> {
        self(ctx, db, row)
    }
}

type RowFn = dyn Fn(&Context, &dyn Database, &mut Row) -> Result<(), Error> + Send + Sync;

/// Closure processor that declares the property it provides.
pub struct ProvidingProcessor {
    property: String,
    f: Arc<RowFn>,
}

impl ProvidingProcessor {
    pub fn new<F>(property: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &dyn Database, &mut Row) -> Result<(), Error> + Send + Sync + 'static,
    {
        Self {
            property: property.into(),
            f: Arc::new(f),
        }
    }
}

impl RowPostProcessor for ProvidingProcessor {
    fn post_process(&self, ctx: &Context, db: &dyn Database, row: &mut Row) -> Result<(), Error> {
        (self.f)(ctx, db, row)
    }

    fn provides_property(&self) -> Option<&str> {
        Some(self.property.as_str())
    }
}
