// Mapping engine: value model, options, column plans, row assembly and sub-queries.
pub(crate) mod assemble;
pub(crate) mod cache;
pub mod columns;
pub mod context;
pub mod db;
pub mod error;
pub mod exclude;
pub mod limit;
pub mod mapper;
pub mod mapping;
pub mod options;
pub mod post;
pub mod record;
pub mod scan;
pub mod subquery;
#[cfg(test)]
pub(crate) mod testing;
pub mod translate;
pub mod value;
