//! Purpose: Library crate mapping SQL result rows into JSON-shaped rows or typed records.
//! Exports: `api` (stable surface), `core` (mapping engine), `sqlite` (rusqlite adapter).
//! Role: Backs the `rowshape` CLI and is usable directly by services holding a connection.
//! Invariants: The crate never opens, pools or closes connections on its own;
//! callers hand in a `Database` implementation.
//! Invariants: Library code reports failures through `core::error::Error`, never panics.
pub mod api;
pub mod core;
pub(crate) mod json;
#[cfg(feature = "sqlite")]
pub mod sqlite;
