//! Purpose: Internal JSON parsing boundary shared by runtime callsites.
//! Exports: `parse` module with decode helpers used by scanners and record conversion.
//! Role: Single seam for parser implementation so callsites avoid ad hoc decode logic.
//! Invariants: Runtime JSON decoding of column values goes through this module.
//! Invariants: Helper APIs stay small and deterministic (no hidden global state).

pub(crate) mod parse;
