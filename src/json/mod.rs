//! Purpose: JSON decoding boundary for request bodies.
//! Exports: `parse` module with the batch parser and failure categorisation.
//! Role: Single seam for body decoding so callsites avoid ad hoc decode logic.
//! Invariants: Helper APIs stay small and deterministic (no hidden global state).

pub mod parse;
