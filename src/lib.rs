//! Purpose: Request-context library that binds schema-flexible JSON into typed entities.
//! Exports: `api` (stable surface), `core` (records, schemas, binder, ids, errors), `json` (body parsing).
//! Role: Backs business handlers; unmodeled client fields survive as per-entity overflow.
//! Invariants: Binding never drops a submitted field; it lands typed or in the overflow blob.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod json;
