//! Purpose: Define the public Rust API boundary for docbind.
//! Exports: Request context, binding, schema, allocator and error types used by handlers.
//! Role: Public, additive-only surface over the core modules.
//! Invariants: Handlers should only need items re-exported here.

mod context;

pub use crate::core::binder::{
    Attachment, BindIssue, BindOptions, BindOutcome, BindTarget, EntitySnapshot, FieldBinder,
    compose,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::id::{IdAllocator, MemoryIdAllocator};
pub use crate::core::record::{Batch, JsonValue, RawRecord};
pub use crate::core::schema::{CoercionError, Entity, FieldIssue, FieldValue, Schema, SchemaBuilder};
pub use crate::json::parse::{
    ParseFailureCategory, ParseReport, SkippedElement, parse, parse_report,
};
pub use context::{ContextBuilder, LoginUser, RequestContext, UploadedFile};
