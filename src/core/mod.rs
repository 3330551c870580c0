// Core modules implementing records, schemas, binding, id allocation, and error modeling.
pub mod binder;
pub mod error;
pub mod id;
pub mod overflow;
pub mod record;
pub mod scalar;
pub mod schema;
