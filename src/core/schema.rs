//! Purpose: Describe which fields an entity type declares and how each one is decoded.
//! Exports: `Entity`, `Schema`, `SchemaBuilder`, `FieldValue`, `CoercionError`, `FieldIssue`.
//! Role: Explicit stand-in for runtime field enumeration; built once per type and reused.
//! Invariants: Field order is declaration order; names are unique and non-empty once validated.
//! Invariants: Decoding is lenient per field; a bad value leaves that field untouched.
//! Invariants: Issues below the top level carry paths such as `Inner.N` or `List[1]`.
//! Notes: `Id`, `LastModified` and `FullInfo` always count as declared, even when not listed.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::RawRecord;
use crate::core::scalar::json_type_name;

pub const ID_FIELD: &str = "Id";
pub const LAST_MODIFIED_FIELD: &str = "LastModified";
pub const FULL_INFO_FIELD: &str = "FullInfo";
pub const BASE_FIELDS: [&str; 3] = [ID_FIELD, LAST_MODIFIED_FIELD, FULL_INFO_FIELD];

/// A typed business record that can be bound from request documents.
///
/// Implementations usually keep the schema in a `OnceLock` so it is built once,
/// naming the type explicitly: `Schema::<Self>::builder(..)`.
pub trait Entity: Default + 'static {
    fn schema() -> &'static Schema<Self>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoercionError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl CoercionError {
    pub fn new(expected: &'static str, found: &Value) -> Self {
        Self {
            expected,
            found: json_type_name(found),
        }
    }
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

/// A field whose value was present but could not be coerced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldIssue {
    /// Path from the record root, e.g. `Name`, `Address.City`, `Contacts[2]`.
    pub field: String,
    pub error: CoercionError,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, error: CoercionError) -> Self {
        Self {
            field: field.into(),
            error,
        }
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Conversion between a JSON value and a typed field.
pub trait FieldValue: Sized {
    fn decode(value: &Value) -> Result<Self, CoercionError>;

    fn encode(&self) -> Value;

    /// Value to store when the document carries an explicit `null`.
    /// `None` leaves the field as it was.
    fn decode_null() -> Option<Self> {
        None
    }

    /// Decodes what coerces and records the rest under `path`. `None` leaves
    /// the field as it was.
    fn decode_lenient(value: &Value, path: &str, issues: &mut Vec<FieldIssue>) -> Option<Self> {
        match Self::decode(value) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                issues.push(FieldIssue::new(path, error));
                None
            }
        }
    }
}

impl FieldValue for String {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoercionError::new("string", value))
    }

    fn encode(&self) -> Value {
        Value::String(self.clone())
    }
}

impl FieldValue for bool {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value.as_bool().ok_or_else(|| CoercionError::new("bool", value))
    }

    fn encode(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! unsigned_field {
    ($($ty:ty),*) => {$(
        impl FieldValue for $ty {
            fn decode(value: &Value) -> Result<Self, CoercionError> {
                value
                    .as_u64()
                    .and_then(|raw| <$ty>::try_from(raw).ok())
                    .ok_or_else(|| CoercionError::new(stringify!($ty), value))
            }

            fn encode(&self) -> Value {
                Value::from(*self)
            }
        }
    )*};
}

macro_rules! signed_field {
    ($($ty:ty),*) => {$(
        impl FieldValue for $ty {
            fn decode(value: &Value) -> Result<Self, CoercionError> {
                value
                    .as_i64()
                    .and_then(|raw| <$ty>::try_from(raw).ok())
                    .ok_or_else(|| CoercionError::new(stringify!($ty), value))
            }

            fn encode(&self) -> Value {
                Value::from(*self)
            }
        }
    )*};
}

unsigned_field!(u8, u16, u32, u64);
signed_field!(i8, i16, i32, i64);

impl FieldValue for f64 {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value.as_f64().ok_or_else(|| CoercionError::new("f64", value))
    }

    fn encode(&self) -> Value {
        Value::from(*self)
    }
}

impl FieldValue for f32 {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_f64()
            .map(|raw| raw as f32)
            .ok_or_else(|| CoercionError::new("f32", value))
    }

    fn encode(&self) -> Value {
        Value::from(f64::from(*self))
    }
}

impl FieldValue for Value {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        Ok(value.clone())
    }

    fn encode(&self) -> Value {
        self.clone()
    }

    fn decode_null() -> Option<Self> {
        Some(Value::Null)
    }
}

impl FieldValue for Map<String, Value> {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_object()
            .cloned()
            .ok_or_else(|| CoercionError::new("object", value))
    }

    fn encode(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        T::decode(value).map(Some)
    }

    fn encode(&self) -> Value {
        match self {
            Some(inner) => inner.encode(),
            None => Value::Null,
        }
    }

    fn decode_null() -> Option<Self> {
        Some(None)
    }

    fn decode_lenient(value: &Value, path: &str, issues: &mut Vec<FieldIssue>) -> Option<Self> {
        T::decode_lenient(value, path, issues).map(Some)
    }
}

/// Strict `decode` rejects the whole list on one bad element; the lenient path
/// zero-fills that element and keeps the rest.
impl<T: FieldValue + Default> FieldValue for Vec<T> {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        let items = value
            .as_array()
            .ok_or_else(|| CoercionError::new("array", value))?;
        items.iter().map(T::decode).collect()
    }

    fn encode(&self) -> Value {
        Value::Array(self.iter().map(FieldValue::encode).collect())
    }

    fn decode_lenient(value: &Value, path: &str, issues: &mut Vec<FieldIssue>) -> Option<Self> {
        let Some(items) = value.as_array() else {
            issues.push(FieldIssue::new(path, CoercionError::new("array", value)));
            return None;
        };
        let decoded = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                if item.is_null() {
                    return T::decode_null().unwrap_or_default();
                }
                T::decode_lenient(item, &format!("{path}[{index}]"), issues).unwrap_or_default()
            })
            .collect();
        Some(decoded)
    }
}

impl FieldValue for OffsetDateTime {
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_str()
            .and_then(|text| OffsetDateTime::parse(text, &Rfc3339).ok())
            .ok_or_else(|| CoercionError::new("rfc3339 timestamp", value))
    }

    fn encode(&self) -> Value {
        self.format(&Rfc3339)
            .map(Value::String)
            .unwrap_or(Value::Null)
    }
}

type DecodeFn<E> = Box<dyn Fn(&mut E, &Value, &str, &mut Vec<FieldIssue>) + Send + Sync>;
type EncodeFn<E> = Box<dyn Fn(&E) -> Value + Send + Sync>;

pub struct FieldDescriptor<E> {
    name: String,
    decode: DecodeFn<E>,
    encode: EncodeFn<E>,
}

impl<E> FieldDescriptor<E> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E> fmt::Debug for FieldDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered field list for one entity type.
#[derive(Debug)]
pub struct Schema<E> {
    namespace: String,
    fields: Vec<FieldDescriptor<E>>,
    declared: BTreeSet<String>,
    problem: Option<SchemaProblem>,
}

#[derive(Clone, Debug)]
struct SchemaProblem {
    message: &'static str,
    field: Option<String>,
}

impl<E: 'static> Schema<E> {
    pub fn builder(namespace: impl Into<String>) -> SchemaBuilder<E> {
        SchemaBuilder {
            namespace: namespace.into(),
            fields: Vec::new(),
        }
    }

    /// Declared type identity, used to scope id allocation.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldDescriptor::name)
    }

    /// Listed fields plus the base fields.
    pub fn declared_fields(&self) -> &BTreeSet<String> {
        &self.declared
    }

    pub fn validate(&self) -> Result<(), Error> {
        let Some(problem) = &self.problem else {
            return Ok(());
        };
        let mut err = Error::new(ErrorKind::InvalidTarget)
            .with_message(problem.message)
            .with_namespace(&self.namespace);
        if let Some(field) = &problem.field {
            err = err.with_field(field);
        }
        Err(err)
    }

    /// Decodes every listed field present in `record` into `entity`.
    ///
    /// Absent fields and explicit nulls on non-optional fields are skipped.
    /// Fields whose value cannot be coerced keep their previous value and are reported.
    pub fn decode_into(&self, entity: &mut E, record: &RawRecord) -> Vec<FieldIssue> {
        let mut issues = Vec::new();
        self.decode_at(entity, record, "", &mut issues);
        issues
    }

    fn decode_at(
        &self,
        entity: &mut E,
        record: &RawRecord,
        path: &str,
        issues: &mut Vec<FieldIssue>,
    ) {
        for field in &self.fields {
            let Some(value) = record.get(&field.name) else {
                continue;
            };
            (field.decode)(entity, value, &child_path(path, &field.name), issues);
        }
    }

    pub fn decode(&self, record: &RawRecord) -> E
    where
        E: Default,
    {
        let mut entity = E::default();
        let _ = self.decode_into(&mut entity, record);
        entity
    }

    /// Encodes the listed fields in declaration order.
    pub fn encode(&self, entity: &E) -> RawRecord {
        let mut record = RawRecord::new();
        for field in &self.fields {
            record.insert(field.name.clone(), (field.encode)(entity));
        }
        record
    }
}

pub struct SchemaBuilder<E> {
    namespace: String,
    fields: Vec<FieldDescriptor<E>>,
}

impl<E: 'static> SchemaBuilder<E> {
    pub fn field<T: FieldValue + 'static>(
        mut self,
        name: &str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> Self {
        let decode: DecodeFn<E> = Box::new(
            move |entity: &mut E, value: &Value, path: &str, issues: &mut Vec<FieldIssue>| {
                let decoded = if value.is_null() {
                    T::decode_null()
                } else {
                    T::decode_lenient(value, path, issues)
                };
                if let Some(decoded) = decoded {
                    *get_mut(entity) = decoded;
                }
            },
        );
        let encode: EncodeFn<E> = Box::new(move |entity: &E| get(entity).encode());
        self.push(name, decode, encode);
        self
    }

    /// A nested entity, decoded leniently with its own schema.
    pub fn entity<T: Entity>(
        mut self,
        name: &str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> Self {
        let decode: DecodeFn<E> = Box::new(
            move |entity: &mut E, value: &Value, path: &str, issues: &mut Vec<FieldIssue>| {
                match value {
                    Value::Null => {}
                    Value::Object(record) => {
                        T::schema().decode_at(get_mut(entity), record, path, issues)
                    }
                    other => {
                        issues.push(FieldIssue::new(path, CoercionError::new("object", other)))
                    }
                }
            },
        );
        let encode: EncodeFn<E> =
            Box::new(move |entity: &E| Value::Object(T::schema().encode(get(entity))));
        self.push(name, decode, encode);
        self
    }

    /// A list of nested entities. Elements that are not objects decode as
    /// defaults and are reported by index.
    pub fn entity_list<T: Entity>(
        mut self,
        name: &str,
        get: fn(&E) -> &Vec<T>,
        get_mut: fn(&mut E) -> &mut Vec<T>,
    ) -> Self {
        let decode: DecodeFn<E> = Box::new(
            move |entity: &mut E, value: &Value, path: &str, issues: &mut Vec<FieldIssue>| {
                let items = match value {
                    Value::Null => return,
                    Value::Array(items) => items,
                    other => {
                        issues.push(FieldIssue::new(path, CoercionError::new("array", other)));
                        return;
                    }
                };
                let schema = T::schema();
                let mut decoded = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    let mut element = T::default();
                    match item {
                        Value::Object(record) => {
                            schema.decode_at(&mut element, record, &item_path, issues)
                        }
                        other => {
                            let error = CoercionError::new("object", other);
                            issues.push(FieldIssue::new(item_path, error));
                        }
                    }
                    decoded.push(element);
                }
                *get_mut(entity) = decoded;
            },
        );
        let encode: EncodeFn<E> = Box::new(move |entity: &E| {
            Value::Array(
                get(entity)
                    .iter()
                    .map(|item| Value::Object(T::schema().encode(item)))
                    .collect(),
            )
        });
        self.push(name, decode, encode);
        self
    }

    pub fn build(self) -> Schema<E> {
        let problem = find_problem(&self.namespace, &self.fields);
        let mut declared: BTreeSet<String> =
            self.fields.iter().map(|field| field.name.clone()).collect();
        declared.extend(BASE_FIELDS.iter().map(|name| name.to_string()));
        Schema {
            namespace: self.namespace,
            fields: self.fields,
            declared,
            problem,
        }
    }

    fn push(&mut self, name: &str, decode: DecodeFn<E>, encode: EncodeFn<E>) {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            decode,
            encode,
        });
    }
}

fn find_problem<E>(namespace: &str, fields: &[FieldDescriptor<E>]) -> Option<SchemaProblem> {
    if namespace.trim().is_empty() {
        return Some(SchemaProblem {
            message: "entity namespace is empty",
            field: None,
        });
    }
    let mut seen = BTreeSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Some(SchemaProblem {
                message: "field name is empty",
                field: None,
            });
        }
        if !seen.insert(field.name.as_str()) {
            return Some(SchemaProblem {
                message: "field is declared more than once",
                field: Some(field.name.clone()),
            });
        }
    }
    None
}
