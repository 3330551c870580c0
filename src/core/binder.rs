//! Purpose: Bind a batch of loosely typed records into typed entities plus overflow snapshots.
//! Exports: `FieldBinder`, `BindTarget`, `Attachment`, `EntitySnapshot`, `BindOutcome`.
//! Exports: `BindIssue`, `BindOptions`, `compose`.
//! Role: Core of request binding; the only hard failure is an unusable target schema.
//! Invariants: Attachments apply to every record of the batch, last writer wins.
//! Invariants: Snapshot order matches batch order; overflow never holds declared fields.
//! Invariants: Field-level coercion failures zero-fill silently unless issues are collected.

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::overflow;
use crate::core::record::{Batch, RawRecord};
use crate::core::scalar::{coerce_u64, json_type_name};
use crate::core::schema::{Entity, FieldIssue, ID_FIELD, LAST_MODIFIED_FIELD, Schema};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BindOptions {
    /// Return field coercion failures and skipped elements as `BindIssue`s.
    pub collect_issues: bool,
}

impl BindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collecting_issues() -> Self {
        Self {
            collect_issues: true,
        }
    }
}

/// Server-supplied key/value pairs merged into every record before binding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attachment {
    entries: RawRecord,
}

impl Attachment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a struct-like value. Values that do not serialize to an
    /// object contribute nothing.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Object(entries)) => Self { entries },
            Ok(other) => {
                tracing::warn!(
                    found = json_type_name(&other),
                    "attachment is not an object; ignoring"
                );
                Self::default()
            }
            Err(err) => {
                tracing::warn!(error = %err, "attachment failed to serialize; ignoring");
                Self::default()
            }
        }
    }

    pub fn pair(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(key, value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn entries(&self) -> &RawRecord {
        &self.entries
    }
}

impl From<RawRecord> for Attachment {
    fn from(entries: RawRecord) -> Self {
        Self { entries }
    }
}

/// Per-record binder output, persisted beside the typed fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntitySnapshot {
    pub id: u64,
    pub last_modified: OffsetDateTime,
    /// Compact JSON of the overflow fields, or "" when there are none.
    pub full_info: String,
}

impl EntitySnapshot {
    pub fn overflow(&self) -> RawRecord {
        if self.full_info.is_empty() {
            return RawRecord::new();
        }
        match serde_json::from_str::<Value>(&self.full_info) {
            Ok(Value::Object(record)) => record,
            _ => {
                tracing::debug!(id = self.id, "full info is not a json object");
                RawRecord::new()
            }
        }
    }

    pub fn last_modified_rfc3339(&self) -> Result<String, Error> {
        self.last_modified.format(&Rfc3339).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("timestamp format failed")
                .with_source(err)
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindIssue {
    pub code: String,
    pub message: String,
    pub record: Option<usize>,
    pub field: Option<String>,
}

impl BindIssue {
    pub(crate) fn field(record: usize, issue: FieldIssue) -> Self {
        Self {
            code: "field-coercion".to_string(),
            message: issue.error.to_string(),
            record: Some(record),
            field: Some(issue.field),
        }
    }

    pub(crate) fn record(code: &str, message: impl Into<String>, record: Option<usize>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            record,
            field: None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BindOutcome {
    /// One snapshot per batch record, in batch order.
    pub snapshots: Vec<EntitySnapshot>,
    /// Empty unless `BindOptions::collect_issues` is set.
    pub issues: Vec<BindIssue>,
}

impl BindOutcome {
    pub fn first(&self) -> Option<&EntitySnapshot> {
        self.snapshots.first()
    }
}

/// Something a batch can be bound into: one entity or a list of them.
pub trait BindTarget {
    type Item: Entity;

    fn decode_batch(&mut self, batch: &Batch, issues: &mut Vec<BindIssue>);
}

impl<E: Entity> BindTarget for E {
    type Item = E;

    /// A lone entity only takes a single-record batch; a list cannot decode
    /// into one struct, so it is absorbed and the entity stays as it was.
    fn decode_batch(&mut self, batch: &Batch, issues: &mut Vec<BindIssue>) {
        match batch.records() {
            [] => {}
            [record] => {
                for issue in E::schema().decode_into(self, record) {
                    issues.push(BindIssue::field(0, issue));
                }
            }
            many => issues.push(BindIssue::record(
                "target-shape",
                format!("{} records cannot bind into a single entity", many.len()),
                None,
            )),
        }
    }
}

impl<E: Entity> BindTarget for Vec<E> {
    type Item = E;

    /// Resizes to the batch length and decodes positionally, reusing existing elements.
    fn decode_batch(&mut self, batch: &Batch, issues: &mut Vec<BindIssue>) {
        self.resize_with(batch.len(), E::default);
        let schema = E::schema();
        for (index, (entity, record)) in self.iter_mut().zip(batch.records()).enumerate() {
            for issue in schema.decode_into(entity, record) {
                issues.push(BindIssue::field(index, issue));
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FieldBinder {
    time: OffsetDateTime,
    options: BindOptions,
}

impl FieldBinder {
    pub fn new(time: OffsetDateTime, options: BindOptions) -> Self {
        Self { time, options }
    }

    /// Merges `attachments` into every record of `batch`, decodes the batch into
    /// `target`, and returns one snapshot per record.
    pub fn bind<T: BindTarget>(
        &self,
        batch: &mut Batch,
        target: &mut T,
        attachments: &[Attachment],
    ) -> Result<BindOutcome, Error> {
        let schema = <T::Item as Entity>::schema();
        schema.validate()?;

        for attachment in attachments {
            batch.merge_all(attachment.entries());
        }

        let mut issues = Vec::new();
        target.decode_batch(batch, &mut issues);
        for issue in &issues {
            tracing::debug!(
                namespace = schema.namespace(),
                code = %issue.code,
                record = ?issue.record,
                field = ?issue.field,
                "absorbed bind issue"
            );
        }

        let snapshots = batch
            .records()
            .iter()
            .map(|record| self.snapshot(schema, record))
            .collect();

        if !self.options.collect_issues {
            issues.clear();
        }
        Ok(BindOutcome { snapshots, issues })
    }

    fn snapshot<E: Entity>(&self, schema: &Schema<E>, record: &RawRecord) -> EntitySnapshot {
        EntitySnapshot {
            id: coerce_u64(record.get(ID_FIELD)).unwrap_or(0),
            last_modified: self.time,
            full_info: overflow::full_info(record, schema.declared_fields()),
        }
    }
}

/// Rebuilds the complete document for an entity: overflow fields, then the
/// typed fields, then `Id` and `LastModified` from the snapshot.
pub fn compose<E: Entity>(entity: &E, snapshot: &EntitySnapshot) -> Result<RawRecord, Error> {
    let mut document = snapshot.overflow();
    for (key, value) in E::schema().encode(entity) {
        document.insert(key, value);
    }
    document.insert(ID_FIELD.to_string(), Value::from(snapshot.id));
    document.insert(
        LAST_MODIFIED_FIELD.to_string(),
        Value::String(snapshot.last_modified_rfc3339()?),
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::{Attachment, BindOptions, FieldBinder, compose};
    use crate::core::error::ErrorKind;
    use crate::core::record::{Batch, RawRecord};
    use crate::core::schema::{Entity, Schema};
    use serde::Serialize;
    use serde_json::{Value, json};
    use std::sync::OnceLock;
    use time::macros::datetime;

    #[derive(Debug, Default, PartialEq)]
    struct Company {
        name: String,
        tenant: String,
    }

    impl Entity for Company {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: OnceLock<Schema<Company>> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                Schema::<Company>::builder("test.Company")
                    .field("Name", |c| &c.name, |c| &mut c.name)
                    .field("Tenant", |c| &c.tenant, |c| &mut c.tenant)
                    .build()
            })
        }
    }

    #[derive(Debug, Default)]
    struct Broken {
        name: String,
    }

    impl Entity for Broken {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: OnceLock<Schema<Broken>> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                Schema::<Broken>::builder("")
                    .field("Name", |b| &b.name, |b| &mut b.name)
                    .build()
            })
        }
    }

    fn batch(value: Value) -> Batch {
        let records = match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| item.as_object().cloned().expect("object element"))
                .collect(),
            Value::Object(record) => vec![record],
            _ => Vec::new(),
        };
        Batch::new(records)
    }

    fn binder() -> FieldBinder {
        FieldBinder::new(datetime!(2023-02-21 17:39:00 UTC), BindOptions::default())
    }

    #[test]
    fn typed_fields_bind_and_extras_overflow() {
        let mut input = batch(json!({"Name": "Acme", "ExtraFlag": true}));
        let mut company = Company::default();
        let outcome = binder().bind(&mut input, &mut company, &[]).expect("bind");
        assert_eq!(company.name, "Acme");
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.snapshots[0].full_info, r#"{"ExtraFlag":true}"#);
        assert_eq!(outcome.snapshots[0].id, 0);
        assert_eq!(
            outcome.snapshots[0].last_modified,
            datetime!(2023-02-21 17:39:00 UTC)
        );
    }

    #[test]
    fn id_is_coerced_tolerantly() {
        let mut company = Company::default();
        let outcome = binder()
            .bind(&mut batch(json!({"Id": "42"})), &mut company, &[])
            .expect("bind");
        assert_eq!(outcome.snapshots[0].id, 42);
        assert_eq!(outcome.snapshots[0].full_info, "");

        let outcome = binder()
            .bind(&mut batch(json!({"Id": "abc"})), &mut company, &[])
            .expect("bind");
        assert_eq!(outcome.snapshots[0].id, 0);
    }

    #[test]
    fn attachments_reach_every_record() {
        let mut input = batch(json!([{"Name": "a"}, {"Name": "b"}, {"Name": "c", "Tenant": "Z"}]));
        let mut companies: Vec<Company> = Vec::new();
        let outcome = binder()
            .bind(
                &mut input,
                &mut companies,
                &[Attachment::pair("Tenant", "A").with("Region", "EU")],
            )
            .expect("bind");
        assert_eq!(companies.len(), 3);
        assert_eq!(outcome.snapshots.len(), 3);
        for (company, snapshot) in companies.iter().zip(&outcome.snapshots) {
            assert_eq!(company.tenant, "A");
            assert_eq!(snapshot.full_info, r#"{"Region":"EU"}"#);
        }
        assert_eq!(companies[2].name, "c");
        for record in input.records() {
            assert_eq!(record["Tenant"], "A");
        }
    }

    #[test]
    fn struct_attachments_flatten_and_later_ones_win() {
        #[derive(Serialize)]
        struct Scope {
            #[serde(rename = "Tenant")]
            tenant: &'static str,
            #[serde(rename = "DepartId")]
            depart_id: u64,
        }

        let mut input = batch(json!({"Name": "a"}));
        let mut company = Company::default();
        let outcome = binder()
            .bind(
                &mut input,
                &mut company,
                &[
                    Attachment::from_serialize(&Scope {
                        tenant: "first",
                        depart_id: 9,
                    }),
                    Attachment::pair("Tenant", "second"),
                ],
            )
            .expect("bind");
        assert_eq!(company.tenant, "second");
        assert_eq!(outcome.snapshots[0].full_info, r#"{"DepartId":9}"#);
    }

    #[test]
    fn non_object_attachment_contributes_nothing() {
        let attachment = Attachment::from_serialize(&vec![1, 2, 3]);
        assert!(attachment.entries().is_empty());
        let attachment = Attachment::from_serialize(&"text");
        assert!(attachment.entries().is_empty());
    }

    #[test]
    fn list_targets_resize_to_the_batch() {
        let mut companies = vec![
            Company {
                name: "stale".to_string(),
                tenant: "keep".to_string(),
            },
            Company::default(),
            Company::default(),
        ];
        let mut input = batch(json!([{"Name": "x"}, {"Name": "y"}]));
        binder().bind(&mut input, &mut companies, &[]).expect("bind");
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].name, "x");
        assert_eq!(companies[0].tenant, "keep");
        assert_eq!(companies[1].name, "y");
    }

    #[test]
    fn single_target_ignores_multi_record_batches() {
        let mut input = batch(json!([{"Id": 1, "Name": "x"}, {"Id": 2, "Name": "y"}]));
        let mut company = Company::default();
        let outcome = binder()
            .bind(&mut input, &mut company, &[])
            .expect("bind");
        assert_eq!(company, Company::default());
        let ids: Vec<u64> = outcome.snapshots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn issues_are_only_returned_when_collected() {
        let mut company = Company::default();
        let outcome = binder()
            .bind(&mut batch(json!({"Name": 5})), &mut company, &[])
            .expect("bind");
        assert!(outcome.issues.is_empty());
        assert_eq!(company.name, "");

        let collecting =
            FieldBinder::new(datetime!(2023-02-21 17:39:00 UTC), BindOptions::collecting_issues());
        let outcome = collecting
            .bind(&mut batch(json!({"Name": 5})), &mut company, &[])
            .expect("bind");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].code, "field-coercion");
        assert_eq!(outcome.issues[0].field.as_deref(), Some("Name"));
        assert_eq!(outcome.issues[0].record, Some(0));
        assert_eq!(outcome.issues[0].message, "expected string, found number");
    }

    #[test]
    fn invalid_schema_is_an_invalid_target() {
        let mut broken = Broken::default();
        let err = binder()
            .bind(&mut batch(json!({"Name": "x"})), &mut broken, &[])
            .expect_err("invalid target");
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);
        assert_eq!(broken.name, "");
    }

    #[test]
    fn binding_twice_yields_identical_snapshots() {
        let input = batch(json!([{"Id": 3, "Name": "a", "x": 1}, {"Name": "b", "y": [1]}]));
        let mut first: Vec<Company> = Vec::new();
        let mut second: Vec<Company> = Vec::new();
        let left = binder()
            .bind(&mut input.clone(), &mut first, &[])
            .expect("bind");
        let right = binder()
            .bind(&mut input.clone(), &mut second, &[])
            .expect("bind");
        assert_eq!(left, right);
        assert_eq!(first, second);
    }

    #[test]
    fn compose_restores_the_full_document() {
        let mut input = batch(json!({"Id": 7, "Name": "Acme", "Color": "red"}));
        let mut company = Company::default();
        let outcome = binder().bind(&mut input, &mut company, &[]).expect("bind");
        let snapshot = outcome.first().expect("snapshot");

        let document: RawRecord = compose(&company, snapshot).expect("compose");
        assert_eq!(
            Value::Object(document),
            json!({
                "Color": "red",
                "Name": "Acme",
                "Tenant": "",
                "Id": 7,
                "LastModified": "2023-02-21T17:39:00Z"
            })
        );
    }

    #[test]
    fn overflow_of_empty_full_info_is_empty() {
        let mut company = Company::default();
        let outcome = binder()
            .bind(&mut batch(json!({"Name": "a"})), &mut company, &[])
            .expect("bind");
        assert!(outcome.snapshots[0].overflow().is_empty());
    }
}
