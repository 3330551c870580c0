//! Purpose: Per-request context handed to every business handler.
//! Exports: `RequestContext`, `ContextBuilder`, `LoginUser`, `UploadedFile`.
//! Role: Owns the parsed batch, exposes typed accessors, binding, id allocation, and child derivation.
//! Invariants: The body is parsed once, at build time; the batch changes only through bind attachments.
//! Invariants: Scalar accessors read the first record only and fall back to zero values.
//! Invariants: Children share time, identity and allocator, never the parent's batch.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::binder::{
    Attachment, BindIssue, BindOptions, BindOutcome, BindTarget, FieldBinder,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::id::IdAllocator;
use crate::core::record::{Batch, RawRecord};
use crate::core::scalar::{coerce_u64, display_string};
use crate::core::schema::{Entity, ID_FIELD};
use crate::json::parse::{ParseFailureCategory, ParseReport, SkippedElement, parse_report};

/// Identity of the caller that issued the request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoginUser {
    pub user_id: u64,
    pub user_name: String,
    pub login_id: String,
    pub departments: BTreeMap<u64, String>,
    roles: BTreeMap<u64, String>,
    token: String,
}

impl LoginUser {
    pub fn new(user_id: u64, user_name: impl Into<String>, login_id: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            login_id: login_id.into(),
            ..Self::default()
        }
    }

    pub fn with_department(mut self, id: u64, name: impl Into<String>) -> Self {
        self.departments.insert(id, name.into());
        self
    }

    pub fn with_role(mut self, id: u64, name: impl Into<String>) -> Self {
        self.roles.insert(id, name.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn roles(&self) -> &BTreeMap<u64, String> {
        &self.roles
    }

    pub fn has_role(&self, id: u64) -> bool {
        self.roles.contains_key(&id)
    }

    pub fn in_department(&self, id: u64) -> bool {
        self.departments.contains_key(&id)
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// An uploaded multipart file part. Passed through untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub path: PathBuf,
}

pub struct ContextBuilder {
    body: Vec<u8>,
    time: Option<OffsetDateTime>,
    login_user: LoginUser,
    files: BTreeMap<String, Vec<UploadedFile>>,
    allocator: Option<Arc<dyn IdAllocator>>,
    options: BindOptions,
}

impl ContextBuilder {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            time: None,
            login_user: LoginUser::default(),
            files: BTreeMap::new(),
            allocator: None,
            options: BindOptions::default(),
        }
    }

    /// Operation time stamped on every snapshot. Defaults to now (UTC).
    pub fn time(mut self, time: OffsetDateTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn login_user(mut self, login_user: LoginUser) -> Self {
        self.login_user = login_user;
        self
    }

    pub fn file(mut self, file: UploadedFile) -> Self {
        self.files.entry(file.field.clone()).or_default().push(file);
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn IdAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn options(mut self, options: BindOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> RequestContext {
        RequestContext {
            time: self.time.unwrap_or_else(OffsetDateTime::now_utc),
            login_user: self.login_user,
            input: parse_report(&self.body),
            files: self.files,
            allocator: self.allocator,
            options: self.options,
        }
    }
}

pub struct RequestContext {
    time: OffsetDateTime,
    login_user: LoginUser,
    input: ParseReport,
    files: BTreeMap<String, Vec<UploadedFile>>,
    allocator: Option<Arc<dyn IdAllocator>>,
    options: BindOptions,
}

impl RequestContext {
    pub fn builder(body: impl Into<Vec<u8>>) -> ContextBuilder {
        ContextBuilder::new(body)
    }

    /// A context for `input` that keeps this request's time, login user,
    /// allocator and bind options. Uploaded files are not carried over.
    pub fn derive_child<T: Serialize + ?Sized>(&self, input: &T) -> RequestContext {
        let body = match serde_json::to_vec(input) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = %err, "child input failed to serialize; using empty body");
                Vec::new()
            }
        };
        self.derive_child_from_bytes(body)
    }

    pub fn derive_child_from_bytes(&self, body: impl Into<Vec<u8>>) -> RequestContext {
        let body: Vec<u8> = body.into();
        RequestContext {
            time: self.time,
            login_user: self.login_user.clone(),
            input: parse_report(&body),
            files: BTreeMap::new(),
            allocator: self.allocator.clone(),
            options: self.options,
        }
    }

    pub fn time(&self) -> OffsetDateTime {
        self.time
    }

    /// Owned copy of the caller identity.
    pub fn login_user(&self) -> LoginUser {
        self.login_user.clone()
    }

    pub fn options(&self) -> BindOptions {
        self.options
    }

    pub fn batch(&self) -> &Batch {
        &self.input.batch
    }

    pub fn records(&self) -> &[RawRecord] {
        self.input.batch.records()
    }

    /// Canonical text of the batch: an object, an array, or "".
    pub fn source(&self) -> &str {
        self.input.batch.source()
    }

    /// Why the body produced an empty batch, if it did so by failing.
    pub fn parse_failure(&self) -> Option<ParseFailureCategory> {
        self.input.failure
    }

    pub fn skipped_elements(&self) -> &[SkippedElement] {
        &self.input.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.input.batch.is_empty()
    }

    pub fn get_file(&self, key: &str) -> &[UploadedFile] {
        self.files.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Compact JSON of the first record's `name`, or "".
    pub fn get_json(&self, name: &str) -> String {
        self.first_value(name)
            .and_then(|value| serde_json::to_string(value).ok())
            .unwrap_or_default()
    }

    pub fn get_string(&self, name: &str) -> String {
        display_string(self.first_value(name))
    }

    pub fn get_unsigned_int(&self, name: &str) -> u64 {
        coerce_u64(self.first_value(name)).unwrap_or(0)
    }

    pub fn get_id(&self) -> u64 {
        self.get_unsigned_int(ID_FIELD)
    }

    /// Allocates the next id in the namespace of `E`.
    pub fn new_id<E: Entity>(&self) -> Result<u64, Error> {
        let namespace = E::schema().namespace();
        let allocator = self.allocator.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("no id allocator configured")
                .with_namespace(namespace)
                .with_hint("Pass an allocator to ContextBuilder::allocator.")
        })?;
        allocator.next(namespace)
    }

    /// Binds the batch into `target` after merging `attachments` into every record.
    ///
    /// Snapshots (id, last modified, overflow) come back in the outcome, one per record.
    pub fn bind<T: BindTarget>(
        &mut self,
        target: &mut T,
        attachments: &[Attachment],
    ) -> Result<BindOutcome, Error> {
        let binder = FieldBinder::new(self.time, self.options);
        let mut outcome = binder.bind(&mut self.input.batch, target, attachments)?;
        if self.options.collect_issues && !self.input.skipped.is_empty() {
            let mut issues: Vec<BindIssue> = self
                .input
                .skipped
                .iter()
                .map(|skipped| {
                    BindIssue::record(
                        "skipped-element",
                        format!("batch element is a {}, not an object", skipped.found),
                        Some(skipped.index),
                    )
                })
                .collect();
            issues.append(&mut outcome.issues);
            outcome.issues = issues;
        }
        Ok(outcome)
    }

    fn first_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.input.batch.first()?.get(name)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("time", &self.time)
            .field("login_user", &self.login_user.user_id)
            .field("records", &self.input.batch.len())
            .field("files", &self.files.len())
            .field("allocator", &self.allocator.is_some())
            .finish()
    }
}
