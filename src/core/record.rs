// Decoded request records and the canonical text form of a batch.
use serde_json::{Map, Value};

/// Any decoded JSON value. Objects keep insertion order.
pub type JsonValue = Value;

/// One decoded JSON object from a request body, before typed binding.
pub type RawRecord = Map<String, Value>;

/// Ordered records extracted from a single request body.
///
/// The canonical source text is kept in sync with the records: a single record
/// serializes as an object, several as an array, none as the empty string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    records: Vec<RawRecord>,
    source: String,
}

impl Batch {
    pub fn new(records: Vec<RawRecord>) -> Self {
        let source = canonical_source(&records);
        Self { records, source }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn first(&self) -> Option<&RawRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() || self.source.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Applies `entries` to every record, last writer wins.
    pub(crate) fn merge_all(&mut self, entries: &RawRecord) {
        if entries.is_empty() || self.records.is_empty() {
            return;
        }
        for record in &mut self.records {
            for (key, value) in entries {
                record.insert(key.clone(), value.clone());
            }
        }
        self.source = canonical_source(&self.records);
    }
}

fn canonical_source(records: &[RawRecord]) -> String {
    let encoded = match records {
        [] => return String::new(),
        [single] => serde_json::to_string(single),
        many => serde_json::to_string(many),
    };
    encoded.unwrap_or_default()
}
