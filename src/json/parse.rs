//! Purpose: Turn raw request body bytes into an ordered batch of records.
//! Exports: `parse`, `parse_report`, `ParseReport`, `SkippedElement`, `ParseFailureCategory`.
//! Exports: `categorize_error`, `categorize_message`, `hint_for_error`.
//! Role: Single decode seam for request bodies; never surfaces a hard error.
//! Invariants: An object yields one record; an array yields one record per object element.
//! Invariants: Scalars, null, empty bodies and malformed JSON yield an empty batch.
//! Notes: Non-object array elements are skipped one by one, leaving a partial batch.

use serde_json::Value;

use crate::core::record::{Batch, RawRecord};
use crate::core::scalar::json_type_name;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseFailureCategory {
    Empty,
    Syntax,
    Eof,
    Utf8,
    NumericRange,
    DepthLimit,
    UnsupportedShape,
    Unknown,
}

impl ParseFailureCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Syntax => "syntax",
            Self::Eof => "eof",
            Self::Utf8 => "utf8",
            Self::NumericRange => "numeric-range",
            Self::DepthLimit => "depth-limit",
            Self::UnsupportedShape => "unsupported-shape",
            Self::Unknown => "unknown",
        }
    }
}

/// An array element dropped because it was not an object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedElement {
    pub index: usize,
    pub found: &'static str,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseReport {
    pub batch: Batch,
    pub failure: Option<ParseFailureCategory>,
    pub skipped: Vec<SkippedElement>,
}

pub fn parse(body: &[u8]) -> Batch {
    parse_report(body).batch
}

pub fn parse_report(body: &[u8]) -> ParseReport {
    if body.iter().all(u8::is_ascii_whitespace) {
        return failed(ParseFailureCategory::Empty, body.len());
    }

    let value = match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(err) => return failed(categorize_error(&err), body.len()),
    };

    match value {
        Value::Object(record) => ParseReport {
            batch: Batch::new(vec![record]),
            failure: None,
            skipped: Vec::new(),
        },
        Value::Array(items) => {
            let mut records: Vec<RawRecord> = Vec::with_capacity(items.len());
            let mut skipped = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(record) => records.push(record),
                    other => {
                        let found = json_type_name(&other);
                        tracing::warn!(index, found, "skipping non-object batch element");
                        skipped.push(SkippedElement { index, found });
                    }
                }
            }
            ParseReport {
                batch: Batch::new(records),
                failure: None,
                skipped,
            }
        }
        other => {
            tracing::debug!(
                found = json_type_name(&other),
                "request body is not an object or array"
            );
            failed(ParseFailureCategory::UnsupportedShape, body.len())
        }
    }
}

fn failed(category: ParseFailureCategory, body_len: usize) -> ParseReport {
    tracing::debug!(
        category = category.label(),
        body_len,
        "request body yields an empty batch"
    );
    ParseReport {
        batch: Batch::empty(),
        failure: Some(category),
        skipped: Vec::new(),
    }
}

pub fn categorize_error(err: &serde_json::Error) -> ParseFailureCategory {
    match categorize_message(&err.to_string()) {
        ParseFailureCategory::Unknown => {}
        known => return known,
    }
    match err.classify() {
        serde_json::error::Category::Eof => ParseFailureCategory::Eof,
        serde_json::error::Category::Syntax => ParseFailureCategory::Syntax,
        serde_json::error::Category::Io | serde_json::error::Category::Data => {
            ParseFailureCategory::Unknown
        }
    }
}

pub fn categorize_message(message: &str) -> ParseFailureCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("recursion limit") {
        ParseFailureCategory::DepthLimit
    } else if lower.contains("number out of range") {
        ParseFailureCategory::NumericRange
    } else if lower.contains("utf-8") || lower.contains("utf8") || lower.contains("unicode") {
        ParseFailureCategory::Utf8
    } else {
        ParseFailureCategory::Unknown
    }
}

/// Operator-facing hint; names the category and context, never the payload.
pub fn hint_for_error(err: &serde_json::Error, context: &str) -> String {
    let category = categorize_error(err);
    format!(
        "parse category: {}; context: {context}; line {} column {}",
        category.label(),
        err.line(),
        err.column()
    )
}

#[cfg(test)]
mod tests {
    use super::{ParseFailureCategory, SkippedElement, parse, parse_report};

    #[test]
    fn object_is_a_single_record() {
        let batch = parse(br#"{"Name":"Acme"}"#);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records()[0]["Name"], "Acme");
    }

    #[test]
    fn array_keeps_element_order() {
        let batch = parse(br#"[{"a":1},{"a":2}]"#);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0]["a"], 1);
        assert_eq!(batch.records()[1]["a"], 2);
    }

    #[test]
    fn object_keys_keep_insertion_order() {
        let batch = parse(br#"{"z":1,"a":2,"m":3}"#);
        let keys: Vec<&str> = batch.records()[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn empty_and_scalar_bodies_yield_empty_batches() {
        let cases: [(&[u8], ParseFailureCategory); 6] = [
            (b"", ParseFailureCategory::Empty),
            (b"  \n", ParseFailureCategory::Empty),
            (b"null", ParseFailureCategory::UnsupportedShape),
            (b"42", ParseFailureCategory::UnsupportedShape),
            (br#""text""#, ParseFailureCategory::UnsupportedShape),
            (b"true", ParseFailureCategory::UnsupportedShape),
        ];
        for (body, category) in cases {
            let report = parse_report(body);
            assert!(report.batch.is_empty());
            assert_eq!(report.failure, Some(category));
        }
    }

    #[test]
    fn malformed_json_yields_empty_batch() {
        let report = parse_report(br#"{"a":}"#);
        assert!(report.batch.is_empty());
        assert_eq!(report.failure, Some(ParseFailureCategory::Syntax));

        let report = parse_report(br#"{"a":1"#);
        assert!(report.batch.is_empty());
        assert_eq!(report.failure, Some(ParseFailureCategory::Eof));
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let report = parse_report(br#"[{"a":1},2,null,{"a":3}]"#);
        assert_eq!(report.batch.len(), 2);
        assert_eq!(report.batch.records()[1]["a"], 3);
        assert_eq!(report.failure, None);
        assert_eq!(
            report.skipped,
            vec![
                SkippedElement {
                    index: 1,
                    found: "number"
                },
                SkippedElement {
                    index: 2,
                    found: "null"
                },
            ]
        );
    }

    #[test]
    fn empty_array_is_an_empty_batch_without_failure() {
        let report = parse_report(b"[]");
        assert!(report.batch.is_empty());
        assert_eq!(report.failure, None);
    }
}
