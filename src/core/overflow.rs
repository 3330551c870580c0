//! Purpose: Capture the fields of a record that a typed entity does not model.
//! Exports: `extract`, `serialize`, `full_info`.
//! Role: Keeps unmodeled client data as an opaque sidecar blob.
//! Invariants: Overflow never contains a declared field name.
//! Invariants: Serialization sorts keys; an empty overflow serializes to "".

use std::collections::BTreeSet;

use crate::core::record::RawRecord;

/// Fields of `record` whose key is not in `declared`, sorted by key.
pub fn extract(record: &RawRecord, declared: &BTreeSet<String>) -> RawRecord {
    let mut keys: Vec<&String> = record
        .keys()
        .filter(|key| !declared.contains(key.as_str()))
        .collect();
    keys.sort_unstable();

    let mut overflow = RawRecord::new();
    for key in keys {
        if let Some(value) = record.get(key) {
            overflow.insert(key.clone(), value.clone());
        }
    }
    overflow
}

pub fn serialize(overflow: &RawRecord) -> String {
    if overflow.is_empty() {
        return String::new();
    }
    serde_json::to_string(overflow).unwrap_or_default()
}

pub fn full_info(record: &RawRecord, declared: &BTreeSet<String>) -> String {
    serialize(&extract(record, declared))
}

#[cfg(test)]
mod tests {
    use super::{extract, full_info};
    use crate::core::record::RawRecord;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().cloned().expect("object fixture")
    }

    fn declared(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn undeclared_fields_are_kept() {
        let info = full_info(
            &record(json!({"Name": "Acme", "ExtraFlag": true})),
            &declared(&["Name"]),
        );
        assert_eq!(info, r#"{"ExtraFlag":true}"#);
    }

    #[test]
    fn no_overflow_is_the_empty_string() {
        let info = full_info(&record(json!({"Name": "Acme"})), &declared(&["Name", "Id"]));
        assert_eq!(info, "");
    }

    #[test]
    fn overflow_keys_are_sorted_regardless_of_input_order() {
        let left = full_info(
            &record(json!({"z": 1, "a": {"nested": [1, 2]}, "Name": "x"})),
            &declared(&["Name"]),
        );
        let right = full_info(
            &record(json!({"a": {"nested": [1, 2]}, "Name": "x", "z": 1})),
            &declared(&["Name"]),
        );
        assert_eq!(left, r#"{"a":{"nested":[1,2]},"z":1}"#);
        assert_eq!(left, right);
    }

    #[test]
    fn declared_and_overflow_keys_never_intersect() {
        let source = record(json!({"Id": 1, "Name": "n", "Code": "c", "Extra": null, "More": []}));
        let sets = [
            declared(&[]),
            declared(&["Id"]),
            declared(&["Name", "Code"]),
            declared(&["Id", "Name", "Code", "Extra", "More"]),
            declared(&["Unrelated"]),
        ];
        for set in sets {
            let overflow = extract(&source, &set);
            assert!(overflow.keys().all(|key| !set.contains(key)));
            assert_eq!(
                overflow.len() + source.keys().filter(|key| set.contains(*key)).count(),
                source.len()
            );
        }
    }
}
