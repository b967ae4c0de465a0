use std::collections::BTreeMap;

use serde_json::Value;

use crate::ddp::Fields;

/// Local mirror of one published collection: record id to field mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    records: BTreeMap<String, Fields>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, id: &str) -> Option<&Fields> {
        self.records.get(id)
    }

    /// Field value of a record, if both exist.
    pub fn field(&self, id: &str, key: &str) -> Option<&Value> {
        self.records.get(id).and_then(|fields| fields.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Fields)> {
        self.records.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &Fields> {
        self.records.values()
    }

    /// The first record in id order. Single-document publications (inputs,
    /// paint) are read through this.
    pub fn first(&self) -> Option<&Fields> {
        self.records.values().next()
    }

    /// Replaces the record with a fresh baseline.
    pub fn added(&mut self, id: String, fields: Fields) {
        self.records.insert(id, fields);
    }

    /// Merges `fields` over an existing record and drops `cleared` keys.
    /// Deltas for unknown records are ignored.
    pub fn changed(&mut self, id: &str, fields: Fields, cleared: &[String]) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        for (key, value) in fields {
            record.insert(key, value);
        }
        for key in cleared {
            record.remove(key);
        }
    }

    pub fn removed(&mut self, id: &str) {
        self.records.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn changed_then_cleared_scenario() {
        let mut collection = Collection::new();
        collection.added("A".to_string(), fields(json!({"x": 1})));
        collection.changed("A", fields(json!({"y": 2})), &["x".to_string()]);

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get("A"), Some(&fields(json!({"y": 2}))));
    }

    #[test]
    fn applying_the_same_delta_twice_is_idempotent() {
        let mut once = Collection::new();
        once.added("A".to_string(), fields(json!({"x": 1, "z": [1, 2]})));
        let mut twice = once.clone();

        let delta = fields(json!({"x": 5, "w": {"nested": true}}));
        once.changed("A", delta.clone(), &["z".to_string()]);
        twice.changed("A", delta.clone(), &["z".to_string()]);
        twice.changed("A", delta, &["z".to_string()]);

        assert_eq!(once, twice);
        assert_eq!(once.field("A", "x"), Some(&json!(5)));
    }

    #[test]
    fn removed_after_added_leaves_nothing() {
        let mut collection = Collection::new();
        collection.added("A".to_string(), fields(json!({"x": 1})));
        collection.changed("A", fields(json!({"x": 2})), &[]);
        collection.changed("A", fields(json!({"y": 3})), &["x".to_string()]);
        collection.removed("A");

        assert!(collection.get("A").is_none());
        assert!(collection.is_empty());
    }

    #[test]
    fn cleared_field_is_removed_even_if_previously_set() {
        let mut collection = Collection::new();
        collection.added("A".to_string(), fields(json!({})));
        collection.changed("A", fields(json!({"x": 1})), &[]);
        collection.changed("A", Fields::new(), &["x".to_string()]);

        assert_eq!(collection.field("A", "x"), None);
    }

    #[test]
    fn deltas_for_unknown_records_are_ignored() {
        let mut collection = Collection::new();
        collection.changed("ghost", fields(json!({"x": 1})), &[]);
        collection.removed("ghost");
        assert!(collection.is_empty());
    }

    #[test]
    fn added_replaces_previous_baseline() {
        let mut collection = Collection::new();
        collection.added("A".to_string(), fields(json!({"x": 1})));
        collection.added("A".to_string(), fields(json!({"y": 1})));
        assert_eq!(collection.get("A"), Some(&fields(json!({"y": 1}))));
    }
}
