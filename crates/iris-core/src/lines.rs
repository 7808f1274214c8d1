//! Cache of telephony line state, fed by the gateway.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::scalar_string;

/// One line as last reported by the gateway.
///
/// Only `number` and `state` are interpreted; every other field the gateway
/// sent is kept in `extra` and echoed back verbatim when listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub number: String,
    #[serde(default)]
    pub state: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LineRecord {
    /// Build from a full-sync entry. Returns `None` when the entry has no
    /// usable `number`.
    pub fn from_map(mut fields: Map<String, Value>) -> Option<Self> {
        let number = fields.remove("number").as_ref().and_then(scalar_string)?;
        let state = match fields.remove("state") {
            Some(state) => state,
            None => fields.get("numstateid").cloned().unwrap_or(Value::Null),
        };
        Some(Self {
            number,
            state,
            extra: fields,
        })
    }
}

/// A single `{num, numstateid}` change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineStateUpdate {
    pub number: String,
    pub state: Value,
}

impl LineStateUpdate {
    pub fn from_map(fields: &Map<String, Value>) -> Option<Self> {
        let number = fields
            .get("num")
            .or_else(|| fields.get("number"))
            .and_then(scalar_string)?;
        let state = fields
            .get("numstateid")
            .or_else(|| fields.get("state"))
            .cloned()?;
        Some(Self { number, state })
    }
}

/// Sort key for a line number.
///
/// All-digit numbers compare by value, so "30" < "200" < "1000". Anything
/// else sorts after them as text. The raw string stays part of the key so
/// "7" and "007" remain distinct lines.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum LineKey {
    Numeric(u64, String),
    Text(String),
}

impl LineKey {
    fn new(number: &str) -> Self {
        let numeric = !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit());
        match number.parse::<u64>() {
            Ok(value) if numeric => Self::Numeric(value, number.to_owned()),
            _ => Self::Text(number.to_owned()),
        }
    }
}

/// Lines keyed by number, listed in ascending numeric order.
#[derive(Debug, Default)]
pub struct LineRegistry {
    lines: BTreeMap<LineKey, LineRecord>,
}

impl LineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite every record by number.
    pub fn apply_full_sync(&mut self, records: impl IntoIterator<Item = LineRecord>) -> usize {
        let mut applied = 0;
        for record in records {
            let _ = self.lines.insert(LineKey::new(&record.number), record);
            applied += 1;
        }
        applied
    }

    /// Overwrite the state of known lines. Unknown numbers are skipped.
    /// Returns how many updates matched a line.
    pub fn apply_state_change<'a>(
        &mut self,
        updates: impl IntoIterator<Item = &'a LineStateUpdate>,
    ) -> usize {
        let mut applied = 0;
        for update in updates {
            let Some(line) = self.lines.get_mut(&LineKey::new(&update.number)) else {
                tracing::debug!(number = %update.number, "state change for unknown line ignored");
                continue;
            };
            line.state = update.state.clone();
            applied += 1;
        }
        applied
    }

    pub fn get(&self, number: &str) -> Option<&LineRecord> {
        self.lines.get(&LineKey::new(number))
    }

    pub fn list(&self) -> Vec<LineRecord> {
        self.lines.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> LineRecord {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        LineRecord::from_map(map).unwrap()
    }

    fn update(number: &str, state: &str) -> LineStateUpdate {
        LineStateUpdate {
            number: number.into(),
            state: json!(state),
        }
    }

    #[test]
    fn full_sync_then_state_change() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync([
            record(json!({"number": "101", "state": "idle"})),
            record(json!({"number": "102", "state": "idle"})),
        ]);
        let applied = reg.apply_state_change(&[update("101", "busy")]);
        assert_eq!(applied, 1);

        let list = reg.list();
        assert_eq!(list[0].number, "101");
        assert_eq!(list[0].state, json!("busy"));
        assert_eq!(list[1].state, json!("idle"));
    }

    #[test]
    fn unknown_line_is_ignored() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync([record(json!({"number": "101", "state": "idle"}))]);
        let before = reg.list();
        let applied = reg.apply_state_change(&[update("999", "busy")]);
        assert_eq!(applied, 0);
        assert_eq!(reg.list(), before);
        assert!(reg.get("999").is_none());
    }

    #[test]
    fn list_is_sorted_by_number() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync([
            record(json!({"number": "300"})),
            record(json!({"number": "100"})),
            record(json!({"number": "200"})),
        ]);
        let numbers: Vec<_> = reg.list().into_iter().map(|r| r.number).collect();
        assert_eq!(numbers, ["100", "200", "300"]);

        reg.apply_full_sync([record(json!({"number": "1000"})), record(json!({"number": 30}))]);
        let numbers: Vec<_> = reg.list().into_iter().map(|r| r.number).collect();
        assert_eq!(numbers, ["30", "100", "200", "300", "1000"]);
    }

    #[test]
    fn numbers_compare_by_value_not_text() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync(["200", "1000", "30"].map(|n| record(json!({"number": n}))));
        let numbers: Vec<_> = reg.list().into_iter().map(|r| r.number).collect();
        assert_eq!(numbers, ["30", "200", "1000"]);
    }

    #[test]
    fn non_numeric_numbers_sort_after_numeric() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync(
            ["ivr", "12", "007", "7", "2b"].map(|n| record(json!({"number": n}))),
        );
        let numbers: Vec<_> = reg.list().into_iter().map(|r| r.number).collect();
        assert_eq!(numbers, ["007", "7", "12", "2b", "ivr"]);
        assert_eq!(reg.len(), 5);

        reg.apply_state_change(&[update("007", "busy")]);
        assert_eq!(reg.get("007").unwrap().state, json!("busy"));
        assert_eq!(reg.get("7").unwrap().state, Value::Null);
    }

    #[test]
    fn full_sync_overwrites_existing() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync([record(json!({"number": "101", "state": "idle", "name": "old"}))]);
        reg.apply_full_sync([record(json!({"number": "101", "state": "busy"}))]);
        let line = reg.get("101").unwrap();
        assert_eq!(line.state, json!("busy"));
        assert!(line.extra.get("name").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn state_change_keeps_metadata() {
        let mut reg = LineRegistry::new();
        reg.apply_full_sync([record(json!({"number": "101", "state": "idle", "name": "Sales"}))]);
        reg.apply_state_change(&[update("101", "ringing")]);
        let line = reg.get("101").unwrap();
        assert_eq!(line.extra.get("name"), Some(&json!("Sales")));
        assert_eq!(line.state, json!("ringing"));
    }

    #[test]
    fn record_number_may_be_integer() {
        let line = record(json!({"number": 205, "numstateid": 3}));
        assert_eq!(line.number, "205");
        assert_eq!(line.state, json!(3));
        assert_eq!(line.extra.get("numstateid"), Some(&json!(3)));
    }

    #[test]
    fn record_without_number_is_rejected() {
        let Value::Object(map) = json!({"state": "idle"}) else {
            unreachable!()
        };
        assert!(LineRecord::from_map(map).is_none());
    }

    #[test]
    fn record_serializes_flat() {
        let line = record(json!({"number": "101", "state": "idle", "name": "Sales"}));
        let value = serde_json::to_value(&line).unwrap();
        assert_eq!(value, json!({"number": "101", "state": "idle", "name": "Sales"}));
    }

    #[test]
    fn update_reads_gateway_field_names() {
        let Value::Object(map) = json!({"num": 101, "numstateid": "busy"}) else {
            unreachable!()
        };
        let update = LineStateUpdate::from_map(&map).unwrap();
        assert_eq!(update.number, "101");
        assert_eq!(update.state, json!("busy"));
    }

    #[test]
    fn update_without_state_is_rejected() {
        let Value::Object(map) = json!({"num": "101"}) else {
            unreachable!()
        };
        assert!(LineStateUpdate::from_map(&map).is_none());
    }
}
