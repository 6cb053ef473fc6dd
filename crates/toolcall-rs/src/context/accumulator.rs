//! Per-request memory of identifiers seen in tool results.
//!
//! Multi-step requests ("find a venue, then fetch its details") need the
//! identifier from step one in step two. After every successful tool result
//! the loop lets the [`ContextAccumulator`] scan the payload for
//! identifier-bearing shapes; [`ArgumentEnricher`](crate::tools::enrich::ArgumentEnricher)
//! later injects them into calls that leave the matching fields unset.
//!
//! Slots written:
//!
//! | Slot | Source |
//! |------|--------|
//! | `ids` | identifiers of a record list (bounded sample) |
//! | `id` | a single record, or a list with exactly one record |
//! | `<key>_id` | a nested sub-entity under `<key>` of a single record |

use crate::ToolResult;
use crate::context::compress::find_list;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// What counts as an identifier and how many to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Identifier field names, in order of preference.
    pub id_fields: Vec<String>,
    /// Maximum identifiers stored under `ids`.
    pub sample_size: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            id_fields: vec!["id".into(), "uuid".into(), "slug".into()],
            sample_size: 10,
        }
    }
}

/// Slot name → value, scoped to one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextAccumulator {
    slots: BTreeMap<String, Value>,
}

impl ContextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    pub fn set(&mut self, slot: impl Into<String>, value: Value) {
        self.slots.insert(slot.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Extract identifiers from a successful result.
    ///
    /// Error results and non-JSON text are ignored. Returns the names of the
    /// slots that were written.
    pub fn absorb(&mut self, result: &ToolResult, config: &ExtractionConfig) -> Vec<String> {
        if result.is_error {
            return Vec::new();
        }
        let mut written = Vec::new();
        for item in &result.content {
            let Ok(value) = serde_json::from_str::<Value>(item.as_text()) else {
                continue;
            };
            written.extend(self.absorb_value(&value, config));
        }
        if !written.is_empty() {
            debug!("[accumulator] updated slots: {}", written.join(", "));
        }
        written
    }

    fn absorb_value(&mut self, value: &Value, config: &ExtractionConfig) -> Vec<String> {
        let mut written = Vec::new();

        if let Some(list) = find_list(value) {
            let ids: Vec<Value> = list
                .iter()
                .filter_map(|entry| entry.as_object().and_then(|o| id_of(o, config)))
                .take(config.sample_size)
                .collect();
            if !ids.is_empty() {
                if list.len() == 1 {
                    self.set("id", ids[0].clone());
                    written.push("id".to_string());
                }
                self.set("ids", Value::Array(ids));
                written.push("ids".to_string());
            }
            return written;
        }

        let Some(record) = single_record(value, config) else {
            return written;
        };
        if let Some(id) = id_of(record, config) {
            self.set("id", id);
            written.push("id".to_string());
        }
        for (key, nested) in record {
            if let Some(nested) = nested.as_object()
                && let Some(id) = id_of(nested, config)
            {
                let slot = format!("{key}_id");
                self.set(slot.clone(), id);
                written.push(slot);
            }
        }
        written
    }
}

/// A single record: the payload itself, or one wrapped under a
/// conventional key (`item`, `data`, `result`).
fn single_record<'a>(value: &'a Value, config: &ExtractionConfig) -> Option<&'a Map<String, Value>> {
    let obj = value.as_object()?;
    if id_of(obj, config).is_some() {
        return Some(obj);
    }
    ["item", "data", "result"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_object))
        .find(|inner| id_of(inner, config).is_some())
}

fn id_of(obj: &Map<String, Value>, config: &ExtractionConfig) -> Option<Value> {
    config.id_fields.iter().find_map(|field| match obj.get(field) {
        Some(v @ Value::String(s)) if !s.trim().is_empty() => Some(v.clone()),
        Some(v @ Value::Number(_)) => Some(v.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn absorb(value: Value) -> ContextAccumulator {
        let mut acc = ContextAccumulator::new();
        acc.absorb(&ToolResult::text(value.to_string()), &ExtractionConfig::default());
        acc
    }

    #[test]
    fn list_ids_are_sampled() {
        let items: Vec<Value> = (0..25).map(|i| json!({"id": format!("v{i}")})).collect();
        let acc = absorb(json!({"items": items}));
        let ids = acc.get("ids").unwrap().as_array().unwrap();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0], "v0");
        assert!(acc.get("id").is_none());
    }

    #[test]
    fn single_entry_list_also_sets_id() {
        let acc = absorb(json!([{"uuid": "abc"}]));
        assert_eq!(acc.get("id"), Some(&json!("abc")));
        assert_eq!(acc.get("ids"), Some(&json!(["abc"])));
    }

    #[test]
    fn single_record_and_sub_entities() {
        let acc = absorb(json!({"id": 7, "name": "Cafe", "venue": {"id": "v-1"}, "tags": ["a"]}));
        assert_eq!(acc.get("id"), Some(&json!(7)));
        assert_eq!(acc.get("venue_id"), Some(&json!("v-1")));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn wrapped_record_is_found() {
        let acc = absorb(json!({"data": {"slug": "blue-door", "owner": {"id": 3}}}));
        assert_eq!(acc.get("id"), Some(&json!("blue-door")));
        assert_eq!(acc.get("owner_id"), Some(&json!(3)));
    }

    #[test]
    fn errors_and_text_ignored() {
        let mut acc = ContextAccumulator::new();
        let config = ExtractionConfig::default();
        assert!(acc.absorb(&ToolResult::error(r#"{"id": 1}"#), &config).is_empty());
        assert!(acc.absorb(&ToolResult::text("id: 1"), &config).is_empty());
        assert!(acc.is_empty());
    }

    #[test]
    fn later_results_overwrite_slots() {
        let mut acc = ContextAccumulator::new();
        let config = ExtractionConfig::default();
        acc.absorb(&ToolResult::text(r#"{"id": 1}"#), &config);
        acc.absorb(&ToolResult::text(r#"{"id": 2}"#), &config);
        assert_eq!(acc.get("id"), Some(&json!(2)));
    }
}
