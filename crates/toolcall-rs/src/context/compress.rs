//! Tool-result compression for two budgets.
//!
//! Every tool result is compressed twice: with a small item limit for the
//! copy that re-enters the conversation (keeps model context bounded) and a
//! larger one for the copy handed to the Designer. Compression never mutates
//! its input.
//!
//! For a JSON list payload (top-level array, or an array under `items`,
//! `data` or `results`):
//!
//! 1. Lists above a small threshold lose their heavy prose fields.
//! 2. Flat parent/child lists are regrouped into `{group, children}` records
//!    when that shrinks the list.
//! 3. The list is truncated to the item limit and annotated with
//!    `_truncated` / `_totalItems`.
//!
//! Non-JSON text is cut to a character budget proportional to the limit.

use crate::{ContentItem, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Keys under which an object payload conventionally carries its list.
pub const LIST_KEYS: &[&str] = &["items", "data", "results"];

/// Default item limit for results appended to conversation history.
pub const DEFAULT_HISTORY_ITEM_LIMIT: usize = 5;

/// Default item limit for results surfaced to the Designer.
pub const DEFAULT_UI_ITEM_LIMIT: usize = 50;

/// The list inside a payload, if there is one.
pub fn find_list(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(list) => Some(list),
        Value::Object(obj) => LIST_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array)),
        _ => None,
    }
}

/// A parent/child field pair used for regrouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingRule {
    /// Field naming the parent (e.g. `parent_name`).
    pub group: String,
    /// Field naming the child (e.g. `name`).
    pub leaf: String,
}

impl GroupingRule {
    pub fn new(group: impl Into<String>, leaf: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            leaf: leaf.into(),
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Lists longer than this lose their heavy fields.
    pub list_threshold: usize,
    /// Prose fields stripped from list entries.
    pub heavy_fields: Vec<String>,
    /// Candidate parent/child pairs, tried in order.
    pub grouping: Vec<GroupingRule>,
    /// Share of entries that must carry both fields of a rule (0.0-1.0).
    pub regroup_ratio: f64,
    /// Character budget per item for non-JSON text.
    pub chars_per_item: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            list_threshold: 3,
            heavy_fields: [
                "description",
                "content",
                "body",
                "summary",
                "notes",
                "html",
                "details",
                "long_description",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            grouping: vec![
                GroupingRule::new("parent_name", "name"),
                GroupingRule::new("parent", "name"),
                GroupingRule::new("category", "name"),
            ],
            regroup_ratio: 0.8,
            chars_per_item: 400,
        }
    }
}

/// Compresses [`ToolResult`]s under a [`CompressionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ResultCompressor {
    config: CompressionConfig,
}

impl ResultCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Return a compressed copy of `result` with at most `item_limit` list
    /// entries per content item.
    pub fn compress(&self, result: &ToolResult, item_limit: usize) -> ToolResult {
        let content = result
            .content
            .iter()
            .map(|item| {
                let text = item.as_text();
                match self.compress_text(text, item_limit) {
                    Some(shrunk) => {
                        debug!(
                            "[compress] {} -> {} chars (limit {item_limit})",
                            text.len(),
                            shrunk.len()
                        );
                        ContentItem::text(shrunk)
                    }
                    None => item.clone(),
                }
            })
            .collect();
        ToolResult {
            is_error: result.is_error,
            content,
        }
    }

    /// Compress one text payload. `None` means "leave it as it is".
    pub fn compress_text(&self, text: &str, item_limit: usize) -> Option<String> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.compress_json(value, item_limit).map(|v| v.to_string()),
            Err(_) => self.truncate_text(text, item_limit),
        }
    }

    fn compress_json(&self, value: Value, item_limit: usize) -> Option<Value> {
        match value {
            Value::Array(list) => {
                let shrunk = self.shrink_list(list, item_limit);
                if !shrunk.changed {
                    return None;
                }
                if shrunk.truncated {
                    Some(json!({
                        "items": shrunk.list,
                        "_truncated": true,
                        "_totalItems": shrunk.total,
                    }))
                } else {
                    Some(Value::Array(shrunk.list))
                }
            }
            Value::Object(mut obj) => {
                let key = LIST_KEYS
                    .iter()
                    .find(|k| obj.get(**k).is_some_and(Value::is_array))?;
                let Some(Value::Array(list)) = obj.remove(*key) else {
                    return None;
                };
                let shrunk = self.shrink_list(list, item_limit);
                if !shrunk.changed {
                    return None;
                }
                obj.insert((*key).to_string(), Value::Array(shrunk.list));
                if shrunk.truncated {
                    obj.insert("_truncated".into(), json!(true));
                    obj.insert("_totalItems".into(), json!(shrunk.total));
                }
                Some(Value::Object(obj))
            }
            _ => None,
        }
    }

    fn shrink_list(&self, mut list: Vec<Value>, item_limit: usize) -> Shrunk {
        let total = list.len();
        let mut changed = false;

        if list.len() > self.config.list_threshold {
            for entry in list.iter_mut() {
                if let Value::Object(obj) = entry {
                    for field in &self.config.heavy_fields {
                        changed |= obj.remove(field).is_some();
                    }
                }
            }
            if let Some(grouped) = self.regroup(&list) {
                list = grouped;
                changed = true;
            }
        }

        // Measured on the original entries; regrouping does not hide them.
        let truncated = total > item_limit;
        if truncated {
            list = cap_entries(list, item_limit);
            changed = true;
        }

        Shrunk {
            list,
            changed,
            truncated,
            total,
        }
    }

    /// Regroup flat entries under their parent. Only returns a list shorter
    /// than the input.
    fn regroup(&self, list: &[Value]) -> Option<Vec<Value>> {
        let rule = self.config.grouping.iter().find(|rule| {
            let carrying = list
                .iter()
                .filter(|e| group_value(e, rule).is_some())
                .count();
            carrying as f64 >= list.len() as f64 * self.config.regroup_ratio
        })?;

        let mut out: Vec<Value> = Vec::new();
        // group value -> index into `out`
        let mut slots: Vec<(Value, usize)> = Vec::new();
        for entry in list {
            let Some(group) = group_value(entry, rule) else {
                out.push(entry.clone());
                continue;
            };
            let mut child = entry.as_object().cloned().unwrap_or_default();
            child.remove(&rule.group);
            let child = Value::Object(child);
            match slots.iter().find(|(g, _)| *g == group) {
                Some((_, idx)) => {
                    if let Some(children) = out[*idx]
                        .get_mut("children")
                        .and_then(Value::as_array_mut)
                    {
                        children.push(child);
                    }
                }
                None => {
                    slots.push((group.clone(), out.len()));
                    out.push(json!({"group": group, "children": [child]}));
                }
            }
        }

        if out.len() < list.len() {
            debug!("[compress] regrouped {} entries into {}", list.len(), out.len());
            Some(out)
        } else {
            None
        }
    }

    fn truncate_text(&self, text: &str, item_limit: usize) -> Option<String> {
        let budget = item_limit.saturating_mul(self.config.chars_per_item);
        let total = text.chars().count();
        if total <= budget {
            return None;
        }
        let kept: String = text.chars().take(budget).collect();
        Some(format!("{kept}...\n[truncated: {total} characters total]"))
    }
}

struct Shrunk {
    list: Vec<Value>,
    changed: bool,
    truncated: bool,
    total: usize,
}

/// Keep at most `limit` original entries. A regrouped record counts as its
/// children and is cut short when the budget runs out inside it.
fn cap_entries(list: Vec<Value>, limit: usize) -> Vec<Value> {
    let mut remaining = limit;
    let mut out = Vec::new();
    for mut entry in list {
        if remaining == 0 {
            break;
        }
        match group_children(&mut entry) {
            Some(children) => {
                children.truncate(remaining);
                remaining -= children.len();
            }
            None => remaining -= 1,
        }
        out.push(entry);
    }
    out
}

/// The `children` of a `{group, children}` record built by regrouping.
fn group_children(entry: &mut Value) -> Option<&mut Vec<Value>> {
    let obj = entry.as_object_mut()?;
    if obj.len() != 2 || !obj.contains_key("group") {
        return None;
    }
    obj.get_mut("children")?.as_array_mut()
}

fn group_value(entry: &Value, rule: &GroupingRule) -> Option<Value> {
    let obj: &Map<String, Value> = entry.as_object()?;
    let group = obj.get(&rule.group).filter(|v| !v.is_null())?;
    obj.get(&rule.leaf).filter(|v| !v.is_null())?;
    Some(group.clone())
}

/// Compress with the default configuration.
pub fn compress(result: &ToolResult, item_limit: usize) -> ToolResult {
    ResultCompressor::default().compress(result, item_limit)
}
