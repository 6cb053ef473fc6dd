//! Parameter-schema normalization for strict function-calling consumers.
//!
//! Catalog schemas arrive in every JSON-Schema dialect imaginable: `$ref`
//! pointers into `$defs`, tuple-typed `items`, arrays of arrays, `nullable`
//! flags. [`normalize`] rewrites them into the conservative subset strict
//! providers accept. It is pure and idempotent.

use serde_json::{Map, Value, json};

/// Keys removed from every schema node.
const STRIPPED_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "$comment",
    "minItems",
    "maxItems",
    "nullable",
];

const COMPOSITION_KEYS: &[&str] = &["anyOf", "oneOf", "allOf"];

fn string_schema() -> Value {
    json!({"type": "string"})
}

/// Normalize a schema node recursively. Never mutates its input.
///
/// ```
/// use serde_json::json;
/// use toolcall_rs::tools::schema::normalize;
///
/// let tuple = json!({"type": "array", "items": [{"type": "string"}, {"type": "number"}]});
/// assert_eq!(normalize(&tuple), json!({"type": "array", "items": {"type": "string"}}));
/// ```
pub fn normalize(schema: &Value) -> Value {
    match schema {
        Value::Object(node) => Value::Object(normalize_node(node)),
        other => other.clone(),
    }
}

/// Normalize a tool's top-level parameter schema.
///
/// On top of [`normalize`], guarantees the root is an object schema with a
/// `properties` map.
pub fn normalize_parameters(parameters: &Value) -> Value {
    let mut root = match normalize(parameters) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    root.insert("type".into(), json!("object"));
    if !root.get("properties").is_some_and(Value::is_object) {
        root.insert("properties".into(), json!({}));
    }
    Value::Object(root)
}

fn normalize_node(node: &Map<String, Value>) -> Map<String, Value> {
    let mut out: Map<String, Value> = node
        .iter()
        .filter(|(k, _)| !STRIPPED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for key in COMPOSITION_KEYS {
        if let Some(Value::Array(members)) = out.get(*key) {
            let members: Vec<Value> = members.iter().map(normalize).collect();
            out.insert((*key).into(), Value::Array(members));
        }
    }

    if let Some(Value::Object(props)) = out.get("properties") {
        let props: Map<String, Value> = props
            .iter()
            .map(|(name, prop)| (name.clone(), normalize_slot(prop)))
            .collect();
        out.insert("properties".into(), Value::Object(props));
        if !out.contains_key("type") {
            out.insert("type".into(), json!("object"));
        }
    }

    if let Some(additional @ Value::Object(_)) = out.get("additionalProperties") {
        let additional = normalize(additional);
        out.insert("additionalProperties".into(), additional);
    }

    if has_type(&out, "array") || out.contains_key("items") {
        if !out.contains_key("type") {
            out.insert("type".into(), json!("array"));
        }
        let items = collapse_items(out.get("items"));
        out.insert("items".into(), items);
    }

    prune_required(&mut out);
    out
}

/// Normalize a schema in a `properties` or `items` position.
///
/// References become a generic object, and untyped leaves become strings so
/// every value a strict consumer reads carries a type.
fn normalize_slot(slot: &Value) -> Value {
    let Value::Object(node) = slot else {
        return string_schema();
    };

    if node.contains_key("$ref") {
        let mut object = Map::new();
        object.insert("type".into(), json!("object"));
        if let Some(description) = node.get("description") {
            object.insert("description".into(), description.clone());
        }
        return Value::Object(object);
    }

    let mut out = normalize_node(node);
    let untyped = !out.contains_key("type")
        && !out.contains_key("enum")
        && !out.contains_key("const")
        && !COMPOSITION_KEYS.iter().any(|k| out.contains_key(*k));
    if untyped {
        out.insert("type".into(), json!("string"));
    }
    Value::Object(out)
}

/// Resolve an `items` value to a single, non-array leaf schema.
fn collapse_items(items: Option<&Value>) -> Value {
    let mut current = first_item(items);
    // Arrays of arrays flatten one level at a time.
    while let Value::Object(node) = &current
        && !node.contains_key("$ref")
        && (has_type(node, "array") || node.contains_key("items"))
    {
        current = first_item(node.get("items"));
    }
    normalize_slot(&current)
}

fn first_item(items: Option<&Value>) -> Value {
    match items {
        Some(Value::Array(tuple)) => tuple.first().cloned().unwrap_or_else(string_schema),
        Some(item @ Value::Object(_)) => item.clone(),
        _ => string_schema(),
    }
}

fn has_type(node: &Map<String, Value>, ty: &str) -> bool {
    match node.get("type") {
        Some(Value::String(t)) => t == ty,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(ty)),
        _ => false,
    }
}

fn prune_required(node: &mut Map<String, Value>) {
    let declared = node.get("properties").and_then(Value::as_object);
    let kept: Vec<Value> = match node.get("required") {
        Some(Value::Array(required)) => required
            .iter()
            .filter(|r| {
                r.as_str()
                    .is_some_and(|name| declared.is_some_and(|p| p.contains_key(name)))
            })
            .cloned()
            .collect(),
        _ => Vec::new(),
    };
    if kept.is_empty() {
        node.remove("required");
    } else {
        node.insert("required".into(), Value::Array(kept));
    }
}
