//! Argument validation and schema-guided coercion.
//!
//! Arguments recovered from free text are typed by guesswork (`limit=10`
//! becomes a number, `"true"` may be a string). [`coerce_to_schema`] lines
//! them up with the tool's normalized schema, converting what it can and
//! dropping what it cannot, so the backend never sees a field of the wrong
//! type.

use crate::{Arguments, ToolDefinition};
use serde_json::{Number, Value};

/// Validate arguments against a JSON Schema.
///
/// Returns `Err` with one line per violation. A schema that fails to
/// compile is treated as "no constraints".
pub fn validate_tool_arguments(schema: &Value, args: &Arguments) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    let instance = Value::Object(args.clone());
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n"))
    }
}

/// Outcome of [`coerce_to_schema`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coerced {
    pub args: Arguments,
    /// Fields removed because their value could not match the declared type.
    pub dropped: Vec<String>,
}

/// Align argument values with the declared property types.
///
/// Undeclared fields pass through untouched; the backend decides what to
/// do with them.
pub fn coerce_to_schema(args: Arguments, definition: &ToolDefinition) -> Coerced {
    let mut out = Coerced::default();
    for (field, value) in args {
        let Some(expected) = definition.property(&field).and_then(declared_type) else {
            out.args.insert(field, value);
            continue;
        };
        match coerce_value(value, &expected) {
            Some(v) => {
                out.args.insert(field, v);
            }
            None => out.dropped.push(field),
        }
    }
    out
}

struct Expected {
    ty: String,
    nullable: bool,
}

fn declared_type(property: &Value) -> Option<Expected> {
    match property.get("type")? {
        Value::String(t) => Some(Expected {
            ty: t.clone(),
            nullable: false,
        }),
        Value::Array(types) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let ty = names.iter().find(|t| **t != "null")?;
            Some(Expected {
                ty: (*ty).to_string(),
                nullable: names.contains(&"null"),
            })
        }
        _ => None,
    }
}

fn coerce_value(value: Value, expected: &Expected) -> Option<Value> {
    if value.is_null() {
        return expected.nullable.then_some(Value::Null);
    }
    match (expected.ty.as_str(), value) {
        ("string", Value::String(s)) => Some(Value::String(s)),
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),

        ("integer", Value::Number(n)) => integer_from_number(&n),
        ("integer", Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| s.parse::<f64>().ok().and_then(integer_from_f64))
        }

        ("number", Value::Number(n)) => Some(Value::Number(n)),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        ("boolean", Value::Bool(b)) => Some(Value::Bool(b)),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },

        ("array", Value::Array(a)) => Some(Value::Array(a)),
        ("array", scalar) => Some(Value::Array(vec![scalar])),

        ("object", Value::Object(o)) => Some(Value::Object(o)),

        ("string" | "integer" | "number" | "boolean" | "object", _) => None,
        // Unknown type keywords are not our business.
        (_, other) => Some(other),
    }
}

fn integer_from_number(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        return Some(Value::Number(n.clone()));
    }
    n.as_f64().and_then(integer_from_f64)
}

fn integer_from_f64(f: f64) -> Option<Value> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| Value::from(f as i64))
}
