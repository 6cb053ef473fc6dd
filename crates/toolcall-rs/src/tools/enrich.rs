//! Argument enrichment: defaults and inherited values for tool calls.
//!
//! Models routinely omit arguments a backend needs (a page size, a
//! location, the identifier found one turn earlier). [`ArgumentEnricher`]
//! fills those gaps before execution. Every rule touches only fields the
//! tool declares and the call leaves unset, applied in this order:
//!
//! 1. pagination defaults
//! 2. a locality filter extracted from the user's message
//! 3. geo coordinates from the session, else a configured fallback
//! 4. conservative defaults for boolean preference flags
//! 5. values inherited from the [`ContextAccumulator`] via slot bindings
//! 6. non-empty defaults for required free-text fields
//!
//! The only explicit arguments ever removed are coordinates that conflict
//! with a locality filter.

use crate::context::ContextAccumulator;
use crate::{Arguments, ToolDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

// ── Configuration ──────────────────────────────────────────────────

/// A field and the value it receives when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefault {
    pub field: String,
    pub value: Value,
}

impl FieldDefault {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Locality extraction from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalityConfig {
    /// Fields that carry a locality filter.
    pub fields: Vec<String>,
    /// Regexes whose first capture group is the locality.
    pub patterns: Vec<String>,
}

impl Default for LocalityConfig {
    fn default() -> Self {
        Self {
            fields: ["city", "locality", "location", "area", "neighborhood"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            patterns: vec![
                r"\b(?:[Ii]n|[Nn]ear|[Aa]round)\s+(\p{Lu}[\p{L}'-]+(?:\s+\p{Lu}[\p{L}'-]+){0,2})"
                    .to_string(),
            ],
        }
    }
}

/// Coordinate fields and the fallback location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub latitude_fields: Vec<String>,
    pub longitude_fields: Vec<String>,
    /// Used when the session carries no location. `None` disables the rule.
    pub fallback: Option<GeoPoint>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            latitude_fields: vec!["lat".into(), "latitude".into()],
            longitude_fields: vec!["lng".into(), "lon".into(), "longitude".into()],
            fallback: None,
        }
    }
}

/// Declares that accumulator slot `slot` feeds the listed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotBinding {
    pub slot: String,
    pub fields: Vec<String>,
    /// Original tool names this binding applies to. Empty means every tool.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl SlotBinding {
    pub fn new(slot: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            slot: slot.into(),
            fields: fields.iter().map(|s| (*s).to_string()).collect(),
            tools: Vec::new(),
        }
    }

    /// Restrict the binding to the given tools.
    pub fn for_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|s| (*s).to_string()).collect();
        self
    }

    fn applies_to(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }
}

/// All enrichment rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub pagination: Vec<FieldDefault>,
    pub locality: LocalityConfig,
    pub geo: GeoConfig,
    pub flags: Vec<FieldDefault>,
    pub slot_bindings: Vec<SlotBinding>,
    /// Defaults for required free-text fields left empty.
    pub required_defaults: Vec<FieldDefault>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            pagination: vec![
                FieldDefault::new("limit", json!(20)),
                FieldDefault::new("page_size", json!(20)),
                FieldDefault::new("pageSize", json!(20)),
                FieldDefault::new("per_page", json!(20)),
                FieldDefault::new("page", json!(1)),
            ],
            locality: LocalityConfig::default(),
            geo: GeoConfig::default(),
            flags: vec![
                FieldDefault::new("recommended", json!(true)),
                FieldDefault::new("preferred", json!(true)),
            ],
            slot_bindings: vec![
                SlotBinding::new("id", &["id", "item_id", "itemId", "entity_id"]),
                SlotBinding::new("ids", &["ids", "item_ids", "itemIds"]),
            ],
            required_defaults: vec![
                FieldDefault::new("query", json!("*")),
                FieldDefault::new("search", json!("*")),
            ],
        }
    }
}

impl EnrichmentConfig {
    pub fn with_fallback_location(mut self, point: GeoPoint) -> Self {
        self.geo.fallback = Some(point);
        self
    }

    pub fn with_slot_binding(mut self, binding: SlotBinding) -> Self {
        self.slot_bindings.push(binding);
        self
    }
}

/// Per-session facts the caller knows about the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub location: Option<GeoPoint>,
}

impl SessionContext {
    pub fn with_location(lat: f64, lng: f64) -> Self {
        Self {
            location: Some(GeoPoint::new(lat, lng)),
        }
    }
}

// ── Enricher ───────────────────────────────────────────────────────

/// Applies an [`EnrichmentConfig`] to tool arguments.
#[derive(Debug, Clone)]
pub struct ArgumentEnricher {
    config: EnrichmentConfig,
    patterns: Vec<Regex>,
}

impl Default for ArgumentEnricher {
    fn default() -> Self {
        Self::new(EnrichmentConfig::default())
    }
}

impl ArgumentEnricher {
    /// Compile the locality patterns. Invalid patterns are logged and skipped.
    pub fn new(config: EnrichmentConfig) -> Self {
        let patterns = config
            .locality
            .patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid locality pattern {p:?}: {e}");
                    None
                }
            })
            .collect();
        Self { config, patterns }
    }

    /// Enrich a call to the tool named `tool_name` (original name).
    ///
    /// Tools missing from `catalog` get their arguments back unchanged.
    pub fn enrich_call(
        &self,
        tool_name: &str,
        raw: Arguments,
        user_message: &str,
        catalog: &[ToolDefinition],
        session: &SessionContext,
        accumulator: &ContextAccumulator,
    ) -> Arguments {
        match catalog.iter().find(|d| d.name == tool_name) {
            Some(def) => self.enrich(def, raw, user_message, session, accumulator),
            None => raw,
        }
    }

    /// Apply every rule to `raw` for the tool described by `def`.
    pub fn enrich(
        &self,
        def: &ToolDefinition,
        raw: Arguments,
        user_message: &str,
        session: &SessionContext,
        accumulator: &ContextAccumulator,
    ) -> Arguments {
        let mut args = raw;
        let mut filled: Vec<String> = Vec::new();

        // 1. Pagination.
        for d in &self.config.pagination {
            fill(def, &mut args, &d.field, d.value.clone(), &mut filled);
        }

        // 2. Locality, which wins over raw coordinates.
        if let Some(field) = self
            .config
            .locality
            .fields
            .iter()
            .find(|f| def.declares(f) && is_unset(&args, f))
            && let Some(place) = self.extract_locality(user_message)
        {
            fill(def, &mut args, field, Value::String(place), &mut filled);
        }
        let has_locality = self
            .config
            .locality
            .fields
            .iter()
            .any(|f| !is_unset(&args, f));
        if has_locality {
            for field in self.coordinate_fields() {
                if args.remove(field).is_some() {
                    debug!("[enrich] {}: dropped {field} in favour of locality", def.name);
                }
            }
        }

        // 3. Coordinates.
        if !has_locality
            && let Some(point) = session.location.or(self.config.geo.fallback)
        {
            for field in &self.config.geo.latitude_fields {
                fill(def, &mut args, field, json!(point.lat), &mut filled);
            }
            for field in &self.config.geo.longitude_fields {
                fill(def, &mut args, field, json!(point.lng), &mut filled);
            }
        }

        // 4. Preference flags.
        for d in &self.config.flags {
            fill(def, &mut args, &d.field, d.value.clone(), &mut filled);
        }

        // 5. Accumulator slots: same-named fields, then declared bindings.
        for (slot, value) in accumulator.iter() {
            if let Some(v) = fit_to_property(value, def.property(slot)) {
                fill(def, &mut args, slot, v, &mut filled);
            }
        }
        for binding in &self.config.slot_bindings {
            if !binding.applies_to(&def.name) {
                continue;
            }
            let Some(value) = accumulator.get(&binding.slot) else {
                continue;
            };
            for field in &binding.fields {
                if let Some(v) = fit_to_property(value, def.property(field)) {
                    fill(def, &mut args, field, v, &mut filled);
                }
            }
        }

        // 6. Required free text must not be blank.
        let required = def.required_fields();
        for d in &self.config.required_defaults {
            if required.contains(&d.field.as_str()) && is_blank(&args, &d.field) {
                args.insert(d.field.clone(), d.value.clone());
                filled.push(d.field.clone());
            }
        }

        if !filled.is_empty() {
            debug!("[enrich] {}: filled {}", def.name, filled.join(", "));
        }
        args
    }

    /// First locality mentioned in `text`, per the configured patterns.
    pub fn extract_locality(&self, text: &str) -> Option<String> {
        self.patterns.iter().find_map(|re| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }

    fn coordinate_fields(&self) -> impl Iterator<Item = &String> {
        self.config
            .geo
            .latitude_fields
            .iter()
            .chain(&self.config.geo.longitude_fields)
    }
}

fn is_unset(args: &Arguments, field: &str) -> bool {
    args.get(field).is_none_or(Value::is_null)
}

fn is_blank(args: &Arguments, field: &str) -> bool {
    match args.get(field) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

fn fill(def: &ToolDefinition, args: &mut Arguments, field: &str, value: Value, filled: &mut Vec<String>) {
    if def.declares(field) && is_unset(args, field) {
        args.insert(field.to_string(), value);
        filled.push(field.to_string());
    }
}

/// Shape an inherited value for the target property: lists feed scalar
/// fields with their first element, scalars feed list fields as a
/// one-element list, and numbers feed string fields as text.
fn fit_to_property(value: &Value, property: Option<&Value>) -> Option<Value> {
    let property = property?;
    let ty = property.get("type").and_then(Value::as_str);
    let value = match (ty, value) {
        (Some("array"), Value::Array(_)) => value.clone(),
        (Some("array"), scalar) => Value::Array(vec![scalar.clone()]),
        (Some(_), Value::Array(list)) => list.first()?.clone(),
        _ => value.clone(),
    };
    match (ty, &value) {
        (Some("string"), Value::Number(n)) => Some(Value::String(n.to_string())),
        _ => Some(value),
    }
}
