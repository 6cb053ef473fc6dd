//! Recovering tool calls from plain model text.
//!
//! Some models answer with a call written out as text instead of a native
//! function call: a bare JSON object, `<function=name>{...}</function>` tags,
//! or `name(arg=1)` prose. When a turn carries no native calls but does carry
//! text, [`CallRecovery`] tries its [`RecoveryStrategy`] chain in order and
//! stops at the first strategy that yields calls:
//!
//! 1. [`WholeJsonStrategy`]: the whole text is a JSON call object, a list of
//!    them, or a `[name, argsOrValue]` pair.
//! 2. [`TaggedCallStrategy`]: `<function=name>args</function>`,
//!    `<function>name{json}</function>` and `<function>name</function>(args)`.
//! 3. [`BareCallStrategy`]: `name(args)` for every known name in the text.
//!
//! Known tool names are the only gate: no strategy may emit a name outside
//! the set. Matched spans are cut from the visible text, and recovered
//! arguments are coerced against the tool's schema.

use crate::tools::validate::coerce_to_schema;
use crate::{Arguments, ToolCall, ToolDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::sync::LazyLock;
use tracing::{debug, warn};

static TAG_EQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<function=\s*([^>\s]+?)\s*>(.*?)</function>")
        .expect("fail to create the tagged call pattern")
});

static TAG_PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<function>\s*([A-Za-z0-9_.:\-]+)\s*(.*?)\s*</function>")
        .expect("fail to create the plain tag pattern")
});

static TAG_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<function[^>]*>.*?</function>").expect("fail to create the tag block pattern")
});

static STRAY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?function[^>]*>").expect("fail to create the stray tag pattern")
});

static EMPTY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z]*\s*```").expect("fail to create the empty fence pattern")
});

static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("fail to create the space pattern"));

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("fail to create the blank line pattern"));

/// Keys that name the tool in a JSON call object.
const NAME_KEYS: &[&str] = &["name", "tool", "tool_name"];

/// Keys that carry the arguments in a JSON call object.
const ARGUMENT_KEYS: &[&str] = &["arguments", "args", "parameters", "input"];

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Whether to attempt recovery at all.
    pub enabled: bool,
    /// Field used for a positional value when no schema heuristic applies.
    pub positional_field: String,
    /// Coerce recovered arguments against the tool schema.
    pub coerce_arguments: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            positional_field: "value".into(),
            coerce_arguments: true,
        }
    }
}

// ── Strategy interface ─────────────────────────────────────────────

/// What strategies see: the names they may emit and the schemas behind them.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    pub known_names: &'a [&'a str],
    pub catalog: &'a [ToolDefinition],
    pub positional_field: &'a str,
}

impl RecoveryContext<'_> {
    pub fn is_known(&self, name: &str) -> bool {
        self.known_names.contains(&name)
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.catalog.iter().find(|d| d.name == name)
    }

    /// The field a lone positional value belongs to.
    ///
    /// In order: the schema's single required string property; for
    /// query/search tools, a property named like a query; the first string
    /// property; `query` for query/search tools without a schema; the
    /// configured fallback.
    pub fn positional_key(&self, tool: &str) -> String {
        let lname = tool.to_lowercase();
        let searchy = lname.contains("query") || lname.contains("search");

        if let Some(def) = self.definition(tool)
            && let Some(props) = def.properties()
            && !props.is_empty()
        {
            let required_strings: Vec<&str> = def
                .required_fields()
                .into_iter()
                .filter(|r| props.get(*r).is_some_and(is_string_schema))
                .collect();
            if let [only] = required_strings.as_slice() {
                return (*only).to_string();
            }
            if searchy
                && let Some(key) = props.keys().find(|k| {
                    let k = k.to_lowercase();
                    k.contains("query") || k.contains("search") || k == "q"
                })
            {
                return key.clone();
            }
            if let Some((key, _)) = props.iter().find(|(_, p)| is_string_schema(p)) {
                return key.clone();
            }
        } else if searchy {
            return "query".into();
        }
        self.positional_field.to_string()
    }

    /// Build a call from a JSON payload (object, encoded object, or scalar).
    pub fn call_from_payload(&self, name: &str, payload: &Value) -> ToolCall {
        let args = match payload {
            Value::Object(o) => o.clone(),
            Value::Null => Map::new(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(o)) => o,
                _ => self.positional(name, Value::String(s.clone())),
            },
            other => self.positional(name, other.clone()),
        };
        ToolCall::new(name, args)
    }

    /// Build a call from the raw text between a call's parentheses or tags.
    pub fn call_from_text(&self, name: &str, raw: &str) -> ToolCall {
        ToolCall::new(name, self.parse_arguments(name, raw))
    }

    fn parse_arguments(&self, name: &str, raw: &str) -> Arguments {
        let raw = raw.trim();
        if raw.is_empty() {
            return Map::new();
        }
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return match value {
                Value::Object(o) => o,
                Value::Null => Map::new(),
                other => self.positional(name, other),
            };
        }
        if let Some(pairs) = parse_key_values(raw) {
            return pairs;
        }
        self.positional(name, Value::String(unquote(raw)))
    }

    fn positional(&self, name: &str, value: Value) -> Arguments {
        let mut args = Map::new();
        args.insert(self.positional_key(name), value);
        args
    }
}

/// Output of a recovery attempt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recovered {
    /// Recovered calls, in the order they appear in the text.
    pub calls: Vec<ToolCall>,
    /// The text with every matched call span removed.
    pub cleaned_text: String,
    /// Name of the strategy that matched.
    pub strategy: Option<&'static str>,
}

impl Recovered {
    fn unmatched(text: &str) -> Self {
        Self {
            calls: Vec::new(),
            cleaned_text: text.to_string(),
            strategy: None,
        }
    }
}

/// One recovery dialect. Returns `None` when it does not apply.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn recover(&self, text: &str, ctx: &RecoveryContext<'_>) -> Option<Recovered>;
}

// ── Strategies ─────────────────────────────────────────────────────

/// The whole text (optionally fenced) is JSON describing one or more calls.
pub struct WholeJsonStrategy;

impl WholeJsonStrategy {
    fn call_from_object(obj: &Map<String, Value>, ctx: &RecoveryContext<'_>) -> Option<ToolCall> {
        // OpenAI-style {"function": {"name": ..., "arguments": "..."}}
        if let Some(Value::Object(inner)) = obj.get("function") {
            return Self::call_from_object(inner, ctx);
        }
        let name = NAME_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?;
        if !ctx.is_known(name) {
            return None;
        }
        let payload = ARGUMENT_KEYS
            .iter()
            .find_map(|k| obj.get(*k))
            .unwrap_or(&Value::Null);
        Some(ctx.call_from_payload(name, payload))
    }
}

impl RecoveryStrategy for WholeJsonStrategy {
    fn name(&self) -> &'static str {
        "whole_json"
    }

    fn recover(&self, text: &str, ctx: &RecoveryContext<'_>) -> Option<Recovered> {
        let body = strip_code_fence(text.trim());
        let value: Value = serde_json::from_str(body).ok()?;
        let calls = match &value {
            Value::Object(obj) => vec![Self::call_from_object(obj, ctx)?],
            Value::Array(items) => match items.as_slice() {
                [Value::String(name), payload] if ctx.is_known(name) => {
                    vec![ctx.call_from_payload(name, payload)]
                }
                _ => items
                    .iter()
                    .map(|item| {
                        item.as_object()
                            .and_then(|o| Self::call_from_object(o, ctx))
                    })
                    .collect::<Option<Vec<_>>>()?,
            },
            _ => return None,
        };
        if calls.is_empty() {
            return None;
        }
        Some(Recovered {
            calls,
            cleaned_text: String::new(),
            strategy: None,
        })
    }
}

/// `<function=name>args</function>`, `<function>name{json}</function>`, and
/// `<function>name</function>(args)`.
pub struct TaggedCallStrategy;

impl RecoveryStrategy for TaggedCallStrategy {
    fn name(&self) -> &'static str {
        "tagged"
    }

    fn recover(&self, text: &str, ctx: &RecoveryContext<'_>) -> Option<Recovered> {
        let mut found: Vec<(usize, usize, ToolCall)> = Vec::new();

        for caps in TAG_EQ.captures_iter(text) {
            let (Some(whole), Some(name), Some(body)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if !ctx.is_known(name.as_str()) {
                warn!(tool = name.as_str(), "Tagged call for unknown tool, skipping");
                continue;
            }
            found.push((
                whole.start(),
                whole.end(),
                ctx.call_from_text(name.as_str(), body.as_str()),
            ));
        }

        for caps in TAG_PLAIN.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !ctx.is_known(name.as_str()) {
                warn!(tool = name.as_str(), "Tagged call for unknown tool, skipping");
                continue;
            }
            let mut end = whole.end();
            let mut raw = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default().to_string();
            if raw.is_empty()
                && let Some((inner, close)) = trailing_parenthesized(text, end)
            {
                raw = inner;
                end = close + 1;
            }
            found.push((whole.start(), end, ctx.call_from_text(name.as_str(), &raw)));
        }

        finish(text, found)
    }
}

/// `name(args)` for every known name present in the text.
pub struct BareCallStrategy;

impl RecoveryStrategy for BareCallStrategy {
    fn name(&self) -> &'static str {
        "bare_call"
    }

    fn recover(&self, text: &str, ctx: &RecoveryContext<'_>) -> Option<Recovered> {
        let found = named_calls(text, ctx.known_names)
            .into_iter()
            .map(|c| (c.start, c.end, ctx.call_from_text(c.name, &c.inner)))
            .collect();
        finish(text, found)
    }
}

/// A `name(...)` span in text.
struct NamedCall<'n> {
    start: usize,
    end: usize,
    name: &'n str,
    inner: String,
}

/// Non-overlapping `name(...)` spans for the given names, at word boundaries.
fn named_calls<'n>(text: &str, names: &[&'n str]) -> Vec<NamedCall<'n>> {
    // Longer names first so `search_items(` is not claimed by `items`.
    let mut names: Vec<&'n str> = names.to_vec();
    names.sort_by_key(|n| Reverse(n.len()));

    let mut found: Vec<NamedCall<'n>> = Vec::new();
    for name in names {
        if name.is_empty() {
            continue;
        }
        for (start, _) in text.match_indices(name) {
            let preceded_by_word = text
                .get(..start)
                .and_then(|p| p.chars().next_back())
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
            if preceded_by_word {
                continue;
            }
            let Some((inner, close)) = trailing_parenthesized(text, start + name.len()) else {
                continue;
            };
            let end = close + 1;
            if found.iter().any(|c| start < c.end && c.start < end) {
                continue;
            }
            found.push(NamedCall {
                start,
                end,
                name,
                inner,
            });
        }
    }
    found
}

fn finish(text: &str, mut found: Vec<(usize, usize, ToolCall)>) -> Option<Recovered> {
    if found.is_empty() {
        return None;
    }
    found.sort_by_key(|(start, _, _)| *start);
    let spans: Vec<(usize, usize)> = found.iter().map(|(s, e, _)| (*s, *e)).collect();
    Some(Recovered {
        calls: found.into_iter().map(|(_, _, call)| call).collect(),
        cleaned_text: remove_spans(text, &spans),
        strategy: None,
    })
}

// ── CallRecovery ───────────────────────────────────────────────────

/// An ordered chain of [`RecoveryStrategy`]s.
pub struct CallRecovery {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    config: RecoveryConfig,
}

impl Default for CallRecovery {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl CallRecovery {
    /// The default chain: whole JSON, tagged, bare calls.
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            strategies: vec![
                Box::new(WholeJsonStrategy),
                Box::new(TaggedCallStrategy),
                Box::new(BareCallStrategy),
            ],
            config,
        }
    }

    /// Append a strategy to the end of the chain.
    pub fn with_strategy(mut self, strategy: impl RecoveryStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order. An unmatched result carries no calls and
    /// the original text.
    pub fn recover(
        &self,
        text: &str,
        known_names: &[&str],
        catalog: &[ToolDefinition],
    ) -> Recovered {
        if !self.config.enabled || text.trim().is_empty() || known_names.is_empty() {
            return Recovered::unmatched(text);
        }
        let ctx = RecoveryContext {
            known_names,
            catalog,
            positional_field: &self.config.positional_field,
        };

        for strategy in &self.strategies {
            let Some(mut recovered) = strategy.recover(text, &ctx) else {
                continue;
            };
            recovered.calls.retain(|c| ctx.is_known(&c.name));
            if recovered.calls.is_empty() {
                continue;
            }
            if self.config.coerce_arguments {
                for call in &mut recovered.calls {
                    let Some(def) = ctx.definition(&call.name) else {
                        continue;
                    };
                    let coerced = coerce_to_schema(std::mem::take(&mut call.args), def);
                    if !coerced.dropped.is_empty() {
                        debug!(
                            "[recovery] {}: dropped mistyped fields {}",
                            call.name,
                            coerced.dropped.join(", ")
                        );
                    }
                    call.args = coerced.args;
                }
            }
            recovered.strategy = Some(strategy.name());
            debug!(
                "[recovery] {} recovered {} call(s)",
                strategy.name(),
                recovered.calls.len()
            );
            return recovered;
        }
        Recovered::unmatched(text)
    }
}

/// Recover with the default strategy chain and configuration.
pub fn recover(text: &str, known_names: &[&str], catalog: &[ToolDefinition]) -> Recovered {
    CallRecovery::default().recover(text, known_names, catalog)
}

/// Best-effort removal of call syntax from user-visible text.
///
/// Removes `<function>` blocks and stray tags, JSON objects that look like
/// calls, and `name(...)` fragments for the given tool names. Other
/// parenthesized prose is left alone.
pub fn strip_call_syntax(text: &str, known_names: &[&str]) -> String {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for m in TAG_BLOCK.find_iter(text) {
        let end = trailing_parenthesized(text, m.end())
            .map(|(_, close)| close + 1)
            .unwrap_or(m.end());
        spans.push((m.start(), end));
    }
    let text = remove_spans(text, &spans);
    let text = STRAY_TAG.replace_all(&text, "").into_owned();

    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text.get(cursor..).and_then(|rest| rest.find('{')) {
        let open = cursor + offset;
        match find_closing(&text, open, '{', '}') {
            Some(close) if text.get(open..=close).is_some_and(looks_like_call_object) => {
                spans.push((open, close + 1));
                cursor = close + 1;
            }
            _ => cursor = open + 1,
        }
    }
    let text = remove_spans(&text, &spans);

    let spans: Vec<(usize, usize)> = named_calls(&text, known_names)
        .iter()
        .map(|c| (c.start, c.end))
        .collect();
    remove_spans(&text, &spans)
}

fn looks_like_call_object(candidate: &str) -> bool {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(candidate) else {
        return false;
    };
    obj.contains_key("function")
        || (NAME_KEYS.iter().any(|k| obj.get(*k).is_some_and(Value::is_string))
            && ARGUMENT_KEYS.iter().any(|k| obj.contains_key(*k)))
}

// ── Text helpers ───────────────────────────────────────────────────

fn is_string_schema(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(t)) => t == "string",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("string")),
        _ => false,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner.to_string();
        }
    }
    s.to_string()
}

/// Byte index of the bracket closing the one at `open`, skipping quoted text.
fn find_closing(text: &str, open: usize, open_ch: char, close_ch: char) -> Option<usize> {
    let rest = text.get(open..)?;
    if !rest.starts_with(open_ch) {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            c if c == open_ch => depth += 1,
            c if c == close_ch => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `(args)` starting at `from` after optional spaces: the inner text and the
/// byte index of the closing parenthesis.
fn trailing_parenthesized(text: &str, from: usize) -> Option<(String, usize)> {
    let rest = text.get(from..)?;
    let open = from + (rest.len() - rest.trim_start_matches([' ', '\t']).len());
    let close = find_closing(text, open, '(', ')')?;
    let inner = text.get(open + 1..close)?.to_string();
    Some((inner, close))
}

/// Split on `sep` outside quotes and brackets.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in s.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

/// `a=1, b='x'` / `a: 1` pairs. `None` unless every part is a pair.
fn parse_key_values(raw: &str) -> Option<Arguments> {
    let mut args = Map::new();
    for part in split_top_level(raw, ',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = split_pair(part)?;
        let key = unquote(&key);
        let valid_key = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
        if !valid_key {
            return None;
        }
        args.insert(key, scalar_value(&value));
    }
    (!args.is_empty()).then_some(args)
}

fn split_pair(part: &str) -> Option<(String, String)> {
    let mut quote: Option<char> = None;
    let mut key = String::new();
    let mut chars = part.chars();
    for c in chars.by_ref() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '=' || c == ':' => {
                return Some((key.trim().to_string(), chars.as_str().trim().to_string()));
            }
            None => {}
        }
        key.push(c);
    }
    None
}

fn scalar_value(raw: &str) -> Value {
    let raw = raw.trim();
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        return Value::String(unquote(raw));
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Remove byte spans (sorted or not, non-overlapping) and tidy whitespace.
fn remove_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut spans = spans.to_vec();
    spans.sort_by_key(|(s, _)| *s);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start < cursor {
            continue;
        }
        out.push_str(text.get(cursor..start).unwrap_or_default());
        cursor = end;
    }
    out.push_str(text.get(cursor..).unwrap_or_default());
    tidy(&out)
}

fn tidy(text: &str) -> String {
    let text = EMPTY_FENCE.replace_all(text, "");
    let text = SPACE_RUN.replace_all(&text, " ");
    let text = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}
