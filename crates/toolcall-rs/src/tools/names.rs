//! Tool-name sanitizing and the request-scoped sanitized → original mapping.
//!
//! Strict consumers accept only `^[A-Za-z_][A-Za-z0-9_]*$` identifiers of at
//! most 64 characters. Catalog names often carry instance prefixes
//! (`api_<uuid>__list_items`) or punctuation, so every name is rewritten
//! before it reaches the model and resolved back before execution.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{trace, warn};

/// Longest identifier accepted by strict consumers.
pub const MAX_NAME_LEN: usize = 64;

/// Prefix for names that would otherwise start with a digit.
pub const LEADING_PREFIX: &str = "t_";

/// Used when the input name is empty.
pub const PLACEHOLDER_NAME: &str = "unnamed_tool";

/// Rewrite `name` into a strict identifier. Pure; does not record anything.
///
/// ```
/// use toolcall_rs::tools::names::sanitize_name;
///
/// assert_eq!(
///     sanitize_name("api_11111111-1111-1111-1111-111111111111__dn_list_items"),
///     "dn_list_items"
/// );
/// assert_eq!(sanitize_name("get-weather.v2"), "get_weather_v2");
/// assert_eq!(sanitize_name("3d_render"), "t_3d_render");
/// ```
pub fn sanitize_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return PLACEHOLDER_NAME.to_string();
    }

    // Keep only the last segment of `prefix__tool` compounds.
    let segment = match name.rsplit_once("__") {
        Some((prefix, tail)) if !prefix.is_empty() && !tail.is_empty() => tail,
        _ => name,
    };

    let replaced: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    let fixed = fix_leading(replaced);
    if fixed.len() <= MAX_NAME_LEN {
        return fixed;
    }

    // Everything is ASCII by now, so byte and char counts agree.
    let suffix = take_suffix(&fixed, MAX_NAME_LEN);
    if starts_valid(&suffix) {
        suffix
    } else {
        let shorter = take_suffix(&fixed, MAX_NAME_LEN - LEADING_PREFIX.len());
        format!("{LEADING_PREFIX}{shorter}")
    }
}

fn starts_valid(s: &str) -> bool {
    s.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn fix_leading(s: String) -> String {
    if starts_valid(&s) {
        s
    } else {
        format!("{LEADING_PREFIX}{s}")
    }
}

fn take_suffix(s: &str, n: usize) -> String {
    let total = s.chars().count();
    s.chars().skip(total.saturating_sub(n)).collect()
}

// ── NameMapping ────────────────────────────────────────────────────

/// Sanitized → original name table for one request.
///
/// Internally synchronized so a single mapping can be shared across tasks
/// serving the same request. Create a fresh mapping per request; tables
/// reused across requests with different catalogs can resolve a sanitized
/// name to the wrong tool.
#[derive(Debug, Default)]
pub struct NameMapping {
    table: RwLock<HashMap<String, String>>,
}

impl NameMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitize `name` and record the pair.
    ///
    /// When two different originals sanitize to the same value, the latest
    /// registration wins and a warning is logged.
    pub fn sanitize(&self, name: &str) -> String {
        let sanitized = sanitize_name(name);
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = table.get(&sanitized)
            && previous != name
        {
            warn!(
                "Tool name collision: '{previous}' and '{name}' both sanitize to '{sanitized}'; \
                 keeping '{name}'"
            );
        }
        trace!("[names] {name} -> {sanitized}");
        table.insert(sanitized.clone(), name.to_string());
        sanitized
    }

    /// Original name for `sanitized`, or `sanitized` itself when unknown.
    pub fn resolve(&self, sanitized: &str) -> String {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(sanitized)
            .cloned()
            .unwrap_or_else(|| sanitized.to_string())
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
