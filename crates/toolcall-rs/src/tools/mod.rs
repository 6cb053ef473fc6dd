//! Tools: the backend port, the in-process registry, and everything that
//! adapts tool identity and arguments for a model.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, auto-parses arguments. Best for simple tools.
//! - **`impl Tool`**: full struct with manual [`Tool::definition()`] and
//!   [`Tool::execute()`].
//! - **`impl ToolBackend`**: bypass [`ToolSet`] entirely when tools live in
//!   another service.
//!
//! # Submodules
//!
//! - [`core`]: [`ToolBackend`], [`Tool`], [`ToolSet`], [`FnTool`].
//! - [`names`]: [`sanitize_name`] and the per-request [`NameMapping`].
//! - [`schema`]: parameter-schema normalization for strict consumers.
//! - [`validate`]: JSON-Schema validation and schema-driven coercion.
//! - [`enrich`]: [`ArgumentEnricher`] for defaults, locality, coordinates,
//!   inherited identifiers.
//! - [`reflection`]: structured failure text for model self-correction.

pub mod core;
pub mod enrich;
pub mod names;
pub mod reflection;
pub mod schema;
pub mod validate;

// Re-export commonly used items at the module level.
pub use core::{FnTool, Tool, ToolBackend, ToolFuture, ToolSet};
pub use enrich::{ArgumentEnricher, EnrichmentConfig, GeoPoint, SessionContext, SlotBinding};
pub use names::{NameMapping, sanitize_name};
pub use schema::normalize;
pub use validate::{coerce_to_schema, validate_tool_arguments};
