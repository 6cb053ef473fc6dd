//! Keeping tool output small and remembering what matters in it.
//!
//! - **[`compress`]**: [`ResultCompressor`] shrinks tool results for two
//!   budgets: a small one for conversation history and a larger one for the
//!   Designer. Heavy prose fields go first, parent/child lists are regrouped,
//!   and lists are truncated with `_truncated` / `_totalItems` annotations.
//!
//! - **[`accumulator`]**: [`ContextAccumulator`] records identifiers found in
//!   successful results so later calls in the same request can reuse them.

pub mod accumulator;
pub mod compress;

pub use accumulator::{ContextAccumulator, ExtractionConfig};
pub use compress::{CompressionConfig, GroupingRule, ResultCompressor};
