//! System instruction assembly.
//!
//! [`SystemPromptBuilder`] joins sections with blank lines and skips empty
//! ones. [`build_system_instruction`] uses it to produce the instruction sent
//! with every turn: a preamble, the enumerated tools, and the calling rules.

use crate::ToolDefinition;

/// Longest tool description quoted in the instruction.
const DESCRIPTION_PREVIEW_CHARS: usize = 200;

const PREAMBLE: &str = "You are an assistant that answers requests by calling tools. \
                        Gather the data you need, then answer in plain language.";

const RULES: &str = "- Call tools through native function calls, never by writing the call as text.\n\
                     - Use only the tool names listed above, exactly as written.\n\
                     - Reuse identifiers returned by earlier tool results instead of guessing.\n\
                     - When a tool returns nothing, try broader or alternate search terms once \
                     before giving up.\n\
                     - When you have enough information, stop calling tools and answer.";

/// Builder for multi-section system prompts.
///
/// ```
/// use toolcall_rs::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a helpful agent.")
///     .section("Context", "Today is Monday.")
///     .section_if(false, "Hidden", || "never built".into())
///     .section_opt("Missing", None::<String>)
///     .build();
///
/// assert_eq!(prompt, "You are a helpful agent.\n\n## Context\n\nToday is Monday.");
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Start with a preamble, included as-is.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds. `content_fn` is lazy.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// The instruction for one turn. `tools` carry their sanitized names.
pub fn build_system_instruction(tools: &[ToolDefinition], instructions: Option<&str>) -> String {
    SystemPromptBuilder::new(PREAMBLE)
        .section_if(!tools.is_empty(), "Available tools", || tool_listing(tools))
        .section_if(!tools.is_empty(), "Rules", || RULES.to_string())
        .section_opt("Additional instructions", instructions.filter(|s| !s.trim().is_empty()))
        .build()
}

fn tool_listing(tools: &[ToolDefinition]) -> String {
    tools
        .iter()
        .map(|t| {
            let first_line = t.description.lines().next().unwrap_or_default().trim();
            let mut preview: String = first_line.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            if first_line.chars().count() > DESCRIPTION_PREVIEW_CHARS {
                preview.push_str("...");
            }
            if preview.is_empty() {
                format!("- {}", t.name)
            } else {
                format!("- {}: {preview}", t.name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_section_skipped() {
        let prompt = SystemPromptBuilder::new("Preamble")
            .section("Empty", "")
            .section("Present", "content")
            .build();
        assert!(!prompt.contains("Empty"));
        assert!(prompt.contains("## Present\n\ncontent"));
    }

    #[test]
    fn section_opt_some_included() {
        let prompt = SystemPromptBuilder::new("Preamble")
            .section_opt("Optional", Some("present"))
            .build();
        assert!(prompt.ends_with("## Optional\n\npresent"));
    }

    #[test]
    fn instruction_enumerates_tools() {
        let tools = vec![
            ToolDefinition::new("dn_list_items", "List items.\nLonger text.", json!({})),
            ToolDefinition::new("ping", "", json!({})),
        ];
        let text = build_system_instruction(&tools, None);
        assert!(text.contains("## Available tools\n\n- dn_list_items: List items.\n- ping"));
        assert!(!text.contains("Longer text"));
        assert!(text.contains("## Rules"));
        assert!(!text.contains("Additional instructions"));
    }

    #[test]
    fn long_descriptions_are_cut() {
        let tools = vec![ToolDefinition::new("t", "x".repeat(300), json!({}))];
        let text = build_system_instruction(&tools, Some("Prefer metric units."));
        assert!(text.contains(&format!("- t: {}...", "x".repeat(200))));
        assert!(text.ends_with("## Additional instructions\n\nPrefer metric units."));
    }

    #[test]
    fn no_tools_no_listing() {
        let text = build_system_instruction(&[], Some("  "));
        assert_eq!(text, PREAMBLE);
    }
}
