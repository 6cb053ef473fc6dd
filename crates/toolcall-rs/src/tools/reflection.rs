//! Structured reflection on tool failures.
//!
//! A failed tool call becomes an error [`ToolResult`](crate::ToolResult) in
//! the conversation. Wrapping the raw error with likely causes and recovery
//! actions gives the model something to act on in the next turn.

use crate::Arguments;

/// Format a tool failure for structured reflection.
///
/// The message carries the original error, possible causes with recovery
/// actions, and a truncated preview of the arguments used.
pub fn format_tool_failure(tool_name: &str, args: &Arguments, error: &str) -> String {
    let mut msg = format!("Error from tool '{tool_name}':\n  {error}\n");

    let suggestions = analyze_error(error);
    if !suggestions.is_empty() {
        msg.push_str("\nPossible causes and recovery:\n");
        for suggestion in &suggestions {
            msg.push_str(&format!("  - {suggestion}\n"));
        }
    }

    let arguments = serde_json::Value::Object(args.clone()).to_string();
    let args_preview: String = arguments.chars().take(200).collect();
    msg.push_str(&format!("\nArguments used: {args_preview}"));
    if arguments.chars().count() > 200 {
        msg.push_str("...");
    }

    msg
}

/// Analyze an error and return recovery suggestions.
fn analyze_error(error: &str) -> Vec<&'static str> {
    let error_lower = error.to_lowercase();
    let mut suggestions = Vec::new();

    if error_lower.contains("invalid argument")
        || error_lower.contains("validation")
        || error_lower.contains("missing field")
        || error_lower.contains("required")
    {
        suggestions.push(
            "Check the tool's parameter schema: supply every required field with the declared type.",
        );
    }

    if error_lower.contains("timed out") || error_lower.contains("timeout") {
        suggestions.push("The call took too long. Narrow the request with filters or a smaller limit.");
    }

    if error_lower.contains("404") || error_lower.contains("no such") || error_lower.contains("does not exist") {
        suggestions.push(
            "The referenced record may not exist. List or search first to obtain a valid identifier.",
        );
    }

    if error_lower.contains("401")
        || error_lower.contains("403")
        || error_lower.contains("unauthorized")
        || error_lower.contains("forbidden")
        || error_lower.contains("permission")
    {
        suggestions.push("Access was denied. Try a different tool or answer with the data already gathered.");
    }

    if error_lower.contains("429") || error_lower.contains("rate limit") {
        suggestions.push("The backend is rate limiting. Avoid repeating the same call this turn.");
    }

    if error_lower.contains("json") || error_lower.contains("parse") {
        suggestions.push("Check that the arguments are valid JSON with correct field names and types.");
    }

    if suggestions.is_empty() {
        suggestions.push("Review the error message and adjust the arguments before retrying.");
        suggestions.push("If the tool keeps failing, answer with the data gathered so far.");
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: serde_json::Value) -> Arguments {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn failure_includes_error_and_arguments() {
        let result = format_tool_failure("get_item", &args(json!({"id": "42"})), "HTTP 404: item does not exist");
        assert!(result.contains("get_item"));
        assert!(result.contains("HTTP 404"));
        assert!(result.contains("List or search first"));
        assert!(result.contains(r#"{"id":"42"}"#));
    }

    #[test]
    fn timeout_suggestion() {
        let result = format_tool_failure("search", &Arguments::new(), "tool 'search' timed out after 30s");
        assert!(result.contains("Narrow the request"));
    }

    #[test]
    fn generic_fallback() {
        let result = format_tool_failure("search", &Arguments::new(), "kaboom");
        assert!(result.contains("adjust the arguments"));
    }

    #[test]
    fn long_arguments_truncated() {
        let big = "x".repeat(500);
        let result = format_tool_failure("search", &args(json!({"q": big})), "kaboom");
        assert!(result.ends_with("..."));
    }
}
