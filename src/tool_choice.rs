//! Tool-choice adapter.
//!
//! When the caller constrains tool selection to `required` or a specific
//! tool, the provider request switches to JSON-object response mode against
//! a synthesised schema, and the response is parsed back as exactly one
//! forced `ToolCall` rather than run through the active protocol's grammar.

use crate::coerce::coerce;
use crate::config::ToolChoiceConfig;
use crate::error::{Error, Result};
use crate::ids::next_call_id;
use crate::types::{ToolCall, ToolDescriptor};
use serde_json::{json, Value};

/// Synthesises the JSON-Schema the provider's JSON-object response mode
/// should be constrained to: conceptually "if name == T1 then arguments
/// matches schema(T1) else if name == T2 ...", expressed as a
/// `oneOf` of per-tool `{name, arguments}` shapes.
///
/// Validity (unknown tool name, missing tools) must already have been
/// checked via [`ToolChoiceConfig::validate`] before calling this.
pub fn synthesize_schema(config: &ToolChoiceConfig, tools: &[ToolDescriptor]) -> Value {
    let candidates: Vec<&ToolDescriptor> = match config {
        ToolChoiceConfig::Tool { tool_name } => tools.iter().filter(|t| &t.name == tool_name).collect(),
        _ => tools.iter().collect(),
    };

    let variants: Vec<Value> = candidates
        .iter()
        .map(|tool| {
            json!({
                "type": "object",
                "properties": {
                    "name": {"const": tool.name},
                    "arguments": tool.input_schema,
                },
                "required": ["name", "arguments"],
            })
        })
        .collect();

    json!({
        "type": "object",
        "oneOf": variants,
    })
}

/// Parses a JSON-object-mode response back into exactly one forced
/// `ToolCall`.
pub fn parse_forced_response(json_text: &str, config: &ToolChoiceConfig, tools: &[ToolDescriptor]) -> Result<ToolCall> {
    let value: Value = serde_json::from_str(json_text).map_err(Error::from)?;

    let name = match config {
        ToolChoiceConfig::Tool { tool_name } => tool_name.clone(),
        _ => value
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::other("forced tool-choice response carried no 'name' field"))?,
    };

    let tool = tools
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::UnknownTool(name.clone()))?;

    let raw_args = value.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let coerced = coerce(&raw_args, &tool.input_schema);

    Ok(ToolCall::new(next_call_id(), name, coerced.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("get_weather", "weather", json!({"type":"object","properties":{"city":{"type":"string"}}})),
            ToolDescriptor::new("get_time", "time", json!({"type":"object","properties":{"tz":{"type":"string"}}})),
        ]
    }

    #[test]
    fn synthesize_schema_includes_all_tools_for_required() {
        let schema = synthesize_schema(&ToolChoiceConfig::Required, &tools());
        assert_eq!(schema["oneOf"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn synthesize_schema_fixes_single_tool_for_tool_choice() {
        let config = ToolChoiceConfig::Tool { tool_name: "get_time".into() };
        let schema = synthesize_schema(&config, &tools());
        let variants = schema["oneOf"].as_array().unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0]["properties"]["name"]["const"], "get_time");
    }

    #[test]
    fn parse_forced_response_required_reads_name_from_json() {
        let json_text = r#"{"name":"get_weather","arguments":{"city":"Seoul"}}"#;
        let call = parse_forced_response(json_text, &ToolChoiceConfig::Required, &tools()).unwrap();
        assert_eq!(call.tool_name, "get_weather");
        assert_eq!(call.input, r#"{"city":"Seoul"}"#);
    }

    #[test]
    fn parse_forced_response_tool_ignores_json_name_field() {
        let config = ToolChoiceConfig::Tool { tool_name: "get_time".into() };
        let json_text = r#"{"arguments":{"tz":"UTC"}}"#;
        let call = parse_forced_response(json_text, &config, &tools()).unwrap();
        assert_eq!(call.tool_name, "get_time");
    }

    #[test]
    fn parse_forced_response_unknown_tool_errors() {
        let json_text = r#"{"name":"nope","arguments":{}}"#;
        let err = parse_forced_response(json_text, &ToolChoiceConfig::Required, &tools()).unwrap_err();
        assert!(matches!(err, Error::UnknownTool(_)));
    }
}
