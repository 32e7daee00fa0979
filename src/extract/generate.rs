//! Generate-side (non-streaming) extractor.
//!
//! Each protocol's `parse_generated_text` already implements the full scan
//! loop (find start marker, emit text, find end marker, parse+coerce,
//! resume; JSON-recovery fallback on an unterminated region).
//! This module is the crate-facing entry point: it delegates to the active
//! protocol and additionally produces the debug-sidecar summary.

use crate::protocol::{ParseOptions, Protocol};
use crate::types::{ContentPart, ToolDescriptor};

/// `originalText`/`toolCalls` pair written to the caller's debug sidecar
/// when a caller opts into [`crate::config::ToolCallMiddlewareOptions::want_debug_summary`].
#[derive(Debug, Clone, Default)]
pub struct DebugSummary {
    /// Concatenation of every recognised call region's raw source text.
    pub original_text: String,
    /// `{toolName, input}` pairs for every call emitted, in order.
    pub tool_calls: Vec<(String, String)>,
}

/// Splits a completed response into content parts, per the active protocol.
pub fn extract_generated(
    protocol: Protocol,
    text: &str,
    tools: &[ToolDescriptor],
    options: &ParseOptions,
    on_error: &mut dyn FnMut(&str),
) -> Vec<ContentPart> {
    protocol.parse_generated_text(text, tools, options, on_error)
}

/// Builds the debug sidecar for a completed response: the recognised call
/// regions (via `extract_tool_call_segments`) plus the emitted calls'
/// `(toolName, input)` pairs.
pub fn debug_summary(protocol: Protocol, text: &str, tools: &[ToolDescriptor], parts: &[ContentPart]) -> DebugSummary {
    let segments = protocol.extract_tool_call_segments(text, tools);
    let tool_calls = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        })
        .collect();
    DebugSummary {
        original_text: segments.join(""),
        tool_calls,
    }
}
