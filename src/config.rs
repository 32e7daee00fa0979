//! # Middleware Configuration
//!
//! This module holds the construction-time knobs for the tool-call
//! middleware: where the rendered tools-system block goes in the outgoing
//! message list, what the host wants to learn about on recoverable parse
//! trouble, and how tool selection is constrained.
//!
//! Unlike the provider-endpoint configuration a networked SDK needs, this
//! middleware has no transport to resolve — so instead of a `Provider` enum
//! plus environment-variable overrides, the "configuration" surface here is
//! the small set of values [`crate::Middleware::create`] takes directly.

use crate::types::ToolDescriptor;

/// Where the tools-system text block is inserted relative to the rest of the
/// outgoing message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Insert before the first message (merging into an existing leading
    /// system message rather than adding a second one).
    #[default]
    Prepend,
    /// Insert after the last message.
    Append,
}

/// Caller-supplied hooks and sidecar slots for one middleware instance.
///
/// `on_error` fires for every *recoverable* condition: malformed
/// XML tolerated, JSON recovery activated, an unknown assistant content
/// variant stringified, a streamed response ending mid-call. It never fires
/// for the configuration errors in [`crate::Error`] — those are raised
/// synchronously instead.
#[derive(Default)]
pub struct ToolCallMiddlewareOptions {
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// When set, `wrap_generate` populates this with the recognised call
    /// regions and emitted calls for this response. Kept as a plain return
    /// slot rather than a shared mutable reference the caller has to lock.
    pub want_debug_summary: bool,
}

impl std::fmt::Debug for ToolCallMiddlewareOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallMiddlewareOptions")
            .field("on_error", &self.on_error.as_ref().map(|_| "<fn>"))
            .field("want_debug_summary", &self.want_debug_summary)
            .finish()
    }
}

impl ToolCallMiddlewareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn want_debug_summary(mut self, want: bool) -> Self {
        self.want_debug_summary = want;
        self
    }

    /// Calls the registered `on_error` hook, or does nothing if none was
    /// provided.
    pub fn report_error(&self, message: &str) {
        if let Some(f) = &self.on_error {
            f(message);
        }
    }
}

/// Tool-choice configuration recognised by the adapter.
#[derive(Debug, Clone, Default)]
pub enum ToolChoiceConfig {
    /// No constraint; inbound parsing proceeds normally.
    #[default]
    Auto,
    /// Require the response to be a tool call.
    Required,
    /// Require the response to be a call to this specific tool.
    Tool { tool_name: String },
    /// Rejected: the caller should omit tools entirely instead.
    None,
}

impl ToolChoiceConfig {
    /// Validates this configuration against the available tools: missing
    /// tools is an error for `required` or a specific `tool`, an unknown
    /// tool name is an error for `tool`, and `none` always errors.
    pub fn validate(&self, tools: &[ToolDescriptor]) -> crate::error::Result<()> {
        match self {
            ToolChoiceConfig::Auto => Ok(()),
            ToolChoiceConfig::None => Err(crate::error::Error::NoneToolChoice),
            ToolChoiceConfig::Required => {
                if tools.is_empty() {
                    Err(crate::error::Error::MissingTools)
                } else {
                    Ok(())
                }
            }
            ToolChoiceConfig::Tool { tool_name } => {
                if tools.is_empty() {
                    Err(crate::error::Error::MissingTools)
                } else if !tools.iter().any(|t| &t.name == tool_name) {
                    Err(crate::error::Error::UnknownTool(tool_name.clone()))
                } else {
                    Ok(())
                }
            }
        }
    }
}
