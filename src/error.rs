//! Error types for the tool-call middleware.
//!
//! Per the error taxonomy, only *configuration*
//! errors are fatal — they are the only variants this crate's public surface
//! ever returns in a `Result`. Parse failures, coercion misses, and streaming
//! tails that end mid-call are all recovered inline and reported through the
//! `onError` callback instead (see `config::ToolCallMiddlewareOptions`).

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal configuration errors raised synchronously from `transform_params`.
#[derive(Error, Debug)]
pub enum Error {
    /// `{none}` was passed as the tool-choice configuration. The caller should
    /// omit tools entirely instead of asking for none.
    #[error("tool-choice 'none' is not supported; omit tools instead")]
    NoneToolChoice,

    /// `{tool, toolName}` named a tool that isn't in the provided tool list.
    #[error("unknown tool in tool-choice: {0}")]
    UnknownTool(String),

    /// `{required}` or `{tool}` was requested but no tools were provided.
    #[error("tool-choice requires at least one tool, but none were provided")]
    MissingTools,

    /// A provider-defined tool (one the host declares but does not describe
    /// with a JSON-Schema `inputSchema`) was passed to a text-emulation
    /// middleware, which has no way to render it into the system prompt.
    #[error("provider-defined tool '{0}' is not supported by text tool-call emulation")]
    ProviderDefinedTool(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for invalid middleware configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Other errors that don't fit the above.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    /// Creates a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new catch-all error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_tool_choice_message() {
        let err = Error::NoneToolChoice;
        assert_eq!(
            err.to_string(),
            "tool-choice 'none' is not supported; omit tools instead"
        );
    }

    #[test]
    fn unknown_tool_carries_name() {
        let err = Error::UnknownTool("frobnicate".to_string());
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn config_constructor() {
        let err = Error::config("bad placement");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "invalid configuration: bad placement");
    }
}
