//! Tests for debug logging around coercion and protocol parsing.
//!
//! These exercise the code paths that call `log::debug!`/`log::warn!`
//! alongside their host-facing `onError` callback, confirming they run
//! without panicking. Actual log output is only visible with
//! `RUST_LOG=debug`; these tests verify the call sites compile and the
//! surrounding logic still behaves correctly.

use serde_json::json;
use tool_call_middleware::{coerce, Middleware, Placement, Protocol, ToolDescriptor};

fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Debug).try_init();
}

#[test]
fn coercion_key_rename_logs_and_still_renames() {
    init_test_logger();

    let schema = json!({
        "type": "object",
        "properties": {"cityName": {"type": "string"}},
        "required": ["cityName"],
        "additionalProperties": false
    });
    let value = json!({"city_name": "Seoul"});

    // Log output would show: "renaming key \"city_name\" to required \"cityName\" during coercion"
    assert_eq!(coerce(&value, &schema), json!({"cityName": "Seoul"}));
}

#[test]
fn coercion_unparseable_object_string_logs_and_passes_through() {
    init_test_logger();

    let schema = json!({"type": "object", "properties": {"x": {"type": "integer"}}});
    let value = json!("not json at all");

    // Log output would show: "object-typed value was a string but not a parseable JSON object, leaving as-is"
    assert_eq!(coerce(&value, &schema), value);
}

#[test]
fn hermes_unterminated_call_with_no_recoverable_json_warns() {
    init_test_logger();

    let tools = vec![ToolDescriptor::new(
        "get_weather",
        "weather lookup",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    )];
    let middleware = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);

    let errors = std::sync::Mutex::new(Vec::new());
    let on_error: Option<Box<dyn Fn(&str) + Send + Sync>> =
        Some(Box::new(|msg: &str| errors.lock().unwrap().push(msg.to_string())));
    let result = middleware
        .wrap_generate(
            "<tool_call>this is not json and never closes",
            &tools,
            &tool_call_middleware::ToolChoiceConfig::Auto,
            false,
            &on_error,
        )
        .unwrap();

    // Log output would show a warn! that the region had no recoverable JSON object.
    assert!(!result.content.is_empty());
}

#[test]
fn yaml_xml_body_that_fails_to_parse_falls_back_and_logs() {
    init_test_logger();

    // `coerce` is exercised directly here since the fallback itself lives in
    // the protocol module's `yaml_to_json`, reached only via a full
    // streamed/generated tool call; this confirms coercion tolerates the
    // resulting string leaf the same way it tolerates any other string.
    let schema = json!({"type": "string"});
    assert_eq!(coerce(&json!("just a plain string"), &schema), json!("just a plain string"));
}
