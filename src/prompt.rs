//! Prompt transformer: rewrites the outgoing message list so a
//! provider with no native tool-call channel sees only plain role/text
//! messages, plus a sidecar carrying the original tool descriptors so the
//! host can hand them back to `wrap_generate`/`wrap_stream`.

use crate::config::Placement;
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::types::{ContentPart, Message, Role, ToolDescriptor, ToolResultOutput};

/// Result of [`transform_prompt`]: the rewritten messages the host ships to
/// the provider, plus the sidecar the host should stash in
/// `providerOptions.toolCallMiddleware` for later retrieval when inbound
/// text needs to be parsed.
pub struct TransformedPrompt {
    pub messages: Vec<Message>,
    /// The tools as originally declared, before they were rendered into text
    /// and cleared from the outgoing list (step 7).
    pub original_tools: Vec<ToolDescriptor>,
}

/// Runs the full seven-step outgoing-message rewrite.
pub fn transform_prompt(
    messages: &[Message],
    tools: &[ToolDescriptor],
    protocol: Protocol,
    system_template: &str,
    placement: Placement,
    on_error: &mut dyn FnMut(&str),
) -> Result<TransformedPrompt> {
    // Step 1: reject provider-defined tools (no inputSchema to render).
    if let Some(bad) = tools.iter().find(|t| t.input_schema.is_null()) {
        return Err(Error::ProviderDefinedTool(bad.name.clone()));
    }

    // Step 2: render the tools-system block.
    let tools_block = protocol.format_tools(tools, system_template);

    // Step 3: rewrite each message per its role.
    let rewritten: Vec<Message> = messages.iter().map(|m| rewrite_message(m, protocol, on_error)).collect();

    // Step 4: condense multi-text-part messages into one.
    let condensed: Vec<Message> = rewritten.into_iter().map(condense).collect();

    // Step 5: merge consecutive same-role `user` messages.
    let merged = merge_consecutive_user(condensed);

    // Step 6: insert or merge the tools-system block.
    let with_system = insert_tools_block(merged, &tools_block, placement);

    Ok(TransformedPrompt {
        messages: with_system,
        original_tools: tools.to_vec(),
    })
}

fn rewrite_message(message: &Message, protocol: Protocol, on_error: &mut dyn FnMut(&str)) -> Message {
    match message.role {
        Role::System | Role::User => message.clone(),
        Role::Assistant => {
            let parts: Vec<ContentPart> = message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::ToolCall { tool_call_id, tool_name, input } => {
                        let call = crate::types::ToolCall::new(tool_call_id.clone(), tool_name.clone(), input.clone());
                        ContentPart::text(protocol.format_tool_call(&call))
                    }
                    ContentPart::Unknown { raw } => {
                        log::debug!("stringifying unrecognised assistant content variant: {raw}");
                        on_error("prompt: unknown assistant content variant stringified");
                        ContentPart::text(raw.to_string())
                    }
                    other => other.clone(),
                })
                .collect();
            Message::assistant(parts)
        }
        Role::Tool => {
            let rendered: Vec<String> = message
                .content
                .iter()
                .map(|part| render_tool_result_part(part, protocol))
                .collect();
            Message::user(rendered.join("\n"))
        }
    }
}

fn render_tool_result_part(part: &ContentPart, protocol: Protocol) -> String {
    match part {
        ContentPart::ToolResult { tool_name, output, .. } => protocol.format_tool_response(tool_name, output),
        ContentPart::Text { text } => text.clone(),
        other => {
            let output = ToolResultOutput::Text { value: other.as_text().unwrap_or_default().to_string() };
            protocol.format_tool_response("", &output)
        }
    }
}

/// Condenses a message's parts into a single `Text` part joined by `\n`,
/// when every part is textual; leaves mixed-content messages alone. The
/// rewrite step above already turns assistant/tool messages into all-text
/// content, so in practice this only has work to do there.
fn condense(message: Message) -> Message {
    if message.content.len() <= 1 {
        return message;
    }
    if message.content.iter().all(|p| matches!(p, ContentPart::Text { .. })) {
        let joined = message.content.iter().filter_map(|p| p.as_text()).collect::<Vec<_>>().join("\n");
        Message { role: message.role, content: vec![ContentPart::text(joined)] }
    } else {
        message
    }
}

fn merge_consecutive_user(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if message.role == Role::User {
            if let Some(last) = out.last_mut() {
                if last.role == Role::User {
                    let mut joined = last.content.iter().filter_map(|p| p.as_text()).collect::<Vec<_>>().join("\n");
                    let next_text = message.content.iter().filter_map(|p| p.as_text()).collect::<Vec<_>>().join("\n");
                    joined.push('\n');
                    joined.push_str(&next_text);
                    last.content = vec![ContentPart::text(joined)];
                    continue;
                }
            }
        }
        out.push(message);
    }
    out
}

fn insert_tools_block(mut messages: Vec<Message>, tools_block: &str, placement: Placement) -> Vec<Message> {
    match placement {
        Placement::Prepend => {
            if let Some(first) = messages.first_mut() {
                if first.role == Role::System {
                    let existing = first.content.iter().filter_map(|p| p.as_text()).collect::<Vec<_>>().join("\n");
                    if existing.contains(tools_block) {
                        return messages;
                    }
                    first.content = vec![ContentPart::text(format!("{existing}\n{tools_block}"))];
                    return messages;
                }
            }
            messages.insert(0, Message::system(tools_block.to_string()));
            messages
        }
        Placement::Append => {
            if let Some(last) = messages.iter_mut().rev().find(|m| m.role == Role::System) {
                let existing = last.content.iter().filter_map(|p| p.as_text()).collect::<Vec<_>>().join("\n");
                if existing.contains(tools_block) {
                    return messages;
                }
                last.content = vec![ContentPart::text(format!("{existing}\n{tools_block}"))];
                return messages;
            }
            messages.push(Message::system(tools_block.to_string()));
            messages
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new("get_weather", "weather lookup", json!({"type":"object","properties":{"city":{"type":"string"}}}))]
    }

    #[test]
    fn assistant_tool_call_rewrite_scenario() {
        let call = ToolCall::new("call_1", "get_weather", r#"{"city":"Seoul"}"#);
        let messages = vec![
            Message::assistant(vec![ContentPart::tool_call(call)]),
            Message::tool(vec![ContentPart::ToolResult {
                tool_call_id: "call_1".into(),
                tool_name: "get_weather".into(),
                output: ToolResultOutput::Json { value: json!({"temperature": 21}) },
            }]),
        ];
        let mut errs = vec![];
        let result = transform_prompt(&messages, &tools(), Protocol::Hermes, "{{tools}}", Placement::Prepend, &mut |m| errs.push(m.to_string())).unwrap();

        // messages[0] was a system block we just inserted; find the assistant one.
        let assistant = result.messages.iter().find(|m| m.role == Role::Assistant).unwrap();
        assert_eq!(
            assistant.content[0].as_text(),
            Some(r#"<tool_call>{"name":"get_weather","arguments":{"city":"Seoul"}}</tool_call>"#)
        );

        let tool_as_user = result.messages.iter().find(|m| m.role == Role::User && m.content[0].as_text().map(|t| t.contains("tool_response")).unwrap_or(false)).unwrap();
        assert_eq!(
            tool_as_user.content[0].as_text(),
            Some(r#"<tool_response>{"name":"get_weather","content":{"temperature":21}}</tool_response>"#)
        );
    }

    #[test]
    fn provider_defined_tool_is_rejected() {
        let bad_tool = ToolDescriptor { name: "native".into(), description: None, input_schema: serde_json::Value::Null };
        let mut errs = vec![];
        let result = transform_prompt(&[], &[bad_tool], Protocol::Hermes, "{{tools}}", Placement::Prepend, &mut |m| errs.push(m.to_string()));
        assert!(matches!(result, Err(Error::ProviderDefinedTool(_))));
    }

    #[test]
    fn prepend_merges_into_existing_system_message() {
        let messages = vec![Message::system("be nice")];
        let mut errs = vec![];
        let result = transform_prompt(&messages, &tools(), Protocol::Hermes, "{{tools}}", Placement::Prepend, &mut |m| errs.push(m.to_string())).unwrap();
        assert_eq!(result.messages.len(), 1);
        assert!(result.messages[0].content[0].as_text().unwrap().starts_with("be nice"));
    }

    #[test]
    fn append_inserts_new_system_message_when_none_exists() {
        let messages = vec![Message::user("hi")];
        let mut errs = vec![];
        let result = transform_prompt(&messages, &tools(), Protocol::Hermes, "{{tools}}", Placement::Append, &mut |m| errs.push(m.to_string())).unwrap();
        assert_eq!(result.messages.last().unwrap().role, Role::System);
    }

    #[test]
    fn consecutive_user_messages_are_merged() {
        let messages = vec![Message::user("one"), Message::user("two")];
        let mut errs = vec![];
        let result = transform_prompt(&messages, &[], Protocol::Hermes, "{{tools}}", Placement::Append, &mut |m| errs.push(m.to_string())).unwrap();
        let user_msgs: Vec<_> = result.messages.iter().filter(|m| m.role == Role::User).collect();
        assert_eq!(user_msgs.len(), 1);
        assert_eq!(user_msgs[0].content[0].as_text(), Some("one\ntwo"));
    }

    #[test]
    fn transform_is_a_fixed_point() {
        // transform(transform(m, T), T) == transform(m, T) for the *same*
        // tools T on both applications — re-running the transform on its own
        // output must not double the tools-system block.
        let call = ToolCall::new("call_1", "get_weather", r#"{"city":"Seoul"}"#);
        let messages = vec![Message::user("hi"), Message::assistant(vec![ContentPart::tool_call(call)])];
        let mut errs = vec![];
        let once = transform_prompt(&messages, &tools(), Protocol::Hermes, "{{tools}}", Placement::Prepend, &mut |m| errs.push(m.to_string())).unwrap();
        let twice = transform_prompt(&once.messages, &tools(), Protocol::Hermes, "{{tools}}", Placement::Prepend, &mut |m| errs.push(m.to_string())).unwrap();
        let once_texts: Vec<_> = once.messages.iter().map(|m| (m.role, m.content[0].as_text().map(str::to_string))).collect();
        let twice_texts: Vec<_> = twice.messages.iter().map(|m| (m.role, m.content[0].as_text().map(str::to_string))).collect();
        assert_eq!(once_texts, twice_texts);

        // The system message in particular must not have gained a second
        // copy of the tools block.
        let system_text = twice.messages.iter().find(|m| m.role == Role::System).unwrap().content[0].as_text().unwrap();
        assert_eq!(system_text.matches("get_weather").count(), once.messages.iter().find(|m| m.role == Role::System).unwrap().content[0].as_text().unwrap().matches("get_weather").count());
    }

    #[test]
    fn response_role_message_is_never_dropped() {
        let messages = vec![Message::assistant(vec![ContentPart::text("just talking")])];
        let mut errs = vec![];
        let result = transform_prompt(&messages, &[], Protocol::Hermes, "{{tools}}", Placement::Prepend, &mut |m| errs.push(m.to_string())).unwrap();
        assert!(result.messages.iter().any(|m| m.role == Role::Assistant));
    }
}
