use std::sync::Arc;

use tracing::{info, warn};

use crate::error::SmsGraphError;
use crate::graph::GraphApi;
use crate::llm::CompletionProvider;
use crate::llm_types::{ChatMessage, ToolCallRequest, ToolDefinition};
use crate::text::truncate_chars;
use crate::tools;

/// Single-segment SMS ceiling; replies are cut here, in characters.
pub const SMS_MAX_CHARS: usize = 160;

const FIRST_ROUND_MAX_TOKENS: u32 = 500;
const FOLLOW_UP_MAX_TOKENS: u32 = 300;

pub const FALLBACK_REPLY: &str = "I did not understand that.";
pub const TOOL_ERROR_REPLY: &str = "Error processing request. Please try again.";

const SYSTEM_PROMPT: &str = "You are a personal assistant reached over SMS. \
You can check the user's calendar, create events, send emails, and look up \
contacts using the tools provided. Keep every reply under 160 characters, \
plain text, no markdown. Be direct and concise.";

/// Turns one inbound SMS into one outbound reply, driving the model through
/// at most one round of tool use per call.
pub struct Orchestrator {
    llm: Arc<dyn CompletionProvider>,
    graph: Arc<dyn GraphApi>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn CompletionProvider>, graph: Arc<dyn GraphApi>) -> Self {
        Orchestrator { llm, graph }
    }

    pub async fn handle_message(&self, body: &str) -> Result<String, SmsGraphError> {
        let definitions = tools::tool_definitions();
        let mut messages = vec![ChatMessage::user(body)];

        let initial = self
            .llm
            .complete(SYSTEM_PROMPT, messages.clone(), &definitions, FIRST_ROUND_MAX_TOKENS)
            .await?;

        let mut reply = initial.text.clone();

        if !initial.tool_calls.is_empty() {
            if let Some(text) = &initial.text {
                messages.push(ChatMessage::assistant(text.clone()));
            }

            // Each tool round carries its own error boundary; one failure
            // must not starve the remaining calls, and a later successful
            // round supersedes the error reply.
            for call in &initial.tool_calls {
                info!("executing tool {}", call.name);
                match self.tool_round(&mut messages, &definitions, call).await {
                    Ok(Some(text)) => reply = Some(text),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("tool {} failed: {e}", call.name);
                        reply = Some(TOOL_ERROR_REPLY.to_string());
                    }
                }
            }
        }

        let reply = reply
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_REPLY.to_string());
        Ok(truncate_chars(&reply, SMS_MAX_CHARS))
    }

    /// One dispatch plus its follow-up completion. The follow-up sits inside
    /// the same boundary as the dispatch, so a completion failure degrades
    /// this round only.
    async fn tool_round(
        &self,
        messages: &mut Vec<ChatMessage>,
        definitions: &[ToolDefinition],
        call: &ToolCallRequest,
    ) -> Result<Option<String>, SmsGraphError> {
        let summary = tools::dispatch(&self.graph, &call.name, &call.arguments).await?;
        messages.push(ChatMessage::user(format!("Tool result: {summary}")));
        let follow_up = self
            .llm
            .complete(SYSTEM_PROMPT, messages.clone(), definitions, FOLLOW_UP_MAX_TOKENS)
            .await?;
        if let Some(text) = follow_up.text {
            messages.push(ChatMessage::assistant(text.clone()));
            return Ok(Some(text));
        }
        Ok(None)
    }
}
