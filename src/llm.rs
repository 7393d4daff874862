use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::error::SmsGraphError;
use crate::llm_types::{ChatMessage, Completion, ToolCallRequest, ToolDefinition};

const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Seam over the chat-completions backend so the orchestrator can be
/// exercised with a scripted provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<Completion, SmsGraphError>;
}

pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    chat_url: String,
    referer: String,
}

impl OpenRouterProvider {
    pub fn new(config: &Config) -> Result<Self, SmsGraphError> {
        let base = config
            .llm_base_url
            .as_deref()
            .unwrap_or(DEFAULT_LLM_BASE_URL);
        let chat_url = format!("{}/chat/completions", base.trim_end_matches('/'));

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| SmsGraphError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(OpenRouterProvider {
            http,
            api_key: config.openrouter_api_key.clone(),
            model: config.model.clone(),
            chat_url,
            referer: config.app_base_url.clone(),
        })
    }
}

// --- chat-completions response types ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default = "Vec::new")]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn into_completion(response: ChatResponse) -> Completion {
    let Some(choice) = response.choices.into_iter().next() else {
        return Completion::default();
    };
    let text = choice
        .message
        .content
        .filter(|content| !content.trim().is_empty());
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();
    Completion { text, tool_calls }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<Completion, SmsGraphError> {
        let mut wire_messages = vec![json!({"role": "system", "content": system})];
        wire_messages.extend(
            messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );
        let wire_tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut request = json!({
            "model": self.model,
            "messages": wire_messages,
            "max_tokens": max_tokens,
            "temperature": 0.7,
        });
        if !wire_tools.is_empty() {
            request["tools"] = json!(wire_tools);
            request["tool_choice"] = json!("auto");
        }

        let mut retries = 0u32;
        let max_retries = 3;

        loop {
            let response = self
                .http
                .post(&self.chat_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("HTTP-Referer", &self.referer)
                .header("X-Title", "SMS Assistant")
                .json(&request)
                .send()
                .await?;

            let status = response.status();

            if status.is_success() {
                let body = response.text().await?;
                let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
                    SmsGraphError::LlmApi(format!("Failed to parse response: {e}\nBody: {body}"))
                })?;
                return Ok(into_completion(parsed));
            }

            if status.as_u16() == 429 && retries < max_retries {
                retries += 1;
                let delay = std::time::Duration::from_secs(2u64.pow(retries));
                warn!(
                    "Rate limited, retrying in {:?} (attempt {retries}/{max_retries})",
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            if let Ok(api_err) = serde_json::from_str::<ApiError>(&body) {
                return Err(SmsGraphError::LlmApi(api_err.error.message));
            }
            return Err(SmsGraphError::LlmApi(format!("HTTP {status}: {body}")));
        }
    }
}
