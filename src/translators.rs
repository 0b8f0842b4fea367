use async_openai::{
    Client,
    config::Config,
    types::chat::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ResponseFormat,
        ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

use crate::{
    error::ClientError,
    prompts::{FieldMap, NR_FIELD, PAYLOAD_HEADER, preview},
};

const RESPONSE_PREVIEW_CHARS: usize = 500;

/// One model call: instructions, the `{"d": [...]}` payload, and the schema the
/// reply has to follow.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub instructions: String,
    pub payload: String,
    pub schema: Value,
    pub output_tokens: u32,
    pub thinking_tokens: u32,
}

impl TranslationRequest {
    /// The request as a single prompt text.
    pub fn prompt(&self) -> String {
        format!("{}{}{}", self.instructions, PAYLOAD_HEADER, self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u32,
    /// Reasoning tokens, when the endpoint reports them.
    pub thinking: Option<u32>,
    pub output: u32,
    pub total: u32,
}

/// One Gemini harm category and the threshold it is blocked at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

pub const HARM_CATEGORIES: [&str; 5] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Every harm category set to `BLOCK_NONE`.
pub fn unblocked_safety_settings() -> Vec<SafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: "BLOCK_NONE".to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait TranslationClient: Send + Sync {
    async fn send(&self, request: &TranslationRequest) -> Result<ModelReply, ClientError>;
}

/// Answers every item with a tagged copy of its source text.
pub struct DryRunTranslator {
    pub target_language: String,
    pub fields: FieldMap,
}

#[async_trait]
impl TranslationClient for DryRunTranslator {
    async fn send(&self, request: &TranslationRequest) -> Result<ModelReply, ClientError> {
        let payload: Value = serde_json::from_str(&request.payload)
            .map_err(|e| ClientError::Request(format!("Invalid payload: {}", e)))?;

        let items: Vec<Value> = payload
            .get("d")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        let source = item
                            .get(&self.fields.source_header)
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let mut out = serde_json::Map::new();
                        out.insert(
                            NR_FIELD.to_string(),
                            item.get(NR_FIELD).cloned().unwrap_or(Value::Null),
                        );
                        out.insert(
                            self.fields.target_header.clone(),
                            Value::String(format!("[DRY:{}] {}", self.target_language, source)),
                        );
                        Value::Object(out)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ModelReply {
            text: json!({ "d": items }).to_string(),
            finish_reason: Some("stop".to_string()),
            usage: None,
        })
    }
}

/// OpenAI-compatible chat completion endpoint with structured output.
pub struct LlmTranslator<T: Config> {
    pub client: Client<T>,
    pub model: String,
    pub timeout: Duration,
    /// Send the Gemini `thinking_config` extension with the thinking budget.
    pub thinking_config: bool,
    /// Sent as the Gemini `safety_settings` extension; empty sends none.
    pub safety_settings: Vec<SafetySetting>,
}

impl<T: Config> LlmTranslator<T> {
    fn build_body(&self, request: &TranslationRequest) -> Result<Value, ClientError> {
        let schema = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: "translations".into(),
                schema: Some(request.schema.clone()),
                strict: Some(true),
            },
        };

        let typed = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.instructions.clone()).into(),
                ChatCompletionRequestUserMessage::from(format!(
                    "{}{}",
                    PAYLOAD_HEADER.trim_start(),
                    request.payload
                ))
                .into(),
            ])
            .response_format(schema)
            .max_completion_tokens(request.output_tokens)
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let mut body =
            serde_json::to_value(typed).map_err(|e| ClientError::Request(e.to_string()))?;

        let mut google = Map::new();
        if self.thinking_config {
            google.insert(
                "thinking_config".to_string(),
                json!({
                    "thinking_budget": request.thinking_tokens,
                    "include_thoughts": false,
                }),
            );
        }
        if !self.safety_settings.is_empty() {
            let settings = serde_json::to_value(&self.safety_settings)
                .map_err(|e| ClientError::Request(e.to_string()))?;
            google.insert("safety_settings".to_string(), settings);
        }
        if !google.is_empty() {
            body["extra_body"] = json!({ "google": google });
        }

        Ok(body)
    }
}

fn reply_from(response: CreateChatCompletionResponse) -> ModelReply {
    let choice = response.choices.first();
    let text = choice
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();
    let finish_reason = choice
        .and_then(|choice| choice.finish_reason.as_ref())
        .map(|reason| format!("{:?}", reason));
    let usage = response.usage.as_ref().map(|usage| TokenUsage {
        input: usage.prompt_tokens,
        thinking: usage
            .completion_tokens_details
            .as_ref()
            .and_then(|details| details.reasoning_tokens),
        output: usage.completion_tokens,
        total: usage.total_tokens,
    });

    ModelReply {
        text,
        finish_reason,
        usage,
    }
}

#[async_trait]
impl<T> TranslationClient for LlmTranslator<T>
where
    T: Config + Send + Sync,
{
    async fn send(&self, request: &TranslationRequest) -> Result<ModelReply, ClientError> {
        let body = self.build_body(request)?;

        let response: CreateChatCompletionResponse =
            tokio::time::timeout(self.timeout, self.client.chat().create_byot(body))
                .await
                .map_err(|_| ClientError::Timeout(self.timeout))??;

        let reply = reply_from(response);

        tracing::debug!(
            "Raw response (first {} characters):\n{}",
            RESPONSE_PREVIEW_CHARS,
            preview(&reply.text, RESPONSE_PREVIEW_CHARS)
        );
        if let Some(usage) = &reply.usage {
            tracing::debug!(
                "Token usage\n    Input: {}\n    Thoughts: {}\n    Output: {}\n    Total: {}",
                usage.input,
                usage.thinking.unwrap_or_default(),
                usage.output,
                usage.total
            );
        }

        Ok(reply)
    }
}
