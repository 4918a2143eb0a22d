//! Anthropic LLM provider

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AiError, Result};
use crate::http::build_http_client;
use crate::llm::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    /// Create a new Anthropic client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

#[derive(Serialize, Default)]
struct ApiContentBlock {
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    // For tool_result blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    // For tool_use blocks (assistant's tool calls)
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<Value>,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Deserialize)]
struct ResponseContent {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// Streaming event types

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStartPayload,
    },
    ContentBlockStart {
        index: usize,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaPayload,
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorPayload,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStartPayload {
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    Text { text: String },
    ToolUse { id: String, name: String },
    Thinking { thinking: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::enum_variant_names)]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

fn extract_system(request: &CompletionRequest) -> Option<String> {
    request
        .messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.clone())
}

fn to_api_messages(request: &CompletionRequest) -> Vec<ApiMessage> {
    request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "assistant",
                _ => "user",
            }
            .to_string();

            let content = if m.role == Role::Tool {
                ApiContent::Blocks(vec![ApiContentBlock {
                    r#type: "tool_result".to_string(),
                    tool_use_id: m.tool_call_id.clone(),
                    content: Some(m.content.clone()),
                    ..Default::default()
                }])
            } else if let Some(tool_calls) = &m.tool_calls {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(ApiContentBlock {
                        r#type: "text".to_string(),
                        text: Some(m.content.clone()),
                        ..Default::default()
                    });
                }
                for tc in tool_calls {
                    blocks.push(ApiContentBlock {
                        r#type: "tool_use".to_string(),
                        id: Some(tc.id.clone()),
                        name: Some(tc.name.clone()),
                        input: Some(tc.arguments.clone()),
                        ..Default::default()
                    });
                }
                ApiContent::Blocks(blocks)
            } else {
                ApiContent::Text(m.content.clone())
            };

            ApiMessage { role, content }
        })
        .collect()
}

fn to_api_tools(request: &CompletionRequest) -> Option<Vec<ApiTool>> {
    if request.tools.is_empty() {
        return None;
    }
    Some(
        request
            .tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect(),
    )
}

fn parse_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::MaxTokens,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(4096),
            system: extract_system(&request),
            messages: to_api_messages(&request),
            tools: to_api_tools(&request),
            temperature: request.temperature,
            stream: None,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(AiError::Llm(format!("Anthropic API error: {error}")));
        }

        let data: MessagesResponse = response.json().await?;

        let mut content = None;
        let mut tool_calls = vec![];

        for block in data.content {
            match block.r#type.as_str() {
                "text" => content = block.text,
                "tool_use" => {
                    if let (Some(id), Some(name), Some(input)) = (block.id, block.name, block.input)
                    {
                        tool_calls.push(ToolCall {
                            id,
                            name,
                            arguments: input,
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(CompletionResponse {
            content,
            tool_calls,
            finish_reason: parse_stop_reason(data.stop_reason.as_deref()),
            usage: Some(TokenUsage {
                prompt_tokens: data.usage.input_tokens,
                completion_tokens: data.usage.output_tokens,
                total_tokens: data.usage.input_tokens + data.usage.output_tokens,
            }),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            let body = MessagesRequest {
                model,
                max_tokens: request.max_tokens.unwrap_or(4096),
                system: extract_system(&request),
                messages: to_api_messages(&request),
                tools: to_api_tools(&request),
                temperature: request.temperature,
                stream: Some(true),
            };

            let response = match client
                .post(format!("{base_url}/v1/messages"))
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(AiError::Llm(format!("Request failed: {e}")));
                    return;
                }
            };

            if !response.status().is_success() {
                let error = response.text().await.unwrap_or_default();
                yield Err(AiError::Llm(format!("Anthropic API error: {error}")));
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;
            // tool_use block currently being streamed, if any
            let mut current_tool_id: Option<String> = None;
            let mut current_tool_name: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(AiError::Llm(format!("Stream error: {e}")));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE events from buffer
                while let Some(pos) = buffer.find("\n\n") {
                    let event_str = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event_str.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim().is_empty() {
                            continue;
                        }

                        let event: StreamEvent = match serde_json::from_str(data) {
                            Ok(e) => e,
                            Err(_) => continue,
                        };

                        match event {
                            StreamEvent::MessageStart { message } => {
                                if let Some(usage) = message.usage {
                                    input_tokens = usage.input_tokens;
                                }
                            }
                            StreamEvent::ContentBlockStart { index, content_block } => {
                                match content_block {
                                    BlockStart::Text { text } => {
                                        if !text.is_empty() {
                                            yield Ok(StreamChunk::text(&text));
                                        }
                                    }
                                    BlockStart::ToolUse { id, name } => {
                                        current_tool_id = Some(id.clone());
                                        current_tool_name = Some(name.clone());
                                        yield Ok(StreamChunk {
                                            tool_call_delta: Some(ToolCallDelta {
                                                index,
                                                id: Some(id),
                                                name: Some(name),
                                                arguments: None,
                                            }),
                                            ..Default::default()
                                        });
                                    }
                                    BlockStart::Thinking { thinking } => {
                                        if !thinking.is_empty() {
                                            yield Ok(StreamChunk::thinking(&thinking));
                                        }
                                    }
                                }
                            }
                            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                                BlockDelta::TextDelta { text } => {
                                    yield Ok(StreamChunk::text(&text));
                                }
                                BlockDelta::InputJsonDelta { partial_json } => {
                                    yield Ok(StreamChunk {
                                        tool_call_delta: Some(ToolCallDelta {
                                            index,
                                            id: current_tool_id.clone(),
                                            name: current_tool_name.clone(),
                                            arguments: Some(partial_json),
                                        }),
                                        ..Default::default()
                                    });
                                }
                                BlockDelta::ThinkingDelta { thinking } => {
                                    yield Ok(StreamChunk::thinking(&thinking));
                                }
                            },
                            StreamEvent::ContentBlockStop { .. } => {
                                current_tool_id = None;
                                current_tool_name = None;
                            }
                            StreamEvent::MessageDelta { delta, usage } => {
                                if let Some(u) = usage {
                                    output_tokens = u.output_tokens;
                                }
                                if let Some(stop_reason) = delta.stop_reason {
                                    yield Ok(StreamChunk::final_chunk(
                                        parse_stop_reason(Some(&stop_reason)),
                                        Some(TokenUsage {
                                            prompt_tokens: input_tokens,
                                            completion_tokens: output_tokens,
                                            total_tokens: input_tokens + output_tokens,
                                        }),
                                    ));
                                }
                            }
                            StreamEvent::MessageStop => {}
                            StreamEvent::Ping => {}
                            StreamEvent::Error { error } => {
                                yield Err(AiError::Llm(format!("Stream error: {}", error.message)));
                                return;
                            }
                        }
                    }
                }
            }
        })
    }
}
