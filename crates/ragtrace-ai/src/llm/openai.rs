//! OpenAI-compatible LLM provider
//!
//! Works against any chat-completions server that speaks the OpenAI wire
//! format (the demo typically points this at a local model server).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{AiError, Result};
use crate::http::build_http_client;
use crate::llm::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};

/// OpenAI-compatible client
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireMessageToolCall>>,
}

#[derive(Serialize)]
struct WireMessageToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireResponseToolCall>>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    id: String,
    function: WireResponseFunction,
}

#[derive(Deserialize)]
struct WireResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// Streaming types

#[derive(Deserialize, Debug)]
struct WireStreamResponse {
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
struct WireStreamChoice {
    delta: WireStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireStreamToolCall>>,
}

#[derive(Deserialize, Debug)]
struct WireStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<WireStreamFunction>,
}

#[derive(Deserialize, Debug)]
struct WireStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

fn to_wire_messages(request: &CompletionRequest) -> Vec<WireMessage> {
    request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let tool_calls = m.tool_calls.as_ref().map(|tcs| {
                tcs.iter()
                    .map(|tc| WireMessageToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: WireFunctionCall {
                            name: tc.name.clone(),
                            arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        },
                    })
                    .collect()
            });

            // For assistant messages with tool_calls, content can be null
            let content = if m.tool_calls.is_some() && m.content.is_empty() {
                None
            } else {
                Some(m.content.clone())
            };

            WireMessage {
                role,
                content,
                tool_call_id: m.tool_call_id.clone(),
                tool_calls,
            }
        })
        .collect()
}

fn to_wire_tools(request: &CompletionRequest) -> Option<Vec<WireTool>> {
    if request.tools.is_empty() {
        return None;
    }
    Some(
        request
            .tools
            .iter()
            .map(|t| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect(),
    )
}

fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" => FinishReason::ToolCalls,
        "length" => FinishReason::MaxTokens,
        _ => FinishReason::Error,
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = WireRequest {
            model: self.model.clone(),
            messages: to_wire_messages(&request),
            tools: to_wire_tools(&request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: None,
            stream_options: None,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Llm(format!("OpenAI API error {status}: {text}")));
        }

        let data: WireResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Llm("No response from OpenAI".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null),
            })
            .collect();

        let usage = data.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason: parse_finish_reason(&choice.finish_reason),
            usage,
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            let body = WireRequest {
                model,
                messages: to_wire_messages(&request),
                tools: to_wire_tools(&request),
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                stream: Some(true),
                stream_options: Some(serde_json::json!({ "include_usage": true })),
            };

            let response = match client
                .post(format!("{base_url}/chat/completions"))
                .header("Authorization", format!("Bearer {api_key}"))
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
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                yield Err(AiError::Llm(format!("OpenAI API error {status}: {text}")));
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            // id and name arrive once per index; remember them for later fragments
            let mut tool_call_ids: HashMap<usize, String> = HashMap::new();
            let mut tool_call_names: HashMap<usize, String> = HashMap::new();

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
                        if data.trim() == "[DONE]" {
                            continue;
                        }

                        let parsed: WireStreamResponse = match serde_json::from_str(data) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };

                        // Usage arrives in a trailing choice-less event
                        if let Some(usage) = parsed.usage {
                            yield Ok(StreamChunk::final_chunk(
                                FinishReason::Stop,
                                Some(TokenUsage {
                                    prompt_tokens: usage.prompt_tokens,
                                    completion_tokens: usage.completion_tokens,
                                    total_tokens: usage.total_tokens,
                                }),
                            ));
                            continue;
                        }

                        for choice in parsed.choices {
                            if let Some(finish_reason) = choice.finish_reason {
                                let reason = parse_finish_reason(&finish_reason);
                                if reason != FinishReason::Stop {
                                    yield Ok(StreamChunk::final_chunk(reason, None));
                                }
                                continue;
                            }

                            if let Some(content) = choice.delta.content
                                && !content.is_empty()
                            {
                                yield Ok(StreamChunk::text(&content));
                            }

                            if let Some(tool_calls) = choice.delta.tool_calls {
                                for tc in tool_calls {
                                    if let Some(id) = &tc.id {
                                        tool_call_ids.insert(tc.index, id.clone());
                                    }
                                    if let Some(func) = &tc.function
                                        && let Some(name) = &func.name
                                    {
                                        tool_call_names.insert(tc.index, name.clone());
                                    }

                                    let arguments =
                                        tc.function.as_ref().and_then(|f| f.arguments.clone());

                                    yield Ok(StreamChunk {
                                        tool_call_delta: Some(ToolCallDelta {
                                            index: tc.index,
                                            id: tool_call_ids.get(&tc.index).cloned(),
                                            name: tool_call_names.get(&tc.index).cloned(),
                                            arguments,
                                        }),
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}
