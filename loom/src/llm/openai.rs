//! OpenAI Chat Completions client implementing [`LlmClient`].
//!
//! Uses the real OpenAI Chat Completions API. Requires `OPENAI_API_KEY` (or
//! explicit config). Optional tools can be set for function/tool calling; when
//! present the API may return `tool_calls` in the response.
//!
//! # Streaming
//!
//! Implements `invoke_stream()` for token-by-token streaming. Each content
//! delta is sent through `chunk_tx` as it arrives; tool calls are accumulated
//! from stream chunks and returned whole in the final [`LlmResponse`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestToolMessage,
        ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionTools,
        CreateChatCompletionRequestArgs, FunctionObject, ToolChoiceOptions,
    },
    Client,
};

use crate::error::AgentError;
use crate::llm::{LlmClient, LlmResponse, LlmUsage, ToolChoiceMode};
use crate::message::{Message, ToolCall};
use crate::tool_source::{ToolSource, ToolSourceError, ToolSpec};

/// Chat Completions client implementing [`LlmClient`].
///
/// Uses `OPENAI_API_KEY` from the environment by default; or provide config
/// via [`ChatOpenAI::with_config`]. Set tools (e.g. from
/// `ToolSource::list_tools()`) to enable `tool_calls` in the response.
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    tools: Option<Vec<ToolSpec>>,
    temperature: Option<f32>,
    tool_choice: Option<ToolChoiceMode>,
}

impl ChatOpenAI {
    pub fn new(model: impl Into<String>) -> Self {
        Self { client: Client::new(), model: model.into(), tools: None, temperature: None, tool_choice: None }
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self { client: Client::with_config(config), model: model.into(), tools: None, temperature: None, tool_choice: None }
    }

    /// Fetches the tool source's current tool list and enables tool calling.
    pub async fn new_with_tool_source(
        config: OpenAIConfig,
        model: impl Into<String>,
        tool_source: &dyn ToolSource,
    ) -> Result<Self, ToolSourceError> {
        let tools = tool_source.list_tools().await?;
        Ok(Self::with_config(config, model).with_tools(tools))
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tool_choice(mut self, mode: ToolChoiceMode) -> Self {
        self.tool_choice = Some(mode);
        self
    }

    fn chat_completions_url() -> String {
        let base = std::env::var("OPENAI_BASE_URL")
            .or_else(|_| std::env::var("OPENAI_API_BASE"))
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let base = base.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn messages_to_request(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System { content } => {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(content.as_str()))
                }
                Message::User { content } => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(content.as_str()))
                }
                Message::Assistant { content, .. } => {
                    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage::from(content.as_str()))
                }
                Message::Tool { content, tool_call_id, .. } => {
                    ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                        content: content.as_str().into(),
                        tool_call_id: tool_call_id.clone(),
                    })
                }
            })
            .collect()
    }

    fn build_tools(&self, override_tools: Option<&[ToolSpec]>) -> Option<Vec<ChatCompletionTools>> {
        let tools = match override_tools {
            Some(t) => Some(t.to_vec()),
            None => self.tools.clone(),
        };
        tools.map(|tools| {
            tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect()
        })
    }

    fn apply_common_args(&self, args: &mut CreateChatCompletionRequestArgs, override_tools: Option<&[ToolSpec]>) {
        if let Some(tools) = self.build_tools(override_tools) {
            args.tools(tools);
        }
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        if let Some(mode) = self.tool_choice {
            let opt = match mode {
                ToolChoiceMode::Auto => ToolChoiceOptions::Auto,
                ToolChoiceMode::None => ToolChoiceOptions::None,
                ToolChoiceMode::Required => ToolChoiceOptions::Required,
            };
            args.tool_choice(ChatCompletionToolChoiceOption::Mode(opt));
        }
    }

    /// Shared body for `invoke`/`invoke_stream`/`invoke_with_tools`: builds
    /// the request (streaming or not), optionally overriding the client's own
    /// tool set, and collects the response.
    async fn complete(
        &self,
        messages: &[Message],
        override_tools: Option<&[ToolSpec]>,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmResponse, AgentError> {
        let openai_messages = Self::messages_to_request(messages);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(openai_messages);
        let streaming = chunk_tx.is_some();
        if streaming {
            args.stream(true);
        }
        self.apply_common_args(&mut args, override_tools);

        let request = args
            .build()
            .map_err(|e| AgentError::Internal(format!("OpenAI request build failed: {e}")))?;

        let url = Self::chat_completions_url();
        debug!(url = %url, model = %self.model, message_count = messages.len(), stream = streaming, "OpenAI chat create");
        trace!(request = ?request, "OpenAI request body");

        let Some(chunk_tx) = chunk_tx else {
            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| AgentError::Unavailable(format!("OpenAI API error: {e}")))?;

            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| AgentError::Internal("OpenAI returned no choices".to_string()))?;

            let msg = choice.message;
            let content = msg.content.unwrap_or_default();
            let tool_calls: Vec<ToolCall> = msg
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .filter_map(|tc| match tc {
                    ChatCompletionMessageToolCalls::Function(f) => {
                        let arguments = serde_json::from_str(&f.function.arguments).unwrap_or(serde_json::Value::Null);
                        Some(ToolCall { id: f.id, name: f.function.name, arguments })
                    }
                    _ => None,
                })
                .collect();

            let usage = response.usage.map(|u| LlmUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

            return Ok(LlmResponse { content, tool_calls, usage });
        };

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| AgentError::Unavailable(format!("OpenAI stream error: {e}")))?;

        let mut full_content = String::new();
        let mut tool_call_map: std::collections::HashMap<u32, (String, String, String)> = std::collections::HashMap::new();
        let mut stream_usage: Option<LlmUsage> = None;

        while let Some(result) = stream.next().await {
            let response = result.map_err(|e| AgentError::Unavailable(format!("OpenAI stream error: {e}")))?;

            if let Some(ref u) = response.usage {
                stream_usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }

            for choice in response.choices {
                let delta = &choice.delta;

                if let Some(ref content) = delta.content {
                    if !content.is_empty() {
                        full_content.push_str(content);
                        let _ = chunk_tx.send(content.clone()).await;
                    }
                }

                if let Some(ref tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        let entry = tool_call_map
                            .entry(tc.index)
                            .or_insert_with(|| (tc.id.clone().unwrap_or_default(), String::new(), String::new()));

                        if let Some(ref id) = tc.id {
                            if !id.is_empty() {
                                entry.0 = id.clone();
                            }
                        }
                        if let Some(ref func) = tc.function {
                            if let Some(ref name) = func.name {
                                entry.1.push_str(name);
                            }
                            if let Some(ref args) = func.arguments {
                                entry.2.push_str(args);
                            }
                        }
                    }
                }
            }
        }

        let mut tool_calls: Vec<ToolCall> = tool_call_map
            .into_iter()
            .map(|(_, (id, name, arguments))| ToolCall {
                id,
                name,
                arguments: serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null),
            })
            .collect();
        tool_calls.sort_by(|a, b| a.name.cmp(&b.name));

        trace!(content = %full_content, tool_calls = ?tool_calls, usage = ?stream_usage, "OpenAI stream response");

        Ok(LlmResponse { content: full_content, tool_calls, usage: stream_usage })
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        self.complete(messages, None, None).await
    }

    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmResponse, AgentError> {
        self.complete(messages, None, chunk_tx).await
    }

    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmResponse, AgentError> {
        self.complete(messages, Some(tools), chunk_tx).await
    }
}
