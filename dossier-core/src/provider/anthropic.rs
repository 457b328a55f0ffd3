use reqwest::{Method, Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::conversation::ConversationContent;
use crate::error::{Error, Result};
use crate::function::{FunctionCall, StreamChunk};
use crate::provider::{ProviderCodec, ProviderRequest, TurnRequest, declared_tools};
use crate::secret::Secret;
use crate::transport::Framing;

/// Configuration for the block-based provider
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key sent in the `x-api-key` header
    pub api_key: Secret,
    /// Base URL for the API
    pub base_url: String,
    /// Version header value
    pub api_version: String,
    /// Model identifier
    pub model: String,
    /// Generation cap per turn
    pub max_tokens: usize,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::from_env("ANTHROPIC_API_KEY"),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_version: "2023-06-01".to_string(),
            model: "claude-3-7-sonnet-20250219".to_string(),
            max_tokens: 2048,
        }
    }
}

/// Codec for the provider that streams messages as typed content blocks.
///
/// Tool arguments arrive as raw JSON fragments inside `input_json_delta`
/// events. Fragments are concatenated, never parsed individually; the
/// buffer is only guaranteed to be valid JSON once the block stops.
#[derive(Debug)]
pub struct AnthropicCodec {
    config: AnthropicConfig,
    accumulator: BlockAccumulator,
    stop_reason: Option<String>,
}

impl AnthropicCodec {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            accumulator: BlockAccumulator::default(),
            stop_reason: None,
        }
    }

    #[instrument(skip(self, turn), level = "debug")]
    fn request_payload(&self, turn: &TurnRequest<'_>) -> Result<MessagesRequest> {
        debug!(
            history = turn.history.len(),
            tools = turn.tools.len(),
            "building messages request"
        );
        let tools = declared_tools(turn)
            .into_iter()
            .map(|tool| WireTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect();

        Ok(MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            stream: true,
            system: (!turn.system_prompt.is_empty()).then(|| turn.system_prompt.to_string()),
            tools,
            messages: convert_history(turn.history)?,
        })
    }
}

impl ProviderCodec for AnthropicCodec {
    fn build_request(&self, turn: &TurnRequest<'_>) -> Result<ProviderRequest> {
        info!(model = %self.config.model, "creating block-based provider request");
        let url = Url::parse(&format!("{}/messages", self.config.base_url))?;
        let mut request = Request::new(Method::POST, url);

        let api_key = self
            .config
            .api_key
            .reveal()
            .parse()
            .map_err(|_| Error::Authentication("invalid API key format".into()))?;
        let headers = request.headers_mut();
        headers.insert("x-api-key", api_key);
        headers.insert(
            "anthropic-version",
            self.config
                .api_version
                .parse()
                .map_err(|_| Error::Other("invalid API version header".into()))?,
        );
        headers.insert(
            "content-type",
            "application/json"
                .parse()
                .map_err(|_| Error::Other("invalid content type header".into()))?,
        );

        let payload = self.request_payload(turn)?;
        *request.body_mut() = Some(serde_json::to_vec(&payload)?.into());

        Ok(ProviderRequest {
            http: request,
            framing: Framing::SseData,
        })
    }

    fn parse_frame(&mut self, frame: &str) -> StreamChunk {
        let event: StreamEvent = match serde_json::from_str(frame) {
            Ok(event) => event,
            Err(e) => return StreamChunk::frame_error(format!("unreadable stream event: {e}")),
        };

        match event {
            StreamEvent::ContentBlockStart { content_block, .. } => {
                if let BlockStart::ToolUse { id, name } = content_block {
                    debug!(%name, %id, "tool use block started");
                    self.accumulator.begin(name, id);
                }
                StreamChunk::default()
            }
            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                BlockDelta::TextDelta { text } => StreamChunk::text(text),
                BlockDelta::InputJsonDelta { partial_json } => {
                    self.accumulator.push(&partial_json);
                    StreamChunk::default()
                }
                BlockDelta::Other => StreamChunk::default(),
            },
            StreamEvent::ContentBlockStop => match self.accumulator.finish() {
                Some(call) => StreamChunk::function_call(call),
                None => StreamChunk::default(),
            },
            StreamEvent::MessageDelta { delta } => match delta.stop_reason {
                Some(reason) => {
                    debug!(%reason, "message finished");
                    let wants_tool = reason == "tool_use";
                    self.stop_reason = Some(reason);
                    StreamChunk::complete(wants_tool)
                }
                None => StreamChunk::default(),
            },
            StreamEvent::MessageStop => {
                StreamChunk::complete(self.stop_reason.as_deref() == Some("tool_use"))
            }
            StreamEvent::Error { error } => StreamChunk::terminal_error(error.message),
            StreamEvent::MessageStart | StreamEvent::Ping | StreamEvent::Unknown => {
                StreamChunk::default()
            }
        }
    }
}

/// Per-request buffer for one in-progress tool-use block.
///
/// Cleared whenever a call finalizes, successfully or not. A fresh codec,
/// and therefore a fresh accumulator, is built for every request.
#[derive(Debug, Default)]
struct BlockAccumulator {
    name: Option<String>,
    tool_id: Option<String>,
    buffer: String,
}

impl BlockAccumulator {
    fn begin(&mut self, name: String, tool_id: String) {
        self.name = Some(name);
        self.tool_id = Some(tool_id);
        self.buffer.clear();
    }

    fn push(&mut self, fragment: &str) {
        if self.name.is_some() {
            self.buffer.push_str(fragment);
        }
    }

    /// Parses the accumulated buffer into a call. A buffer that does not
    /// parse drops the call entirely; a partial call is never surfaced.
    /// The accumulator is empty afterward either way.
    fn finish(&mut self) -> Option<FunctionCall> {
        let name = self.name.take()?;
        let tool_id = self.tool_id.take();
        let raw = std::mem::take(&mut self.buffer);
        let raw = if raw.trim().is_empty() { "{}" } else { raw.as_str() };

        match serde_json::from_str::<Map<String, Value>>(raw) {
            Ok(arguments) => {
                let mut call = FunctionCall::new(name, arguments);
                call.tool_id = tool_id;
                Some(call)
            }
            Err(e) => {
                warn!(function = %name, "dropping tool call with unparseable arguments: {e}");
                None
            }
        }
    }
}

fn convert_history(history: &[ConversationContent]) -> Result<Vec<WireMessage>> {
    let mut messages = Vec::with_capacity(history.len());
    for entry in history {
        if entry.is_function_call_response {
            messages.push(WireMessage {
                role: "user".to_string(),
                content: vec![WireBlock::ToolResult {
                    tool_use_id: entry.tool_id.clone().unwrap_or_default(),
                    content: entry.prompt_content.clone(),
                }],
            });
        } else if entry.is_function_call {
            let Some(call) = entry.parsed_function_call()? else {
                warn!("skipping call entry without a stored function call");
                continue;
            };
            let mut content = Vec::new();
            if !entry.content.is_empty() {
                content.push(WireBlock::Text {
                    text: entry.content.clone(),
                });
            }
            content.push(WireBlock::ToolUse {
                id: call.tool_id.clone().unwrap_or_default(),
                name: call.name.clone(),
                input: call.arguments_value(),
            });
            messages.push(WireMessage {
                role: "assistant".to_string(),
                content,
            });
        } else {
            let (role, text) = match entry.role {
                crate::conversation::Role::User => ("user", entry.prompt_content.clone()),
                crate::conversation::Role::Assistant => ("assistant", entry.content.clone()),
            };
            messages.push(WireMessage {
                role: role.to_string(),
                content: vec![WireBlock::Text { text }],
            });
        }
    }
    Ok(messages)
}

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub max_tokens: usize,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: String,
    pub content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WireBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart,
    Ping,
    ContentBlockStart {
        content_block: BlockStart,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: MessageDeltaBody,
    },
    MessageStop,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    Text,
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}
