use std::collections::BTreeMap;

use reqwest::{Method, Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::conversation::{ConversationContent, Role};
use crate::error::{Error, Result};
use crate::function::{FunctionCall, StreamChunk};
use crate::provider::{ProviderCodec, ProviderRequest, TurnRequest, declared_tools};
use crate::secret::Secret;
use crate::transport::Framing;

/// Configuration for the indexed multi-call provider
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token
    pub api_key: Secret,
    /// Base URL for the API
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Generation cap per turn
    pub max_tokens: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::from_env("OPENAI_API_KEY"),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 2048,
        }
    }
}

/// Codec for the provider that streams deltas for several tool calls at
/// once, keyed by index.
///
/// One accumulator exists per index. At finalize only the lowest-index
/// complete call is surfaced as the turn's call; a model issuing several
/// calls at once gets one executed and can re-request the rest next turn.
#[derive(Debug)]
pub struct OpenAiCodec {
    config: OpenAiConfig,
    accumulator: IndexedAccumulator,
}

impl OpenAiCodec {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            accumulator: IndexedAccumulator::default(),
        }
    }

    #[instrument(skip(self, turn), level = "debug")]
    fn request_payload(&self, turn: &TurnRequest<'_>) -> Result<ChatRequest> {
        debug!(
            history = turn.history.len(),
            tools = turn.tools.len(),
            "building chat completions request"
        );
        let mut messages = Vec::with_capacity(turn.history.len() + 1);
        if !turn.system_prompt.is_empty() {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(turn.system_prompt.to_string()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        for entry in turn.history {
            messages.push(convert_entry(entry)?);
        }

        let tools = declared_tools(turn)
            .into_iter()
            .map(|tool| WireTool {
                kind: "function".to_string(),
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect();

        Ok(ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            stream: true,
            tools,
        })
    }
}

impl ProviderCodec for OpenAiCodec {
    fn build_request(&self, turn: &TurnRequest<'_>) -> Result<ProviderRequest> {
        info!(model = %self.config.model, "creating indexed provider request");
        let url = Url::parse(&format!("{}/chat/completions", self.config.base_url))?;
        let mut request = Request::new(Method::POST, url);

        let auth = format!("Bearer {}", self.config.api_key.reveal())
            .parse()
            .map_err(|_| Error::Authentication("invalid API key format".into()))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", auth);
        headers.insert(
            "Content-Type",
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
        if frame == "[DONE]" {
            // Reached only when no finish_reason was streamed; the reader
            // stops at the first terminal chunk otherwise.
            return StreamChunk::complete(false);
        }

        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(frame) {
            if let Some(error) = envelope.error {
                return StreamChunk::terminal_error(error.message);
            }
        }

        let parsed: ChatChunk = match serde_json::from_str(frame) {
            Ok(parsed) => parsed,
            Err(e) => return StreamChunk::frame_error(format!("unreadable stream chunk: {e}")),
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return StreamChunk::default();
        };

        for delta in choice.delta.tool_calls {
            self.accumulator.absorb(delta);
        }

        let mut chunk = StreamChunk::default();
        chunk.text = choice.delta.content.filter(|text| !text.is_empty());

        if let Some(reason) = choice.finish_reason {
            debug!(%reason, "completion finished");
            chunk.function_call = self.accumulator.finalize();
            chunk.is_complete = true;
            chunk.should_continue = reason == "tool_calls";
        }
        chunk
    }
}

/// Per-request accumulators, one per reported tool-call index.
#[derive(Debug, Default)]
struct IndexedAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    buffer: String,
}

impl IndexedAccumulator {
    fn absorb(&mut self, delta: ToolCallDelta) {
        let partial = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            partial.id.get_or_insert(id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                partial.name.get_or_insert(name);
            }
            if let Some(fragment) = function.arguments {
                partial.buffer.push_str(&fragment);
            }
        }
    }

    /// Surfaces the lowest-index complete call and clears every index.
    fn finalize(&mut self) -> Option<FunctionCall> {
        let calls = std::mem::take(&mut self.calls);
        let total = calls.len();
        for (index, partial) in calls {
            let Some(name) = partial.name else {
                debug!(index, "discarding unnamed tool call");
                continue;
            };
            let raw = if partial.buffer.trim().is_empty() {
                "{}"
            } else {
                partial.buffer.as_str()
            };
            match serde_json::from_str::<Map<String, Value>>(raw) {
                Ok(arguments) => {
                    if total > 1 {
                        warn!(
                            index,
                            total, "multiple concurrent tool calls; surfacing only the lowest index"
                        );
                    }
                    let mut call = FunctionCall::new(name, arguments);
                    call.tool_id = partial.id;
                    return Some(call);
                }
                Err(e) => {
                    warn!(index, function = %name, "dropping tool call with unparseable arguments: {e}");
                }
            }
        }
        None
    }
}

fn convert_entry(entry: &ConversationContent) -> Result<WireMessage> {
    if entry.is_function_call_response {
        return Ok(WireMessage {
            role: "tool".to_string(),
            content: Some(entry.prompt_content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: entry.tool_id.clone(),
        });
    }
    if entry.is_function_call {
        let call = entry.parsed_function_call()?.ok_or_else(|| {
            Error::Other("call entry without a stored function call".to_string())
        })?;
        return Ok(WireMessage {
            role: "assistant".to_string(),
            content: (!entry.content.is_empty()).then(|| entry.content.clone()),
            tool_calls: vec![WireToolCall {
                id: call.tool_id.clone().unwrap_or_default(),
                kind: "function".to_string(),
                function: WireCallBody {
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&call.arguments_value())?,
                },
            }],
            tool_call_id: None,
        });
    }
    let (role, content) = match entry.role {
        Role::User => ("user", entry.prompt_content.clone()),
        Role::Assistant => ("assistant", entry.content.clone()),
    };
    Ok(WireMessage {
        role: role.to_string(),
        content: Some(content),
        tool_calls: Vec::new(),
        tool_call_id: None,
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: usize,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunction,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireCallBody,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireCallBody {
    pub name: String,
    /// Arguments travel as a JSON string on this provider's wire
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool;
    use serde_json::json;

    fn codec() -> OpenAiCodec {
        OpenAiCodec::new(OpenAiConfig {
            api_key: Secret::new("test-key"),
            ..OpenAiConfig::default()
        })
    }

    fn call_delta(index: usize, id: Option<&str>, name: Option<&str>, fragment: &str) -> String {
        let mut function = serde_json::Map::new();
        if let Some(name) = name {
            function.insert("name".into(), json!(name));
        }
        function.insert("arguments".into(), json!(fragment));
        let mut call = serde_json::Map::new();
        call.insert("index".into(), json!(index));
        if let Some(id) = id {
            call.insert("id".into(), json!(id));
        }
        call.insert("function".into(), Value::Object(function));
        json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"tool_calls": [call]}, "finish_reason": null}]
        })
        .to_string()
    }

    #[test]
    fn fragments_concatenate_into_one_call() {
        let mut codec = codec();
        codec.parse_frame(&call_delta(0, Some("call_1"), Some("search-files"), ""));
        codec.parse_frame(&call_delta(0, None, None, r#"{"search_te"#));
        codec.parse_frame(&call_delta(0, None, None, r#"rms":["beta"]}"#));

        let chunk = codec.parse_frame(
            r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        );
        assert!(chunk.is_complete);
        assert!(chunk.should_continue);
        let call = chunk.function_call.expect("finalized call");
        assert_eq!(call.name, "search-files");
        assert_eq!(call.tool_id.as_deref(), Some("call_1"));
        assert_eq!(call.arguments["search_terms"], json!(["beta"]));
        assert!(codec.accumulator.calls.is_empty());
    }

    #[test]
    fn lowest_index_call_wins() {
        let mut codec = codec();
        codec.parse_frame(&call_delta(1, Some("call_b"), Some("read-files"), r#"{"file_paths":["b"]}"#));
        codec.parse_frame(&call_delta(0, Some("call_a"), Some("list-files"), "{}"));

        let chunk = codec.parse_frame(
            r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        );
        let call = chunk.function_call.unwrap();
        assert_eq!(call.name, "list-files");
        assert_eq!(call.tool_id.as_deref(), Some("call_a"));
    }

    #[test]
    fn unparseable_winner_falls_through_to_next_index() {
        let mut codec = codec();
        codec.parse_frame(&call_delta(0, Some("call_a"), Some("read-files"), "not json"));
        codec.parse_frame(&call_delta(1, Some("call_b"), Some("list-files"), "{}"));

        let chunk = codec.parse_frame(
            r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        );
        let call = chunk.function_call.unwrap();
        assert_eq!(call.name, "list-files");
    }

    #[test]
    fn text_deltas_and_stop_finish_reason() {
        let mut codec = codec();
        let chunk = codec.parse_frame(
            r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        );
        assert_eq!(chunk.text.as_deref(), Some("Hi"));
        assert!(!chunk.is_complete);

        let chunk = codec.parse_frame(
            r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        );
        assert!(chunk.is_complete);
        assert!(!chunk.should_continue);
        assert!(chunk.function_call.is_none());
    }

    #[test]
    fn done_marker_and_error_frames() {
        let mut codec = codec();
        let chunk = codec.parse_frame("[DONE]");
        assert!(chunk.is_complete);
        assert!(!chunk.should_continue);

        let chunk = codec.parse_frame(r#"{"error":{"message":"rate limited","type":"rate_limit"}}"#);
        assert!(chunk.is_complete);
        assert_eq!(chunk.error.as_deref(), Some("rate limited"));

        let chunk = codec.parse_frame("{broken");
        assert!(chunk.error.is_some());
        assert!(!chunk.is_complete);
    }

    #[test]
    fn request_uses_bearer_auth_and_function_tools() {
        let codec = codec();
        let tools = tool::catalog();
        let history = vec![ConversationContent::user("hello", "hello")];
        let turn = TurnRequest {
            system_prompt: "You manage files.",
            history: &history,
            tools: &tools,
            destructive_allowed: true,
        };

        let request = codec.build_request(&turn).unwrap();
        assert_eq!(request.framing, Framing::SseData);
        let http = request.http;
        assert!(http.url().path().ends_with("/chat/completions"));
        assert_eq!(http.headers()["Authorization"], "Bearer test-key");

        let body: Value =
            serde_json::from_slice(http.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["tools"][0]["type"], "function");
        assert!(body["tools"][0]["function"].get("parameters").is_some());
        let names: Vec<_> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&tool::DELETE_FILES.to_string()));
    }

    #[test]
    fn tool_history_round_trips_as_tool_role_messages() {
        let mut args = Map::new();
        args.insert("file_path".to_string(), json!("a.txt"));
        let call = FunctionCall::new("write-file", args).with_tool_id("call_7");

        let mut call_entry = ConversationContent::assistant_placeholder();
        call_entry.mark_function_call(&call).unwrap();
        let response = crate::function::FunctionResponse::new(
            "write-file",
            json!({"status": "written"}),
            Some("call_7".into()),
        );
        let response_entry = ConversationContent::function_response(&response).unwrap();

        let assistant = convert_entry(&call_entry).unwrap();
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.tool_calls[0].id, "call_7");
        assert_eq!(assistant.tool_calls[0].function.name, "write-file");
        let parsed: Value =
            serde_json::from_str(&assistant.tool_calls[0].function.arguments).unwrap();
        assert_eq!(parsed["file_path"], "a.txt");

        let tool_msg = convert_entry(&response_entry).unwrap();
        assert_eq!(tool_msg.role, "tool");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_7"));
    }
}
