use std::collections::HashMap;

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

/// Configuration for the object-merge provider
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header
    pub api_key: Secret,
    /// Base URL for the API
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Generation cap per turn
    pub max_tokens: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::from_env("GEMINI_API_KEY"),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 2048,
        }
    }
}

/// Codec for the provider that streams whole JSON objects per increment.
///
/// Tool arguments arrive as complete objects per delta; successive partial
/// maps shallow-merge, later keys winning, instead of concatenating text.
/// The merged call finalizes when a frame names a finish reason.
#[derive(Debug)]
pub struct GeminiCodec {
    config: GeminiConfig,
    accumulator: MergeAccumulator,
}

impl GeminiCodec {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            accumulator: MergeAccumulator::default(),
        }
    }

    #[instrument(skip(self, turn), level = "debug")]
    fn request_payload(&self, turn: &TurnRequest<'_>) -> Result<GenerateRequest> {
        debug!(
            history = turn.history.len(),
            tools = turn.tools.len(),
            "building generate content request"
        );
        let declarations: Vec<WireDeclaration> = declared_tools(turn)
            .into_iter()
            .map(|tool| WireDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            })
            .collect();

        Ok(GenerateRequest {
            system_instruction: (!turn.system_prompt.is_empty()).then(|| WireContent {
                role: None,
                parts: vec![WirePart::text(turn.system_prompt)],
            }),
            contents: convert_history(turn.history)?,
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![WireToolGroup {
                    function_declarations: declarations,
                }]
            },
            generation_config: WireGenerationConfig {
                max_output_tokens: self.config.max_tokens,
            },
        })
    }
}

impl ProviderCodec for GeminiCodec {
    fn build_request(&self, turn: &TurnRequest<'_>) -> Result<ProviderRequest> {
        info!(model = %self.config.model, "creating object-merge provider request");
        let url = Url::parse(&format!(
            "{}/models/{}:streamGenerateContent",
            self.config.base_url, self.config.model
        ))?;
        let mut request = Request::new(Method::POST, url);

        let api_key = self
            .config
            .api_key
            .reveal()
            .parse()
            .map_err(|_| Error::Authentication("invalid API key format".into()))?;
        let headers = request.headers_mut();
        headers.insert("x-goog-api-key", api_key);
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
            framing: Framing::JsonObjects,
        })
    }

    fn parse_frame(&mut self, frame: &str) -> StreamChunk {
        let parsed: StreamFrame = match serde_json::from_str(frame) {
            Ok(parsed) => parsed,
            Err(e) => return StreamChunk::frame_error(format!("unreadable stream object: {e}")),
        };

        if let Some(error) = parsed.error {
            return StreamChunk::terminal_error(error.message);
        }

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return StreamChunk::default();
        };

        let mut text = String::new();
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(fragment) = part.text {
                    text.push_str(&fragment);
                }
                if let Some(call) = part.function_call {
                    self.accumulator.merge(call.name, call.args);
                }
            }
        }

        let mut chunk = StreamChunk::default();
        chunk.text = (!text.is_empty()).then_some(text);

        if let Some(reason) = candidate.finish_reason {
            debug!(%reason, "generation finished");
            chunk.function_call = self.accumulator.finalize();
            chunk.is_complete = true;
            // No dedicated tool stop reason on this wire; an accumulated
            // call is the continue signal.
            chunk.should_continue = chunk.function_call.is_some();
        }
        chunk
    }
}

/// Per-request merge buffer for the in-progress call.
#[derive(Debug, Default)]
struct MergeAccumulator {
    name: Option<String>,
    args: Map<String, Value>,
}

impl MergeAccumulator {
    /// Shallow-merges one partial argument object; later keys win. A delta
    /// naming a different function starts over.
    fn merge(&mut self, name: String, args: Map<String, Value>) {
        if self.name.as_deref().is_some_and(|current| current != name) {
            warn!(
                previous = self.name.as_deref().unwrap_or_default(),
                next = %name,
                "new function call replaces unfinished one"
            );
            self.args.clear();
        }
        self.name = Some(name);
        for (key, value) in args {
            self.args.insert(key, value);
        }
    }

    fn finalize(&mut self) -> Option<FunctionCall> {
        let name = self.name.take()?;
        let args = std::mem::take(&mut self.args);
        Some(FunctionCall::new(name, args))
    }
}

fn convert_history(history: &[ConversationContent]) -> Result<Vec<WireContent>> {
    // Response parts need the originating function's name, which lives on
    // the correlated call entry.
    let mut call_names: HashMap<String, String> = HashMap::new();
    let mut contents = Vec::with_capacity(history.len());

    for entry in history {
        if entry.is_function_call {
            let Some(call) = entry.parsed_function_call()? else {
                warn!("skipping call entry without a stored function call");
                continue;
            };
            if let Some(tool_id) = &call.tool_id {
                call_names.insert(tool_id.clone(), call.name.clone());
            }
            let mut parts = Vec::new();
            if !entry.content.is_empty() {
                parts.push(WirePart::text(&entry.content));
            }
            parts.push(WirePart {
                text: None,
                function_call: Some(WireFunctionCall {
                    name: call.name.clone(),
                    args: call.arguments_value(),
                }),
                function_response: None,
            });
            contents.push(WireContent {
                role: Some("model".to_string()),
                parts,
            });
        } else if entry.is_function_call_response {
            let name = entry
                .tool_id
                .as_ref()
                .and_then(|id| call_names.get(id).cloned())
                .unwrap_or_default();
            let response = match serde_json::from_str::<Value>(&entry.prompt_content) {
                Ok(value @ Value::Object(_)) => value,
                Ok(other) => serde_json::json!({ "result": other }),
                Err(_) => serde_json::json!({ "result": entry.prompt_content }),
            };
            contents.push(WireContent {
                role: Some("user".to_string()),
                parts: vec![WirePart {
                    text: None,
                    function_call: None,
                    function_response: Some(WireFunctionResponse { name, response }),
                }],
            });
        } else {
            let (role, text) = match entry.role {
                Role::User => ("user", entry.prompt_content.as_str()),
                Role::Assistant => ("model", entry.content.as_str()),
            };
            contents.push(WireContent {
                role: Some(role.to_string()),
                parts: vec![WirePart::text(text)],
            });
        }
    }
    Ok(contents)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<WireContent>,
    pub contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireToolGroup>,
    pub generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<WireFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<WireFunctionResponse>,
}

impl WirePart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
            function_response: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WireFunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireToolGroup {
    pub function_declarations: Vec<WireDeclaration>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireGenerationConfig {
    pub max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    candidates: Vec<StreamCandidate>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamCandidate {
    #[serde(default)]
    content: Option<StreamContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamContent {
    #[serde(default)]
    parts: Vec<StreamPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<StreamFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}
