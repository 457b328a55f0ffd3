use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A completed tool invocation reported by a provider stream.
///
/// A `FunctionCall` is only constructed once a per-request accumulator has a
/// full argument payload; it is immutable afterward. The engine serializes it
/// onto the assistant entry that produced it and hands it to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function the model wants to run
    pub name: String,
    /// Parsed argument mapping
    pub arguments: Map<String, Value>,
    /// Correlation id linking the call to its eventual response
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_id: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            tool_id: None,
        }
    }

    #[must_use]
    pub fn with_tool_id(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Arguments as a JSON object value, the shape dispatch deserializes from.
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Result of dispatching one [`FunctionCall`], fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Name of the function that produced this result
    pub name: String,
    /// Arbitrary result payload
    pub payload: Value,
    /// Correlation id copied from the originating call
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_id: Option<String>,
}

impl FunctionResponse {
    pub fn new(name: impl Into<String>, payload: Value, tool_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            payload,
            tool_id,
        }
    }

    /// An error-shaped response. The loop always has something to feed back
    /// to the model, so dispatch failures take this form instead of raising.
    pub fn error(name: impl Into<String>, tool_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: json!({ "error": message.into() }),
            tool_id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }
}

/// One normalized unit of provider stream output.
///
/// Every vendor frame is reduced to this shape. Chunks are ephemeral: they
/// drive the orchestrator and are never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Incremental assistant text, if the frame carried any
    pub text: Option<String>,
    /// True exactly once per request, on the terminal chunk
    pub is_complete: bool,
    /// A finalized tool invocation, if one completed on this frame
    pub function_call: Option<FunctionCall>,
    /// True when the provider indicated the model wants a tool run next
    pub should_continue: bool,
    /// Parse or transport failure text
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn complete(should_continue: bool) -> Self {
        Self {
            is_complete: true,
            should_continue,
            ..Self::default()
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Self::default()
        }
    }

    /// A recoverable frame-level failure; reading continues.
    pub fn frame_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// A terminal transport-level failure; ends the turn.
    pub fn terminal_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            is_complete: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && !self.is_complete
            && self.function_call.is_none()
            && self.error.is_none()
    }
}
