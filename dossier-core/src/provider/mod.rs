use crate::conversation::ConversationContent;
use crate::error::Result;
use crate::function::StreamChunk;
use crate::tool::{DELETE_FILES, ToolSpec};
use crate::transport::Framing;

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::{AnthropicCodec, AnthropicConfig};
pub use gemini::{GeminiCodec, GeminiConfig};
pub use openai::{OpenAiCodec, OpenAiConfig};

/// Everything a codec needs to prepare one model turn.
///
/// `history` is the full entry sequence, latest user turn included; builders
/// send `prompt_content` upstream for user entries and `content` for
/// assistant entries.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [ConversationContent],
    pub tools: &'a [ToolSpec],
    pub destructive_allowed: bool,
}

/// A prepared provider call: the HTTP request plus the framing the transport
/// must apply to its response bytes.
#[derive(Debug)]
pub struct ProviderRequest {
    pub http: reqwest::Request,
    pub framing: Framing,
}

/// One vendor's request builder and incremental stream parser.
///
/// A codec instance is request-scoped: it holds the in-progress tool-call
/// accumulator for exactly one in-flight turn and is never shared across
/// requests. The orchestrator constructs a fresh instance per turn.
pub trait ProviderCodec: Send {
    /// Builds the outgoing payload from the turn's history and tools.
    fn build_request(&self, turn: &TurnRequest<'_>) -> Result<ProviderRequest>;

    /// Parses one raw frame into a normalized chunk, updating accumulator
    /// state. Malformed frames yield an error chunk with `is_complete`
    /// false; parsing never fails the stream.
    fn parse_frame(&mut self, frame: &str) -> StreamChunk;
}

/// The interchangeable backends a session can run against.
#[derive(Debug, Clone)]
pub enum Provider {
    Anthropic(AnthropicConfig),
    Gemini(GeminiConfig),
    OpenAi(OpenAiConfig),
}

impl Provider {
    /// Constructs a fresh codec, and with it a fresh, empty accumulator,
    /// for one turn.
    pub fn codec(&self) -> Box<dyn ProviderCodec + Send> {
        match self {
            Provider::Anthropic(config) => Box::new(AnthropicCodec::new(config.clone())),
            Provider::Gemini(config) => Box::new(GeminiCodec::new(config.clone())),
            Provider::OpenAi(config) => Box::new(OpenAiCodec::new(config.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Anthropic(_) => "anthropic",
            Provider::Gemini(_) => "gemini",
            Provider::OpenAi(_) => "openai",
        }
    }
}

/// Tool declarations for one turn, with destructive operations withheld
/// unless the session allows them.
pub(crate) fn declared_tools<'a>(turn: &TurnRequest<'a>) -> Vec<&'a ToolSpec> {
    turn.tools
        .iter()
        .filter(|tool| turn.destructive_allowed || tool.name != DELETE_FILES)
        .collect()
}
