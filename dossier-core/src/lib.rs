// This is the main library file that re-exports the public API
// and defines the module structure.

pub mod chat;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod function;
pub mod provider;
pub mod secret;
pub mod store;
pub mod tool;
pub mod transport;

// Re-export the main types for convenient usage
pub use chat::{ChatConfig, ChatSession};
pub use conversation::{Conversation, ConversationContent, Role};
pub use dispatch::FunctionDispatcher;
pub use error::{Error, Result};
pub use files::{FileAccess, FileSummary, MemoryFiles, SearchHit};
pub use function::{FunctionCall, FunctionResponse, StreamChunk};
pub use provider::{
    AnthropicConfig, GeminiConfig, OpenAiConfig, Provider, ProviderCodec, ProviderRequest,
    TurnRequest,
};
pub use secret::Secret;
pub use store::{ConversationStore, MemoryStore};
pub use tool::ToolSpec;
pub use transport::{ChunkReceiver, Framing, HttpChannel, ScriptedChannel, TurnChannel};
