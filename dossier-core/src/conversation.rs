use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::function::{FunctionCall, FunctionResponse};

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry in a conversation.
///
/// Exactly one semantic mode is active per entry: plain text, function call,
/// or function-call response. The serialized form is the persisted record
/// shape, so field names stay camelCase on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContent {
    pub role: Role,
    /// Display text shown to the user
    pub content: String,
    /// Text actually sent upstream for user turns; may differ from `content`
    pub prompt_content: String,
    /// Serialized [`FunctionCall`] for assistant tool-use entries
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function_call: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_function_call: bool,
    #[serde(default)]
    pub is_function_call_response: bool,
    /// Correlation id linking a call entry to its response entry
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_id: Option<String>,
}

impl ConversationContent {
    /// A plain user turn. `prompt` is what goes upstream; `display` is what
    /// the user sees, and the two frequently match.
    pub fn user(display: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: display.into(),
            prompt_content: prompt.into(),
            function_call: None,
            timestamp: Utc::now(),
            is_function_call: false,
            is_function_call_response: false,
            tool_id: None,
        }
    }

    /// The in-progress assistant entry created once per turn and mutated as
    /// text accrues.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            prompt_content: String::new(),
            function_call: None,
            timestamp: Utc::now(),
            is_function_call: false,
            is_function_call_response: false,
            tool_id: None,
        }
    }

    /// A user-role entry carrying a dispatched function's result back to the
    /// model, correlated with the originating call.
    pub fn function_response(response: &FunctionResponse) -> Result<Self> {
        let serialized = serde_json::to_string(&response.payload)?;
        Ok(Self {
            role: Role::User,
            content: serialized.clone(),
            prompt_content: serialized,
            function_call: None,
            timestamp: Utc::now(),
            is_function_call: false,
            is_function_call_response: true,
            tool_id: response.tool_id.clone(),
        })
    }

    pub fn append_text(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// Marks this entry as the assistant turn that produced `call`.
    pub fn mark_function_call(&mut self, call: &FunctionCall) -> Result<()> {
        self.function_call = Some(serde_json::to_string(call)?);
        self.is_function_call = true;
        self.tool_id = call.tool_id.clone();
        Ok(())
    }

    /// Deserializes the stored call, if this entry carries one.
    pub fn parsed_function_call(&self) -> Result<Option<FunctionCall>> {
        match &self.function_call {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    pub fn is_plain_text(&self) -> bool {
        !self.is_function_call && !self.is_function_call_response
    }
}

/// A durable chat session: title, timestamps, and the ordered entry sequence.
///
/// Order is chronological turn order. During a submission the sequence only
/// grows; the single exception is discarding a transient empty assistant
/// placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub contents: Vec<ConversationContent>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            title: String::new(),
            created: now,
            updated: now,
            contents: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Derives a title from the first user line when none was set.
    pub fn ensure_title(&mut self, seed: &str) {
        if !self.title.is_empty() {
            return;
        }
        let first_line = seed.lines().next().unwrap_or("").trim();
        const MAX: usize = 48;
        self.title = match first_line.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}…", &first_line[..idx]),
            None => first_line.to_string(),
        };
    }

    pub fn push(&mut self, content: ConversationContent) {
        self.contents.push(content);
    }

    /// Refreshes the updated timestamp; called before every persist.
    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
