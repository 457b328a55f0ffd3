use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::conversation::{Conversation, ConversationContent};
use crate::dispatch::FunctionDispatcher;
use crate::error::Result;
use crate::function::FunctionCall;
use crate::provider::{Provider, TurnRequest};
use crate::store::ConversationStore;
use crate::tool::{self, ToolSpec};
use crate::transport::TurnChannel;

/// Session-level knobs.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub system_prompt: String,
    /// Gates both the delete declaration sent upstream and the delete
    /// operation at dispatch.
    pub destructive_allowed: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a careful assistant that manages the user's files. \
                            Use the available tools to inspect and change files; answer \
                            in plain language when no tool is needed."
                .to_string(),
            destructive_allowed: false,
        }
    }
}

/// What one streamed turn produced.
#[derive(Debug, Default)]
struct TurnOutcome {
    call: Option<FunctionCall>,
    should_continue: bool,
    errored: bool,
}

/// Drives the model → tool-call → tool-result → model loop for one chat
/// session.
///
/// A binary admission gate permits at most one submit-loop at a time;
/// concurrent submissions are rejected, never queued. The conversation is
/// mutated only while the gate is held, and every mutation is persisted
/// before the next network call begins. External readers take a cloned
/// snapshot via [`ChatSession::snapshot`].
pub struct ChatSession {
    provider: Provider,
    channel: Arc<dyn TurnChannel>,
    dispatcher: FunctionDispatcher,
    store: Arc<dyn ConversationStore>,
    conversation: Mutex<Conversation>,
    tools: Vec<ToolSpec>,
    config: ChatConfig,
    in_flight: AtomicBool,
    active_cancel: StdMutex<Option<CancellationToken>>,
}

/// Releases the admission gate on every exit path.
struct GateGuard<'a>(&'a AtomicBool);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChatSession {
    pub fn new(
        provider: Provider,
        channel: Arc<dyn TurnChannel>,
        dispatcher: FunctionDispatcher,
        store: Arc<dyn ConversationStore>,
        conversation: Conversation,
        config: ChatConfig,
    ) -> Self {
        Self {
            provider,
            channel,
            dispatcher,
            store,
            conversation: Mutex::new(conversation),
            tools: tool::catalog(),
            config,
            in_flight: AtomicBool::new(false),
            active_cancel: StdMutex::new(None),
        }
    }

    /// Submits one user message and runs model turns until the model stops
    /// asking for tools.
    ///
    /// Returns `Ok(false)` without doing anything when the text is blank or
    /// another submission is already in flight.
    pub async fn submit(&self, user_text: &str) -> Result<bool> {
        let trimmed = user_text.trim();
        if trimmed.is_empty() {
            debug!("ignoring blank submission");
            return Ok(false);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("submission rejected; a turn is already in flight");
            return Ok(false);
        }
        let _gate = GateGuard(&self.in_flight);

        let cancel = CancellationToken::new();
        if let Ok(mut active) = self.active_cancel.lock() {
            *active = Some(cancel.clone());
        }

        let result = self.run_submission(trimmed, &cancel).await;

        if let Ok(mut active) = self.active_cancel.lock() {
            active.take();
        }
        result.map(|()| true)
    }

    /// Cancels the active submission, if any, and releases the admission
    /// gate unconditionally. Safe to call repeatedly, from any task.
    pub fn stop(&self) {
        if let Ok(mut active) = self.active_cancel.lock() {
            if let Some(token) = active.take() {
                info!("stopping active submission");
                token.cancel();
            }
        }
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Read-only snapshot for display; the live conversation is only ever
    /// mutated by the submit loop.
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    async fn run_submission(&self, user_text: &str, cancel: &CancellationToken) -> Result<()> {
        {
            let mut conversation = self.conversation.lock().await;
            conversation.ensure_title(user_text);
            conversation.push(ConversationContent::user(user_text, user_text));
            self.persist(&mut conversation).await?;
        }

        loop {
            let outcome = self.run_turn(cancel).await?;
            if cancel.is_cancelled() {
                info!("submission cancelled");
                break;
            }
            if outcome.errored {
                break;
            }
            let Some(call) = outcome.call else {
                if outcome.should_continue {
                    debug!("provider signaled continue without a call");
                    continue;
                }
                break;
            };

            let response = self.dispatcher.dispatch(&call, cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            {
                let mut conversation = self.conversation.lock().await;
                conversation.push(ConversationContent::function_response(&response)?);
                self.persist(&mut conversation).await?;
            }
        }
        Ok(())
    }

    /// Streams one model turn, mutating and persisting the in-progress
    /// assistant entry as chunks arrive.
    async fn run_turn(&self, cancel: &CancellationToken) -> Result<TurnOutcome> {
        // One codec per turn: the accumulator starts empty and cannot leak
        // state from a previous request.
        let codec = self.provider.codec();
        let request = {
            let conversation = self.conversation.lock().await;
            codec.build_request(&TurnRequest {
                system_prompt: &self.config.system_prompt,
                history: &conversation.contents,
                tools: &self.tools,
                destructive_allowed: self.config.destructive_allowed,
            })?
        };

        let mut rx = self.channel.open(request, codec, cancel.clone()).await?;

        let mut placeholder: Option<usize> = None;
        let mut call: Option<FunctionCall> = None;
        let mut should_continue = false;
        let mut errored = false;

        while let Some(chunk) = rx.recv().await {
            if let Some(message) = &chunk.error {
                if !chunk.is_complete {
                    warn!("dropping malformed frame: {message}");
                    continue;
                }
                error!("turn failed: {message}");
                let mut conversation = self.conversation.lock().await;
                let marker = format!("Error: {message}");
                match placeholder {
                    Some(index) => conversation.contents[index].content = marker,
                    None => {
                        let mut entry = ConversationContent::assistant_placeholder();
                        entry.content = marker;
                        conversation.push(entry);
                    }
                }
                self.persist(&mut conversation).await?;
                errored = true;
                break;
            }

            if let Some(delta) = chunk.text.as_deref().filter(|t| !t.is_empty()) {
                let mut conversation = self.conversation.lock().await;
                let index = match placeholder {
                    Some(index) => index,
                    None => {
                        conversation.push(ConversationContent::assistant_placeholder());
                        let index = conversation.contents.len() - 1;
                        placeholder = Some(index);
                        index
                    }
                };
                conversation.contents[index].append_text(delta);
                // Persist eagerly: committed assistant text survives a crash.
                self.persist(&mut conversation).await?;
            }

            if let Some(new_call) = chunk.function_call {
                if call.is_none() {
                    call = Some(new_call);
                } else {
                    debug!(function = %new_call.name, "ignoring additional call in the same turn");
                }
            }

            if chunk.is_complete {
                should_continue = chunk.should_continue;
                break;
            }
        }

        if errored {
            // An error turn is never treated as a function call.
            return Ok(TurnOutcome {
                call: None,
                should_continue: false,
                errored: true,
            });
        }

        if cancel.is_cancelled() {
            // Committed text stays; an unfinished call was never sent
            // anywhere, so it is dropped along with an empty placeholder.
            let mut conversation = self.conversation.lock().await;
            if let Some(index) = placeholder {
                if conversation.contents[index].content.is_empty() {
                    conversation.contents.remove(index);
                    self.persist(&mut conversation).await?;
                }
            }
            return Ok(TurnOutcome::default());
        }

        let mut conversation = self.conversation.lock().await;
        match (&mut call, placeholder) {
            (Some(pending), index) => {
                // Correlation must survive providers that do not send ids.
                pending
                    .tool_id
                    .get_or_insert_with(|| Uuid::new_v4().to_string());
                let index = match index {
                    Some(index) => index,
                    None => {
                        conversation.push(ConversationContent::assistant_placeholder());
                        conversation.contents.len() - 1
                    }
                };
                conversation.contents[index].mark_function_call(pending)?;
                self.persist(&mut conversation).await?;
            }
            (None, Some(index)) => {
                if conversation.contents[index].content.is_empty() {
                    debug!("discarding empty assistant placeholder");
                    conversation.contents.remove(index);
                    self.persist(&mut conversation).await?;
                }
            }
            (None, None) => {}
        }
        drop(conversation);

        Ok(TurnOutcome {
            call,
            should_continue,
            errored: false,
        })
    }

    async fn persist(&self, conversation: &mut Conversation) -> Result<()> {
        conversation.touch();
        self.store.save(conversation).await
    }
}
