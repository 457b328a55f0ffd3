use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::conversation::Conversation;
use crate::error::Result;

/// Durable record consulted and updated every turn.
///
/// The orchestrator calls `save` after every conversation mutation and before
/// the next network call, so implementations should tolerate frequent small
/// writes.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, conversation: &Conversation) -> Result<()>;
}

/// Store double that records every persisted snapshot, so tests can assert
/// both write counts and what each write contained.
#[derive(Default)]
pub struct MemoryStore {
    saves: Mutex<Vec<Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save_count(&self) -> usize {
        self.saves.lock().await.len()
    }

    pub async fn last_saved(&self) -> Option<Conversation> {
        self.saves.lock().await.last().cloned()
    }

    /// Every snapshot in save order, for asserting intermediate states.
    pub async fn all_saved(&self) -> Vec<Conversation> {
        self.saves.lock().await.clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.saves.lock().await.push(conversation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationContent;

    #[tokio::test]
    async fn memory_store_records_snapshots() {
        let store = MemoryStore::new();
        let mut conversation = Conversation::new().with_title("t");
        store.save(&conversation).await.unwrap();

        conversation.push(ConversationContent::user("hi", "hi"));
        store.save(&conversation).await.unwrap();

        assert_eq!(store.save_count().await, 2);
        let last = store.last_saved().await.unwrap();
        assert_eq!(last.contents.len(), 1);
    }
}
