use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use dossier_core::conversation::Conversation;
use dossier_core::error::{Error, Result};
use dossier_core::store::ConversationStore;

/// One pretty-printed JSON document per conversation under a data directory.
///
/// The file name derives from the conversation's creation instant, so every
/// save of the same conversation lands on the same file. Writes go through a
/// temp file and rename, so a crash mid-write never truncates history.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Store(format!("cannot create data directory: {e}")))?;
        Ok(Self { dir })
    }

    fn file_path(&self, conversation: &Conversation) -> PathBuf {
        let stamp = conversation.created.format("%Y%m%dT%H%M%S%3f");
        self.dir.join(format!("conversation-{stamp}.json"))
    }

    pub async fn load(path: &Path) -> Result<Conversation> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Store(format!("cannot read {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Stored conversations, newest first, as (path, title) pairs.
    pub async fn list(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Store(format!("cannot list data directory: {e}")))?;
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Store(format!("cannot read data directory: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match Self::load(&path).await {
                    Ok(conversation) => found.push((path, conversation.title)),
                    Err(e) => debug!("skipping unreadable conversation file: {e}"),
                }
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.file_path(conversation);
        let body = serde_json::to_vec_pretty(conversation)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &body)
            .await
            .map_err(|e| Error::Store(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Store(format!("cannot finalize {}: {e}", path.display())))?;
        Ok(())
    }
}
