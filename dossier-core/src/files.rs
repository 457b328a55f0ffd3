use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Descriptor returned by a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub modified: Option<DateTime<Utc>>,
}

/// One matching line from a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub snippet: String,
}

/// The sandboxed file collaborator.
///
/// The dispatcher is the only caller; each method maps one-to-one onto a
/// model-visible operation. Implementations decide what "the workspace" is:
/// a confined directory in the runtime, a map in tests.
#[async_trait]
pub trait FileAccess: Send + Sync {
    async fn list_files(&self) -> Result<Vec<FileSummary>>;
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn search_files(&self, term: &str) -> Result<Vec<SearchHit>>;
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn delete_file(&self, path: &str) -> Result<()>;
    async fn move_file(&self, source: &str, destination: &str) -> Result<()>;
}

/// In-memory workspace used by the test suites.
#[derive(Default)]
pub struct MemoryFiles {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, path: &str, content: &str) {
        self.entries
            .write()
            .await
            .insert(path.to_string(), content.to_string());
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.entries.read().await.contains_key(path)
    }
}

#[async_trait]
impl FileAccess for MemoryFiles {
    async fn list_files(&self) -> Result<Vec<FileSummary>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(path, content)| FileSummary {
                path: path.clone(),
                size: content.len() as u64,
                modified: None,
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.entries
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::FileAccess(format!("no such file: {path}")))
    }

    async fn search_files(&self, term: &str) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for (path, content) in self.entries.read().await.iter() {
            for (idx, line) in content.lines().enumerate() {
                if line.contains(term) {
                    hits.push(SearchHit {
                        path: path.clone(),
                        line: idx + 1,
                        snippet: line.to_string(),
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::FileAccess(format!("no such file: {path}")))
    }

    async fn move_file(&self, source: &str, destination: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let content = entries
            .remove(source)
            .ok_or_else(|| Error::FileAccess(format!("no such file: {source}")))?;
        entries.insert(destination.to_string(), content);
        Ok(())
    }
}
