use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use dossier_core::error::{Error, Result};
use dossier_core::files::{FileAccess, FileSummary, SearchHit};

/// Disk-backed workspace confined to a single root directory.
///
/// Every model-supplied path is resolved relative to the root and rejected
/// if it is absolute or tries to climb out with `..`.
pub struct DiskFiles {
    root: PathBuf,
}

impl DiskFiles {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::FileAccess(format!("cannot create workspace root: {e}")))?;
        let root = root
            .canonicalize()
            .map_err(|e| Error::FileAccess(format!("cannot resolve workspace root: {e}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Err(Error::FileAccess(format!(
                "absolute paths are not allowed: {path}"
            )));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::FileAccess(format!(
                        "path escapes the workspace: {path}"
                    )));
                }
            }
        }
        Ok(self.root.join(candidate))
    }

    async fn walk(&self) -> Result<Vec<PathBuf>> {
        let mut pending = vec![self.root.clone()];
        let mut found = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| Error::FileAccess(format!("cannot list {}: {e}", dir.display())))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::FileAccess(format!("cannot read entry: {e}")))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::FileAccess(format!("cannot stat entry: {e}")))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

#[async_trait]
impl FileAccess for DiskFiles {
    async fn list_files(&self) -> Result<Vec<FileSummary>> {
        let mut summaries = Vec::new();
        for path in self.walk().await? {
            let metadata = fs::metadata(&path)
                .await
                .map_err(|e| Error::FileAccess(format!("cannot stat {}: {e}", path.display())))?;
            let modified = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);
            summaries.push(FileSummary {
                path: self.relative(&path),
                size: metadata.len(),
                modified,
            });
        }
        debug!(count = summaries.len(), "listed workspace files");
        Ok(summaries)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        fs::read_to_string(&resolved)
            .await
            .map_err(|e| Error::FileAccess(format!("cannot read {path}: {e}")))
    }

    async fn search_files(&self, term: &str) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for path in self.walk().await? {
            // Binary files simply do not match.
            let Ok(content) = fs::read_to_string(&path).await else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if line.contains(term) {
                    hits.push(SearchHit {
                        path: self.relative(&path),
                        line: idx + 1,
                        snippet: line.to_string(),
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::FileAccess(format!("cannot create directories: {e}")))?;
        }
        fs::write(&resolved, content)
            .await
            .map_err(|e| Error::FileAccess(format!("cannot write {path}: {e}")))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        fs::remove_file(&resolved)
            .await
            .map_err(|e| Error::FileAccess(format!("cannot delete {path}: {e}")))
    }

    async fn move_file(&self, source: &str, destination: &str) -> Result<()> {
        let from = self.resolve(source)?;
        let to = self.resolve(destination)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::FileAccess(format!("cannot create directories: {e}")))?;
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| Error::FileAccess(format!("cannot move {source} to {destination}: {e}")))
    }
}
