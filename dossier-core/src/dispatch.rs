use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::files::FileAccess;
use crate::function::{FunctionCall, FunctionResponse};
use crate::tool::{
    DELETE_FILES, DeleteFilesArgs, LIST_FILES, MOVE_FILES, MoveFilesArgs, READ_FILES,
    ReadFilesArgs, SEARCH_FILES, SearchFilesArgs, WRITE_FILE, WriteFileArgs,
};

/// Executes named operations against the sandboxed file collaborator.
///
/// Every outcome, including per-file failures, unknown names, and argument
/// shape mismatches, becomes a [`FunctionResponse`], so the loop always has
/// something to feed back to the model. Nothing here raises.
pub struct FunctionDispatcher {
    files: Arc<dyn FileAccess>,
    destructive_allowed: bool,
}

impl FunctionDispatcher {
    pub fn new(files: Arc<dyn FileAccess>, destructive_allowed: bool) -> Self {
        Self {
            files,
            destructive_allowed,
        }
    }

    /// Runs exactly one operation for `call`, honoring cancellation at the
    /// suspension point.
    pub async fn dispatch(
        &self,
        call: &FunctionCall,
        cancel: &CancellationToken,
    ) -> FunctionResponse {
        info!(function = %call.name, "dispatching function call");
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(function = %call.name, "dispatch cancelled");
                json!({ "error": "operation cancelled" })
            }
            payload = self.execute(call) => payload,
        };
        FunctionResponse::new(&call.name, payload, call.tool_id.clone())
    }

    async fn execute(&self, call: &FunctionCall) -> Value {
        match call.name.as_str() {
            LIST_FILES => self.list_files().await,
            READ_FILES => match parse_args::<ReadFilesArgs>(call) {
                Ok(args) => self.read_files(args).await,
                Err(payload) => payload,
            },
            SEARCH_FILES => match parse_args::<SearchFilesArgs>(call) {
                Ok(args) => self.search_files(args).await,
                Err(payload) => payload,
            },
            WRITE_FILE => match parse_args::<WriteFileArgs>(call) {
                Ok(args) => self.write_file(args).await,
                Err(payload) => payload,
            },
            DELETE_FILES => match parse_args::<DeleteFilesArgs>(call) {
                Ok(args) => self.delete_files(args).await,
                Err(payload) => payload,
            },
            MOVE_FILES => match parse_args::<MoveFilesArgs>(call) {
                Ok(args) => self.move_files(args).await,
                Err(payload) => payload,
            },
            other => {
                warn!(function = other, "unknown function name");
                json!({
                    "error": format!("unknown function '{other}'"),
                    "available": [
                        LIST_FILES, READ_FILES, SEARCH_FILES,
                        WRITE_FILE, DELETE_FILES, MOVE_FILES
                    ],
                })
            }
        }
    }

    async fn list_files(&self) -> Value {
        match self.files.list_files().await {
            Ok(files) => json!({ "count": files.len(), "files": files }),
            Err(e) => json!({ "error": e.to_string() }),
        }
    }

    async fn read_files(&self, args: ReadFilesArgs) -> Value {
        let mut results = Vec::with_capacity(args.file_paths.len());
        for path in &args.file_paths {
            match self.files.read_file(path).await {
                Ok(content) => results.push(json!({ "path": path, "content": content })),
                Err(e) => results.push(json!({ "path": path, "error": e.to_string() })),
            }
        }
        json!({ "files": results })
    }

    async fn search_files(&self, args: SearchFilesArgs) -> Value {
        let mut results = Vec::with_capacity(args.search_terms.len());
        for term in &args.search_terms {
            match self.files.search_files(term).await {
                Ok(hits) => results.push(json!({ "term": term, "hits": hits })),
                Err(e) => results.push(json!({ "term": term, "error": e.to_string() })),
            }
        }
        json!({ "results": results })
    }

    async fn write_file(&self, args: WriteFileArgs) -> Value {
        match self.files.write_file(&args.file_path, &args.content).await {
            Ok(()) => json!({ "status": "written", "path": args.file_path }),
            Err(e) => json!({ "error": e.to_string(), "path": args.file_path }),
        }
    }

    async fn delete_files(&self, args: DeleteFilesArgs) -> Value {
        if !self.destructive_allowed {
            warn!("delete refused; destructive operations are disabled");
            return json!({ "error": "destructive operations are disabled for this session" });
        }
        if !args.confirm_deletion {
            return json!({
                "error": "deletion not confirmed; set confirm_deletion to true to proceed"
            });
        }
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for path in &args.file_paths {
            match self.files.delete_file(path).await {
                Ok(()) => deleted.push(path.clone()),
                Err(e) => failed.push(json!({ "path": path, "error": e.to_string() })),
            }
        }
        json!({ "deleted": deleted, "failed": failed })
    }

    async fn move_files(&self, args: MoveFilesArgs) -> Value {
        if args.source_paths.len() != args.destination_paths.len() {
            warn!(
                sources = args.source_paths.len(),
                destinations = args.destination_paths.len(),
                "mismatched move arguments"
            );
            return json!({
                "error": format!(
                    "source_paths and destination_paths must have the same length (got {} and {})",
                    args.source_paths.len(),
                    args.destination_paths.len()
                )
            });
        }
        let mut moved = Vec::new();
        let mut failed = Vec::new();
        for (source, destination) in args.source_paths.iter().zip(&args.destination_paths) {
            match self.files.move_file(source, destination).await {
                Ok(()) => moved.push(json!({ "from": source, "to": destination })),
                Err(e) => failed.push(json!({
                    "from": source,
                    "to": destination,
                    "error": e.to_string()
                })),
            }
        }
        json!({ "moved": moved, "failed": failed })
    }
}

fn parse_args<T: DeserializeOwned>(call: &FunctionCall) -> Result<T, Value> {
    serde_json::from_value(call.arguments_value()).map_err(|e| {
        warn!(function = %call.name, "argument shape mismatch: {e}");
        json!({ "error": format!("invalid arguments for '{}': {e}", call.name) })
    })
}
