//! Dispatcher behavior against the in-memory workspace: the full function
//! surface, argument validation, and the no-partial-mutation guarantee.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use dossier_core::{FileAccess, FunctionCall, FunctionDispatcher, MemoryFiles};

fn call(name: &str, args: Value) -> FunctionCall {
    let Value::Object(map) = args else {
        panic!("args must be an object")
    };
    FunctionCall::new(name, map).with_tool_id("call_1")
}

async fn seeded_files() -> Arc<MemoryFiles> {
    let files = Arc::new(MemoryFiles::new());
    files.seed("notes.txt", "alpha\nbeta").await;
    files.seed("todo.md", "- fix beta bug").await;
    files
}

#[tokio::test]
async fn list_and_read_round_trip() {
    let files = seeded_files().await;
    let dispatcher = FunctionDispatcher::new(files, true);
    let cancel = CancellationToken::new();

    let response = dispatcher.dispatch(&call("list-files", json!({})), &cancel).await;
    assert_eq!(response.payload["count"], 2);
    assert_eq!(response.tool_id.as_deref(), Some("call_1"));

    let response = dispatcher
        .dispatch(
            &call("read-files", json!({"file_paths": ["notes.txt", "missing.txt"]})),
            &cancel,
        )
        .await;
    let results = response.payload["files"].as_array().unwrap();
    assert_eq!(results[0]["content"], "alpha\nbeta");
    // A missing file is a per-file error, not a failed dispatch.
    assert!(results[1]["error"].as_str().unwrap().contains("missing.txt"));
}

#[tokio::test]
async fn search_groups_hits_by_term() {
    let dispatcher = FunctionDispatcher::new(seeded_files().await, true);
    let response = dispatcher
        .dispatch(
            &call("search-files", json!({"search_terms": ["beta", "nowhere"]})),
            &CancellationToken::new(),
        )
        .await;

    let results = response.payload["results"].as_array().unwrap();
    assert_eq!(results[0]["term"], "beta");
    assert_eq!(results[0]["hits"].as_array().unwrap().len(), 2);
    assert!(results[1]["hits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn write_then_read_back() {
    let files = Arc::new(MemoryFiles::new());
    let dispatcher = FunctionDispatcher::new(files.clone(), true);
    let response = dispatcher
        .dispatch(
            &call(
                "write-file",
                json!({"file_path": "new.txt", "content": "fresh"}),
            ),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(response.payload["status"], "written");
    assert_eq!(files.read_file("new.txt").await.unwrap(), "fresh");
}

#[tokio::test]
async fn mismatched_move_arrays_mutate_nothing() {
    let files = seeded_files().await;
    let dispatcher = FunctionDispatcher::new(files.clone(), true);

    let response = dispatcher
        .dispatch(
            &call(
                "move-files",
                json!({
                    "source_paths": ["notes.txt", "todo.md"],
                    "destination_paths": ["renamed.txt"]
                }),
            ),
            &CancellationToken::new(),
        )
        .await;

    assert!(response.is_error());
    assert!(
        response.payload["error"]
            .as_str()
            .unwrap()
            .contains("got 2 and 1")
    );
    // No partial mutation happened.
    assert!(files.contains("notes.txt").await);
    assert!(files.contains("todo.md").await);
    assert!(!files.contains("renamed.txt").await);
}

#[tokio::test]
async fn matched_move_arrays_relocate_files() {
    let files = seeded_files().await;
    let dispatcher = FunctionDispatcher::new(files.clone(), true);

    let response = dispatcher
        .dispatch(
            &call(
                "move-files",
                json!({
                    "source_paths": ["notes.txt"],
                    "destination_paths": ["archive/notes.txt"]
                }),
            ),
            &CancellationToken::new(),
        )
        .await;

    assert!(!response.is_error());
    assert_eq!(response.payload["moved"].as_array().unwrap().len(), 1);
    assert!(files.contains("archive/notes.txt").await);
}

#[tokio::test]
async fn deletion_requires_confirmation_and_destructive_access() {
    let files = seeded_files().await;
    let dispatcher = FunctionDispatcher::new(files.clone(), true);
    let cancel = CancellationToken::new();

    let response = dispatcher
        .dispatch(
            &call(
                "delete-files",
                json!({"file_paths": ["notes.txt"], "confirm_deletion": false}),
            ),
            &cancel,
        )
        .await;
    assert!(response.is_error());
    assert!(files.contains("notes.txt").await);

    let response = dispatcher
        .dispatch(
            &call(
                "delete-files",
                json!({"file_paths": ["notes.txt"], "confirm_deletion": true}),
            ),
            &cancel,
        )
        .await;
    assert!(!response.is_error());
    assert!(!files.contains("notes.txt").await);

    // A dispatcher for a session without destructive access refuses even a
    // confirmed deletion.
    let guarded = FunctionDispatcher::new(files.clone(), false);
    let response = guarded
        .dispatch(
            &call(
                "delete-files",
                json!({"file_paths": ["todo.md"], "confirm_deletion": true}),
            ),
            &cancel,
        )
        .await;
    assert!(response.is_error());
    assert!(files.contains("todo.md").await);
}

#[tokio::test]
async fn unknown_function_lists_the_available_surface() {
    let dispatcher = FunctionDispatcher::new(Arc::new(MemoryFiles::new()), true);
    let response = dispatcher
        .dispatch(&call("compress-files", json!({})), &CancellationToken::new())
        .await;

    assert!(response.is_error());
    let available = response.payload["available"].as_array().unwrap();
    assert_eq!(available.len(), 6);
}
