//! Orchestrator scenarios driven through a scripted channel: the full
//! model → tool-call → tool-result → model loop, admission gating, error
//! handling, and persistence ordering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use dossier_core::{
    AnthropicConfig, ChatConfig, ChatSession, Conversation, FileAccess, FunctionCall,
    FunctionDispatcher, MemoryFiles, MemoryStore, Provider, Role, ScriptedChannel, Secret,
    StreamChunk,
};

fn provider() -> Provider {
    Provider::Anthropic(AnthropicConfig {
        api_key: Secret::new("test-key"),
        ..Default::default()
    })
}

fn call(name: &str, args: Value, id: &str) -> FunctionCall {
    let Value::Object(map) = args else {
        panic!("args must be an object")
    };
    FunctionCall::new(name, map).with_tool_id(id)
}

fn complete_with_call(call: FunctionCall) -> StreamChunk {
    let mut chunk = StreamChunk::complete(true);
    chunk.function_call = Some(call);
    chunk
}

fn session_with(
    scripts: Vec<Vec<StreamChunk>>,
    files: Arc<dyn FileAccess>,
    store: Arc<MemoryStore>,
) -> ChatSession {
    ChatSession::new(
        provider(),
        Arc::new(ScriptedChannel::new(scripts)),
        FunctionDispatcher::new(files, true),
        store,
        Conversation::new(),
        ChatConfig {
            destructive_allowed: true,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn list_files_loop_produces_four_entries() {
    let files = Arc::new(MemoryFiles::new());
    files.seed("a.txt", "alpha").await;
    files.seed("b.txt", "beta").await;
    files.seed("c.txt", "gamma").await;
    let store = Arc::new(MemoryStore::new());

    let scripts = vec![
        vec![complete_with_call(call("list-files", json!({}), "call_1"))],
        vec![
            StreamChunk::text("You have 3 files."),
            StreamChunk::complete(false),
        ],
    ];
    let session = session_with(scripts, files, store.clone());

    assert!(session.submit("list files").await.unwrap());
    assert!(!session.is_busy());

    let conversation = session.snapshot().await;
    assert_eq!(conversation.contents.len(), 4);

    let user = &conversation.contents[0];
    assert_eq!(user.role, Role::User);
    assert_eq!(user.prompt_content, "list files");

    let call_entry = &conversation.contents[1];
    assert_eq!(call_entry.role, Role::Assistant);
    assert!(call_entry.is_function_call);
    assert_eq!(call_entry.tool_id.as_deref(), Some("call_1"));
    let stored = call_entry.parsed_function_call().unwrap().unwrap();
    assert_eq!(stored.name, "list-files");

    let response_entry = &conversation.contents[2];
    assert_eq!(response_entry.role, Role::User);
    assert!(response_entry.is_function_call_response);
    assert_eq!(response_entry.tool_id.as_deref(), Some("call_1"));
    assert!(response_entry.content.contains("\"count\":3"));

    let answer = &conversation.contents[3];
    assert_eq!(answer.role, Role::Assistant);
    assert_eq!(answer.content, "You have 3 files.");
    assert!(answer.is_plain_text());

    // user, call entry, response entry, and the streamed answer were each
    // persisted before the loop moved on.
    assert!(store.save_count().await >= 4);
    assert_eq!(store.last_saved().await.unwrap(), conversation);
}

#[tokio::test]
async fn empty_turn_is_never_persisted() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![StreamChunk::complete(false)]];
    let session = session_with(scripts, Arc::new(MemoryFiles::new()), store.clone());

    assert!(session.submit("hello?").await.unwrap());

    let conversation = session.snapshot().await;
    assert_eq!(conversation.contents.len(), 1);
    assert_eq!(conversation.contents[0].role, Role::User);

    for snapshot in store.all_saved().await {
        for entry in &snapshot.contents {
            let empty_assistant = entry.role == Role::Assistant
                && entry.content.is_empty()
                && !entry.is_function_call;
            assert!(!empty_assistant, "empty assistant entry was persisted");
        }
    }
}

#[tokio::test]
async fn transport_failure_leaves_error_marker_and_releases_gate() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![
        StreamChunk::text("Let me look"),
        StreamChunk::terminal_error("connection reset"),
    ]];
    let session = session_with(scripts, Arc::new(MemoryFiles::new()), store.clone());

    assert!(session.submit("list files").await.unwrap());
    assert!(!session.is_busy());

    let conversation = session.snapshot().await;
    assert_eq!(conversation.contents.len(), 2);
    let last = conversation.contents.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.contains("connection reset"));
    assert!(!last.is_function_call);

    // The gate is free for the next submission.
    assert!(session.submit("again").await.unwrap());
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_streaming_continues() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![
        StreamChunk::frame_error("unreadable stream event"),
        StreamChunk::text("still here"),
        StreamChunk::complete(false),
    ]];
    let session = session_with(scripts, Arc::new(MemoryFiles::new()), store.clone());

    assert!(session.submit("hi").await.unwrap());

    let conversation = session.snapshot().await;
    assert_eq!(conversation.contents.len(), 2);
    assert_eq!(conversation.contents[1].content, "still here");
}

#[tokio::test]
async fn text_deltas_are_persisted_eagerly() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![
        StreamChunk::text("He"),
        StreamChunk::text("llo"),
        StreamChunk::complete(false),
    ]];
    let session = session_with(scripts, Arc::new(MemoryFiles::new()), store.clone());

    assert!(session.submit("greet me").await.unwrap());

    let saves = store.all_saved().await;
    let partial_seen = saves.iter().any(|snapshot| {
        snapshot
            .contents
            .iter()
            .any(|entry| entry.role == Role::Assistant && entry.content == "He")
    });
    assert!(partial_seen, "intermediate delta was not persisted");
    assert_eq!(
        session.snapshot().await.contents[1].content,
        "Hello"
    );
}

#[tokio::test]
async fn continue_signal_without_call_starts_next_turn() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![
        vec![StreamChunk::complete(true)],
        vec![StreamChunk::text("done now"), StreamChunk::complete(false)],
    ];
    let session = session_with(scripts, Arc::new(MemoryFiles::new()), store.clone());

    assert!(session.submit("go").await.unwrap());

    let conversation = session.snapshot().await;
    assert_eq!(conversation.contents.len(), 2);
    assert_eq!(conversation.contents[1].content, "done now");
}

#[tokio::test]
async fn blank_submission_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let session = session_with(Vec::new(), Arc::new(MemoryFiles::new()), store.clone());

    assert!(!session.submit("   ").await.unwrap());
    assert_eq!(store.save_count().await, 0);
    assert!(session.snapshot().await.is_empty());
}

#[tokio::test]
async fn concurrent_submission_is_rejected_not_queued() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![
        StreamChunk::text("slow"),
        StreamChunk::complete(false),
    ]];
    let channel =
        Arc::new(ScriptedChannel::new(scripts).with_chunk_delay(Duration::from_millis(200)));
    let session = Arc::new(ChatSession::new(
        provider(),
        channel,
        FunctionDispatcher::new(Arc::new(MemoryFiles::new()), true),
        store.clone(),
        Conversation::new(),
        ChatConfig::default(),
    ));

    let background = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit("first").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.is_busy());
    assert!(!session.submit("second").await.unwrap());

    assert!(background.await.unwrap().unwrap());
    let conversation = session.snapshot().await;
    // Only the first submission left entries behind.
    assert_eq!(conversation.contents.len(), 2);
    assert_eq!(conversation.contents[0].prompt_content, "first");
}

/// File collaborator whose listing blocks until cancelled, for exercising
/// stop() in the middle of a dispatch.
struct StalledFiles;

#[async_trait]
impl FileAccess for StalledFiles {
    async fn list_files(&self) -> dossier_core::Result<Vec<dossier_core::FileSummary>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
    async fn read_file(&self, _path: &str) -> dossier_core::Result<String> {
        Ok(String::new())
    }
    async fn search_files(&self, _term: &str) -> dossier_core::Result<Vec<dossier_core::SearchHit>> {
        Ok(Vec::new())
    }
    async fn write_file(&self, _path: &str, _content: &str) -> dossier_core::Result<()> {
        Ok(())
    }
    async fn delete_file(&self, _path: &str) -> dossier_core::Result<()> {
        Ok(())
    }
    async fn move_file(&self, _source: &str, _destination: &str) -> dossier_core::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stop_mid_dispatch_frees_the_gate_immediately() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![complete_with_call(call(
        "list-files",
        json!({}),
        "call_1",
    ))]];
    let session = Arc::new(ChatSession::new(
        provider(),
        Arc::new(ScriptedChannel::new(scripts)),
        FunctionDispatcher::new(Arc::new(StalledFiles), true),
        store.clone(),
        Conversation::new(),
        ChatConfig::default(),
    ));

    let background = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit("list files").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.is_busy(), "dispatch should still be stalled");

    session.stop();
    assert!(!session.is_busy());

    // A fresh submission is admitted right away, before the old loop has
    // necessarily unwound.
    assert!(session.submit("hello").await.unwrap());

    assert!(background.await.unwrap().unwrap());

    // stop() is idempotent.
    session.stop();
    session.stop();
}

#[tokio::test]
async fn cancelled_stream_keeps_committed_text() {
    let store = Arc::new(MemoryStore::new());
    let scripts = vec![vec![
        StreamChunk::text("partial answer"),
        StreamChunk::text(" that never finishes"),
        StreamChunk::complete(false),
    ]];
    let channel =
        Arc::new(ScriptedChannel::new(scripts).with_chunk_delay(Duration::from_millis(200)));
    let session = Arc::new(ChatSession::new(
        provider(),
        channel,
        FunctionDispatcher::new(Arc::new(MemoryFiles::new()), true),
        store.clone(),
        Conversation::new(),
        ChatConfig::default(),
    ));

    let background = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit("question").await })
    };
    // Let the first delta land, then stop.
    tokio::time::sleep(Duration::from_millis(300)).await;
    session.stop();
    assert!(background.await.unwrap().unwrap());

    let conversation = session.snapshot().await;
    assert_eq!(conversation.contents.len(), 2);
    assert_eq!(conversation.contents[1].content, "partial answer");
}
