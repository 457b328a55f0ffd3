use std::env;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dossier_core::conversation::Role;
use dossier_core::{
    AnthropicConfig, ChatConfig, ChatSession, Conversation, FunctionDispatcher, GeminiConfig,
    HttpChannel, OpenAiConfig, Provider,
};
use dossier_runtime::{DiskFiles, JsonFileStore};

fn provider_from_env() -> dossier_core::Result<Provider> {
    let name = env::var("DOSSIER_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
    match name.as_str() {
        "anthropic" => Ok(Provider::Anthropic(AnthropicConfig::default())),
        "openai" => Ok(Provider::OpenAi(OpenAiConfig::default())),
        "gemini" => Ok(Provider::Gemini(GeminiConfig::default())),
        other => Err(dossier_core::Error::Other(format!(
            "unknown provider '{other}' (expected anthropic, openai, or gemini)"
        ))),
    }
}

async fn run_chat() -> dossier_core::Result<()> {
    let _ = dotenvy::dotenv();

    let provider = provider_from_env()?;
    let workspace = env::var("DOSSIER_WORKSPACE").unwrap_or_else(|_| ".".to_string());
    let data_dir = env::var("DOSSIER_DATA").unwrap_or_else(|_| ".dossier".to_string());
    let destructive_allowed = env::var("DOSSIER_ALLOW_DELETE").is_ok_and(|v| v == "1");

    info!(
        provider = provider.name(),
        %workspace,
        destructive_allowed,
        "starting chat session"
    );

    let files = Arc::new(DiskFiles::new(&workspace)?);
    let store = Arc::new(JsonFileStore::new(&data_dir)?);
    let stored = store.list().await?;

    let session = Arc::new(ChatSession::new(
        provider,
        Arc::new(HttpChannel::new()),
        FunctionDispatcher::new(files, destructive_allowed),
        store,
        Conversation::new(),
        ChatConfig {
            destructive_allowed,
            ..Default::default()
        },
    ));

    println!("=== Dossier ===");
    println!("Chat about the files in {workspace}. Type 'exit' to quit;");
    println!("press ctrl-c during a response to stop it.");
    println!();
    if !stored.is_empty() {
        println!("Earlier conversations in {data_dir}:");
        for (path, title) in stored.iter().take(5) {
            println!("  {} ({})", title, path.display());
        }
        println!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Failed to read input: {e}");
                break;
            }
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        let before = session.snapshot().await.contents.len();
        let session_for_submit = Arc::clone(&session);
        tokio::select! {
            result = session_for_submit.submit(input) => {
                match result {
                    Ok(true) => {}
                    Ok(false) => {
                        if !input.is_empty() {
                            println!("(a response is already in progress)");
                        }
                        continue;
                    }
                    Err(e) => {
                        eprintln!("Error: {e}");
                        continue;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.stop();
                println!();
                println!("(stopped)");
            }
        }

        for entry in &session.snapshot().await.contents[before..] {
            match entry.role {
                Role::User if entry.is_function_call_response => {
                    println!("  ← {}", entry.content);
                }
                Role::Assistant if entry.is_function_call => {
                    let label = entry
                        .parsed_function_call()
                        .ok()
                        .flatten()
                        .map(|call| call.name)
                        .unwrap_or_else(|| "?".to_string());
                    println!("  → {label}");
                }
                Role::Assistant => println!("Assistant: {}", entry.content),
                Role::User => {}
            }
        }
        println!();
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    info!("starting dossier runtime");
    if let Err(e) = run_chat().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
