use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::function::StreamChunk;
use crate::provider::{ProviderCodec, ProviderRequest};
use crate::transport::{ChunkReceiver, TurnChannel};

/// Channel double that replays canned chunk scripts, one script per turn.
///
/// The request and codec are accepted and ignored; scripts are already
/// normalized chunks. When the scripts run out, or a script carries no
/// terminal chunk, a plain completion is synthesized so tests mirror the
/// real channel's exactly-once termination guarantee.
#[derive(Default)]
pub struct ScriptedChannel {
    scripts: Mutex<VecDeque<Vec<StreamChunk>>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedChannel {
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            chunk_delay: None,
        }
    }

    /// Spaces chunk delivery out, for tests that cancel mid-stream.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

#[async_trait]
impl TurnChannel for ScriptedChannel {
    async fn open(
        &self,
        _request: ProviderRequest,
        _codec: Box<dyn ProviderCodec + Send>,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver> {
        let script = self.scripts.lock().await.pop_front().unwrap_or_default();
        let delay = self.chunk_delay;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut terminated = false;
            for chunk in script {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                let terminal = chunk.is_complete;
                if tx.send(chunk).is_err() {
                    return;
                }
                if terminal {
                    terminated = true;
                    break;
                }
            }
            if !terminated && !cancel.is_cancelled() {
                let _ = tx.send(StreamChunk::complete(false));
            }
        });

        Ok(rx)
    }
}
