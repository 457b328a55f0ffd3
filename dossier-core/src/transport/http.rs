use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::function::StreamChunk;
use crate::provider::{ProviderCodec, ProviderRequest};
use crate::transport::{ChunkReceiver, FrameSlicer, TurnChannel};

/// Streaming HTTP channel backed by a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpChannel {
    client: reqwest::Client,
}

impl HttpChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TurnChannel for HttpChannel {
    async fn open(
        &self,
        request: ProviderRequest,
        codec: Box<dyn ProviderCodec + Send>,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_stream(self.client.clone(), request, codec, cancel, tx));
        Ok(rx)
    }
}

async fn run_stream(
    client: reqwest::Client,
    request: ProviderRequest,
    mut codec: Box<dyn ProviderCodec + Send>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<StreamChunk>,
) {
    let url = request.http.url().clone();
    debug!(%url, "opening provider stream");

    let response = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("stream cancelled before the response arrived");
            return;
        }
        response = client.execute(request.http) => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            error!("provider request failed: {e}");
            let _ = tx.send(StreamChunk::terminal_error(format!("request failed: {e}")));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(%status, "provider rejected the request");
        let _ = tx.send(StreamChunk::terminal_error(format!(
            "provider returned {status}: {body}"
        )));
        return;
    }
    info!(%status, "provider stream open");

    let mut slicer = FrameSlicer::new(request.framing);
    let mut bytes = response.bytes_stream();

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("stream cancelled mid-read");
                return;
            }
            item = bytes.next() => item,
        };

        match item {
            Some(Ok(buf)) => {
                for frame in slicer.feed(&buf) {
                    let chunk = codec.parse_frame(&frame);
                    let terminal = chunk.is_complete;
                    if tx.send(chunk).is_err() {
                        debug!("chunk receiver dropped; abandoning stream");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                error!("stream read failed: {e}");
                let _ = tx.send(StreamChunk::terminal_error(format!("stream failed: {e}")));
                return;
            }
            None => {
                // The orchestrator must never hang waiting for a terminal
                // frame the provider failed to send.
                warn!("stream ended without a terminal frame; synthesizing one");
                let _ = tx.send(StreamChunk::complete(false));
                return;
            }
        }
    }
}
