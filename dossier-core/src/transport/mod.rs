use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::function::StreamChunk;
use crate::provider::{ProviderCodec, ProviderRequest};

pub mod framing;
pub mod http;
pub mod mock;

pub use framing::{FrameSlicer, Framing};
pub use http::HttpChannel;
pub use mock::ScriptedChannel;

/// Receiving end of one turn's chunk sequence.
pub type ChunkReceiver = mpsc::UnboundedReceiver<StreamChunk>;

/// Opens the network stream for one model turn and drives it to completion.
///
/// The yielded sequence is lazy, finite, single-pass, and non-restartable.
/// Implementations guarantee exactly one terminal chunk per request (a
/// chunk with `is_complete` set, synthesized if the stream ends without
/// one) unless the cancellation token fires first, in which case the
/// channel simply closes and nothing further is yielded.
#[async_trait]
pub trait TurnChannel: Send + Sync {
    async fn open(
        &self,
        request: ProviderRequest,
        codec: Box<dyn ProviderCodec + Send>,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver>;
}
