//! Upstream sources a relay session can start and stop

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Output of a running source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One payload: an Annex-B access unit or a complete JPEG image
    Data(Bytes),
    /// The source stopped producing; carries the failure, if any
    Ended(Option<String>),
}

/// A startable upstream (capture server session or fallback grabber)
///
/// `start` either returns the stream description plus a receiver of its
/// payloads, or fails having released everything it acquired. `stop` is
/// idempotent and safe to call on a source that never started.
#[async_trait]
pub trait StreamSource: Send + 'static {
    /// Stream description reported once the source is live
    type Info: Clone + Send + Sync + 'static;

    async fn start(&mut self) -> Result<(Self::Info, mpsc::Receiver<SourceEvent>)>;

    async fn stop(&mut self);
}
