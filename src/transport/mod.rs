//! The multiplexing transport: one ordered channel shared by any number of
//! concurrent unary and streaming calls.

mod demux;
mod streaming;
mod unary;

pub use streaming::{MessageStream, StreamResponse};
pub use unary::UnaryResponse;

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{channel::ChannelIo, errors::TransportError, interceptor::Interceptor};

use demux::Shared;

/// Optional transport-wide settings.
#[derive(Default)]
pub struct TransportConfig {
    /// Included in every outgoing envelope's `header.destination`.
    pub destination: Option<String>,
    /// Included in every outgoing envelope's `header.source`.
    pub source: Option<String>,
    /// Hooks applied to every outgoing call's headers, in order.
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

/// Per-call settings.
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Cancels the call when fired. A cancelled unary call rejects without
    /// notifying the peer; a cancelled streaming call additionally resets
    /// the stream during cleanup.
    pub cancel: Option<CancellationToken>,
    /// Deadline for the whole call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options with a cancellation token and no deadline.
    pub fn cancel(token: CancellationToken) -> Self {
        Self { cancel: Some(token), timeout: None }
    }

    /// Options with a deadline and no cancellation token.
    pub fn timeout(timeout: Duration) -> Self {
        Self { cancel: None, timeout: Some(timeout) }
    }
}

/// A connect-style RPC transport multiplexed over one caller-supplied
/// [`ChannelIo`].
///
/// Cloning the transport produces another handle to the same channel and
/// call table. Calls allocate ids from a shared monotonic counter, write
/// their envelopes to the current channel, and await responses routed back
/// by the transport's single reader task. A fatal read failure fans out to
/// every in-flight call and is latched until [`reset`](Self::reset) swaps
/// in a fresh channel.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # async fn run(channel: Arc<dyn goat::ChannelIo>) -> Result<(), goat::TransportError> {
/// use goat::{GoatTransport, Method};
/// use http::HeaderMap;
///
/// let transport = GoatTransport::new(channel);
/// let method = Method::<String, String>::json("echo.v1.EchoService", "Echo");
/// let response = transport
///     .unary(&method, Default::default(), HeaderMap::new(), &"hi".to_owned())
///     .await?;
/// println!("{}", response.message);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GoatTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GoatTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoatTransport").finish_non_exhaustive()
    }
}

impl GoatTransport {
    /// Wraps `channel` and starts the reader task.
    pub fn new(channel: Arc<dyn ChannelIo>) -> Self {
        Self::with_config(channel, TransportConfig::default())
    }

    /// Wraps `channel` with explicit configuration.
    pub fn with_config(channel: Arc<dyn ChannelIo>, config: TransportConfig) -> Self {
        let shared = Arc::new(Shared::new(Arc::clone(&channel), config));
        Shared::spawn_reader(&shared, channel);
        Self { shared }
    }

    /// Replaces the underlying channel.
    ///
    /// Every in-flight call is rejected with `reason` (or the default
    /// `aborted: reset`), the latched read error is cleared, a reader is
    /// armed against `new_channel`, and the old channel receives its
    /// `done()` notification. Calls made after `reset` succeed or fail
    /// based solely on the new channel's behavior.
    pub fn reset(&self, new_channel: Arc<dyn ChannelIo>, reason: Option<TransportError>) {
        Shared::reset(&self.shared, new_channel, reason);
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Resolves when the call's deadline elapses; pends forever without one.
pub(crate) async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
