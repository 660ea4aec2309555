//! The caller-supplied channel over which envelopes travel.

use async_trait::async_trait;

use crate::{errors::BoxError, rpc::Rpc};

/// An in-order, bidirectional, message-oriented channel of [`Rpc`]
/// envelopes.
///
/// The caller supplies one of these (a WebSocket, a pipe, a multiplexed
/// session) and the transport turns it into a multiplexed RPC carrier that
/// any number of concurrent calls share.
///
/// Implementations must deliver envelopes whole and in order in each
/// direction. `write` may be invoked from several calls concurrently, so
/// the implementation must either serialize internally or tolerate
/// interleaved single-envelope writes (WebSocket message boundaries
/// suffice). The transport never splits an envelope across writes.
#[async_trait]
pub trait ChannelIo: Send + Sync {
    /// Produces the next envelope. Fails only on unrecoverable channel
    /// failure, which the transport fans out to every outstanding call.
    async fn read(&self) -> Result<Rpc, BoxError>;

    /// Enqueues one envelope. Fails on channel failure.
    async fn write(&self, rpc: Rpc) -> Result<(), BoxError>;

    /// Voluntary teardown notification, invoked by the transport exactly
    /// once per channel after the channel is replaced or discarded.
    fn done(&self);
}
