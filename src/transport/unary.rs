//! The unary call driver: one request envelope out, one response envelope
//! back.

use std::{sync::Arc, time::Duration};

use http::HeaderMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{
    channel::ChannelIo,
    codec::Method,
    errors::TransportError,
    headers::{headers_to_kv, kv_to_headers},
    rpc::{Body, RequestHeader, Rpc, Trailer},
};

use super::{deadline, demux::CallSink, CallOptions, GoatTransport};

/// A completed unary call.
#[derive(Debug)]
pub struct UnaryResponse<O> {
    /// Response headers reported by the peer.
    pub header: HeaderMap,
    /// The decoded response message.
    pub message: O,
    /// Trailing metadata reported by the peer.
    pub trailer: HeaderMap,
}

impl GoatTransport {
    /// Performs one unary call.
    ///
    /// A single envelope carrying the full request header, the encoded
    /// message, and an end-of-client-stream trailer is written to the
    /// channel; the reader resolves the call with the first envelope the
    /// peer sends back under the same id. Cancellation rejects the await
    /// without notifying the peer.
    pub async fn unary<I, O>(
        &self,
        method: &Method<I, O>,
        options: CallOptions,
        mut headers: HeaderMap,
        message: &I,
    ) -> Result<UnaryResponse<O>, TransportError> {
        let shared = self.shared();
        shared.bail_if_failed()?;

        let path = method.path();
        for interceptor in &shared.interceptors {
            interceptor.on_request(&path, &mut headers);
        }

        let data = method.input_codec().encode(message)?;

        let id = shared.next_id();
        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(TransportError::aborted());
        }

        let (tx, rx) = oneshot::channel();
        let channel = shared.register(id, CallSink::Unary(tx))?;
        trace!(id, method = %path, "starting unary call");

        let envelope = Rpc {
            id,
            header: Some(RequestHeader {
                method: path,
                headers: headers_to_kv(&headers),
                destination: shared.destination.clone(),
                source: shared.source.clone(),
            }),
            body: Some(Body { data }),
            // end of the client stream: unary sends exactly one message
            trailer: Some(Trailer::default()),
            ..Default::default()
        };

        let result = drive(channel, envelope, rx, &cancel, options.timeout).await;
        shared.deregister(id);
        let response = result?;

        if let Some(status) = response.error_status() {
            return Err(TransportError::from(status.clone()));
        }
        let header = kv_to_headers(response.header.as_ref().map(|h| h.headers.as_slice()));
        let trailer = kv_to_headers(response.trailer.as_ref().map(|t| t.metadata.as_slice()));
        match response.body {
            Some(body) => Ok(UnaryResponse {
                header,
                message: method.output_codec().decode(&body.data)?,
                trailer,
            }),
            None => Err(TransportError::InvalidResponse),
        }
    }
}

/// Writes the request envelope and awaits the routed response, the
/// cancellation token, or the deadline, whichever settles first.
async fn drive(
    channel: Arc<dyn ChannelIo>,
    envelope: Rpc,
    rx: oneshot::Receiver<Result<Rpc, TransportError>>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<Rpc, TransportError> {
    if let Err(err) = channel.write(envelope).await {
        return Err(TransportError::channel(err));
    }

    tokio::select! {
        response = rx => match response {
            Ok(result) => result,
            // the sender can only disappear without resolving if the
            // transport itself unwound
            Err(_) => Err(TransportError::Aborted("call abandoned by transport".to_owned())),
        },
        _ = cancel.cancelled() => Err(TransportError::aborted()),
        _ = deadline(timeout) => Err(TransportError::DeadlineExceeded),
    }
}
