//! The streaming call driver: a per-call state machine interleaving an
//! upload loop, incoming envelope dispatch, and exactly-once cleanup.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::{pin_mut, Stream, StreamExt};
use http::HeaderMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    channel::ChannelIo,
    codec::{Codec, Method},
    errors::{BoxError, TransportError},
    headers::{headers_to_kv, kv_to_headers},
    rpc::{Body, RequestHeader, Reset, Rpc, Trailer},
};

use super::{deadline, demux::CallSink, demux::Shared, CallOptions, GoatTransport};

/// An open streaming call.
#[derive(Debug)]
pub struct StreamResponse<O> {
    /// The response side of the call. Dropping it cleans the call up.
    pub messages: MessageStream<O>,
}

impl GoatTransport {
    /// Opens a streaming call (client, server, or bidirectional).
    ///
    /// The opening envelope carries the full request header including user
    /// headers; every later envelope of the call repeats the header without
    /// them. Messages produced by `input` are uploaded concurrently with
    /// response consumption, and a trailer envelope closes the client side
    /// once `input` is exhausted. The returned [`MessageStream`] yields
    /// decoded response messages until the peer sends its trailer or a
    /// terminal status.
    ///
    /// If the call unwinds before both sides have closed cleanly, cleanup
    /// sends the peer a best-effort `RST_STREAM` envelope.
    pub async fn stream<I, O, S>(
        &self,
        method: &Method<I, O>,
        options: CallOptions,
        mut headers: HeaderMap,
        input: S,
    ) -> Result<StreamResponse<O>, TransportError>
    where
        S: Stream<Item = Result<I, BoxError>> + Send + 'static,
        I: Send + 'static,
    {
        let shared = self.shared();
        shared.bail_if_failed()?;

        let path = method.path();
        for interceptor in &shared.interceptors {
            interceptor.on_request(&path, &mut headers);
        }

        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(TransportError::aborted());
        }

        let id = shared.next_id();
        let initial_header = RequestHeader {
            method: path.clone(),
            headers: headers_to_kv(&headers),
            destination: shared.destination.clone(),
            source: shared.source.clone(),
        };
        let mid_header = RequestHeader {
            method: path,
            headers: Vec::new(),
            destination: shared.destination.clone(),
            source: shared.source.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = shared.register(id, CallSink::Stream(tx.clone()))?;
        trace!(id, method = %mid_header.method, "starting streaming call");

        // cancellation and deadline surface as items on the response side
        let watcher = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let timeout = options.timeout;
            tokio::spawn(async move {
                let err = tokio::select! {
                    _ = cancel.cancelled() => TransportError::aborted(),
                    _ = deadline(timeout) => TransportError::DeadlineExceeded,
                };
                let _ = tx.send(Err(err));
            })
        };

        let opening = Rpc { id, header: Some(initial_header), ..Default::default() };
        if let Err(err) = channel.write(opening).await {
            watcher.abort();
            shared.deregister(id);
            return Err(TransportError::channel(err));
        }

        let upload_stop = CancellationToken::new();
        let upload = spawn_upload(
            id,
            input,
            Arc::clone(method.input_codec()),
            Arc::clone(&channel),
            mid_header.clone(),
            tx,
            upload_stop.clone(),
        );

        Ok(StreamResponse {
            messages: MessageStream {
                shared: Arc::clone(shared),
                channel,
                rx,
                codec: Arc::clone(method.output_codec()),
                id,
                mid_header,
                watcher,
                upload: Some(upload),
                upload_stop,
                trailer: None,
                server_closed: false,
                pending_end: false,
                finished: false,
                cleaned: false,
            },
        })
    }
}

/// Drives the client side of a streaming call: one body envelope per input
/// message, then a trailer envelope once the input is exhausted. Any
/// failure is surfaced to the response consumer as an upload error.
///
/// The task resolves to `true` only once the closing trailer has been
/// written; cleanup awaits that verdict to decide whether the client half
/// closed cleanly. `stop` winds the loop down at its next suspension point
/// without discarding a write that has already completed.
fn spawn_upload<I, S>(
    id: u64,
    input: S,
    codec: Arc<dyn Codec<I>>,
    channel: Arc<dyn ChannelIo>,
    header: RequestHeader,
    tx: mpsc::UnboundedSender<Result<Rpc, TransportError>>,
    stop: CancellationToken,
) -> JoinHandle<bool>
where
    S: Stream<Item = Result<I, BoxError>> + Send + 'static,
    I: Send + 'static,
{
    tokio::spawn(async move {
        let result = async {
            pin_mut!(input);
            loop {
                if stop.is_cancelled() {
                    return Ok(false);
                }
                let item = tokio::select! {
                    biased;
                    item = input.next() => item,
                    _ = stop.cancelled() => return Ok(false),
                };
                let Some(item) = item else { break };
                let message = item?;
                let data = codec.encode(&message).map_err(|e| Box::new(e) as BoxError)?;
                let envelope = Rpc {
                    id,
                    header: Some(header.clone()),
                    body: Some(Body { data }),
                    ..Default::default()
                };
                tokio::select! {
                    biased;
                    res = channel.write(envelope) => res?,
                    _ = stop.cancelled() => return Ok(false),
                }
            }
            let closing = Rpc {
                id,
                header: Some(header.clone()),
                trailer: Some(Trailer::default()),
                ..Default::default()
            };
            tokio::select! {
                biased;
                res = channel.write(closing) => res?,
                _ = stop.cancelled() => return Ok(false),
            }
            Ok::<_, BoxError>(true)
        }
        .await;

        match result {
            Ok(done) => done,
            Err(cause) => {
                trace!(id, error = %cause, "upload failed");
                // the consumer may already be gone; nothing else to do then
                let _ = tx.send(Err(TransportError::Upload(cause.to_string())));
                false
            }
        }
    })
}

/// The response side of a streaming call.
///
/// Yields decoded messages until the peer ends the stream with a trailer
/// (clean end) or a non-zero status (error). Errors injected by
/// cancellation, deadline, upload failure, channel failure, or reset
/// terminate the stream with that error. Whichever way the stream ends,
/// including being dropped mid-call, cleanup runs exactly once.
pub struct MessageStream<O> {
    shared: Arc<Shared>,
    channel: Arc<dyn ChannelIo>,
    rx: mpsc::UnboundedReceiver<Result<Rpc, TransportError>>,
    codec: Arc<dyn Codec<O>>,
    id: u64,
    mid_header: RequestHeader,
    watcher: JoinHandle<()>,
    upload: Option<JoinHandle<bool>>,
    upload_stop: CancellationToken,
    trailer: Option<HeaderMap>,
    server_closed: bool,
    pending_end: bool,
    finished: bool,
    cleaned: bool,
}

impl<O> std::fmt::Debug for MessageStream<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("id", &self.id)
            .field("server_closed", &self.server_closed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<O> MessageStream<O> {
    /// Trailing metadata sent by the peer, available once the stream has
    /// ended cleanly.
    pub fn trailer(&self) -> Option<&HeaderMap> {
        self.trailer.as_ref()
    }

    fn finish(&mut self) {
        self.finished = true;
        self.cleanup();
    }

    /// Tears the call down: deregisters the id, closes the response queue,
    /// stops the helper tasks, and, unless both sides closed cleanly,
    /// tells the peer the stream framing may be inconsistent.
    fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        self.shared.deregister(self.id);
        self.rx.close();
        self.watcher.abort();
        self.upload_stop.cancel();

        let upload = self.upload.take();
        let server_closed = self.server_closed;
        let id = self.id;
        let channel = Arc::clone(&self.channel);
        let rst = Rpc {
            id,
            header: Some(self.mid_header.clone()),
            reset: Some(Reset::rst_stream()),
            ..Default::default()
        };
        // best effort: the channel may well be the reason we are unwinding,
        // and the runtime may already be shutting down
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                // await the upload's verdict rather than reading a flag: an
                // upload that already wrote its trailer reports a clean
                // close no matter how the tasks were scheduled
                let client_closed = match upload {
                    Some(task) => matches!(task.await, Ok(true)),
                    None => false,
                };
                if !(server_closed && client_closed) {
                    debug!(id, "stream closed abnormally, resetting");
                    let _ = channel.write(rst).await;
                }
            });
        }
    }
}

impl<O> Stream for MessageStream<O> {
    type Item = Result<O, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            if this.pending_end {
                this.finish();
                return Poll::Ready(None);
            }
            let rpc = match this.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finish();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(rpc))) => rpc,
            };

            if let Some(status) = rpc.error_status() {
                this.server_closed = true;
                let err = TransportError::from(status.clone());
                this.finish();
                return Poll::Ready(Some(Err(err)));
            }
            if let Some(trailer) = &rpc.trailer {
                this.server_closed = true;
                this.trailer = Some(kv_to_headers(Some(trailer.metadata.as_slice())));
            }
            if let Some(body) = &rpc.body {
                let item = this.codec.decode(&body.data).map_err(TransportError::from);
                match &item {
                    Err(_) => this.finish(),
                    // the peer may close the stream on the same envelope
                    // that carries its last message
                    Ok(_) if this.server_closed => this.pending_end = true,
                    Ok(_) => {}
                }
                return Poll::Ready(Some(item));
            }
            if this.server_closed {
                this.finish();
                return Poll::Ready(None);
            }
            // header-only envelope: nothing to surface
        }
    }
}

impl<O> Drop for MessageStream<O> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
