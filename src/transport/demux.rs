//! Shared transport state: the outstanding-calls map, id allocation, the
//! reader task, and channel replacement.

use std::{
    hash::BuildHasherDefault,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use hashers::fx_hash::FxHasher64;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::{
    channel::ChannelIo,
    errors::{BoxError, TransportError},
    interceptor::Interceptor,
    rpc::Rpc,
};

use super::TransportConfig;

type FxHashMap<K, V> = std::collections::HashMap<K, V, BuildHasherDefault<FxHasher64>>;

/// The per-call delivery slot registered in the outstanding map.
///
/// A unary call is resolved by exactly one envelope, so routing one removes
/// the entry; a streaming call keeps its entry until the call's own cleanup
/// deregisters it.
pub(super) enum CallSink {
    Unary(oneshot::Sender<Result<Rpc, TransportError>>),
    Stream(mpsc::UnboundedSender<Result<Rpc, TransportError>>),
}

impl CallSink {
    fn reject(self, reason: TransportError) {
        // a receiver that already went away is fine to skip
        match self {
            CallSink::Unary(tx) => {
                let _ = tx.send(Err(reason));
            }
            CallSink::Stream(tx) => {
                let _ = tx.send(Err(reason));
            }
        }
    }
}

/// The mutable transport state.
///
/// Channel, outstanding calls and the latched read error live under one
/// lock so that call registration, failure fan-out and channel replacement
/// are atomic with respect to each other: a call can never register
/// against a channel identity that a reset or read failure has already
/// retired.
struct State {
    /// The channel currently carrying envelopes. Replaced wholesale by
    /// [`reset`](Shared::reset); readers compare against it to detect that
    /// they outlived their channel.
    channel: Arc<dyn ChannelIo>,
    /// In-flight calls awaiting envelopes from the reader.
    outstanding: FxHashMap<u64, CallSink>,
    /// Fatal reader error. Once set, new calls fail immediately with a
    /// clone of it until the channel is reset.
    read_error: Option<TransportError>,
}

/// State shared between the transport handle, its call drivers, and the
/// reader task.
pub(super) struct Shared {
    state: Mutex<State>,
    /// Next call id. Monotonic for the lifetime of the transport, never
    /// recycled, not reset by channel replacement.
    next_id: AtomicU64,

    pub(super) destination: Option<String>,
    pub(super) source: Option<String>,
    pub(super) interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Shared {
    pub(super) fn new(channel: Arc<dyn ChannelIo>, config: TransportConfig) -> Self {
        Self {
            state: Mutex::new(State {
                channel,
                outstanding: FxHashMap::with_capacity_and_hasher(64, Default::default()),
                read_error: None,
            }),
            next_id: AtomicU64::new(0),
            destination: config.destination,
            source: config.source,
            interceptors: config.interceptors,
        }
    }

    /// The channel in use right now.
    pub(super) fn current_channel(&self) -> Arc<dyn ChannelIo> {
        Arc::clone(&self.state.lock().unwrap().channel)
    }

    /// Fails fast with the latched reader error, if any.
    pub(super) fn bail_if_failed(&self) -> Result<(), TransportError> {
        match &self.state.lock().unwrap().read_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(super) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a call and returns the channel its envelopes must be
    /// written to, which the call keeps using for its lifetime.
    ///
    /// The read-error check, the insert, and the channel snapshot happen
    /// under one lock: a registration that wins the race against a
    /// concurrent reset is guaranteed to be rejected by it, and one that
    /// loses observes the new channel (or the latched error).
    pub(super) fn register(
        &self,
        id: u64,
        sink: CallSink,
    ) -> Result<Arc<dyn ChannelIo>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.read_error {
            return Err(err.clone());
        }
        if state.outstanding.insert(id, sink).is_some() {
            // ids are never recycled, so this cannot happen outside a
            // driver bug
            warn!(id, "replaced an outstanding call registration");
        }
        Ok(Arc::clone(&state.channel))
    }

    pub(super) fn deregister(&self, id: u64) {
        self.state.lock().unwrap().outstanding.remove(&id);
    }

    /// Routes one incoming envelope to the call that owns its id. Envelopes
    /// for unknown ids are dropped: the call has already been resolved or
    /// reset.
    fn route(&self, rpc: Rpc) {
        let id = rpc.id;
        let mut state = self.state.lock().unwrap();
        match state.outstanding.remove(&id) {
            Some(CallSink::Unary(tx)) => {
                let _ = tx.send(Ok(rpc));
            }
            Some(CallSink::Stream(tx)) => {
                if tx.send(Ok(rpc)).is_ok() {
                    state.outstanding.insert(id, CallSink::Stream(tx));
                } else {
                    // consumer is gone; the entry stays removed so later
                    // envelopes for this id are dropped
                    trace!(id, "stream consumer gone, dropping call entry");
                }
            }
            None => trace!(id, "dropping envelope for unknown call"),
        }
    }

    /// Latches a fatal read failure and fans it out to every outstanding
    /// call.
    fn read_failed(&self, err: BoxError) {
        let reason = TransportError::channel(err);
        error!(error = %reason, "channel read failed, rejecting outstanding calls");
        let sinks: Vec<CallSink> = {
            let mut state = self.state.lock().unwrap();
            state.read_error = Some(reason.clone());
            state.outstanding.drain().map(|(_, sink)| sink).collect()
        };
        for sink in sinks {
            sink.reject(reason.clone());
        }
    }

    /// Swaps in a new channel: rejects all in-flight calls, clears the
    /// latched read error, arms a reader against the new channel, and
    /// notifies the old channel that the transport is finished with it.
    ///
    /// The drain and the swap happen in one critical section, so every
    /// call registered before the swap is rejected here and every call
    /// registered after it runs entirely against the new channel.
    pub(super) fn reset(
        this: &Arc<Self>,
        new_channel: Arc<dyn ChannelIo>,
        reason: Option<TransportError>,
    ) {
        let reason = reason.unwrap_or_else(TransportError::reset);
        debug!(reason = %reason, "replacing transport channel");

        let (old, sinks) = {
            let mut state = this.state.lock().unwrap();
            let sinks: Vec<CallSink> = state.outstanding.drain().map(|(_, sink)| sink).collect();
            let old = std::mem::replace(&mut state.channel, Arc::clone(&new_channel));
            state.read_error = None;
            (old, sinks)
        };
        for sink in sinks {
            sink.reject(reason.clone());
        }
        Self::spawn_reader(this, new_channel);
        old.done();
    }

    /// Arms the reader task for `channel`. One reader exists per channel
    /// generation; a reader that observes a failure after its channel has
    /// been replaced exits without touching shared state.
    pub(super) fn spawn_reader(this: &Arc<Self>, channel: Arc<dyn ChannelIo>) {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            loop {
                let result = channel.read().await;
                let Some(shared) = weak.upgrade() else {
                    // transport is gone
                    return;
                };
                let stale = !Arc::ptr_eq(&shared.current_channel(), &channel);
                match result {
                    Ok(rpc) => {
                        if stale {
                            trace!("reader outlived its channel, exiting");
                            return;
                        }
                        trace!(id = rpc.id, "routing incoming envelope");
                        shared.route(rpc);
                    }
                    Err(err) => {
                        if stale {
                            trace!(error = %err, "stale reader observed failure after reset");
                            return;
                        }
                        shared.read_failed(err);
                        return;
                    }
                }
            }
        });
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // the final channel is discarded with the transport
        self.state.get_mut().unwrap().channel.done();
    }
}
