#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod channel;
pub use channel::ChannelIo;

pub mod codec;
pub use codec::{Codec, CodecError, JsonCodec, Method, MAX_MESSAGE_SIZE};

pub mod errors;
pub use errors::{BoxError, TransportError};

pub mod fifo;
pub use fifo::Fifo;

pub mod headers;
pub use headers::{headers_to_kv, kv_to_headers};

pub mod interceptor;
pub use interceptor::Interceptor;

pub mod rpc;
pub use rpc::{Body, Code, KeyValue, RequestHeader, Reset, ResponseStatus, Rpc, Trailer};

mod transport;
pub use transport::{
    CallOptions, GoatTransport, MessageStream, StreamResponse, TransportConfig, UnaryResponse,
};

pub use futures_util::{Stream, StreamExt};
pub use http::HeaderMap;
pub use tokio_util::sync::CancellationToken;
