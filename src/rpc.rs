//! The `Rpc` envelope: the single framed message type exchanged on the
//! shared channel.
//!
//! Every field other than `id` is optional; a call is made up of one or more
//! envelopes in each direction, each carrying whatever subset of header,
//! body, status, trailer and reset applies at that point in the call's
//! lifecycle. The serde derives keep absent and empty fields wire-identical
//! so channel implementations can round-trip envelopes through any
//! self-describing format.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single key-value metadata entry.
///
/// Order within a list is preserved on the wire. The adapter appends user
/// headers after any adapter-owned entries, so indices beyond that prefix
/// are stable across a round trip.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Entry key, lowercased on the sending side.
    pub key: String,
    /// Entry value.
    pub value: String,
}

/// Per-call routing and metadata header.
///
/// The opening envelope of a call carries the full header including user
/// `headers`; every later envelope of the same call repeats only `method`,
/// `destination` and `source`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Full method path of the form `/<service>/<method>`.
    pub method: String,
    /// User headers, present on the opening envelope only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyValue>,
    /// Optional address of the intended recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Optional address of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A serialized message payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Message bytes, produced by the per-method codec.
    #[serde(default)]
    pub data: Bytes,
}

/// Terminal status reported by the peer. A non-zero `code` ends the call
/// with an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseStatus {
    /// Status code; `0` means OK.
    #[serde(default)]
    pub code: i32,
    /// Human-readable status message.
    #[serde(default)]
    pub message: String,
    /// Structured error details.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Value>,
}

impl ResponseStatus {
    /// Whether this status terminates the call with an error.
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

/// End-of-stream marker. Its mere presence on an envelope signals that the
/// sending side has finished its half of the call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trailer {
    /// Trailing metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<KeyValue>,
}

/// Abnormal-close marker sent to the peer when a stream unwinds without
/// both sides having closed cleanly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reset {
    /// Reset kind; [`Reset::RST_STREAM`] is the only kind this adapter
    /// emits.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Reset {
    /// The stream-reset kind.
    pub const RST_STREAM: &'static str = "RST_STREAM";

    /// Builds an `RST_STREAM` reset.
    pub fn rst_stream() -> Self {
        Self { kind: Self::RST_STREAM.to_owned() }
    }

    /// Whether this reset is an `RST_STREAM`.
    pub fn is_rst_stream(&self) -> bool {
        self.kind == Self::RST_STREAM
    }
}

/// One framed message on the shared channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rpc {
    /// Pairs a request with its response(s). Unique per outstanding call on
    /// the allocating side.
    pub id: u64,
    /// Routing and metadata header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<RequestHeader>,
    /// Serialized message payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    /// Terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    /// End-of-stream marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailer: Option<Trailer>,
    /// Abnormal-close marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<Reset>,
}

impl Rpc {
    /// The status carried by this envelope, if it terminates the call with
    /// an error.
    pub fn error_status(&self) -> Option<&ResponseStatus> {
        self.status.as_ref().filter(|s| s.is_error())
    }
}

/// Connect/gRPC status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum Code {
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl From<Code> for i32 {
    fn from(code: Code) -> Self {
        code as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let rpc = Rpc { id: 7, ..Default::default() };
        let json = serde_json::to_string(&rpc).unwrap();
        assert_eq!(json, r#"{"id":7}"#);
    }

    #[test]
    fn envelope_round_trips() {
        let rpc = Rpc {
            id: 3,
            header: Some(RequestHeader {
                method: "/test.Svc/Do".to_owned(),
                headers: vec![KeyValue { key: "x-token".to_owned(), value: "abc".to_owned() }],
                destination: Some("server".to_owned()),
                source: None,
            }),
            body: Some(Body { data: Bytes::from_static(b"payload") }),
            status: None,
            trailer: Some(Trailer::default()),
            reset: None,
        };
        let json = serde_json::to_string(&rpc).unwrap();
        let back: Rpc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rpc);
    }

    #[test]
    fn zero_status_is_not_an_error() {
        let rpc = Rpc {
            id: 0,
            status: Some(ResponseStatus { code: 0, ..Default::default() }),
            ..Default::default()
        };
        assert!(rpc.error_status().is_none());

        let rpc = Rpc {
            id: 0,
            status: Some(ResponseStatus {
                code: Code::Aborted.into(),
                message: "gone".to_owned(),
                details: vec![],
            }),
            ..Default::default()
        };
        assert_eq!(rpc.error_status().unwrap().code, 10);
    }
}
