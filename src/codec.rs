//! Per-method message codecs and the method descriptor that carries them.

use std::{marker::PhantomData, sync::Arc};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Cap on a single serialized message body, enforced on both encode and
/// decode.
pub const MAX_MESSAGE_SIZE: usize = 10_000_000;

/// Error produced while encoding or decoding a message payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// (De)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The serialized message exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message length {size} exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Observed serialized length.
        size: usize,
        /// The configured cap.
        limit: usize,
    },
}

/// Serializes and deserializes one message type.
///
/// The RPC framework supplies a codec pair per method; this crate ships
/// [`JsonCodec`] for serde-modelled messages.
pub trait Codec<T>: Send + Sync {
    /// Serializes `value` into a payload, enforcing the byte cap.
    fn encode(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Deserializes a payload, enforcing the byte cap.
    fn decode(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec for any serde-modelled message.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Bytes, CodecError> {
        let data = serde_json::to_vec(value)?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge { size: data.len(), limit: MAX_MESSAGE_SIZE });
        }
        Ok(data.into())
    }

    fn decode(&self, data: &[u8]) -> Result<T, CodecError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge { size: data.len(), limit: MAX_MESSAGE_SIZE });
        }
        Ok(serde_json::from_slice(data)?)
    }
}

/// Describes one RPC method: its service, its name, and the codec pair for
/// its input and output message types.
pub struct Method<I, O> {
    service: &'static str,
    name: &'static str,
    input: Arc<dyn Codec<I>>,
    output: Arc<dyn Codec<O>>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Method<I, O> {
    fn clone(&self) -> Self {
        Self {
            service: self.service,
            name: self.name,
            input: Arc::clone(&self.input),
            output: Arc::clone(&self.output),
            _marker: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for Method<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method").field("service", &self.service).field("name", &self.name).finish()
    }
}

impl<I, O> Method<I, O> {
    /// Builds a method descriptor with an explicit codec pair.
    pub fn new(
        service: &'static str,
        name: &'static str,
        input: impl Codec<I> + 'static,
        output: impl Codec<O> + 'static,
    ) -> Self {
        Self {
            service,
            name,
            input: Arc::new(input),
            output: Arc::new(output),
            _marker: PhantomData,
        }
    }

    /// The service type name.
    pub fn service(&self) -> &'static str {
        self.service
    }

    /// The method name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The full method path, `/<service>/<method>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.name)
    }

    pub(crate) fn input_codec(&self) -> &Arc<dyn Codec<I>> {
        &self.input
    }

    pub(crate) fn output_codec(&self) -> &Arc<dyn Codec<O>> {
        &self.output
    }
}

impl<I, O> Method<I, O>
where
    JsonCodec: Codec<I> + Codec<O>,
{
    /// Builds a method descriptor using [`JsonCodec`] on both sides.
    pub fn json(service: &'static str, name: &'static str) -> Self {
        Self::new(service, name, JsonCodec, JsonCodec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Msg {
        value: i64,
    }

    #[test]
    fn method_path() {
        let method = Method::<Msg, Msg>::json("test.v1.TestService", "Echo");
        assert_eq!(method.path(), "/test.v1.TestService/Echo");
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec;
        let data = codec.encode(&Msg { value: 12 }).unwrap();
        let back: Msg = codec.decode(&data).unwrap();
        assert_eq!(back, Msg { value: 12 });
    }

    #[test]
    fn decode_rejects_oversized_payloads() {
        let codec = JsonCodec;
        let oversized = vec![b' '; MAX_MESSAGE_SIZE + 1];
        let err = Codec::<Msg>::decode(&codec, &oversized).unwrap_err();
        assert!(matches!(err, CodecError::MessageTooLarge { .. }));
    }

    #[test]
    fn encode_rejects_oversized_payloads() {
        let codec = JsonCodec;
        let big = "x".repeat(MAX_MESSAGE_SIZE);
        let err = codec.encode(&big).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MessageTooLarge { limit: MAX_MESSAGE_SIZE, .. }
        ));
    }
}
