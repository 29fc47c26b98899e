//! The decoder interface: turning a record's opaque payload into an in-memory trace
//! batch. Parsing itself lives outside this crate's scope; only the trait the section
//! writer drives is defined here.

use std::fmt::Debug;
use thiserror::Error;

/// A batch of decoded trace data ready to be pushed into a tenant's section.
///
/// Opaque to this crate: the section writer only needs to move it into the per-tenant
/// WAL-backed aggregator, not interpret its contents.
#[derive(Debug, Clone, Default)]
pub struct TraceRequest {
    /// The number of individual trace objects this request contains, used for block
    /// metadata (`Block::object_count`) and the no-loss property test.
    pub object_count: u64,
    /// The decoded payload bytes, opaque to this crate.
    pub payload: Vec<u8>,
}

/// A record payload could not be decoded into a [`TraceRequest`].
#[derive(Debug, Error)]
#[error("failed to decode record payload: {0}")]
pub struct DecodeError(pub String);

/// Converts a record's payload into a [`TraceRequest`].
///
/// Implementations may keep internal scratch buffers; [`Decoder::reset`] is called
/// between unrelated decode calls so those buffers can be reused without leaking state.
pub trait Decoder: Debug + Send + 'static {
    /// Decode `bytes` into a [`TraceRequest`].
    fn decode(&mut self, bytes: &[u8]) -> Result<TraceRequest, DecodeError>;

    /// Reset any internal scratch state before the next unrelated decode call.
    fn reset(&mut self);
}
