//! Header compression collaborator.
//!
//! The session only ever sees decoded [`HeaderBlock`]s; the codec behind
//! [`HeaderCodec`] owns the HPACK dynamic tables for one connection.

use crate::base::neterror::NetError;
use crate::spdy::headers::HeaderBlock;
use bytes::Bytes;

/// Encoder/decoder pair for one HTTP/2 connection.
pub trait HeaderCodec: Send {
    /// Compress a header list into a header block fragment.
    fn encode(&mut self, headers: &HeaderBlock) -> Bytes;

    /// Decompress a complete header block.
    /// Any failure is a connection-level `Http2CompressionError`.
    fn decode(&mut self, block: &[u8]) -> Result<HeaderBlock, NetError>;

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE to the encoder.
    fn set_encoder_table_size(&mut self, _size: u32) {}
}

/// [`HeaderCodec`] backed by the `hpack` crate.
pub struct HpackCodec {
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
}

impl Default for HpackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackCodec {
    pub fn new() -> Self {
        Self { encoder: hpack::Encoder::new(), decoder: hpack::Decoder::new() }
    }
}

impl HeaderCodec for HpackCodec {
    fn encode(&mut self, headers: &HeaderBlock) -> Bytes {
        Bytes::from(self.encoder.encode(headers.iter().map(|(n, v)| (n.as_bytes(), v))))
    }

    fn decode(&mut self, block: &[u8]) -> Result<HeaderBlock, NetError> {
        self.decoder
            .decode(block)
            .map(|list| list.into_iter().collect())
            .map_err(|e| {
                tracing::debug!(error = ?e, "HPACK decode failed");
                NetError::Http2CompressionError
            })
    }
}
