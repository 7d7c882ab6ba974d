use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::WireError;
use crate::wire::message::Reply;

/// Largest body accepted in either direction (64 MiB).
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// The `u32_be length | body` envelope shared by both directions.
pub fn envelope() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Client-side codec: writes pre-encoded request bodies, reads [`Reply`]s.
#[derive(Debug)]
pub struct SinkCodec {
    envelope: LengthDelimitedCodec,
}

impl SinkCodec {
    pub fn new() -> Self {
        Self {
            envelope: envelope(),
        }
    }
}

impl Default for SinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SinkCodec {
    type Item = Reply;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.envelope.decode(src)? {
            Some(body) => Ok(Some(Reply::decode(&body)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Bytes> for SinkCodec {
    type Error = WireError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.envelope.encode(body, dst)?;
        Ok(())
    }
}
