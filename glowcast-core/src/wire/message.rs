//! Message bodies carried inside the length-prefixed envelope.
//!
//! Bodies are bincode-encoded. Image planes are borrowed from the captured
//! frame when encoding and from the receive buffer when decoding, so the
//! only copy on the send path is the one into the outgoing body, which
//! [`Request::encode_into`] writes into a reusable buffer.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize, Serializer};

use crate::capture::types::Nv12Frame;
use crate::error::WireError;

/// Priority announced in every registration.
pub const REGISTER_PRIORITY: i32 = 150;

/// `ImageData::duration` sentinel for "unbounded".
pub const DURATION_UNBOUNDED: i32 = -1;

/// Default origin string identifying this client to the sink.
pub const DEFAULT_ORIGIN: &str = "glowcast";

// ── PixelFormat ──────────────────────────────────────────────────

/// Layout of the image planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar 4:2:0, luma plane followed by interleaved U/V.
    Nv12,
}

// ── ImageData ────────────────────────────────────────────────────

/// One planar image record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData<'a> {
    #[serde(borrow, serialize_with = "plane")]
    pub data_y: Cow<'a, [u8]>,
    #[serde(borrow, serialize_with = "plane")]
    pub data_uv: Cow<'a, [u8]>,
    pub width: i32,
    pub height: i32,
    pub stride_y: i32,
    pub stride_uv: i32,
    pub format: PixelFormat,
    pub duration: i32,
}

/// Serialise a plane as one byte string instead of a sequence of `u8`s.
fn plane<S: Serializer>(data: &Cow<'_, [u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(data)
}

// ── Request ──────────────────────────────────────────────────────

/// Client → sink message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request<'a> {
    /// Ask the sink to accept frames from `origin`.
    Register {
        priority: i32,
        #[serde(borrow)]
        origin: Cow<'a, str>,
    },
    /// One captured frame.
    Image(#[serde(borrow)] ImageData<'a>),
}

impl<'a> Request<'a> {
    pub fn register(origin: &'a str) -> Self {
        Request::Register {
            priority: REGISTER_PRIORITY,
            origin: Cow::Borrowed(origin),
        }
    }

    /// An image request borrowing the planes of `frame`. Strides equal the
    /// width because frames carry no row padding.
    pub fn image(frame: &'a Nv12Frame) -> Self {
        let width = frame.width() as i32;
        Request::Image(ImageData {
            data_y: Cow::Borrowed(frame.y()),
            data_uv: Cow::Borrowed(frame.uv()),
            width,
            height: frame.height() as i32,
            stride_y: width,
            stride_uv: width,
            format: PixelFormat::Nv12,
            duration: DURATION_UNBOUNDED,
        })
    }

    /// Encode the body (without the length prefix).
    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    /// Encode the body into `buf` and split it off.
    ///
    /// Once the returned `Bytes` has been written and dropped, the next call
    /// reuses the same allocation.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<Bytes, WireError> {
        buf.clear();
        buf.reserve(bincode::serialized_size(self)? as usize);
        bincode::serialize_into((&mut *buf).writer(), self)?;
        Ok(buf.split().freeze())
    }

    /// Decode a body received from the envelope layer.
    pub fn decode(body: &'a [u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(body)?)
    }
}

// ── Reply ────────────────────────────────────────────────────────

/// Sink → client message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Non-zero when the registration was granted.
    pub registered: i32,
    /// Opaque video-mode indicator; not interpreted by the client.
    pub video: i32,
    /// Set when the sink rejects the stream.
    pub error: Option<String>,
}

impl Reply {
    pub fn registered() -> Self {
        Self {
            registered: 1,
            ..Self::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered != 0
    }

    /// The error text, when present and non-empty.
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_into_reuses_released_buffer() {
        let frame = Nv12Frame::from_planes(8, 4, vec![3; 32], vec![5; 16]).unwrap();
        let request = Request::image(&frame);
        let mut scratch = BytesMut::new();

        let first = request.encode_into(&mut scratch).unwrap();
        assert_eq!(first, request.encode().unwrap());
        let addr = first.as_ptr();
        drop(first);

        let second = request.encode_into(&mut scratch).unwrap();
        assert_eq!(second.as_ptr(), addr);
        assert!(matches!(Request::decode(&second).unwrap(), Request::Image(_)));
    }

    #[test]
    fn image_request_describes_frame() {
        let frame = Nv12Frame::from_planes(4, 2, vec![7; 8], vec![9; 4]).unwrap();
        let body = Request::image(&frame).encode().unwrap();

        let Request::Image(image) = Request::decode(&body).unwrap() else {
            panic!("expected image request");
        };
        assert_eq!(image.data_y.as_ref(), frame.y());
        assert_eq!(image.data_uv.as_ref(), frame.uv());
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!((image.stride_y, image.stride_uv), (4, 4));
        assert_eq!(image.format, PixelFormat::Nv12);
        assert_eq!(image.duration, DURATION_UNBOUNDED);
    }

    #[test]
    fn decoded_planes_borrow_the_body() {
        let frame = Nv12Frame::new(2, 2).unwrap();
        let body = Request::image(&frame).encode().unwrap();
        let Request::Image(image) = Request::decode(&body).unwrap() else {
            panic!("expected image request");
        };
        assert!(matches!(image.data_y, Cow::Borrowed(_)));
    }

    #[test]
    fn register_carries_fixed_priority() {
        let body = Request::register("living-room").encode().unwrap();
        match Request::decode(&body).unwrap() {
            Request::Register { priority, origin } => {
                assert_eq!(priority, REGISTER_PRIORITY);
                assert_eq!(origin, "living-room");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reply_error_text_ignores_empty_string() {
        assert_eq!(Reply::rejected("").error_text(), None);
        assert_eq!(Reply::rejected("busy").error_text(), Some("busy"));
        assert!(Reply::registered().is_registered());
        assert!(!Reply::default().is_registered());
    }

    #[test]
    fn truncated_body_is_an_encoding_error() {
        let body = Reply::registered().encode().unwrap();
        let err = Reply::decode(&body[..2]).unwrap_err();
        assert!(matches!(err, WireError::Encoding(_)));
    }
}
