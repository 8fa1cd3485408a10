//! Length-prefixed frame codec
//!
//! Each frame is a 4-byte big-endian length followed by a bincode payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::messages::{ClientFrame, ServerFrame};

/// Maximum frame payload (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Frame codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Encodes [`ClientFrame`]s and decodes [`ServerFrame`]s (client side)
#[derive(Debug, Default)]
pub struct ClientCodec;

impl ClientCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ClientCodec {
    type Item = ServerFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

impl Encoder<ClientFrame> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

/// Encodes [`ServerFrame`]s and decodes [`ClientFrame`]s (server side)
#[derive(Debug, Default)]
pub struct ServerCodec;

impl ServerCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ServerCodec {
    type Item = ClientFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

impl Encoder<ServerFrame> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

fn decode_frame<T: serde::de::DeserializeOwned>(src: &mut BytesMut) -> Result<Option<T>, CodecError> {
    if src.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if src.len() < LENGTH_PREFIX + len {
        src.reserve(LENGTH_PREFIX + len - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX);
    let payload = src.split_to(len);
    Ok(Some(bincode::deserialize(&payload)?))
}

fn encode_frame<T: serde::Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let payload = bincode::serialize(item)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    dst.reserve(LENGTH_PREFIX + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(&payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Guid, PropertyAddress, Scope};
    use crate::error::ErrorKind;
    use crate::protocol::messages::{Request, Response, WireError};

    #[test]
    fn test_client_frame_through_server_codec() {
        let frame = ClientFrame {
            id: 7,
            request: Request::GetProperties {
                guid: Guid(42),
                match_address: PropertyAddress::wildcard(),
                subscribe: true,
            },
        };

        let mut buf = BytesMut::new();
        ClientCodec::new().encode(frame.clone(), &mut buf).unwrap();
        let decoded = ServerCodec::new().decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_error_reply_keeps_kind() {
        let frame = ServerFrame::Reply {
            id: 1,
            result: Err(WireError::new(ErrorKind::NotOwner, "Client(2) does not own stream")),
        };

        let mut buf = BytesMut::new();
        ServerCodec::new().encode(frame.clone(), &mut buf).unwrap();
        let decoded = ClientCodec::new().decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_partial_frame() {
        let frame = ServerFrame::Reply {
            id: 3,
            result: Ok(Response::Done),
        };
        let mut buf = BytesMut::new();
        ServerCodec::new().encode(frame.clone(), &mut buf).unwrap();

        let mut codec = ClientCodec::new();
        let mut partial = buf.split_to(3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(frame));
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        let mut client = ClientCodec::new();
        client
            .encode(
                ClientFrame {
                    id: 1,
                    request: Request::Connect { pid: 10 },
                },
                &mut buf,
            )
            .unwrap();
        client
            .encode(
                ClientFrame {
                    id: 2,
                    request: Request::StopStream {
                        guid: Guid(1),
                        scope: Scope::Input,
                        element: 0,
                    },
                },
                &mut buf,
            )
            .unwrap();

        let mut server = ServerCodec::new();
        assert_eq!(server.decode(&mut buf).unwrap().unwrap().id, 1);
        assert_eq!(server.decode(&mut buf).unwrap().unwrap().id, 2);
        assert!(server.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        let result = ServerCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }
}
