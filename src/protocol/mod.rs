//! Wire protocol between broker clients and the server
//!
//! Clients send [`ClientFrame`]s carrying a correlation id and a
//! [`Request`]; the server answers each with a [`ServerFrame::Reply`] and
//! interleaves [`ServerFrame::Notification`]s for the connection's
//! subscriptions. Frames travel over [`tokio_util::codec::Framed`] with the
//! codecs in [`codec`].

pub mod codec;
pub mod messages;

pub use codec::{ClientCodec, CodecError, ServerCodec, MAX_FRAME_SIZE};
pub use messages::{ClientFrame, Request, Response, ServerFrame, WireError};
