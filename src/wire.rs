//! Transport of protocol messages.
//!
//! The runner hands [ProtocolMessage]s to a [Transport]. The
//! [ProtoBufEncodingLayer] implements it on top of a raw [BytesBus] by
//! encoding each message as a length prefixed protobuf frame.

mod encoding;
pub mod proto;

use core::fmt::Debug;

use thiserror::Error;

pub use encoding::{decode_message, encode_message, ProtoBufEncodingLayer};

use crate::{messages::ProtocolMessage, protocol::ProtocolName, sig::Identifier};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no route to {0}")]
    Unreachable(Identifier),
    #[error("transport closed")]
    Closed,
    #[error("message of {0} bytes does not fit in a frame")]
    TooLarge(usize),
    #[error(transparent)]
    Encode(#[from] prost::EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Protobuf(#[from] prost::DecodeError),
    #[error("frame announces {announced} bytes, got {got}")]
    FrameLength { announced: usize, got: usize },
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid field {0}")]
    InvalidField(&'static str),
    #[error("unknown protocol {0}")]
    UnknownProtocol(u32),
    #[error("{0} message carries params of another protocol")]
    ProtocolMismatch(ProtocolName),
}

/// Fire-and-forget delivery of messages to the counterparty. Delivering
/// inbound messages is up to the caller, through
/// [crate::runner::ProtocolRunner::handle_message].
pub trait Transport: Send + Sync {
    fn send(&self, msg: ProtocolMessage) -> Result<(), TransportError>;
}

/// Low-level abstraction over the network connection to other participants.
pub trait BytesBus: Debug + Send + Sync {
    fn send_to(&self, recipient: &Identifier, frame: &[u8]) -> Result<(), TransportError>;
}
