//! Error type and Return values used by the Serialization and the Decoder.

use serde::ser;
use thiserror::Error;

/// Represents all possible errors that can happen while encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The struct contains a type that is not directly representable in
    /// Solidity types.
    ///
    /// For example floating point numbers, enums and maps. Instead of picking
    /// some representation on our own (and forcing it on the Solidity side),
    /// implement a custom serialize method for those types.
    #[error("type is not representable in abi encoding: {0}")]
    TypeNotRepresentable(&'static str),
    /// Raised through [ser::Error::custom] by a `Serialize` implementation.
    #[error("custom serialization error: {0}")]
    Custom(String),
    /// The input ended before the value could be read.
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEnd { offset: usize },
    /// A slot does not hold a valid value for the requested type, e.g. an
    /// address with non-zero padding.
    #[error("invalid {0} in abi encoded input")]
    InvalidValue(&'static str),
    /// A fixed size value was built from a slice of the wrong length.
    #[error("expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom(msg.to_string())
    }
}

/// Alias for `Result` using the [Error] returned by the Serializer.
pub type Result<T> = core::result::Result<T, Error>;
