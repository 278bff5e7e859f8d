//! Off-chain engine for two-party counterfactual state channels.
//!
//! The [protocol] flows (setup, propose, install, uninstall, take action and
//! sync) are resumable state machines driven by the [runner]. Everything the
//! engine talks to is behind a trait: the [store::Store], the
//! [wire::Transport], the [sig::ChannelSigner] and the [chain::ChainReader].

pub mod abiencode {
    mod error;
    mod hashing;
    mod ser;

    pub mod as_bytes;
    pub mod de;
    pub mod types;

    pub use de::Decoder;
    pub use error::{Error, Result};
    pub use hashing::{args_to_hash, keccak256, to_hash, Keccak256Writer};
    pub use ser::{args_to_vec, args_to_writer, to_vec, to_writer, Serializer, Writer};

    #[cfg(test)]
    mod tests;
}

pub mod apps;
pub mod chain;
pub mod channel;
pub mod commitment;
pub mod config;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod protocol;
pub mod runner;
pub mod sig;
pub mod store;
pub mod wire;

#[cfg(test)]
mod testing;

pub use abiencode::types::{Address, Hash};
pub use error::ProtocolError;
pub use runner::{ProtocolEvent, ProtocolRunner};
