//! Channel and app data model.
//!
//! All types here are plain values. Updates return new values, the protocol
//! flows decide when they are written to the store.

use thiserror::Error;

use crate::{
    abiencode::{
        self,
        types::{Address, Hash, U256},
    },
    sig::Identifier,
};

mod app_instance;
mod free_balance;
mod state_channel;


pub use app_instance::{app_identity_hash, AppInstance, AppParams, OutcomeInterpreterParams};
pub use free_balance::{CoinTransfer, FreeBalanceState};
pub use state_channel::{multisig_address, StateChannel};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("app {0} is not installed")]
    AppNotInstalled(Hash),
    #[error("no proposal for app {0}")]
    ProposalNotFound(Hash),
    #[error("app {0} already exists in the channel")]
    AppAlreadyExists(Hash),
    #[error("{0} is not an owner of the channel")]
    NotAnOwner(Identifier),
    #[error("a channel needs two distinct owners")]
    SelfChannel,
    #[error("{0} has no free balance entry")]
    UnknownParty(Address),
    #[error("free balance of {party} in {token} is {available}, need {required}")]
    InsufficientFreeBalance {
        token: Address,
        party: Address,
        available: U256,
        required: U256,
    },
    #[error("free balance of {party} in {token} overflows")]
    BalanceOverflow { token: Address, party: Address },
    #[error("outcome of app {0} pays out more than its interpreter limit")]
    OutcomeExceedsLimit(Hash),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}
