//! Durable state: channels with their apps, and commitments.
//!
//! Every method is atomic for the entity it touches. Writes that take a
//! channel store that snapshot as a whole, the app argument names the app the
//! write is about and is checked against what is stored.

use thiserror::Error;

use crate::{
    abiencode::types::{Address, Hash},
    channel::{AppInstance, StateChannel},
    commitment::Commitment,
    sig::Identifier,
};

mod memory;

pub use memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("channel {0} already exists")]
    ChannelExists(Address),
    #[error("channel {0} not found")]
    ChannelNotFound(Address),
    #[error("app {0} already exists")]
    AppExists(Hash),
    #[error("app {0} not found")]
    AppNotFound(Hash),
    #[error("{kind} commitment for {key} already exists")]
    CommitmentExists { kind: &'static str, key: String },
    #[error("{kind} commitment for {key} not found")]
    CommitmentNotFound { kind: &'static str, key: String },
    #[error("commitment does not belong to {0}")]
    CommitmentMismatch(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("storage backend: {0}")]
    Backend(String),
}

pub trait Store: Send + Sync {
    fn schema_version(&self) -> Result<u32, StoreError>;
    fn update_schema_version(&self, version: u32) -> Result<(), StoreError>;

    fn get_state_channel(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<StateChannel>, StoreError>;
    fn get_state_channel_by_owners(
        &self,
        owners: &[Identifier; 2],
    ) -> Result<Option<StateChannel>, StoreError>;
    /// The channel containing the app, proposal or free balance.
    fn get_state_channel_by_app_identity_hash(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<StateChannel>, StoreError>;

    fn create_state_channel(&self, channel: &StateChannel) -> Result<(), StoreError>;
    /// Replace the stored channel wholesale, e.g. with the result of a sync.
    fn sync_state_channel(&self, channel: &StateChannel) -> Result<(), StoreError>;

    fn get_app_instance(&self, identity_hash: &Hash) -> Result<Option<AppInstance>, StoreError>;
    fn get_app_proposal(&self, identity_hash: &Hash) -> Result<Option<AppInstance>, StoreError>;
    fn get_free_balance(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<AppInstance>, StoreError>;

    fn create_app_proposal(
        &self,
        channel: &StateChannel,
        proposal: &AppInstance,
    ) -> Result<(), StoreError>;
    fn remove_app_proposal(
        &self,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(), StoreError>;
    fn create_app_instance(
        &self,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError>;
    fn update_app_instance(
        &self,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError>;
    /// Removes the app together with its set-state and conditional
    /// transaction commitments.
    fn remove_app_instance(
        &self,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(), StoreError>;
    fn update_free_balance(
        &self,
        channel: &StateChannel,
        free_balance: &AppInstance,
    ) -> Result<(), StoreError>;

    fn get_setup_commitment(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<Commitment>, StoreError>;
    fn create_setup_commitment(
        &self,
        multisig_address: &Address,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;

    /// All set-state commitments of an app, ordered by version.
    fn get_set_state_commitments(
        &self,
        identity_hash: &Hash,
    ) -> Result<Vec<Commitment>, StoreError>;
    fn create_set_state_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;
    /// Insert or replace the commitment for its version.
    fn update_set_state_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;
    /// Removing a version that does not exist is not an error.
    fn remove_set_state_commitment(
        &self,
        identity_hash: &Hash,
        version_number: u64,
    ) -> Result<(), StoreError>;

    fn get_conditional_transaction_commitment(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<Commitment>, StoreError>;
    fn create_conditional_transaction_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;
    fn update_conditional_transaction_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;

    fn get_withdrawal_commitment(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<Commitment>, StoreError>;
    fn create_withdrawal_commitment(
        &self,
        multisig_address: &Address,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;
    fn update_withdrawal_commitment(
        &self,
        multisig_address: &Address,
        commitment: &Commitment,
    ) -> Result<(), StoreError>;
}
