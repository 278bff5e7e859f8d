//! Errors a protocol run can end with.

use thiserror::Error;

use crate::{
    abiencode::{
        self,
        types::{Address, Hash},
    },
    channel::ChannelError,
    commitment::CommitmentError,
    middleware::Phase,
    protocol::{ProcessId, ProtocolName},
    sig,
    store::StoreError,
    wire::TransportError,
};

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A middleware refused the change. Nothing was written.
    #[error("{phase:?} rejected by middleware: {reason}")]
    ValidationRejected { phase: Phase, reason: String },

    /// A counterparty signature does not recover to the owner of its slot.
    #[error("counterparty signature rejected: {0}")]
    SignatureMismatch(CommitmentError),

    /// No reply within the configured timeout. The singly signed commitment
    /// persisted before sending stays in the store.
    #[error("{protocol} run {process_id} timed out waiting for message {seq}")]
    ProtocolTimeout {
        protocol: ProtocolName,
        process_id: ProcessId,
        seq: u32,
    },

    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),

    /// The app logic refused the action or outcome.
    #[error("app {app_identity_hash} rejected the transition: {reason}")]
    StateTransitionRejected {
        app_identity_hash: Hash,
        reason: String,
    },

    #[error("no channel with multisig {0}")]
    ChannelNotFound(Address),

    #[error("channel with multisig {0} already exists")]
    ChannelAlreadyExists(Address),

    #[error("app {0} not found")]
    AppNotFound(Hash),

    #[error("no app logic registered for app definition {0}")]
    UnknownApp(Address),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Commitment(CommitmentError),

    #[error(transparent)]
    Encoding(#[from] abiencode::Error),

    #[error("signer failure: {0}")]
    Signer(#[from] sig::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The runner resumed a flow with a value it does not accept at its
    /// current step.
    #[error("{protocol} flow resumed with unexpected input")]
    UnexpectedResume { protocol: ProtocolName },

    #[error("sync reply does not cover the local channel: {0}")]
    SyncMismatch(String),
}

impl ProtocolError {
    /// Only a timeout leaves the channel in a state where simply running the
    /// protocol again makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProtocolError::ProtocolTimeout { .. })
    }
}

impl From<CommitmentError> for ProtocolError {
    fn from(err: CommitmentError) -> Self {
        match err {
            CommitmentError::SignatureMismatch { .. }
            | CommitmentError::InvalidSignature { .. } => ProtocolError::SignatureMismatch(err),
            err => ProtocolError::Commitment(err),
        }
    }
}
