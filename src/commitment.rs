//! Commitments: multisig transactions both owners sign off-chain and either
//! of them can submit later.
//!
//! The owners sign `keccak256(abi.encode(0x19, multisig, to, value,
//! keccak256(data), operation))`, the same preimage the multisig contract
//! rebuilds before checking the signatures. Signature slot `i` belongs to
//! owner `i`.

use serde::Serialize;
use thiserror::Error;

use crate::{
    abiencode::{
        self, as_bytes, keccak256,
        types::{Address, Bytes1, Hash, Signature, U256},
    },
    channel::{AppInstance, StateChannel},
    config::NetworkContext,
    sig,
};

mod conditional;
mod set_state;
mod setup;
mod withdraw;


pub use conditional::ConditionalTransactionCommitment;
pub use set_state::SetStateCommitment;
pub use setup::SetupCommitment;
pub use withdraw::WithdrawCommitment;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("signature in slot {slot} recovers to {recovered}, expected {expected}")]
    SignatureMismatch {
        slot: usize,
        expected: Address,
        recovered: Address,
    },
    #[error("signature in slot {slot} cannot be recovered: {reason}")]
    InvalidSignature { slot: usize, reason: String },
    #[error("missing signature in slot {0}")]
    MissingSignature(usize),
    #[error("commitment has no signatures")]
    NoSignatures,
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
}

impl Serialize for Operation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

/// The call the multisig performs once the commitment is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub operation: Operation,
}

pub trait TransactionPayload {
    fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError>;
}

/// First 4 bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash.0[0], hash.0[1], hash.0[2], hash.0[3]]
}

/// Calldata for calling `signature` with `args` (a tuple or struct whose
/// fields are the arguments).
pub(crate) fn calldata<T: Serialize>(
    signature: &str,
    args: &T,
) -> Result<Vec<u8>, CommitmentError> {
    let mut data = selector(signature).to_vec();
    abiencode::args_to_writer(args, &mut data)?;
    Ok(data)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitmentKind {
    Setup(SetupCommitment),
    SetState(SetStateCommitment),
    ConditionalTransaction(ConditionalTransactionCommitment),
    Withdraw(WithdrawCommitment),
}

impl TransactionPayload for CommitmentKind {
    fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError> {
        match self {
            CommitmentKind::Setup(c) => c.transaction_details(),
            CommitmentKind::SetState(c) => c.transaction_details(),
            CommitmentKind::ConditionalTransaction(c) => c.transaction_details(),
            CommitmentKind::Withdraw(c) => c.transaction_details(),
        }
    }
}

/// Which checks [Commitment::assert_signatures] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// At least one signature is set. Used right after signing locally, when
    /// the counterparty's signature cannot exist yet.
    PresenceOnly,
    /// Both signatures are set and recover to their slot's owner.
    Full,
}

#[derive(Serialize)]
struct Preimage(Bytes1, Address, Address, U256, Hash, Operation);

#[derive(Serialize)]
#[serde(transparent)]
struct DynBytes<'a> {
    #[serde(with = "as_bytes")]
    value: &'a [u8],
}

#[derive(Serialize)]
struct ExecTransaction<'a>(Address, U256, DynBytes<'a>, Operation, Vec<DynBytes<'a>>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    multisig_address: Address,
    owners: [Address; 2],
    kind: CommitmentKind,
    signatures: [Option<Signature>; 2],
}

impl Commitment {
    pub fn new(multisig_address: Address, owners: [Address; 2], kind: CommitmentKind) -> Self {
        Self {
            multisig_address,
            owners,
            kind,
            signatures: [None, None],
        }
    }

    /// Setup commitment of a channel: makes the multisig pay out according to
    /// the free balance.
    pub fn setup(network: &NetworkContext, channel: &StateChannel) -> Self {
        Self::new(
            channel.multisig_address,
            channel.owner_addresses(),
            CommitmentKind::Setup(SetupCommitment {
                challenge_registry: network.challenge_registry,
                delegate_target: network.conditional_transaction_delegate_target,
                free_balance_identity_hash: channel.free_balance.identity_hash,
                interpreter: network.multi_asset_multi_party_coin_transfer_interpreter,
            }),
        )
    }

    /// Commitment to the latest state of `app`, signed by the app's
    /// participants.
    pub fn set_state(network: &NetworkContext, app: &AppInstance) -> Self {
        Self::new(
            app.multisig_address,
            app.participants(),
            CommitmentKind::SetState(SetStateCommitment {
                challenge_registry: network.challenge_registry,
                app_identity_hash: app.identity_hash,
                app_state_hash: app.state_hash(),
                version_number: app.latest_version_number,
                state_timeout: app.state_timeout,
            }),
        )
    }

    /// Commitment paying out the outcome of an installed app.
    pub fn conditional_transaction(
        network: &NetworkContext,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<Self, CommitmentError> {
        Ok(Self::new(
            channel.multisig_address,
            channel.owner_addresses(),
            CommitmentKind::ConditionalTransaction(ConditionalTransactionCommitment {
                challenge_registry: network.challenge_registry,
                delegate_target: network.conditional_transaction_delegate_target,
                free_balance_identity_hash: channel.free_balance.identity_hash,
                app_identity_hash: app.identity_hash,
                interpreter: network.single_asset_two_party_coin_transfer_interpreter,
                interpreter_params: abiencode::to_vec(&app.interpreter_params)?,
            }),
        ))
    }

    pub fn withdraw(
        channel: &StateChannel,
        recipient: Address,
        asset_id: Address,
        amount: U256,
    ) -> Self {
        Self::new(
            channel.multisig_address,
            channel.owner_addresses(),
            CommitmentKind::Withdraw(WithdrawCommitment {
                recipient,
                asset_id,
                amount,
            }),
        )
    }

    pub fn multisig_address(&self) -> Address {
        self.multisig_address
    }

    pub fn owners(&self) -> &[Address; 2] {
        &self.owners
    }

    pub fn kind(&self) -> &CommitmentKind {
        &self.kind
    }

    /// Identity hash of the app this commitment belongs to, if any.
    pub fn app_identity_hash(&self) -> Option<Hash> {
        match &self.kind {
            CommitmentKind::SetState(c) => Some(c.app_identity_hash),
            CommitmentKind::ConditionalTransaction(c) => Some(c.app_identity_hash),
            CommitmentKind::Setup(_) | CommitmentKind::Withdraw(_) => None,
        }
    }

    /// App version a SetState commitment commits to.
    pub fn version_number(&self) -> Option<u64> {
        match &self.kind {
            CommitmentKind::SetState(c) => Some(c.version_number),
            _ => None,
        }
    }

    pub fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError> {
        self.kind.transaction_details()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CommitmentError> {
        let tx = self.transaction_details()?;
        Ok(abiencode::args_to_vec(&Preimage(
            Bytes1([0x19]),
            self.multisig_address,
            tx.to,
            tx.value,
            keccak256(&tx.data),
            tx.operation,
        ))?)
    }

    pub fn hash_to_sign(&self) -> Result<Hash, CommitmentError> {
        Ok(keccak256(&self.encode()?))
    }

    pub fn signatures(&self) -> &[Option<Signature>; 2] {
        &self.signatures
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }

    /// Set the signatures given for each slot. Every given signature must
    /// recover to the owner of its slot, otherwise nothing is changed.
    pub fn add_signatures(
        &mut self,
        first: Option<Signature>,
        second: Option<Signature>,
    ) -> Result<(), CommitmentError> {
        let hash = self.hash_to_sign()?;
        for (slot, sig) in [first, second].iter().enumerate() {
            if let Some(sig) = sig {
                self.verify_slot(hash, slot, *sig)?;
            }
        }
        if let Some(sig) = first {
            self.signatures[0] = Some(sig);
        }
        if let Some(sig) = second {
            self.signatures[1] = Some(sig);
        }
        Ok(())
    }

    fn verify_slot(&self, hash: Hash, slot: usize, sig: Signature) -> Result<(), CommitmentError> {
        let recovered = sig::recover_signer(hash, sig).map_err(|e| {
            CommitmentError::InvalidSignature {
                slot,
                reason: e.to_string(),
            }
        })?;
        if recovered != self.owners[slot] {
            return Err(CommitmentError::SignatureMismatch {
                slot,
                expected: self.owners[slot],
                recovered,
            });
        }
        Ok(())
    }

    pub fn assert_signatures(&self, verification: Verification) -> Result<(), CommitmentError> {
        if self.signatures.iter().all(Option::is_none) {
            return Err(CommitmentError::NoSignatures);
        }
        if verification == Verification::PresenceOnly {
            return Ok(());
        }
        let hash = self.hash_to_sign()?;
        for (slot, sig) in self.signatures.iter().enumerate() {
            let sig = sig.ok_or(CommitmentError::MissingSignature(slot))?;
            self.verify_slot(hash, slot, sig)?;
        }
        Ok(())
    }

    /// Calldata of the `execTransaction` call that submits this commitment to
    /// the multisig.
    pub fn signed_transaction(&self) -> Result<MultisigTransaction, CommitmentError> {
        let mut signatures = Vec::with_capacity(2);
        for (slot, sig) in self.signatures.iter().enumerate() {
            signatures.push(sig.ok_or(CommitmentError::MissingSignature(slot))?);
        }

        let tx = self.transaction_details()?;
        let data = calldata(
            "execTransaction(address,uint256,bytes,uint8,bytes[])",
            &ExecTransaction(
                tx.to,
                tx.value,
                DynBytes { value: &tx.data },
                tx.operation,
                signatures
                    .iter()
                    .map(|s| DynBytes { value: &s.0 })
                    .collect(),
            ),
        )?;

        Ok(MultisigTransaction {
            to: self.multisig_address,
            value: U256::zero(),
            data,
            operation: Operation::Call,
        })
    }
}
