use serde::Serialize;

use super::{calldata, CommitmentError, MultisigTransaction, Operation, TransactionPayload};
use crate::abiencode::{
    as_bytes,
    types::{Address, Hash, U256},
};

/// Pays out the outcome of an installed app, as interpreted by `interpreter`,
/// once the app is finalized on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalTransactionCommitment {
    pub challenge_registry: Address,
    pub delegate_target: Address,
    pub free_balance_identity_hash: Hash,
    pub app_identity_hash: Hash,
    pub interpreter: Address,
    /// ABI encoded interpreter parameters.
    pub interpreter_params: Vec<u8>,
}

#[derive(Serialize)]
struct Args<'a>(
    Address,
    Hash,
    Hash,
    Address,
    #[serde(with = "as_bytes")] &'a [u8],
);

impl TransactionPayload for ConditionalTransactionCommitment {
    fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError> {
        Ok(MultisigTransaction {
            to: self.delegate_target,
            value: U256::zero(),
            data: calldata(
                "executeEffectOfInterpretedAppOutcome(address,bytes32,bytes32,address,bytes)",
                &Args(
                    self.challenge_registry,
                    self.free_balance_identity_hash,
                    self.app_identity_hash,
                    self.interpreter,
                    &self.interpreter_params,
                ),
            )?,
            operation: Operation::DelegateCall,
        })
    }
}
