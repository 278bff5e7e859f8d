use serde::Serialize;

use super::{calldata, CommitmentError, MultisigTransaction, Operation, TransactionPayload};
use crate::abiencode::types::{Address, Hash, U256};

/// Delegate-calls the conditional transaction delegate target, which pays out
/// the free balance through the multi-asset interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCommitment {
    pub challenge_registry: Address,
    pub delegate_target: Address,
    pub free_balance_identity_hash: Hash,
    pub interpreter: Address,
}

#[derive(Serialize)]
struct Args(Address, Hash, Address);

impl TransactionPayload for SetupCommitment {
    fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError> {
        Ok(MultisigTransaction {
            to: self.delegate_target,
            value: U256::zero(),
            data: calldata(
                "executeEffectOfFreeBalance(address,bytes32,address)",
                &Args(
                    self.challenge_registry,
                    self.free_balance_identity_hash,
                    self.interpreter,
                ),
            )?,
            operation: Operation::DelegateCall,
        })
    }
}
