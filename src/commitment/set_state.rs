use serde::Serialize;

use super::{calldata, CommitmentError, MultisigTransaction, Operation, TransactionPayload};
use crate::abiencode::types::{Address, Hash, U256};

/// Registers a version of an app's state with the challenge registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStateCommitment {
    pub challenge_registry: Address,
    pub app_identity_hash: Hash,
    pub app_state_hash: Hash,
    pub version_number: u64,
    pub state_timeout: u64,
}

#[derive(Serialize)]
struct Args(Hash, Hash, u64, u64);

impl TransactionPayload for SetStateCommitment {
    fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError> {
        Ok(MultisigTransaction {
            to: self.challenge_registry,
            value: U256::zero(),
            data: calldata(
                "setState(bytes32,bytes32,uint256,uint256)",
                &Args(
                    self.app_identity_hash,
                    self.app_state_hash,
                    self.version_number,
                    self.state_timeout,
                ),
            )?,
            operation: Operation::Call,
        })
    }
}
