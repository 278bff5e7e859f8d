use serde::Serialize;

use super::{calldata, CommitmentError, MultisigTransaction, Operation, TransactionPayload};
use crate::abiencode::types::{Address, U256};

/// Moves `amount` of `asset_id` out of the multisig to `recipient`. The zero
/// asset id is the chain's native coin, anything else an ERC20 token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawCommitment {
    pub recipient: Address,
    pub asset_id: Address,
    pub amount: U256,
}

#[derive(Serialize)]
struct Transfer(Address, U256);

impl TransactionPayload for WithdrawCommitment {
    fn transaction_details(&self) -> Result<MultisigTransaction, CommitmentError> {
        if self.asset_id.is_zero() {
            return Ok(MultisigTransaction {
                to: self.recipient,
                value: self.amount,
                data: Vec::new(),
                operation: Operation::Call,
            });
        }
        Ok(MultisigTransaction {
            to: self.asset_id,
            value: U256::zero(),
            data: calldata(
                "transfer(address,uint256)",
                &Transfer(self.recipient, self.amount),
            )?,
            operation: Operation::Call,
        })
    }
}
