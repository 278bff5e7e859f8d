//! Read-only view of the chain, used by middlewares and app logic.

use thiserror::Error;

use crate::abiencode::types::{Address, U256};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain query failed: {0}")]
    Query(String),
}

/// Chain queries are answered from a local view (a cache kept current by a
/// block subscription, or a test double) and are therefore synchronous.
pub trait ChainReader: Send + Sync {
    /// Balance of `holder` in `asset_id`. The zero asset id is the chain's
    /// native coin.
    fn balance_of(&self, asset_id: Address, holder: Address) -> Result<U256, ChainError>;

    fn block_number(&self) -> Result<u64, ChainError>;

    /// Total of `asset_id` the multisig has paid out through withdrawals so far.
    fn total_amount_withdrawn(
        &self,
        _multisig_address: Address,
        _asset_id: Address,
    ) -> Result<U256, ChainError> {
        Ok(U256::zero())
    }
}
