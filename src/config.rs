//! Runner configuration and the on-chain deployment the commitments target.

use core::time::Duration;

use crate::abiencode::types::{Address, Hash, U256};

/// How long a `SEND_AND_WAIT` waits for the counterparty's reply.
pub const DEFAULT_PROTOCOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Layout version of the records written to the [Store][crate::store::Store].
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Challenge timeout of the free-balance app, in blocks.
pub const FREE_BALANCE_DEFAULT_TIMEOUT: u64 = 172_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROTOCOL_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Chain id and contract addresses of one deployment. Both parties of a
/// channel must use the same context, otherwise they derive different
/// multisig addresses and commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub chain_id: U256,
    pub challenge_registry: Address,
    pub conditional_transaction_delegate_target: Address,
    /// App definition of the free-balance app.
    pub identity_app: Address,
    pub multi_asset_multi_party_coin_transfer_interpreter: Address,
    pub single_asset_two_party_coin_transfer_interpreter: Address,
    pub proxy_factory: Address,
    /// `keccak256` of the multisig proxy creation code, for CREATE2.
    pub proxy_init_code_hash: Hash,
}
