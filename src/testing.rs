//! Fixtures shared by the unit tests.

use std::{collections::HashMap, sync::Mutex};

use crate::{
    abiencode::{
        self,
        de::Decoder,
        types::{Address, Hash, U256},
    },
    apps::AppLogic,
    chain::{ChainError, ChainReader},
    channel::{
        multisig_address, AppInstance, AppParams, CoinTransfer, OutcomeInterpreterParams,
        StateChannel,
    },
    config::NetworkContext,
    sig::{Identifier, Signer},
};

pub const COUNTER_APP: Address = Address([0xc0; 20]);

pub fn network() -> NetworkContext {
    NetworkContext {
        chain_id: U256::from(1337),
        challenge_registry: Address([0x01; 20]),
        conditional_transaction_delegate_target: Address([0x02; 20]),
        identity_app: Address([0x03; 20]),
        multi_asset_multi_party_coin_transfer_interpreter: Address([0x04; 20]),
        single_asset_two_party_coin_transfer_interpreter: Address([0x05; 20]),
        proxy_factory: Address([0x06; 20]),
        proxy_init_code_hash: Hash([0x07; 32]),
    }
}

/// Deterministic signer, `n` must be non-zero.
pub fn signer(n: u8) -> Signer {
    Signer::from_bytes(&[n; 32]).unwrap()
}

pub fn channel_between(initiator: &Signer, responder: &Signer) -> StateChannel {
    let owners = {
        let mut owners = [initiator.address(), responder.address()];
        owners.sort();
        owners
    };
    let multisig = multisig_address(&network(), &owners).unwrap();
    StateChannel::setup(
        &network(),
        multisig,
        *initiator.identifier(),
        *responder.identifier(),
    )
    .unwrap()
}

pub fn counter_state(count: u64) -> Vec<u8> {
    abiencode::to_vec(&U256::from(count)).unwrap()
}

pub fn counter_params(
    initiator: Identifier,
    responder: Identifier,
    count: u64,
) -> AppParams {
    AppParams {
        app_definition: COUNTER_APP,
        initial_state: counter_state(count),
        initiator_identifier: initiator,
        responder_identifier: responder,
        initiator_deposit: U256::zero(),
        initiator_deposit_asset_id: Address::ZERO,
        responder_deposit: U256::zero(),
        responder_deposit_asset_id: Address::ZERO,
        default_timeout: 100,
        state_timeout: 10,
        interpreter_params: OutcomeInterpreterParams::default(),
    }
}

/// A counter app proposal in `channel`, not yet added to it.
pub fn counter_app(
    channel: &StateChannel,
    initiator: Identifier,
    responder: Identifier,
    count: u64,
) -> AppInstance {
    AppInstance::new(
        channel.multisig_address,
        channel.next_app_seq_no(),
        counter_params(initiator, responder, count),
    )
    .unwrap()
}

/// Chain view whose balances and block number the test sets.
#[derive(Debug, Default)]
pub struct MockChain {
    balances: Mutex<HashMap<(Address, Address), U256>>,
    block_number: Mutex<u64>,
}

impl MockChain {
    pub fn set_balance(&self, asset_id: Address, holder: Address, amount: U256) {
        self.balances.lock().unwrap().insert((asset_id, holder), amount);
    }

    pub fn set_block_number(&self, block: u64) {
        *self.block_number.lock().unwrap() = block;
    }
}

impl ChainReader for MockChain {
    fn balance_of(&self, asset_id: Address, holder: Address) -> Result<U256, ChainError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(asset_id, holder))
            .copied()
            .unwrap_or_default())
    }

    fn block_number(&self) -> Result<u64, ChainError> {
        Ok(*self.block_number.lock().unwrap())
    }
}

/// State is a single uint256, an action is the (non-zero) amount to add.
#[derive(Debug, Default)]
pub struct CounterApp;

fn decode_count(data: &[u8]) -> Result<U256, String> {
    Decoder::new(data).u256().map_err(|e| e.to_string())
}

impl AppLogic for CounterApp {
    fn validate_action(&self, _app: &AppInstance, action: &[u8]) -> Result<(), String> {
        if decode_count(action)?.is_zero() {
            return Err("increment by zero".to_string());
        }
        Ok(())
    }

    fn apply_action(
        &self,
        app: &AppInstance,
        action: &[u8],
        _chain: &dyn ChainReader,
    ) -> Result<Vec<u8>, String> {
        let count = decode_count(&app.latest_state)?
            .checked_add(decode_count(action)?)
            .ok_or_else(|| "counter overflow".to_string())?;
        abiencode::to_vec(&count).map_err(|e| e.to_string())
    }

    fn compute_outcome(
        &self,
        app: &AppInstance,
        _chain: &dyn ChainReader,
    ) -> Result<[CoinTransfer; 2], String> {
        let [initiator, responder] = app.participants();
        Ok([
            CoinTransfer::new(initiator, app.initiator_deposit),
            CoinTransfer::new(responder, app.responder_deposit),
        ])
    }
}
