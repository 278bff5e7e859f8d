//! Conditional payment unlocked by revealing the pre-image of a hash before a
//! block deadline.

use serde::Serialize;

use super::AppLogic;
use crate::{
    abiencode::{
        self, keccak256,
        de::Decoder,
        types::{Bytes32, Hash, U256},
    },
    chain::ChainReader,
    channel::{AppInstance, CoinTransfer},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashLockTransferState {
    /// `[sender, receiver]`
    pub coin_transfers: [CoinTransfer; 2],
    pub lock_hash: Hash,
    pub pre_image: Bytes32,
    /// Block number after which the payment can no longer be unlocked.
    pub timelock: U256,
    pub finalized: bool,
}

impl HashLockTransferState {
    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> abiencode::Result<Self> {
        let mut d = Decoder::new(data);
        let sender = CoinTransfer::new(d.address()?, d.u256()?);
        let receiver = CoinTransfer::new(d.address()?, d.u256()?);
        Ok(Self {
            coin_transfers: [sender, receiver],
            lock_hash: d.hash()?,
            pre_image: d.bytes32()?,
            timelock: d.u256()?,
            finalized: d.bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashLockTransferAction {
    pub pre_image: Bytes32,
}

impl HashLockTransferAction {
    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> abiencode::Result<Self> {
        Ok(Self {
            pre_image: Decoder::new(data).bytes32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HashLockTransferApp;

impl HashLockTransferApp {
    fn decode(
        app: &AppInstance,
        action: &[u8],
    ) -> Result<(HashLockTransferState, HashLockTransferAction), String> {
        let state = HashLockTransferState::decode(&app.latest_state).map_err(|e| e.to_string())?;
        let action = HashLockTransferAction::decode(action).map_err(|e| e.to_string())?;
        Ok((state, action))
    }
}

impl AppLogic for HashLockTransferApp {
    fn validate_action(&self, app: &AppInstance, action: &[u8]) -> Result<(), String> {
        let (state, action) = Self::decode(app, action)?;
        if state.finalized {
            return Err("transfer is already finalized".to_string());
        }
        if keccak256(&action.pre_image.0) != state.lock_hash {
            return Err("pre-image does not match the lock hash".to_string());
        }
        Ok(())
    }

    fn apply_action(
        &self,
        app: &AppInstance,
        action: &[u8],
        chain: &dyn ChainReader,
    ) -> Result<Vec<u8>, String> {
        let (state, action) = Self::decode(app, action)?;
        let block = chain.block_number().map_err(|e| e.to_string())?;
        if U256::from(block) >= state.timelock {
            return Err(format!("timelock {} expired at block {}", state.timelock, block));
        }

        let [sender, receiver] = state.coin_transfers;
        let next = HashLockTransferState {
            coin_transfers: [
                CoinTransfer::new(sender.to, U256::zero()),
                CoinTransfer::new(
                    receiver.to,
                    receiver
                        .amount
                        .checked_add(sender.amount)
                        .ok_or_else(|| "transfer amount overflows".to_string())?,
                ),
            ],
            pre_image: action.pre_image,
            finalized: true,
            ..state
        };
        next.encode().map_err(|e| e.to_string())
    }

    /// Unlocked payments go to the receiver, everything else back to the
    /// sender.
    fn compute_outcome(
        &self,
        app: &AppInstance,
        _chain: &dyn ChainReader,
    ) -> Result<[CoinTransfer; 2], String> {
        let state = HashLockTransferState::decode(&app.latest_state).map_err(|e| e.to_string())?;
        Ok(state.coin_transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abiencode::types::Address,
        channel::{AppParams, OutcomeInterpreterParams},
        testing::{channel_between, signer, MockChain},
    };

    fn app(timelock: u64) -> AppInstance {
        let a = signer(1);
        let b = signer(2);
        let channel = channel_between(&a, &b);
        let state = HashLockTransferState {
            coin_transfers: [
                CoinTransfer::new(a.address(), U256::from(10)),
                CoinTransfer::new(b.address(), U256::zero()),
            ],
            lock_hash: keccak256(&[0x5e; 32]),
            pre_image: Bytes32::default(),
            timelock: U256::from(timelock),
            finalized: false,
        };
        AppInstance::new(
            channel.multisig_address,
            1,
            AppParams {
                app_definition: Address([0x4a; 20]),
                initial_state: state.encode().unwrap(),
                initiator_identifier: *a.identifier(),
                responder_identifier: *b.identifier(),
                initiator_deposit: U256::from(10),
                initiator_deposit_asset_id: Address::ZERO,
                responder_deposit: U256::zero(),
                responder_deposit_asset_id: Address::ZERO,
                default_timeout: 0,
                state_timeout: 0,
                interpreter_params: OutcomeInterpreterParams {
                    limit: U256::from(10),
                    token: Address::ZERO,
                },
            },
        )
        .unwrap()
    }

    fn unlock(pre_image: u8) -> Vec<u8> {
        HashLockTransferAction {
            pre_image: Bytes32([pre_image; 32]),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn correct_pre_image_unlocks() {
        let app = app(100);
        let chain = MockChain::default();
        let logic = HashLockTransferApp;

        logic.validate_action(&app, &unlock(0x5e)).unwrap();
        let next = logic.apply_action(&app, &unlock(0x5e), &chain).unwrap();
        let next_app = app.set_state(next, 0);
        let state = HashLockTransferState::decode(&next_app.latest_state).unwrap();
        assert!(state.finalized);

        let outcome = logic.compute_outcome(&next_app, &chain).unwrap();
        assert_eq!(outcome[0].amount, U256::zero());
        assert_eq!(outcome[1].amount, U256::from(10));

        assert!(logic.validate_action(&next_app, &unlock(0x5e)).is_err());
    }

    #[test]
    fn wrong_pre_image_is_rejected() {
        assert!(HashLockTransferApp
            .validate_action(&app(100), &unlock(0x00))
            .is_err());
    }

    #[test]
    fn expired_timelock_refunds_sender() {
        let app = app(5);
        let chain = MockChain::default();
        chain.set_block_number(5);
        assert!(HashLockTransferApp
            .apply_action(&app, &unlock(0x5e), &chain)
            .is_err());

        let outcome = HashLockTransferApp.compute_outcome(&app, &chain).unwrap();
        assert_eq!(outcome[0].amount, U256::from(10));
    }
}
