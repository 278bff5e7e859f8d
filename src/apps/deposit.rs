//! Deposits into a channel.
//!
//! A deposit app is installed before funds are sent to the multisig on-chain
//! and records the multisig balance at that time. Uninstalling it credits
//! everything that arrived since then to the depositor's free balance.

use serde::Serialize;

use super::AppLogic;
use crate::{
    abiencode::{
        self,
        de::Decoder,
        types::{Address, U256},
    },
    chain::ChainReader,
    channel::{AppInstance, CoinTransfer},
    middleware::{Middleware, MiddlewareContext, Phase},
    protocol::ProtocolRole,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositAppState {
    /// `transfers[0]` is the depositor.
    pub transfers: [CoinTransfer; 2],
    pub multisig_address: Address,
    pub asset_id: Address,
    pub starting_total_amount_withdrawn: U256,
    pub starting_multisig_balance: U256,
}

impl DepositAppState {
    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> abiencode::Result<Self> {
        let mut d = Decoder::new(data);
        let mut transfer = || -> abiencode::Result<CoinTransfer> {
            Ok(CoinTransfer::new(d.address()?, d.u256()?))
        };
        let transfers = [transfer()?, transfer()?];
        Ok(Self {
            transfers,
            multisig_address: d.address()?,
            asset_id: d.address()?,
            starting_total_amount_withdrawn: d.u256()?,
            starting_multisig_balance: d.u256()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepositApp;

impl AppLogic for DepositApp {
    fn validate_action(&self, _app: &AppInstance, _action: &[u8]) -> Result<(), String> {
        Err("the deposit app has no actions".to_string())
    }

    fn apply_action(
        &self,
        _app: &AppInstance,
        _action: &[u8],
        _chain: &dyn ChainReader,
    ) -> Result<Vec<u8>, String> {
        Err("the deposit app has no actions".to_string())
    }

    fn compute_outcome(
        &self,
        app: &AppInstance,
        chain: &dyn ChainReader,
    ) -> Result<[CoinTransfer; 2], String> {
        let state = DepositAppState::decode(&app.latest_state).map_err(|e| e.to_string())?;
        let balance = chain
            .balance_of(state.asset_id, state.multisig_address)
            .map_err(|e| e.to_string())?;
        let withdrawn = chain
            .total_amount_withdrawn(state.multisig_address, state.asset_id)
            .map_err(|e| e.to_string())?;

        // balance + withdrawn - starting balance - starting withdrawn
        let deposited = balance
            .checked_add(withdrawn)
            .and_then(|v| v.checked_sub(state.starting_multisig_balance))
            .and_then(|v| v.checked_sub(state.starting_total_amount_withdrawn))
            .ok_or_else(|| {
                "multisig balance is below the deposit app's starting balance".to_string()
            })?;

        let [depositor, counterparty] = state.transfers;
        Ok([
            CoinTransfer::new(
                depositor.to,
                depositor
                    .amount
                    .checked_add(deposited)
                    .ok_or_else(|| "deposit amount overflows".to_string())?,
            ),
            counterparty,
        ])
    }
}

/// Guards installing and uninstalling deposit apps.
///
/// - Propose/Install: at most one deposit app per asset id in a channel.
/// - Uninstall: the multisig balance must not have dropped below the balance
///   recorded at install, and the initiator must be the depositor.
#[derive(Debug, Clone, Copy)]
pub struct DepositMiddleware {
    pub deposit_app: Address,
}

impl DepositMiddleware {
    pub fn new(deposit_app: Address) -> Self {
        Self { deposit_app }
    }

    fn state_of(&self, app: &AppInstance) -> Result<Option<DepositAppState>, String> {
        if app.app_definition != self.deposit_app {
            return Ok(None);
        }
        DepositAppState::decode(&app.latest_state)
            .map(Some)
            .map_err(|e| format!("malformed deposit app state: {e}"))
    }

    fn validate_install(
        &self,
        ctx: &MiddlewareContext,
        proposal: &AppInstance,
    ) -> Result<(), String> {
        let Some(state) = self.state_of(proposal)? else {
            return Ok(());
        };
        for app in ctx.channel().app_instances.values() {
            if let Some(installed) = self.state_of(app)? {
                if installed.asset_id == state.asset_id {
                    return Err(format!(
                        "a deposit app for asset {} is already installed ({})",
                        state.asset_id, app.identity_hash
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_uninstall(
        &self,
        role: ProtocolRole,
        multisig: Address,
        app: &AppInstance,
        initiator: &crate::sig::Identifier,
        chain: &dyn ChainReader,
    ) -> Result<(), String> {
        let Some(state) = self.state_of(app)? else {
            return Ok(());
        };
        // The channel's multisig, not the one named in the app state.
        let balance = chain
            .balance_of(state.asset_id, multisig)
            .map_err(|e| e.to_string())?;
        if balance < state.starting_multisig_balance {
            return Err(format!(
                "multisig balance {} is below the starting balance {} of the deposit app",
                balance, state.starting_multisig_balance
            ));
        }
        if role == ProtocolRole::Initiator && state.transfers[0].to != initiator.address() {
            return Err(format!(
                "only the depositor {} may uninstall the deposit app",
                state.transfers[0].to
            ));
        }
        Ok(())
    }
}

impl Middleware for DepositMiddleware {
    fn validate(
        &self,
        _phase: Phase,
        role: ProtocolRole,
        ctx: &MiddlewareContext,
        chain: &dyn ChainReader,
    ) -> Result<(), String> {
        match ctx {
            MiddlewareContext::Propose { proposal, .. }
            | MiddlewareContext::Install { proposal, .. } => self.validate_install(ctx, proposal),
            MiddlewareContext::Uninstall {
                channel,
                app,
                initiator,
            } => self.validate_uninstall(role, channel.multisig_address, app, initiator, chain),
            MiddlewareContext::TakeAction { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        channel::{AppParams, OutcomeInterpreterParams, StateChannel},
        error::ProtocolError,
        middleware::MiddlewareChain,
        sig::Signer,
        testing::{channel_between, signer, MockChain},
    };

    const DEPOSIT_APP: Address = Address([0xde; 20]);
    const TOKEN: Address = Address([0x70; 20]);

    fn deposit_app(
        channel: &StateChannel,
        depositor: &Signer,
        other: &Signer,
        asset_id: Address,
        starting_balance: u64,
    ) -> AppInstance {
        let state = DepositAppState {
            transfers: [
                CoinTransfer::new(depositor.address(), U256::zero()),
                CoinTransfer::new(other.address(), U256::zero()),
            ],
            multisig_address: channel.multisig_address,
            asset_id,
            starting_total_amount_withdrawn: U256::zero(),
            starting_multisig_balance: U256::from(starting_balance),
        };
        AppInstance::new(
            channel.multisig_address,
            channel.next_app_seq_no(),
            AppParams {
                app_definition: DEPOSIT_APP,
                initial_state: state.encode().unwrap(),
                initiator_identifier: *depositor.identifier(),
                responder_identifier: *other.identifier(),
                initiator_deposit: U256::zero(),
                initiator_deposit_asset_id: asset_id,
                responder_deposit: U256::zero(),
                responder_deposit_asset_id: asset_id,
                default_timeout: 0,
                state_timeout: 0,
                interpreter_params: OutcomeInterpreterParams {
                    limit: U256::MAX,
                    token: asset_id,
                },
            },
        )
        .unwrap()
    }

    fn middleware() -> MiddlewareChain {
        let mut chain = MiddlewareChain::new();
        let mw = Arc::new(DepositMiddleware::new(DEPOSIT_APP));
        chain
            .register(Phase::Propose, mw.clone())
            .register(Phase::Install, mw.clone())
            .register(Phase::Uninstall, mw);
        chain
    }

    #[test]
    fn state_roundtrip() {
        let a = signer(1);
        let b = signer(2);
        let channel = channel_between(&a, &b);
        let app = deposit_app(&channel, &a, &b, TOKEN, 5);
        let state = DepositAppState::decode(&app.latest_state).unwrap();
        assert_eq!(state.asset_id, TOKEN);
        assert_eq!(state.starting_multisig_balance, U256::from(5));
        assert_eq!(app.latest_state.len(), 7 * 32);
    }

    #[test]
    fn second_deposit_app_for_same_asset_is_rejected() {
        let a = signer(1);
        let b = signer(2);
        let channel = channel_between(&a, &b);
        let first = deposit_app(&channel, &a, &b, TOKEN, 0);
        let hash = first.identity_hash;
        let channel = channel.add_proposal(first).unwrap().install_app(&hash).unwrap();

        let same_asset = deposit_app(&channel, &b, &a, TOKEN, 0);
        let ctx = MiddlewareContext::Install {
            channel: channel.clone(),
            proposal: same_asset,
        };
        assert!(matches!(
            middleware().run(ProtocolRole::Responder, &ctx, &MockChain::default()),
            Err(ProtocolError::ValidationRejected { phase: Phase::Install, .. })
        ));

        let other_asset = deposit_app(&channel, &b, &a, Address::ZERO, 0);
        let ctx = MiddlewareContext::Propose {
            channel,
            proposal: other_asset,
        };
        middleware()
            .run(ProtocolRole::Initiator, &ctx, &MockChain::default())
            .unwrap();
    }

    #[test]
    fn uninstall_checks_balance_and_depositor() {
        let a = signer(1);
        let b = signer(2);
        let channel = channel_between(&a, &b);
        let app = deposit_app(&channel, &a, &b, TOKEN, 100);
        let chain = MockChain::default();
        let ctx = |initiator: &Signer| MiddlewareContext::Uninstall {
            channel: channel.clone(),
            app: app.clone(),
            initiator: *initiator.identifier(),
        };

        chain.set_balance(TOKEN, channel.multisig_address, U256::from(99));
        assert!(middleware()
            .run(ProtocolRole::Initiator, &ctx(&a), &chain)
            .is_err());

        chain.set_balance(TOKEN, channel.multisig_address, U256::from(150));
        middleware()
            .run(ProtocolRole::Initiator, &ctx(&a), &chain)
            .unwrap();
        assert!(middleware()
            .run(ProtocolRole::Initiator, &ctx(&b), &chain)
            .is_err());
        // The depositor check only binds the initiator.
        middleware()
            .run(ProtocolRole::Responder, &ctx(&b), &chain)
            .unwrap();

        let outcome = DepositApp.compute_outcome(&app, &chain).unwrap();
        assert_eq!(outcome[0], CoinTransfer::new(a.address(), U256::from(50)));
        assert_eq!(outcome[1], CoinTransfer::new(b.address(), U256::zero()));
    }

    #[test]
    fn uninstall_reads_the_channel_multisig_balance() {
        let a = signer(1);
        let b = signer(2);
        let channel = channel_between(&a, &b);
        let elsewhere = Address([0x55; 20]);
        let mut app = deposit_app(&channel, &a, &b, TOKEN, 100);
        let mut state = DepositAppState::decode(&app.latest_state).unwrap();
        state.multisig_address = elsewhere;
        app.latest_state = state.encode().unwrap();

        let chain = MockChain::default();
        chain.set_balance(TOKEN, channel.multisig_address, U256::from(10));
        chain.set_balance(TOKEN, elsewhere, U256::from(1000));
        let ctx = MiddlewareContext::Uninstall {
            channel: channel.clone(),
            app,
            initiator: *a.identifier(),
        };
        assert!(matches!(
            middleware().run(ProtocolRole::Initiator, &ctx, &chain),
            Err(ProtocolError::ValidationRejected { phase: Phase::Uninstall, .. })
        ));

        chain.set_balance(TOKEN, channel.multisig_address, U256::from(100));
        middleware()
            .run(ProtocolRole::Responder, &ctx, &chain)
            .unwrap();
    }
}
