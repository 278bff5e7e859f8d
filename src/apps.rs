//! App logic, looked up by app definition address.
//!
//! The engine never interprets app states itself. Everything app specific
//! goes through an [AppLogic] registered in the [AppRegistry].

use std::{collections::HashMap, sync::Arc};

use crate::{
    abiencode::types::Address,
    chain::ChainReader,
    channel::{AppInstance, CoinTransfer},
    error::ProtocolError,
};

pub mod deposit;
pub mod hashlock;

pub use deposit::{DepositApp, DepositAppState, DepositMiddleware};
pub use hashlock::{HashLockTransferAction, HashLockTransferApp, HashLockTransferState};

pub trait AppLogic: Send + Sync {
    /// Cheap checks on an action before it is applied.
    fn validate_action(&self, _app: &AppInstance, _action: &[u8]) -> Result<(), String> {
        Ok(())
    }

    /// The state transition function: the new (encoded) state after applying
    /// `action` to the app's latest state.
    fn apply_action(
        &self,
        app: &AppInstance,
        action: &[u8],
        chain: &dyn ChainReader,
    ) -> Result<Vec<u8>, String>;

    /// How the app's deposits are split when it is uninstalled, in the
    /// current state.
    fn compute_outcome(
        &self,
        app: &AppInstance,
        chain: &dyn ChainReader,
    ) -> Result<[CoinTransfer; 2], String>;
}

#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: HashMap<Address, Arc<dyn AppLogic>>,
}

impl core::fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.apps.keys()).finish()
    }
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, app_definition: Address, logic: Arc<dyn AppLogic>) -> &mut Self {
        self.apps.insert(app_definition, logic);
        self
    }

    pub fn get(&self, app_definition: &Address) -> Result<&Arc<dyn AppLogic>, ProtocolError> {
        self.apps
            .get(app_definition)
            .ok_or(ProtocolError::UnknownApp(*app_definition))
    }

    /// Validate and apply `action` to `app`, returning the new state.
    pub fn transition(
        &self,
        app: &AppInstance,
        action: &[u8],
        chain: &dyn ChainReader,
    ) -> Result<Vec<u8>, ProtocolError> {
        let logic = self.get(&app.app_definition)?;
        let rejected = |reason| ProtocolError::StateTransitionRejected {
            app_identity_hash: app.identity_hash,
            reason,
        };
        logic.validate_action(app, action).map_err(rejected)?;
        logic.apply_action(app, action, chain).map_err(rejected)
    }

    pub fn outcome(
        &self,
        app: &AppInstance,
        chain: &dyn ChainReader,
    ) -> Result<[CoinTransfer; 2], ProtocolError> {
        self.get(&app.app_definition)?
            .compute_outcome(app, chain)
            .map_err(|reason| ProtocolError::StateTransitionRejected {
                app_identity_hash: app.identity_hash,
                reason,
            })
    }
}
