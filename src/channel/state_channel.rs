use std::collections::BTreeMap;

use serde::Serialize;

use super::{AppInstance, ChannelError, CoinTransfer, FreeBalanceState, OutcomeInterpreterParams};
use crate::{
    abiencode::{
        self, keccak256,
        types::{Address, Hash, U256},
    },
    config::{NetworkContext, FREE_BALANCE_DEFAULT_TIMEOUT, STORE_SCHEMA_VERSION},
    sig::Identifier,
};

#[derive(Serialize)]
struct MultisigSalt<'a>(&'a [Address], U256);

/// CREATE2 address of the multisig proxy owned by `owners` (in owner order).
pub fn multisig_address(
    network: &NetworkContext,
    owners: &[Address; 2],
) -> Result<Address, abiencode::Error> {
    let salt = abiencode::args_to_hash(&MultisigSalt(owners.as_slice(), network.chain_id))?;

    let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
    preimage.push(0xff);
    preimage.extend_from_slice(&network.proxy_factory.0);
    preimage.extend_from_slice(&salt.0);
    preimage.extend_from_slice(&network.proxy_init_code_hash.0);
    Address::try_from(&keccak256(&preimage).0[12..])
}

/// Both owner identifiers, ordered by their signer address.
fn sorted_owners(a: Identifier, b: Identifier) -> [Identifier; 2] {
    if a.address() <= b.address() {
        [a, b]
    } else {
        [b, a]
    }
}

/// Snapshot of a channel. Every update returns a new snapshot, the store only
/// ever sees complete values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChannel {
    pub multisig_address: Address,
    /// Fixed at setup, sorted by signer address.
    pub owners: [Identifier; 2],
    /// The parties that ran the setup protocol.
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub app_instances: BTreeMap<Hash, AppInstance>,
    pub proposed_app_instances: BTreeMap<Hash, AppInstance>,
    pub free_balance: AppInstance,
    /// Number of app sequence numbers handed out so far. The free balance
    /// holds number 0.
    pub num_proposed_apps: u64,
    pub schema_version: u32,
}

impl StateChannel {
    /// A new channel between `initiator` and `responder` with an empty free
    /// balance at version 1.
    pub fn setup(
        network: &NetworkContext,
        multisig_address: Address,
        initiator: Identifier,
        responder: Identifier,
    ) -> Result<Self, ChannelError> {
        if initiator == responder {
            return Err(ChannelError::SelfChannel);
        }
        let owners = sorted_owners(initiator, responder);
        let owner_addresses = [owners[0].address(), owners[1].address()];

        let free_balance = AppInstance::new(
            multisig_address,
            0,
            super::AppParams {
                app_definition: network.identity_app,
                initial_state: FreeBalanceState::new(owner_addresses).encode()?,
                initiator_identifier: owners[0],
                responder_identifier: owners[1],
                initiator_deposit: U256::zero(),
                initiator_deposit_asset_id: Address::ZERO,
                responder_deposit: U256::zero(),
                responder_deposit_asset_id: Address::ZERO,
                default_timeout: FREE_BALANCE_DEFAULT_TIMEOUT,
                state_timeout: FREE_BALANCE_DEFAULT_TIMEOUT,
                interpreter_params: OutcomeInterpreterParams::default(),
            },
        )?;

        Ok(Self {
            multisig_address,
            owners,
            initiator_identifier: initiator,
            responder_identifier: responder,
            app_instances: BTreeMap::new(),
            proposed_app_instances: BTreeMap::new(),
            free_balance,
            num_proposed_apps: 0,
            schema_version: STORE_SCHEMA_VERSION,
        })
    }

    pub fn owner_addresses(&self) -> [Address; 2] {
        [self.owners[0].address(), self.owners[1].address()]
    }

    pub fn owner_slot(&self, signer: &Address) -> Option<usize> {
        self.owner_addresses().iter().position(|a| a == signer)
    }

    pub fn is_owner(&self, identifier: &Identifier) -> bool {
        self.owners.contains(identifier)
    }

    /// The other owner of the channel.
    pub fn counterpart_of(&self, identifier: &Identifier) -> Result<Identifier, ChannelError> {
        match self.owners {
            [a, b] if a == *identifier => Ok(b),
            [a, b] if b == *identifier => Ok(a),
            _ => Err(ChannelError::NotAnOwner(*identifier)),
        }
    }

    pub fn free_balance_state(&self) -> Result<FreeBalanceState, ChannelError> {
        FreeBalanceState::decode(&self.free_balance.latest_state)
    }

    pub fn next_app_seq_no(&self) -> u64 {
        self.num_proposed_apps + 1
    }

    pub fn app_instance(&self, identity_hash: &Hash) -> Result<&AppInstance, ChannelError> {
        self.app_instances
            .get(identity_hash)
            .ok_or(ChannelError::AppNotInstalled(*identity_hash))
    }

    pub fn proposal(&self, identity_hash: &Hash) -> Result<&AppInstance, ChannelError> {
        self.proposed_app_instances
            .get(identity_hash)
            .ok_or(ChannelError::ProposalNotFound(*identity_hash))
    }

    /// Installed apps and the free balance, by identity hash.
    pub fn any_app(&self, identity_hash: &Hash) -> Option<&AppInstance> {
        if self.free_balance.identity_hash == *identity_hash {
            Some(&self.free_balance)
        } else {
            self.app_instances.get(identity_hash)
        }
    }

    pub fn add_proposal(&self, proposal: AppInstance) -> Result<Self, ChannelError> {
        let hash = proposal.identity_hash;
        if self.proposed_app_instances.contains_key(&hash) || self.app_instances.contains_key(&hash)
        {
            return Err(ChannelError::AppAlreadyExists(hash));
        }
        if !self.is_owner(&proposal.initiator_identifier)
            || !self.is_owner(&proposal.responder_identifier)
            || proposal.initiator_identifier == proposal.responder_identifier
        {
            return Err(ChannelError::NotAnOwner(proposal.initiator_identifier));
        }

        let mut next = self.clone();
        next.num_proposed_apps = next.num_proposed_apps.max(proposal.app_seq_no);
        next.proposed_app_instances.insert(hash, proposal);
        Ok(next)
    }

    pub fn remove_proposal(&self, identity_hash: &Hash) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        next.proposed_app_instances
            .remove(identity_hash)
            .ok_or(ChannelError::ProposalNotFound(*identity_hash))?;
        Ok(next)
    }

    /// Move a proposal into the installed set, locking both deposits out of the
    /// free balance.
    pub fn install_app(&self, identity_hash: &Hash) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        let app = next
            .proposed_app_instances
            .remove(identity_hash)
            .ok_or(ChannelError::ProposalNotFound(*identity_hash))?;

        let mut balances = self.free_balance_state()?;
        let [initiator, responder] = app.participants();
        balances.decrement(app.initiator_deposit_asset_id, initiator, app.initiator_deposit)?;
        balances.decrement(app.responder_deposit_asset_id, responder, app.responder_deposit)?;
        balances.add_active_app(app.identity_hash);

        next.free_balance = self
            .free_balance
            .set_state(balances.encode()?, self.free_balance.state_timeout);
        next.app_instances.insert(app.identity_hash, app);
        Ok(next)
    }

    /// Remove an installed app, crediting its outcome back to the free
    /// balance in the asset of the app's interpreter params. The outcome may
    /// not pay out more than the interpreter's limit.
    pub fn uninstall_app(
        &self,
        identity_hash: &Hash,
        outcome: &[CoinTransfer; 2],
    ) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        let app = next
            .app_instances
            .remove(identity_hash)
            .ok_or(ChannelError::AppNotInstalled(*identity_hash))?;

        let total = outcome[0]
            .amount
            .checked_add(outcome[1].amount)
            .ok_or(ChannelError::OutcomeExceedsLimit(*identity_hash))?;
        if total > app.interpreter_params.limit {
            return Err(ChannelError::OutcomeExceedsLimit(*identity_hash));
        }

        let mut balances = self.free_balance_state()?;
        for transfer in outcome {
            balances.increment(app.interpreter_params.token, transfer.to, transfer.amount)?;
        }
        balances.remove_active_app(identity_hash);

        next.free_balance = self
            .free_balance
            .set_state(balances.encode()?, self.free_balance.state_timeout);
        Ok(next)
    }

    pub fn set_state(
        &self,
        identity_hash: &Hash,
        new_state: Vec<u8>,
        state_timeout: u64,
    ) -> Result<Self, ChannelError> {
        let app = self.app_instance(identity_hash)?.set_state(new_state, state_timeout);
        let mut next = self.clone();
        next.app_instances.insert(*identity_hash, app);
        Ok(next)
    }

    pub fn set_app_action(
        &self,
        identity_hash: &Hash,
        action: Vec<u8>,
    ) -> Result<Self, ChannelError> {
        let app = self.app_instance(identity_hash)?.set_action(action);
        let mut next = self.clone();
        next.app_instances.insert(*identity_hash, app);
        Ok(next)
    }
}
