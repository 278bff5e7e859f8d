use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use super::{Store, StoreError};
use crate::{
    abiencode::types::{Address, Hash},
    channel::{AppInstance, StateChannel},
    commitment::Commitment,
    config::STORE_SCHEMA_VERSION,
    sig::Identifier,
};

/// In-memory store for tests and simulations.
///
/// All state lives behind one `Arc<Mutex<_>>`, so clones share the same data
/// and every method is atomic. A poisoned lock is reported as
/// [StoreError::Poisoned].
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug)]
struct MemoryStoreInner {
    schema_version: u32,
    channels: HashMap<Address, StateChannel>,
    setup_commitments: HashMap<Address, Commitment>,
    /// Set-state commitments per app, by version.
    set_state_commitments: HashMap<Hash, BTreeMap<u64, Commitment>>,
    conditional_commitments: HashMap<Hash, Commitment>,
    withdrawal_commitments: HashMap<Address, Commitment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                schema_version: STORE_SCHEMA_VERSION,
                channels: HashMap::new(),
                setup_commitments: HashMap::new(),
                set_state_commitments: HashMap::new(),
                conditional_commitments: HashMap::new(),
                withdrawal_commitments: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn channel_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.channels.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn stored_channel(&self, multisig_address: &Address) -> Result<&StateChannel, StoreError> {
        self.channels
            .get(multisig_address)
            .ok_or(StoreError::ChannelNotFound(*multisig_address))
    }

    /// Replace an existing channel with `channel`.
    fn write_channel(&mut self, channel: &StateChannel) -> Result<(), StoreError> {
        let slot = self
            .channels
            .get_mut(&channel.multisig_address)
            .ok_or(StoreError::ChannelNotFound(channel.multisig_address))?;
        *slot = channel.clone();
        Ok(())
    }

    fn drop_app_commitments(&mut self, identity_hash: &Hash) {
        self.set_state_commitments.remove(identity_hash);
        self.conditional_commitments.remove(identity_hash);
    }
}

fn belongs_to(commitment: &Commitment, identity_hash: &Hash) -> Result<(), StoreError> {
    if commitment.app_identity_hash() != Some(*identity_hash) {
        return Err(StoreError::CommitmentMismatch(identity_hash.to_string()));
    }
    Ok(())
}

fn set_state_version(commitment: &Commitment, identity_hash: &Hash) -> Result<u64, StoreError> {
    belongs_to(commitment, identity_hash)?;
    commitment
        .version_number()
        .ok_or_else(|| StoreError::CommitmentMismatch(identity_hash.to_string()))
}

impl Store for MemoryStore {
    fn schema_version(&self) -> Result<u32, StoreError> {
        Ok(self.lock()?.schema_version)
    }

    fn update_schema_version(&self, version: u32) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if version < inner.schema_version {
            return Err(StoreError::Backend(format!(
                "cannot downgrade schema from {} to {}",
                inner.schema_version, version
            )));
        }
        inner.schema_version = version;
        Ok(())
    }

    fn get_state_channel(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<StateChannel>, StoreError> {
        Ok(self.lock()?.channels.get(multisig_address).cloned())
    }

    fn get_state_channel_by_owners(
        &self,
        owners: &[Identifier; 2],
    ) -> Result<Option<StateChannel>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .channels
            .values()
            .find(|c| owners.iter().all(|o| c.is_owner(o)))
            .cloned())
    }

    fn get_state_channel_by_app_identity_hash(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<StateChannel>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .channels
            .values()
            .find(|c| {
                c.any_app(identity_hash).is_some()
                    || c.proposed_app_instances.contains_key(identity_hash)
            })
            .cloned())
    }

    fn create_state_channel(&self, channel: &StateChannel) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.channels.contains_key(&channel.multisig_address) {
            return Err(StoreError::ChannelExists(channel.multisig_address));
        }
        inner
            .channels
            .insert(channel.multisig_address, channel.clone());
        Ok(())
    }

    fn sync_state_channel(&self, channel: &StateChannel) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stale: Vec<Hash> = match inner.channels.get(&channel.multisig_address) {
            Some(stored) => stored
                .app_instances
                .keys()
                .chain(stored.proposed_app_instances.keys())
                .filter(|h| {
                    !channel.app_instances.contains_key(h)
                        && !channel.proposed_app_instances.contains_key(h)
                })
                .copied()
                .collect(),
            None => Vec::new(),
        };
        for hash in &stale {
            inner.drop_app_commitments(hash);
        }
        inner
            .channels
            .insert(channel.multisig_address, channel.clone());
        Ok(())
    }

    fn get_app_instance(&self, identity_hash: &Hash) -> Result<Option<AppInstance>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .channels
            .values()
            .find_map(|c| c.app_instances.get(identity_hash))
            .cloned())
    }

    fn get_app_proposal(&self, identity_hash: &Hash) -> Result<Option<AppInstance>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .channels
            .values()
            .find_map(|c| c.proposed_app_instances.get(identity_hash))
            .cloned())
    }

    fn get_free_balance(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<AppInstance>, StoreError> {
        Ok(self
            .lock()?
            .channels
            .get(multisig_address)
            .map(|c| c.free_balance.clone()))
    }

    fn create_app_proposal(
        &self,
        channel: &StateChannel,
        proposal: &AppInstance,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.stored_channel(&channel.multisig_address)?;
        let hash = proposal.identity_hash;
        if stored.proposed_app_instances.contains_key(&hash)
            || stored.app_instances.contains_key(&hash)
        {
            return Err(StoreError::AppExists(hash));
        }
        inner.write_channel(channel)
    }

    fn remove_app_proposal(
        &self,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.stored_channel(&channel.multisig_address)?;
        if !stored.proposed_app_instances.contains_key(identity_hash) {
            return Err(StoreError::AppNotFound(*identity_hash));
        }
        inner.write_channel(channel)?;
        if !channel.app_instances.contains_key(identity_hash) {
            inner.drop_app_commitments(identity_hash);
        }
        Ok(())
    }

    fn create_app_instance(
        &self,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.stored_channel(&channel.multisig_address)?;
        if stored.app_instances.contains_key(&app.identity_hash) {
            return Err(StoreError::AppExists(app.identity_hash));
        }
        inner.write_channel(channel)
    }

    fn update_app_instance(
        &self,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.stored_channel(&channel.multisig_address)?;
        if !stored.app_instances.contains_key(&app.identity_hash) {
            return Err(StoreError::AppNotFound(app.identity_hash));
        }
        inner.write_channel(channel)
    }

    fn remove_app_instance(
        &self,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.stored_channel(&channel.multisig_address)?;
        if !stored.app_instances.contains_key(identity_hash) {
            return Err(StoreError::AppNotFound(*identity_hash));
        }
        inner.write_channel(channel)?;
        inner.drop_app_commitments(identity_hash);
        Ok(())
    }

    fn update_free_balance(
        &self,
        channel: &StateChannel,
        free_balance: &AppInstance,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.stored_channel(&channel.multisig_address)?;
        if stored.free_balance.identity_hash != free_balance.identity_hash {
            return Err(StoreError::AppNotFound(free_balance.identity_hash));
        }
        let mut next = channel.clone();
        next.free_balance = free_balance.clone();
        inner.write_channel(&next)
    }

    fn get_setup_commitment(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<Commitment>, StoreError> {
        Ok(self.lock()?.setup_commitments.get(multisig_address).cloned())
    }

    fn create_setup_commitment(
        &self,
        multisig_address: &Address,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.setup_commitments.contains_key(multisig_address) {
            return Err(StoreError::CommitmentExists {
                kind: "setup",
                key: multisig_address.to_string(),
            });
        }
        inner
            .setup_commitments
            .insert(*multisig_address, commitment.clone());
        Ok(())
    }

    fn get_set_state_commitments(
        &self,
        identity_hash: &Hash,
    ) -> Result<Vec<Commitment>, StoreError> {
        Ok(self
            .lock()?
            .set_state_commitments
            .get(identity_hash)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    fn create_set_state_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        let version = set_state_version(commitment, identity_hash)?;
        let mut inner = self.lock()?;
        let versions = inner.set_state_commitments.entry(*identity_hash).or_default();
        if versions.contains_key(&version) {
            return Err(StoreError::CommitmentExists {
                kind: "set-state",
                key: format!("{identity_hash}@{version}"),
            });
        }
        versions.insert(version, commitment.clone());
        Ok(())
    }

    fn update_set_state_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        let version = set_state_version(commitment, identity_hash)?;
        self.lock()?
            .set_state_commitments
            .entry(*identity_hash)
            .or_default()
            .insert(version, commitment.clone());
        Ok(())
    }

    fn remove_set_state_commitment(
        &self,
        identity_hash: &Hash,
        version_number: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(versions) = inner.set_state_commitments.get_mut(identity_hash) {
            versions.remove(&version_number);
            if versions.is_empty() {
                inner.set_state_commitments.remove(identity_hash);
            }
        }
        Ok(())
    }

    fn get_conditional_transaction_commitment(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<Commitment>, StoreError> {
        Ok(self.lock()?.conditional_commitments.get(identity_hash).cloned())
    }

    fn create_conditional_transaction_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        belongs_to(commitment, identity_hash)?;
        let mut inner = self.lock()?;
        if inner.conditional_commitments.contains_key(identity_hash) {
            return Err(StoreError::CommitmentExists {
                kind: "conditional transaction",
                key: identity_hash.to_string(),
            });
        }
        inner
            .conditional_commitments
            .insert(*identity_hash, commitment.clone());
        Ok(())
    }

    fn update_conditional_transaction_commitment(
        &self,
        identity_hash: &Hash,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        belongs_to(commitment, identity_hash)?;
        self.lock()?
            .conditional_commitments
            .insert(*identity_hash, commitment.clone());
        Ok(())
    }

    fn get_withdrawal_commitment(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<Commitment>, StoreError> {
        Ok(self.lock()?.withdrawal_commitments.get(multisig_address).cloned())
    }

    fn create_withdrawal_commitment(
        &self,
        multisig_address: &Address,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.withdrawal_commitments.contains_key(multisig_address) {
            return Err(StoreError::CommitmentExists {
                kind: "withdrawal",
                key: multisig_address.to_string(),
            });
        }
        inner
            .withdrawal_commitments
            .insert(*multisig_address, commitment.clone());
        Ok(())
    }

    fn update_withdrawal_commitment(
        &self,
        multisig_address: &Address,
        commitment: &Commitment,
    ) -> Result<(), StoreError> {
        self.lock()?
            .withdrawal_commitments
            .insert(*multisig_address, commitment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::STORE_SCHEMA_VERSION,
        testing::{channel_between, counter_app, counter_state, network, signer},
    };

    fn store_with_channel() -> (MemoryStore, StateChannel) {
        let store = MemoryStore::new();
        let channel = channel_between(&signer(1), &signer(2));
        store.create_state_channel(&channel).unwrap();
        (store, channel)
    }

    #[test]
    fn channel_lookups() {
        let (store, channel) = store_with_channel();
        assert_eq!(store.schema_version().unwrap(), STORE_SCHEMA_VERSION);
        assert_eq!(
            store.get_state_channel(&channel.multisig_address).unwrap(),
            Some(channel.clone())
        );
        let owners = [channel.owners[1], channel.owners[0]];
        assert_eq!(
            store.get_state_channel_by_owners(&owners).unwrap(),
            Some(channel.clone())
        );
        assert_eq!(
            store
                .get_state_channel_by_app_identity_hash(&channel.free_balance.identity_hash)
                .unwrap(),
            Some(channel.clone())
        );
        assert_eq!(
            store.create_state_channel(&channel),
            Err(StoreError::ChannelExists(channel.multisig_address))
        );
    }

    #[test]
    fn app_lifecycle_drops_commitments() {
        let (store, channel) = store_with_channel();
        let a = signer(1);
        let b = signer(2);
        let proposal = counter_app(&channel, *a.identifier(), *b.identifier(), 0);
        let hash = proposal.identity_hash;

        let proposed = channel.add_proposal(proposal.clone()).unwrap();
        store.create_app_proposal(&proposed, &proposal).unwrap();
        assert_eq!(store.get_app_proposal(&hash).unwrap(), Some(proposal.clone()));
        assert_eq!(
            store.create_app_proposal(&proposed, &proposal),
            Err(StoreError::AppExists(hash))
        );

        let installed = proposed.install_app(&hash).unwrap();
        store
            .create_app_instance(&installed, installed.app_instance(&hash).unwrap())
            .unwrap();
        assert!(store.get_app_proposal(&hash).unwrap().is_none());

        let updated = installed.set_state(&hash, counter_state(1), 10).unwrap();
        let app = updated.app_instance(&hash).unwrap();
        store
            .update_set_state_commitment(&hash, &Commitment::set_state(&network(), app))
            .unwrap();
        store.update_app_instance(&updated, app).unwrap();
        assert_eq!(store.get_set_state_commitments(&hash).unwrap().len(), 1);

        let removed = updated
            .uninstall_app(&hash, &[Default::default(), Default::default()])
            .unwrap();
        store.remove_app_instance(&removed, &hash).unwrap();
        assert!(store.get_app_instance(&hash).unwrap().is_none());
        assert!(store.get_set_state_commitments(&hash).unwrap().is_empty());
        assert_eq!(
            store.update_app_instance(&removed, app),
            Err(StoreError::AppNotFound(hash))
        );
    }

    #[test]
    fn set_state_commitments_by_version() {
        let (store, channel) = store_with_channel();
        let fb = &channel.free_balance;
        let hash = fb.identity_hash;
        let v1 = Commitment::set_state(&network(), fb);
        let v2 = Commitment::set_state(&network(), &fb.set_state(fb.latest_state.clone(), 5));

        store.create_set_state_commitment(&hash, &v1).unwrap();
        assert!(matches!(
            store.create_set_state_commitment(&hash, &v1),
            Err(StoreError::CommitmentExists { .. })
        ));
        store.update_set_state_commitment(&hash, &v2).unwrap();
        let versions: Vec<_> = store
            .get_set_state_commitments(&hash)
            .unwrap()
            .iter()
            .map(|c| c.version_number())
            .collect();
        assert_eq!(versions, vec![Some(1), Some(2)]);

        store.remove_set_state_commitment(&hash, 1).unwrap();
        store.remove_set_state_commitment(&hash, 7).unwrap();
        assert_eq!(store.get_set_state_commitments(&hash).unwrap(), vec![v2]);

        assert_eq!(
            store.create_set_state_commitment(&Hash([9; 32]), &v1),
            Err(StoreError::CommitmentMismatch(Hash([9; 32]).to_string()))
        );
    }

    #[test]
    fn writes_to_unknown_channel_fail() {
        let store = MemoryStore::new();
        let channel = channel_between(&signer(1), &signer(2));
        assert_eq!(
            store.update_free_balance(&channel, &channel.free_balance),
            Err(StoreError::ChannelNotFound(channel.multisig_address))
        );
        store.sync_state_channel(&channel).unwrap();
        assert_eq!(store.channel_count().unwrap(), 1);
    }

    #[test]
    fn clones_share_state() {
        let (store, channel) = store_with_channel();
        let other = store.clone();
        assert!(other
            .get_state_channel(&channel.multisig_address)
            .unwrap()
            .is_some());
    }
}
