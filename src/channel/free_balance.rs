use serde::Serialize;

use super::ChannelError;
use crate::abiencode::{
    self,
    de::Decoder,
    types::{Address, Hash, U256},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CoinTransfer {
    pub to: Address,
    pub amount: U256,
}

impl CoinTransfer {
    pub fn new(to: Address, amount: U256) -> Self {
        Self { to, amount }
    }

    fn decode(d: &mut Decoder<'_>) -> abiencode::Result<Self> {
        Ok(Self {
            to: d.address()?,
            amount: d.u256()?,
        })
    }
}

/// State of the free-balance app: the collateral of both owners not locked in
/// any app, per token, plus the identity hashes of all installed apps.
///
/// Encoded like the Solidity struct
/// `(bytes32[] activeApps, address[] tokenAddresses, CoinTransfer[2][] balances)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeBalanceState {
    pub active_apps: Vec<Hash>,
    pub token_addresses: Vec<Address>,
    pub balances: Vec<[CoinTransfer; 2]>,
}

impl FreeBalanceState {
    /// Zero balances in the native asset for both owners.
    pub fn new(owners: [Address; 2]) -> Self {
        Self {
            active_apps: Vec::new(),
            token_addresses: vec![Address::ZERO],
            balances: vec![[
                CoinTransfer::new(owners[0], U256::zero()),
                CoinTransfer::new(owners[1], U256::zero()),
            ]],
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        Ok(abiencode::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ChannelError> {
        let mut d = Decoder::new(data).dynamic()?;
        let state = Self {
            active_apps: d.array(|d| d.hash())?,
            token_addresses: d.array(|d| d.address())?,
            balances: d.array(|d| Ok([CoinTransfer::decode(d)?, CoinTransfer::decode(d)?]))?,
        };
        if state.token_addresses.len() != state.balances.len() {
            return Err(abiencode::Error::InvalidValue("free balance token count").into());
        }
        Ok(state)
    }

    pub fn balance_of(&self, token: Address, party: Address) -> U256 {
        self.token_addresses
            .iter()
            .position(|t| *t == token)
            .and_then(|i| self.balances[i].iter().find(|b| b.to == party))
            .map(|b| b.amount)
            .unwrap_or_default()
    }

    fn entry_mut(&mut self, token: Address, party: Address) -> Result<&mut U256, ChannelError> {
        let row = match self.token_addresses.iter().position(|t| *t == token) {
            Some(row) => row,
            None => {
                // New tokens get a zeroed row for the same two owners.
                let owners = self
                    .balances
                    .first()
                    .map(|row| [row[0].to, row[1].to])
                    .ok_or(ChannelError::UnknownParty(party))?;
                self.token_addresses.push(token);
                self.balances.push([
                    CoinTransfer::new(owners[0], U256::zero()),
                    CoinTransfer::new(owners[1], U256::zero()),
                ]);
                self.balances.len() - 1
            }
        };
        self.balances[row]
            .iter_mut()
            .find(|b| b.to == party)
            .map(|b| &mut b.amount)
            .ok_or(ChannelError::UnknownParty(party))
    }

    pub fn increment(
        &mut self,
        token: Address,
        party: Address,
        amount: U256,
    ) -> Result<(), ChannelError> {
        let balance = self.entry_mut(token, party)?;
        *balance = balance
            .checked_add(amount)
            .ok_or(ChannelError::BalanceOverflow { token, party })?;
        Ok(())
    }

    pub fn decrement(
        &mut self,
        token: Address,
        party: Address,
        amount: U256,
    ) -> Result<(), ChannelError> {
        let balance = self.entry_mut(token, party)?;
        *balance = balance
            .checked_sub(amount)
            .ok_or(ChannelError::InsufficientFreeBalance {
                token,
                party,
                available: *balance,
                required: amount,
            })?;
        Ok(())
    }

    pub fn add_active_app(&mut self, identity_hash: Hash) {
        if !self.active_apps.contains(&identity_hash) {
            self.active_apps.push(identity_hash);
        }
    }

    pub fn remove_active_app(&mut self, identity_hash: &Hash) {
        self.active_apps.retain(|h| h != identity_hash);
    }
}
