//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use super::{hash_to_eth_signed_msg_hash, ChannelSigner, Error, Identifier};
use crate::abiencode::types::{Address, Hash, Signature};
use async_trait::async_trait;
use k256::ecdsa::{
    recoverable,
    signature::{hazmat::PrehashSigner, Signature as k256Signature},
    SigningKey,
};

pub struct Signer {
    key: SigningKey,
    identifier: Identifier,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self::from_key(SigningKey::random(rng))
    }

    pub fn from_bytes(private_key: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_key(SigningKey::from_bytes(private_key)?))
    }

    fn from_key(key: SigningKey) -> Self {
        let identifier = key.verifying_key().into();
        Self { key, identifier }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn address(&self) -> Address {
        self.identifier.address()
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // This Signature type already has the format we need: 65 bytes
        // containing r, s and v in this order. v still needs the 27 added to
        // be valid in the EVM.
        let mut sig_bytes = Signature::try_from(sig.as_bytes())
            .map_err(|e| Error::Signing(e.to_string()))?;
        sig_bytes.0[64] += 27;

        Ok(sig_bytes)
    }
}

/// Recover the address that produced `eth_sig` over `msg` (in the Ethereum
/// signed message format).
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = match sig_bytes[64].checked_sub(27) {
        Some(v @ (0 | 1)) => v,
        _ => return Err(Error::InvalidRecoveryId(eth_sig.0[64])),
    };

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok(verifying_key.into())
}

#[async_trait]
impl ChannelSigner for Signer {
    fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    async fn sign(&self, hash: Hash) -> Result<Signature, Error> {
        self.sign_eth(hash)
    }
}
