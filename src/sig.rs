//! Handles the creation and verification of (Ethereum) Signatures.

use crate::abiencode::types::{Address, Hash, Signature};
use async_trait::async_trait;
use core::fmt::{Debug, Display};
use ::k256::{ecdsa::VerifyingKey, elliptic_curve::sec1::ToEncodedPoint};
use sha3::{Digest, Keccak256};

mod k256;
pub use self::k256::{recover_signer, Signer};


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid recovery id {0} (expected 27 or 28)")]
    InvalidRecoveryId(u8),
    #[error("not a valid compressed secp256k1 public key")]
    InvalidIdentifier,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Ecdsa(#[from] ::k256::ecdsa::Error),
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        // The uncompressed point is 0x04 || x || y, the address is the last 20
        // bytes of keccak256(x || y).
        let point = key.to_encoded_point(false);
        let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

/// Public identifier of a channel participant: its compressed secp256k1 public
/// key. The signer address used on-chain is derived from it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    key: [u8; 33],
    address: Address,
}

impl Identifier {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let key = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| Error::InvalidIdentifier)?;
        Ok(key.into())
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.key
    }

    /// The address signatures of this participant recover to.
    pub fn address(&self) -> Address {
        self.address
    }
}

impl From<VerifyingKey> for Identifier {
    fn from(key: VerifyingKey) -> Self {
        let mut compressed = [0u8; 33];
        compressed.copy_from_slice(key.to_encoded_point(true).as_bytes());
        Self {
            key: compressed,
            address: key.into(),
        }
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("0x")?;
        for b in self.key {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Signing capability handed to the protocol runner. Implementations may sit
/// in front of a wallet or a remote signer, hence async.
#[async_trait]
pub trait ChannelSigner: Send + Sync {
    fn identifier(&self) -> &Identifier;

    fn address(&self) -> Address {
        self.identifier().address()
    }

    /// Sign `hash` in the Ethereum signed message format.
    async fn sign(&self, hash: Hash) -> Result<Signature, Error>;
}
