//! Deterministic receive/change key generation.

use bitcoin::PublicKey;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpub};
use bitcoin::secp256k1::{Secp256k1, Verification};
use serde::{Deserialize, Serialize};

use super::derivation::{Derivation, DerivedPubkey, require_normal};
use super::key::{Pubkey, path_serde};
use crate::error::{Error, Result};

/// Generates keys at `parent / path / i` for increasing `i`.
///
/// `last` is the next index to issue. It is a high-water mark of what has been
/// handed out, not of what has been seen on chain.
///
/// A sequence over a flat key has an empty path and names that key at every index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSequence {
    #[serde(alias = "key")]
    parent: Pubkey,
    #[serde(with = "path_serde")]
    path: DerivationPath,
    last: u32,
}

impl AddressSequence {
    /// A sequence below an extended public key. Hardened prefixes are rejected.
    pub fn new(parent: Xpub, path: DerivationPath, last: u32) -> Result<Self> {
        require_normal(&path)?;
        Ok(Self {
            parent: Pubkey::Hierarchical(parent),
            path,
            last,
        })
    }

    /// A sequence that always issues `key`.
    pub fn single(key: PublicKey) -> Self {
        Self {
            parent: Pubkey::Flat(key),
            path: DerivationPath::master(),
            last: 0,
        }
    }

    /// Whether every index names the same flat key.
    pub fn is_single(&self) -> bool {
        matches!(self.parent, Pubkey::Flat(_))
    }

    pub fn parent(&self) -> &Pubkey {
        &self.parent
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Index of the next key to issue.
    pub fn last(&self) -> u32 {
        self.last
    }

    /// Expression for the key at `index`.
    pub fn derivation_at(&self, index: u32) -> Result<Derivation> {
        if self.is_single() {
            return Ok(Derivation::master(self.parent));
        }
        let step = ChildNumber::from_normal_idx(index)?;
        Ok(Derivation::new(self.parent, self.path.child(step)))
    }

    /// Resolve the key at `index` without advancing.
    pub fn key_at<C: Verification>(&self, secp: &Secp256k1<C>, index: u32) -> Result<DerivedPubkey> {
        DerivedPubkey::resolve(secp, self.derivation_at(index)?)
    }

    /// Issue the key at `last` and return the sequence advanced by one.
    pub fn next<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<(DerivedPubkey, AddressSequence)> {
        let key = self.key_at(secp, self.last)?;
        let last = self
            .last
            .checked_add(1)
            .ok_or_else(|| Error::Invalid("address sequence exhausted".into()))?;
        Ok((key, self.with_last(last)))
    }

    /// The same sequence positioned at `last`.
    pub fn with_last(&self, last: u32) -> AddressSequence {
        AddressSequence {
            parent: self.parent,
            path: self.path.clone(),
            last,
        }
    }

    /// Checks that documents read from storage describe a derivable sequence.
    pub fn validate(&self) -> Result<()> {
        require_normal(&self.path)?;
        match self.parent {
            Pubkey::Flat(_) if !self.path.is_master() => {
                Err(Error::InvalidKey(format!("flat key sequence with path {}", self.path)))
            }
            _ => Ok(()),
        }
    }
}
