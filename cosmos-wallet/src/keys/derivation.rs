//! Key expressions: a named master key plus a path below it.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Address, Network, PublicKey};
use serde::{Deserialize, Serialize};

use super::key::{Pubkey, path_serde};
use crate::error::{Error, Result};

/// A master public key and the path applied to it.
///
/// The master key doubles as the name under which the keychain stores the
/// matching secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    pub parent: Pubkey,
    #[serde(with = "path_serde")]
    pub path: DerivationPath,
}

impl Derivation {
    pub fn new(parent: Pubkey, path: DerivationPath) -> Self {
        Self {
            parent,
            path,
        }
    }

    /// Expression for the master key itself.
    pub fn master(parent: Pubkey) -> Self {
        Self::new(parent, DerivationPath::master())
    }

    /// Extend the path by one normal step.
    pub fn child(&self, index: u32) -> Result<Derivation> {
        let step = ChildNumber::from_normal_idx(index)?;
        Ok(Derivation::new(self.parent, self.path.child(step)))
    }

    /// Whether the path contains a step that needs the secret key.
    pub fn is_hardened(&self) -> bool {
        self.path.into_iter().any(|step| step.is_hardened())
    }

    /// Resolve the expression without secret material.
    pub fn derive_pubkey<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<PublicKey> {
        Ok(self.parent.derive(secp, &self.path)?.public_key())
    }
}

/// A derived public key remembered together with how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPubkey {
    pub derivation: Derivation,
    pub pubkey: PublicKey,
}

impl DerivedPubkey {
    pub fn resolve<C: Verification>(secp: &Secp256k1<C>, derivation: Derivation) -> Result<Self> {
        let pubkey = derivation.derive_pubkey(secp)?;
        Ok(Self {
            derivation,
            pubkey,
        })
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2pkh(self.pubkey.pubkey_hash(), network)
    }
}

/// Split a path into the strict prefixes leading to its final step, shortest first.
pub(crate) fn prefixes(path: &DerivationPath) -> Vec<DerivationPath> {
    let steps: &[ChildNumber] = path.as_ref();
    (0..steps.len()).map(|len| DerivationPath::from(steps[..len].to_vec())).collect()
}

pub(crate) fn require_normal(path: &DerivationPath) -> Result<()> {
    match path.into_iter().find(|step| step.is_hardened()) {
        Some(step) => Err(Error::InvalidKey(format!("hardened step {} in public path", step))),
        None => Ok(()),
    }
}
