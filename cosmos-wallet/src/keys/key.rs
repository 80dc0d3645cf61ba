//! Secret and public key variants.
//!
//! A key is either flat (a single secp256k1 key) or hierarchical (a BIP32
//! extended key). Parsing is the validation gate: a string that is neither a
//! WIF key nor an extended key is rejected with [`Error::InvalidKey`].

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing, Verification};
use bitcoin::{Address, Network, PrivateKey, PublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A signing secret.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    /// A single WIF-encoded private key.
    Flat(PrivateKey),
    /// A BIP32 extended private key.
    Hierarchical(Xpriv),
}

impl Secret {
    /// The public key belonging to this secret.
    pub fn to_public<C: Signing>(&self, secp: &Secp256k1<C>) -> Pubkey {
        match self {
            Secret::Flat(key) => Pubkey::Flat(key.public_key(secp)),
            Secret::Hierarchical(xpriv) => Pubkey::Hierarchical(Xpub::from_priv(secp, xpriv)),
        }
    }

    /// Apply `path` to this secret.
    ///
    /// A flat key has no children, so only the empty path is accepted for it.
    pub fn derive<C: Signing>(&self, secp: &Secp256k1<C>, path: &DerivationPath) -> Result<Secret> {
        match self {
            Secret::Flat(_) if path.is_master() => Ok(*self),
            Secret::Flat(_) => Err(Error::InvalidKey(format!("cannot derive {} from a flat key", path))),
            Secret::Hierarchical(xpriv) => Ok(Secret::Hierarchical(xpriv.derive_priv(secp, path)?)),
        }
    }

    /// The raw signing key and whether its public key is serialized compressed.
    pub fn signing_key(&self) -> (SecretKey, bool) {
        match self {
            Secret::Flat(key) => (key.inner, key.compressed),
            Secret::Hierarchical(xpriv) => (xpriv.private_key, true),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Flat(_) => f.write_str("Secret::Flat(<hidden>)"),
            Secret::Hierarchical(_) => f.write_str("Secret::Hierarchical(<hidden>)"),
        }
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Flat(key) => f.write_str(&key.to_wif()),
            Secret::Hierarchical(xpriv) => fmt::Display::fmt(xpriv, f),
        }
    }
}

impl FromStr for Secret {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(key) = PrivateKey::from_wif(s) {
            return Ok(Secret::Flat(key));
        }
        Xpriv::from_str(s)
            .map(Secret::Hierarchical)
            .map_err(|_| Error::InvalidKey("not a WIF or extended private key".into()))
    }
}

/// A verification key, or the public half of an extended key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pubkey {
    Flat(PublicKey),
    Hierarchical(Xpub),
}

impl Pubkey {
    /// Apply a non-hardened `path` to this key.
    ///
    /// Hardened steps need the secret and fail with [`Error::InvalidKey`].
    pub fn derive<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        path: &DerivationPath,
    ) -> Result<Pubkey> {
        if let Some(step) = path.into_iter().find(|step| step.is_hardened()) {
            return Err(Error::InvalidKey(format!(
                "hardened step {} cannot be derived from a public key",
                step
            )));
        }
        match self {
            Pubkey::Flat(_) if path.is_master() => Ok(*self),
            Pubkey::Flat(_) => Err(Error::InvalidKey(format!("cannot derive {} from a flat key", path))),
            Pubkey::Hierarchical(xpub) => Ok(Pubkey::Hierarchical(xpub.derive_pub(secp, path)?)),
        }
    }

    /// The secp256k1 public key itself.
    pub fn public_key(&self) -> PublicKey {
        match self {
            Pubkey::Flat(key) => *key,
            Pubkey::Hierarchical(xpub) => PublicKey::new(xpub.public_key),
        }
    }

    /// Pay-to-public-key-hash address of this key.
    pub fn address(&self, network: Network) -> Address {
        Address::p2pkh(self.public_key().pubkey_hash(), network)
    }

    fn encoding(&self) -> Vec<u8> {
        match self {
            Pubkey::Flat(key) => key.to_bytes(),
            Pubkey::Hierarchical(xpub) => xpub.encode().to_vec(),
        }
    }
}

impl Ord for Pubkey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoding().cmp(&other.encoding())
    }
}

impl PartialOrd for Pubkey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pubkey::Flat(key) => fmt::Display::fmt(key, f),
            Pubkey::Hierarchical(xpub) => fmt::Display::fmt(xpub, f),
        }
    }
}

impl FromStr for Pubkey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(xpub) = Xpub::from_str(s) {
            return Ok(Pubkey::Hierarchical(xpub));
        }
        PublicKey::from_str(s)
            .map(Pubkey::Flat)
            .map_err(|_| Error::InvalidKey(format!("not a public key: {}", s)))
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Secret);
string_serde!(Pubkey);

/// How paths are read relative to a stored master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterKeyKind {
    /// One flat key, one address. Change returns to it.
    SingleAddress,
    /// Receive and change chains directly below the key.
    HdSequence,
    /// A BIP44 account key (`m/44'/0'/n'`).
    Bip44Account,
    /// A BIP44 root key.
    Bip44Master,
}

impl MasterKeyKind {
    /// Path from the stored key to the key its sequences hang from.
    ///
    /// Non-empty only for kinds whose account level is hardened, which must be
    /// derived from the secret.
    pub fn account_path(&self) -> DerivationPath {
        use bitcoin::bip32::ChildNumber;

        match self {
            MasterKeyKind::Bip44Master => DerivationPath::from(vec![
                ChildNumber::Hardened {
                    index: 44,
                },
                ChildNumber::Hardened {
                    index: 0,
                },
                ChildNumber::Hardened {
                    index: 0,
                },
            ]),
            _ => DerivationPath::master(),
        }
    }

    /// Full path from the stored key to the receive chain.
    pub fn receive_path(&self) -> DerivationPath {
        self.account_path().extend(self.chain_path(0))
    }

    /// Full path from the stored key to the change chain.
    pub fn change_path(&self) -> DerivationPath {
        self.account_path().extend(self.chain_path(1))
    }

    /// Path of a chain below the account key.
    pub(crate) fn chain_path(&self, chain: u32) -> DerivationPath {
        use bitcoin::bip32::ChildNumber;

        match self {
            MasterKeyKind::SingleAddress => DerivationPath::master(),
            _ => DerivationPath::from(vec![ChildNumber::Normal {
                index: chain,
            }]),
        }
    }
}

/// Serde helpers encoding a derivation path as an array of raw indices.
pub mod path_serde {
    use bitcoin::bip32::{ChildNumber, DerivationPath};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &DerivationPath, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(path.into_iter().map(|step| u32::from(*step)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DerivationPath, D::Error> {
        let raw = Vec::<u32>::deserialize(deserializer)?;
        Ok(DerivationPath::from(raw.into_iter().map(ChildNumber::from).collect::<Vec<_>>()))
    }
}
