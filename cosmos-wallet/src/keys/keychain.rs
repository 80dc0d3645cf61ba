//! Public key to secret key mapping.

use std::collections::BTreeMap;

use bitcoin::secp256k1::{Secp256k1, Signing};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::derivation::Derivation;
use super::key::{Pubkey, Secret};
use crate::error::{Error, Result};

/// Secrets indexed by their public key.
///
/// Serializes as a flat object from public key string to secret string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Keychain {
    keys: BTreeMap<Pubkey, Secret>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair, returning the extended keychain.
    ///
    /// Inserting an identical pair again is a no-op. A public key already
    /// bound to a different secret fails with [`Error::KeyConflict`].
    pub fn insert(mut self, pubkey: Pubkey, secret: Secret) -> Result<Self> {
        match self.keys.get(&pubkey) {
            Some(existing) if *existing != secret => Err(Error::KeyConflict(pubkey.to_string())),
            Some(_) => Ok(self),
            None => {
                self.keys.insert(pubkey, secret);
                Ok(self)
            }
        }
    }

    /// Add a secret under its own public key.
    pub fn insert_secret<C: Signing>(self, secp: &Secp256k1<C>, secret: Secret) -> Result<Self> {
        let pubkey = secret.to_public(secp);
        self.insert(pubkey, secret)
    }

    /// Look up the master secret named by `derivation` and apply its path.
    pub fn derive<C: Signing>(&self, secp: &Secp256k1<C>, derivation: &Derivation) -> Result<Secret> {
        let master = self
            .keys
            .get(&derivation.parent)
            .ok_or_else(|| Error::UnknownKey(derivation.parent.to_string()))?;
        master.derive(secp, &derivation.path)
    }

    pub fn get(&self, pubkey: &Pubkey) -> Option<&Secret> {
        self.keys.get(pubkey)
    }

    pub fn contains(&self, pubkey: &Pubkey) -> bool {
        self.keys.contains_key(pubkey)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// A keychain with no keys cannot sign anything.
    pub fn valid(&self) -> bool {
        !self.keys.is_empty()
    }
}

/// Pairs in document order, duplicates kept.
struct Entries(Vec<(Pubkey, Secret)>);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                f.write_str("an object mapping public keys to secret keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> core::result::Result<Entries, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<Pubkey, Secret>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl Entries {
    fn into_keychain(self) -> Result<Keychain> {
        self.0.into_iter().try_fold(Keychain::new(), |keychain, (pubkey, secret)| keychain.insert(pubkey, secret))
    }
}

impl<'de> Deserialize<'de> for Keychain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        Entries::deserialize(deserializer)?.into_keychain().map_err(serde::de::Error::custom)
    }
}

impl Keychain {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load the flat document. A public key listed twice with different
    /// secrets fails with [`Error::KeyConflict`].
    pub fn from_json(json: &str) -> Result<Keychain> {
        serde_json::from_str::<Entries>(json)?.into_keychain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bitcoin::NetworkKind;
    use bitcoin::bip32::{DerivationPath, Xpriv};
    use core::str::FromStr;

    fn secret(seed: u8) -> Secret {
        Secret::Hierarchical(Xpriv::new_master(NetworkKind::Test, &[seed; 32]).unwrap())
    }

    #[test]
    fn test_insert_is_idempotent() {
        let secp = Secp256k1::new();
        let a = secret(1);
        let pubkey = a.to_public(&secp);

        let keychain = Keychain::new().insert(pubkey, a).unwrap().insert(pubkey, a).unwrap();
        assert_eq!(keychain.len(), 1);
        assert!(keychain.valid());
    }

    #[test]
    fn test_insert_conflict() {
        let secp = Secp256k1::new();
        let a = secret(1);
        let b = secret(2);
        let pubkey = a.to_public(&secp);

        let keychain = Keychain::new().insert(pubkey, a).unwrap();
        assert_matches!(keychain.clone().insert(pubkey, b), Err(Error::KeyConflict(_)));
        assert_eq!(keychain.get(&pubkey), Some(&a));
    }

    #[test]
    fn test_derive() {
        let secp = Secp256k1::new();
        let a = secret(1);
        let keychain = Keychain::new().insert_secret(&secp, a).unwrap();
        let path = DerivationPath::from_str("m/0/3").unwrap();
        let derivation = Derivation::new(a.to_public(&secp), path.clone());

        assert_eq!(keychain.derive(&secp, &derivation).unwrap(), a.derive(&secp, &path).unwrap());

        let stranger = Derivation::new(secret(9).to_public(&secp), path);
        assert_matches!(keychain.derive(&secp, &stranger), Err(Error::UnknownKey(_)));
    }

    #[test]
    fn test_empty_keychain_is_not_valid() {
        assert!(!Keychain::new().valid());
    }

    #[test]
    fn test_document_round_trip() {
        let secp = Secp256k1::new();
        let keychain = Keychain::new()
            .insert_secret(&secp, secret(1))
            .unwrap()
            .insert_secret(&secp, Secret::Flat(Xpriv::new_master(NetworkKind::Test, &[5; 32]).unwrap().to_priv()))
            .unwrap();

        let json = serde_json::to_string(&keychain).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.is_object());
        assert_eq!(value.as_object().unwrap().len(), 2);

        let back: Keychain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, keychain);
    }

    #[test]
    fn test_document_rejects_bad_secret() {
        let secp = Secp256k1::new();
        let pubkey = secret(1).to_public(&secp);
        let json = format!("{{\"{}\": \"definitely not a key\"}}", pubkey);
        assert!(serde_json::from_str::<Keychain>(&json).is_err());
        assert_matches!(Keychain::from_json(&json), Err(Error::MalformedInput(_)));
    }

    #[test]
    fn test_document_duplicate_conflict() {
        let secp = Secp256k1::new();
        let pubkey = secret(1).to_public(&secp);
        let json = format!("{{\"{}\": \"{}\", \"{}\": \"{}\"}}", pubkey, secret(1), pubkey, secret(2));
        assert_matches!(Keychain::from_json(&json), Err(Error::KeyConflict(_)));

        let same = format!("{{\"{}\": \"{}\", \"{}\": \"{}\"}}", pubkey, secret(1), pubkey, secret(1));
        assert_eq!(Keychain::from_json(&same).unwrap().len(), 1);
    }
}
