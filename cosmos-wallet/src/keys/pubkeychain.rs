//! Named address sequences plus the derivations of stored master keys.

use std::collections::BTreeMap;

use bitcoin::PublicKey;
use bitcoin::bip32::Xpub;
use bitcoin::secp256k1::{Secp256k1, Signing, Verification};
use serde::{Deserialize, Serialize};

use super::derivation::{Derivation, DerivedPubkey};
use super::key::{MasterKeyKind, Pubkey, Secret};
use super::keychain::Keychain;
use super::sequence::AddressSequence;
use crate::error::{Error, Result};

pub const RECEIVE: &str = "receive";
pub const CHANGE: &str = "change";

/// Public-side key state of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PubkeychainDocument")]
pub struct Pubkeychain {
    pubkeys: BTreeMap<String, Derivation>,
    sequences: BTreeMap<String, AddressSequence>,
    receive: String,
    change: String,
}

#[derive(Deserialize)]
struct PubkeychainDocument {
    #[serde(default)]
    pubkeys: BTreeMap<String, Derivation>,
    sequences: BTreeMap<String, AddressSequence>,
    receive: String,
    change: String,
}

impl TryFrom<PubkeychainDocument> for Pubkeychain {
    type Error = Error;

    fn try_from(doc: PubkeychainDocument) -> Result<Self> {
        Pubkeychain::new(doc.pubkeys, doc.sequences, doc.receive, doc.change)
    }
}

impl Pubkeychain {
    /// Fails with [`Error::MalformedInput`] if `receive` or `change` names no sequence.
    pub fn new(
        pubkeys: BTreeMap<String, Derivation>,
        sequences: BTreeMap<String, AddressSequence>,
        receive: String,
        change: String,
    ) -> Result<Self> {
        for name in [&receive, &change] {
            if !sequences.contains_key(name) {
                return Err(Error::MalformedInput(format!("no address sequence named {}", name)));
            }
        }
        for sequence in sequences.values() {
            sequence.validate()?;
        }
        Ok(Self {
            pubkeys,
            sequences,
            receive,
            change,
        })
    }

    /// Receive and change sequences for a freshly stored master key.
    ///
    /// Kinds with a hardened account level need the secret and are built with
    /// [`Pubkeychain::from_master_secret`] instead. A single address wallet
    /// holds a flat key, see [`Pubkeychain::single`].
    pub fn from_master(kind: MasterKeyKind, name: &str, master: Xpub) -> Result<Self> {
        match kind {
            MasterKeyKind::SingleAddress => {
                Err(Error::InvalidKey("a single address wallet takes a flat key, not an extended key".into()))
            }
            MasterKeyKind::Bip44Master => Err(Error::InvalidKey(format!(
                "account {} of a BIP44 master key is hardened and needs the secret",
                kind.account_path()
            ))),
            MasterKeyKind::HdSequence | MasterKeyKind::Bip44Account => {
                Self::hierarchical(kind, name, Derivation::master(Pubkey::Hierarchical(master)), master)
            }
        }
    }

    /// A wallet of one key. Receive and change both name its only sequence.
    pub fn single(name: &str, key: PublicKey) -> Result<Self> {
        let mut pubkeys = BTreeMap::new();
        pubkeys.insert(name.to_string(), Derivation::master(Pubkey::Flat(key)));

        let mut sequences = BTreeMap::new();
        sequences.insert(name.to_string(), AddressSequence::single(key));

        Self::new(pubkeys, sequences, name.to_string(), name.to_string())
    }

    /// Key state for a freshly stored master secret.
    ///
    /// Hardened account steps are taken with the secret. The returned keychain
    /// holds the master secret and, when it differs, the account secret the
    /// sequences are derived from.
    pub fn from_master_secret<C: Signing>(
        secp: &Secp256k1<C>,
        kind: MasterKeyKind,
        name: &str,
        master: Secret,
    ) -> Result<(Keychain, Pubkeychain)> {
        let keychain = Keychain::new().insert_secret(secp, master)?;
        match (kind, master) {
            (MasterKeyKind::SingleAddress, Secret::Flat(key)) => {
                Ok((keychain, Self::single(name, key.public_key(secp))?))
            }
            (MasterKeyKind::SingleAddress, Secret::Hierarchical(_)) => {
                Err(Error::InvalidKey("a single address wallet takes a flat key, not an extended key".into()))
            }
            (_, Secret::Flat(_)) => Err(Error::InvalidKey(format!("{:?} needs an extended key", kind))),
            (_, Secret::Hierarchical(xpriv)) => {
                let path = kind.account_path();
                let account = xpriv.derive_priv(secp, &path)?;
                let account_pub = Xpub::from_priv(secp, &account);
                let keychain = if path.is_master() {
                    keychain
                } else {
                    keychain.insert_secret(secp, Secret::Hierarchical(account))?
                };
                let record = Derivation::new(Pubkey::Hierarchical(Xpub::from_priv(secp, &xpriv)), path);
                Ok((keychain, Self::hierarchical(kind, name, record, account_pub)?))
            }
        }
    }

    fn hierarchical(kind: MasterKeyKind, name: &str, record: Derivation, account: Xpub) -> Result<Self> {
        let mut pubkeys = BTreeMap::new();
        pubkeys.insert(name.to_string(), record);

        let mut sequences = BTreeMap::new();
        sequences.insert(RECEIVE.to_string(), AddressSequence::new(account, kind.chain_path(0), 0)?);
        sequences.insert(CHANGE.to_string(), AddressSequence::new(account, kind.chain_path(1), 0)?);

        Self::new(pubkeys, sequences, RECEIVE.to_string(), CHANGE.to_string())
    }

    pub fn sequence(&self, name: &str) -> Result<&AddressSequence> {
        self.sequences.get(name).ok_or_else(|| Error::UnknownKey(format!("address sequence {}", name)))
    }

    pub fn receive(&self) -> &AddressSequence {
        // Constructors guarantee both names resolve.
        &self.sequences[&self.receive]
    }

    pub fn change(&self) -> &AddressSequence {
        &self.sequences[&self.change]
    }

    pub fn receive_name(&self) -> &str {
        &self.receive
    }

    pub fn change_name(&self) -> &str {
        &self.change
    }

    pub fn derivation(&self, name: &str) -> Option<&Derivation> {
        self.pubkeys.get(name)
    }

    pub fn insert_derivation(mut self, name: &str, derivation: Derivation) -> Result<Self> {
        match self.pubkeys.get(name) {
            Some(existing) if *existing != derivation => {
                Err(Error::KeyConflict(format!("pubkey name {}", name)))
            }
            _ => {
                self.pubkeys.insert(name.to_string(), derivation);
                Ok(self)
            }
        }
    }

    /// Issue the next key of sequence `name`.
    pub fn next<C: Verification>(&self, secp: &Secp256k1<C>, name: &str) -> Result<(DerivedPubkey, Pubkeychain)> {
        let (key, advanced) = self.sequence(name)?.next(secp)?;
        let mut updated = self.clone();
        updated.sequences.insert(name.to_string(), advanced);
        Ok((key, updated))
    }

    pub fn next_receive<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<(DerivedPubkey, Pubkeychain)> {
        self.next(secp, &self.receive)
    }

    pub fn next_change<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<(DerivedPubkey, Pubkeychain)> {
        self.next(secp, &self.change)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Pubkeychain> {
        Ok(serde_json::from_str(json)?)
    }

    /// Move sequence `name` forward to `last`. Never moves it back.
    pub fn update(&self, name: &str, last: u32) -> Result<Pubkeychain> {
        let sequence = self.sequence(name)?;
        let mut updated = self.clone();
        if last > sequence.last() {
            updated.sequences.insert(name.to_string(), sequence.with_last(last));
        }
        Ok(updated)
    }
}
