//! Spendable outputs owned by the wallet.

use std::collections::BTreeMap;

use bitcoin::opcodes::all::OP_CHECKSIG;
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{Amount, OutPoint, PublicKey, ScriptBuf, TxOut, Txid};

use crate::error::{Error, Result};
use crate::keys::{Derivation, DerivedPubkey};
use crate::spend::nosig::{ScriptTemplate, Sigop, push_data, varint_size};

/// Outpoint, input index and sequence number.
const INPUT_OVERHEAD: usize = 32 + 4 + 4;

/// Locking script paying `pubkey` directly.
pub fn p2pk_script(pubkey: &PublicKey) -> Result<ScriptBuf> {
    let mut bytes = push_data(&pubkey.to_bytes())?;
    bytes.push(OP_CHECKSIG.to_u8());
    Ok(ScriptBuf::from_bytes(bytes))
}

/// How to unlock one output: the keys that must sign it, and the literal script
/// bytes that follow their signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemable {
    pub prevout: TxOut,
    pub keys: Vec<Derivation>,
    pub script_code: Vec<u8>,
}

impl Redeemable {
    /// An output paying the hash of `key`. Unlocked by a signature and the key itself.
    pub fn pay_to_address(prevout: TxOut, key: &DerivedPubkey) -> Result<Self> {
        Ok(Self {
            prevout,
            keys: vec![key.derivation.clone()],
            script_code: push_data(&key.pubkey.to_bytes())?,
        })
    }

    /// An output paying `key` directly. Unlocked by a signature alone.
    pub fn pay_to_pubkey(prevout: TxOut, key: Derivation) -> Self {
        Self {
            prevout,
            keys: vec![key],
            script_code: Vec::new(),
        }
    }

    pub fn value(&self) -> Amount {
        self.prevout.value
    }

    pub fn sigops(&self, sighash: EcdsaSighashType) -> Vec<Sigop> {
        self.keys.iter().map(|key| Sigop::new(sighash, key.clone())).collect()
    }

    /// Unlocking script with a placeholder for each signature.
    pub fn template(&self, sighash: EcdsaSighashType) -> ScriptTemplate {
        ScriptTemplate::new(self.sigops(sighash), self.script_code.clone())
    }

    /// Size of the unlocking script once signed, never exceeded.
    pub fn expected_script_size(&self) -> usize {
        self.template(EcdsaSighashType::All).expected_size()
    }

    /// Size of the whole input spending this output, never exceeded.
    pub fn expected_input_size(&self) -> usize {
        let script = self.expected_script_size();
        INPUT_OVERHEAD + varint_size(script) + script
    }
}

/// Outputs added and removed by one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDiff {
    pub txid: Txid,
    /// New wallet outputs, by output index.
    pub insert: BTreeMap<u32, Redeemable>,
    /// Spent wallet outputs, by the index of the input spending them.
    pub remove: BTreeMap<u32, OutPoint>,
}

/// The wallet's unspent outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    outputs: BTreeMap<OutPoint, Redeemable>,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, redeemable: Redeemable) {
        self.outputs.insert(outpoint, redeemable);
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Redeemable> {
        self.outputs.get(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Redeemable)> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Total value of all outputs.
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.outputs.values().map(|r| r.value().to_sat()).sum())
    }

    /// The account after `diff`. Leaves `self` untouched on error.
    pub fn apply(&self, diff: &AccountDiff) -> Result<Account> {
        let mut next = self.clone();
        for outpoint in diff.remove.values() {
            if next.outputs.remove(outpoint).is_none() {
                return Err(Error::UnknownOutput(*outpoint));
            }
        }
        for (vout, redeemable) in &diff.insert {
            let outpoint = OutPoint::new(diff.txid, *vout);
            if next.outputs.insert(outpoint, redeemable.clone()).is_some() {
                return Err(Error::IndexConflict(format!("{} is already in the account", outpoint)));
            }
        }
        Ok(next)
    }
}

impl FromIterator<(OutPoint, Redeemable)> for Account {
    fn from_iter<I: IntoIterator<Item = (OutPoint, Redeemable)>>(iter: I) -> Self {
        Self {
            outputs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Pubkey;
    use crate::test_utils::{p2pkh_script, test_pubkey, test_xpub};
    use assert_matches::assert_matches;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::Secp256k1;

    fn redeemable(value: u64) -> Redeemable {
        let secp = Secp256k1::new();
        let derivation = Derivation::master(Pubkey::Hierarchical(test_xpub(1))).child(0).unwrap();
        let key = DerivedPubkey::resolve(&secp, derivation).unwrap();
        Redeemable::pay_to_address(
            TxOut {
                value: Amount::from_sat(value),
                script_pubkey: p2pkh_script(&key.pubkey),
            },
            &key,
        )
        .unwrap()
    }

    #[test]
    fn test_expected_sizes() {
        let r = redeemable(1_000);
        // Signature push of 74 plus compressed key push of 34.
        assert_eq!(r.expected_script_size(), 108);
        assert_eq!(r.expected_input_size(), 40 + 1 + 108);

        let p2pk = Redeemable::pay_to_pubkey(
            r.prevout.clone(),
            Derivation::master(Pubkey::Flat(test_pubkey(3))),
        );
        assert_eq!(p2pk.expected_script_size(), 74);
    }

    #[test]
    fn test_p2pk_script() {
        let script = p2pk_script(&test_pubkey(3)).unwrap();
        assert!(script.is_p2pk());
        assert_eq!(script.len(), 35);
    }

    #[test]
    fn test_value_and_apply() {
        let a = OutPoint::new(Txid::from_byte_array([1; 32]), 0);
        let b = OutPoint::new(Txid::from_byte_array([2; 32]), 1);
        let account: Account = [(a, redeemable(1_000)), (b, redeemable(2_500))].into_iter().collect();
        assert_eq!(account.value().to_sat(), 3_500);

        let spend_txid = Txid::from_byte_array([3; 32]);
        let diff = AccountDiff {
            txid: spend_txid,
            insert: BTreeMap::from([(1, redeemable(400))]),
            remove: BTreeMap::from([(0, a)]),
        };
        let next = account.apply(&diff).unwrap();
        assert_eq!(next.value().to_sat(), 2_900);
        assert!(next.get(&OutPoint::new(spend_txid, 1)).is_some());

        // Applying twice removes an outpoint that is already gone.
        assert_matches!(next.apply(&diff), Err(Error::UnknownOutput(op)) if op == a);
        assert_eq!(account.len(), 2);
    }
}
