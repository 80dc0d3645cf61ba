//! Fixtures shared by unit tests.

use bitcoin::absolute::LockTime;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, NetworkKind, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};

pub fn test_pubkey(seed: u8) -> PublicKey {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[seed.max(1); 32]).expect("valid secret");
    PublicKey::new(secret.public_key(&secp))
}

pub fn test_address(seed: u8) -> Address {
    Address::p2pkh(test_pubkey(seed).pubkey_hash(), Network::Regtest)
}

pub fn p2pkh_script(pubkey: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&pubkey.pubkey_hash())
}

pub fn test_xpriv(seed: u8) -> Xpriv {
    Xpriv::new_master(NetworkKind::Test, &[seed; 32]).expect("valid seed")
}

pub fn test_xpub(seed: u8) -> Xpub {
    Xpub::from_priv(&Secp256k1::new(), &test_xpriv(seed))
}

/// A transaction paying `outputs` from an unrelated outpoint chosen by `nonce`.
pub fn funding_tx(outputs: &[(ScriptBuf, u64)], nonce: u8) -> Transaction {
    let source = OutPoint::new(Txid::from_byte_array([nonce.wrapping_add(0xa0); 32]), 0);
    spend_tx(&[source], outputs)
}

pub fn spend_tx(inputs: &[OutPoint], outputs: &[(ScriptBuf, u64)]) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|previous_output| TxIn {
                previous_output: *previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(script_pubkey, value)| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: script_pubkey.clone(),
            })
            .collect(),
    }
}
