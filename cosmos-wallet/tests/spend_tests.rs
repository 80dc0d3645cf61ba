//! End-to-end spend tests: fund, restore, spend, sign, restore again.

use assert_matches::assert_matches;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::script::Instruction;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Network, NetworkKind, OutPoint, PrivateKey, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness, absolute::LockTime,
};
use cosmos_wallet::spend::SpentTransaction;
use cosmos_wallet::{
    DefaultRedeem, Error, FeeRate, Keychain, MasterKeyKind, MemoryTxdb, Pubkeychain, Restore, Secret, Spend, Wallet,
    When, WritableTxdb,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn master(seed: u8) -> Xpriv {
    Xpriv::new_master(NetworkKind::Test, &[seed; 32]).unwrap()
}

fn funding(script_pubkey: ScriptBuf, value: u64) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0x42; 32]), 7),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        }],
    }
}

fn payee(value: u64) -> TxOut {
    let secp = Secp256k1::new();
    let outsider = PublicKey::new(master(200).private_key.public_key(&secp));
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: ScriptBuf::new_p2pkh(&outsider.pubkey_hash()),
    }
}

/// A wallet with one 100,000 satoshi output at its first receive address.
fn funded_wallet(secp: &Secp256k1<All>) -> (Wallet, Pubkeychain, MemoryTxdb) {
    let xpriv = master(1);
    let keychain = Keychain::new().insert_secret(secp, Secret::Hierarchical(xpriv)).unwrap();
    let pubkeychain =
        Pubkeychain::from_master(MasterKeyKind::HdSequence, "main", Xpub::from_priv(secp, &xpriv)).unwrap();

    let (key, issued) = pubkeychain.next_receive(secp).unwrap();
    let mut db = MemoryTxdb::new(Network::Regtest);
    db.import_transaction(funding(key.address(Network::Regtest).script_pubkey(), 100_000), When::Confirmed(1_000), 0)
        .unwrap();

    let restored = Restore::new(Network::Regtest).restore(secp, &db, issued.receive()).unwrap();
    (Wallet::restored(keychain, issued.clone(), restored).unwrap(), pubkeychain, db)
}

fn verify_p2pkh_input(secp: &Secp256k1<All>, spent: &SpentTransaction, index: usize) {
    let unsigned = spent.skeleton.unsigned();
    let prevout = &spent.skeleton.inputs[index].prevout;

    let pushes: Vec<Vec<u8>> = spent.transaction.input[index]
        .script_sig
        .instructions()
        .map(|instruction| match instruction.unwrap() {
            Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
            Instruction::Op(op) => panic!("unexpected opcode {:?}", op),
        })
        .collect();
    assert_eq!(pushes.len(), 2);

    let signature = bitcoin::ecdsa::Signature::from_slice(&pushes[0]).unwrap();
    let pubkey = PublicKey::from_slice(&pushes[1]).unwrap();
    assert_eq!(ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()), prevout.script_pubkey);

    let sighash = SighashCache::new(&unsigned)
        .legacy_signature_hash(index, &prevout.script_pubkey, signature.sighash_type.to_u32())
        .unwrap();
    let message = Message::from_digest(sighash.to_byte_array());
    assert!(secp.verify_ecdsa(&message, &signature.signature, &pubkey.inner).is_ok());
}

#[test]
fn test_spend_half_of_funded_output() {
    let secp = Secp256k1::new();
    let (wallet, _, _) = funded_wallet(&secp);
    assert_eq!(wallet.value().to_sat(), 100_000);

    let mut rng = StdRng::seed_from_u64(7);
    let spent = wallet
        .spend(&Spend::default(), &secp, &[payee(50_000)], FeeRate::new(1_000), &DefaultRedeem, &mut rng)
        .unwrap();
    assert_eq!(spent.transactions.len(), 1);

    let signed = &spent.transactions[0];
    let fee = signed.fee().unwrap().to_sat();
    let outputs = &signed.transaction.output;
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs.iter().map(|o| o.value.to_sat()).sum::<u64>(), 100_000 - fee);
    assert_eq!(outputs.iter().filter(|o| *o == &payee(50_000)).count(), 1);
    assert_eq!(outputs.iter().filter(|o| o.value.to_sat() == 50_000 - fee).count(), 1);
    assert!(FeeRate::new(1_000).is_paid_by(Amount::from_sat(fee), signed.skeleton.expected_size()));

    verify_p2pkh_input(&secp, signed, 0);
    assert!(bitcoin::consensus::serialize(&signed.transaction).len() <= signed.skeleton.expected_size());
}

#[test]
fn test_spend_with_wrong_keychain() {
    let secp = Secp256k1::new();
    let (wallet, _, _) = funded_wallet(&secp);
    let stranger = Keychain::new().insert_secret(&secp, Secret::Hierarchical(master(2))).unwrap();
    let wallet = Wallet {
        keychain: stranger,
        ..wallet
    };

    let mut rng = StdRng::seed_from_u64(7);
    assert_matches!(
        wallet.spend(&Spend::default(), &secp, &[payee(50_000)], FeeRate::new(1_000), &DefaultRedeem, &mut rng),
        Err(Error::MissingKey(_))
    );

    let empty = Wallet {
        keychain: Keychain::new(),
        ..wallet
    };
    assert_matches!(
        empty.spend(&Spend::default(), &secp, &[payee(50_000)], FeeRate::new(1_000), &DefaultRedeem, &mut rng),
        Err(Error::MissingKey(_))
    );
}

#[test]
fn test_change_is_found_by_restore() {
    let secp = Secp256k1::new();
    let (wallet, original, mut db) = funded_wallet(&secp);

    let mut rng = StdRng::seed_from_u64(8);
    let spent = wallet
        .spend(&Spend::default(), &secp, &[payee(30_000)], FeeRate::new(1_000), &DefaultRedeem, &mut rng)
        .unwrap();
    let signed = spent.transactions[0].transaction.clone();
    db.import_transaction(signed, When::Unconfirmed, 0).unwrap();

    let after = wallet.apply(&spent).unwrap();

    let restore = Restore::new(Network::Regtest);
    let change = restore.restore(&secp, &db, original.change()).unwrap();
    assert_eq!(change.last, 1);
    assert_eq!(change.account, after.account);

    let receive = restore.restore(&secp, &db, original.receive()).unwrap();
    assert!(receive.account.is_empty());
    assert_eq!(receive.summary().len(), 2);
    assert_eq!(receive.summary().balance(), Amount::ZERO);
}

#[test]
fn test_spend_more_than_owned() {
    let secp = Secp256k1::new();
    let (wallet, _, _) = funded_wallet(&secp);
    let mut rng = StdRng::seed_from_u64(9);

    assert_matches!(
        wallet.spend(&Spend::default(), &secp, &[payee(100_001)], FeeRate::new(1_000), &DefaultRedeem, &mut rng),
        Err(Error::InsufficientFunds { available: 100_000, .. })
    );
    assert_matches!(
        wallet.spend(&Spend::default(), &secp, &[payee(99_950)], FeeRate::new(1_000), &DefaultRedeem, &mut rng),
        Err(Error::InsufficientFunds { .. })
    );
}

#[test]
fn test_single_address_wallet_returns_change_home() {
    let secp = Secp256k1::new();
    let key = PrivateKey::new(SecretKey::from_slice(&[9u8; 32]).unwrap(), NetworkKind::Test);
    let (keychain, pubkeychain) =
        Pubkeychain::from_master_secret(&secp, MasterKeyKind::SingleAddress, "only", Secret::Flat(key)).unwrap();
    let home = ScriptBuf::new_p2pkh(&key.public_key(&secp).pubkey_hash());

    let mut db = MemoryTxdb::new(Network::Regtest);
    db.import_transaction(funding(home.clone(), 60_000), When::Confirmed(3), 0).unwrap();
    let restored = Restore::new(Network::Regtest).restore(&secp, &db, pubkeychain.receive()).unwrap();
    let wallet = Wallet::restored(keychain, pubkeychain, restored).unwrap();
    assert_eq!(wallet.value().to_sat(), 60_000);

    let mut rng = StdRng::seed_from_u64(12);
    let spent = wallet
        .spend(&Spend::default(), &secp, &[payee(20_000)], FeeRate::new(1_000), &DefaultRedeem, &mut rng)
        .unwrap();
    let signed = &spent.transactions[0];
    let fee = signed.fee().unwrap().to_sat();
    assert_eq!(signed.transaction.output.iter().filter(|o| o.script_pubkey == home).count(), 1);
    verify_p2pkh_input(&secp, signed, 0);

    db.import_transaction(signed.transaction.clone(), When::Unconfirmed, 0).unwrap();
    let after = Restore::new(Network::Regtest).restore(&secp, &db, spent.pubkeychain.receive()).unwrap();
    assert_eq!(after.balance().to_sat(), 40_000 - fee);
    assert_eq!(after.account, wallet.apply(&spent).unwrap().account);
}
