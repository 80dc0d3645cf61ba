//! JSON document for the transaction index.
//!
//! Loading replays every entry through the checked mutators, so a document
//! describing an inconsistent index is rejected rather than half loaded.

use std::collections::BTreeMap;
use std::str::FromStr;

use bitcoin::hashes::sha256;
use bitcoin::{Address, Network, OutPoint, Transaction, consensus};
use serde::{Deserialize, Serialize};

use super::memory::MemoryTxdb;
use super::{Inpoint, When, WritableTxdb};
use crate::error::{Error, Result};

/// Persisted form of a [`MemoryTxdb`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxdbDocument {
    pub network: Network,
    pub transactions: Vec<TransactionEntry>,
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub scripts: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub redeems: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Consensus encoding, hex.
    pub hex: String,
    pub when: When,
    #[serde(default)]
    pub position: u32,
}

fn malformed(what: &str, value: &str) -> Error {
    Error::MalformedInput(format!("{} {}", what, value))
}

fn parse_outpoint(s: &str) -> Result<OutPoint> {
    OutPoint::from_str(s).map_err(|_| malformed("outpoint", s))
}

impl From<&MemoryTxdb> for TxdbDocument {
    fn from(db: &MemoryTxdb) -> Self {
        let transactions = db
            .vertices()
            .into_iter()
            .map(|vertex| TransactionEntry {
                hex: hex::encode(consensus::serialize(&vertex.transaction)),
                when: vertex.when,
                position: vertex.position,
            })
            .collect();

        let outpoints = |set: &std::collections::BTreeSet<OutPoint>| -> Vec<String> {
            set.iter().map(OutPoint::to_string).collect()
        };

        TxdbDocument {
            network: db.network(),
            transactions,
            addresses: db.addresses.iter().map(|(a, set)| (a.to_string(), outpoints(set))).collect(),
            scripts: db.scripts.iter().map(|(h, set)| (h.to_string(), outpoints(set))).collect(),
            redeems: db.redeems.iter().map(|(o, i)| (o.to_string(), i.to_string())).collect(),
        }
    }
}

impl TxdbDocument {
    /// Rebuild the database, replaying every entry through the checked mutators.
    pub fn into_txdb(self) -> Result<MemoryTxdb> {
        let mut db = MemoryTxdb::new(self.network);

        for entry in self.transactions {
            let bytes = hex::decode(&entry.hex).map_err(|_| malformed("transaction hex", &entry.hex))?;
            let transaction: Transaction =
                consensus::deserialize(&bytes).map_err(|e| Error::MalformedInput(e.to_string()))?;
            db.insert_transaction(transaction, entry.when, entry.position)?;
        }

        for (address, outpoints) in &self.addresses {
            let address = Address::from_str(address)
                .map_err(|_| malformed("address", address))?
                .require_network(self.network)
                .map_err(|_| malformed("address for another network", address))?;
            for outpoint in outpoints {
                db.add_address(address.clone(), parse_outpoint(outpoint)?)?;
            }
        }

        for (hash, outpoints) in &self.scripts {
            let hash = sha256::Hash::from_str(hash).map_err(|_| malformed("script hash", hash))?;
            for outpoint in outpoints {
                db.add_script(hash, parse_outpoint(outpoint)?)?;
            }
        }

        for (outpoint, inpoint) in &self.redeems {
            db.set_redeem(parse_outpoint(outpoint)?, Inpoint::from_str(inpoint)?)?;
        }

        Ok(db)
    }
}

impl MemoryTxdb {
    pub fn to_document(&self) -> TxdbDocument {
        TxdbDocument::from(self)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(json: &str) -> Result<MemoryTxdb> {
        serde_json::from_str::<TxdbDocument>(json)?.into_txdb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{funding_tx, p2pkh_script, spend_tx, test_pubkey};
    use crate::txdb::Txdb;
    use assert_matches::assert_matches;

    #[test]
    fn test_round_trip() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 9_000)], 3);
        let funding_id = db.import_transaction(funding, When::Confirmed(1_000), 2).unwrap();
        let spent = OutPoint::new(funding_id, 0);
        let spend = spend_tx(&[spent], &[(p2pkh_script(&test_pubkey(2)), 8_000)]);
        db.import_transaction(spend, When::Unconfirmed, 0).unwrap();

        let json = db.to_json().unwrap();
        let back = MemoryTxdb::from_json(&json).unwrap();

        assert_eq!(back.to_document(), db.to_document());
        assert_eq!(back.redeeming(&spent), db.redeeming(&spent));
    }

    #[test]
    fn test_redeem_without_event_is_rejected_on_load() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 9_000)], 3);
        let funding_id = db.insert_transaction(funding, When::Confirmed(1_000), 0).unwrap();
        let spent = OutPoint::new(funding_id, 0);
        let spend = spend_tx(&[spent], &[(p2pkh_script(&test_pubkey(2)), 8_000)]);
        let spend_id = db.insert_transaction(spend, When::Unconfirmed, 0).unwrap();

        let mut document = db.to_document();
        document.redeems.insert(spent.to_string(), Inpoint::new(spend_id, 0).to_string());
        assert_matches!(document.into_txdb(), Err(Error::UnknownOutput(_)));
    }

    #[test]
    fn test_bad_hex_is_malformed() {
        let json = r#"{"network":"regtest","transactions":[{"hex":"zz","when":"unconfirmed"}]}"#;
        assert_matches!(MemoryTxdb::from_json(json), Err(Error::MalformedInput(_)));
    }
}
