//! In-memory transaction index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitcoin::hashes::sha256;
use bitcoin::{Address, Network, OutPoint, Transaction, TxOut, Txid};
use tracing::debug;

use super::{Direction, Event, Inpoint, Txdb, Vertex, When, WritableTxdb, script_hash};
use crate::error::{Error, Result};

/// Transaction index held in memory.
///
/// Mutations that must be seen together go through [`MemoryTxdb::atomically`];
/// queries borrow the database, so a restore or selection pass always observes
/// one consistent state.
#[derive(Debug, Clone)]
pub struct MemoryTxdb {
    network: Network,
    pub(super) transactions: BTreeMap<Txid, Vertex>,
    pub(super) addresses: HashMap<Address, BTreeSet<OutPoint>>,
    pub(super) scripts: BTreeMap<sha256::Hash, BTreeSet<OutPoint>>,
    pub(super) redeems: BTreeMap<OutPoint, Inpoint>,
    /// Outpoints associated with any watch key.
    registered: BTreeSet<OutPoint>,
    /// Every input of every stored transaction, by the outpoint it spends.
    spenders: BTreeMap<OutPoint, Inpoint>,
}

impl MemoryTxdb {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            transactions: BTreeMap::new(),
            addresses: HashMap::new(),
            scripts: BTreeMap::new(),
            redeems: BTreeMap::new(),
            registered: BTreeSet::new(),
            spenders: BTreeMap::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Run `f` against a staged copy and keep its changes only if it succeeds.
    pub fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MemoryTxdb) -> Result<T>,
    {
        let mut staged = self.clone();
        let out = f(&mut staged)?;
        *self = staged;
        Ok(out)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_registered(&self, outpoint: &OutPoint) -> bool {
        self.registered.contains(outpoint)
    }

    /// Stored transactions in history order.
    pub fn vertices(&self) -> Vec<&Vertex> {
        let mut vertices: Vec<&Vertex> = self.transactions.values().collect();
        vertices.sort_by_key(|v| (v.when, v.position, v.txid()));
        vertices
    }

    fn out_event(&self, outpoint: &OutPoint) -> Option<Event> {
        let vertex = self.transactions.get(&outpoint.txid)?;
        let output = vertex.transaction.output.get(outpoint.vout as usize)?;
        Some(Event {
            direction: Direction::Out,
            txid: outpoint.txid,
            index: outpoint.vout,
            outpoint: *outpoint,
            output: output.clone(),
            when: vertex.when,
            position: vertex.position,
        })
    }

    fn in_event(&self, outpoint: &OutPoint, inpoint: &Inpoint) -> Option<Event> {
        let vertex = self.transactions.get(&inpoint.txid)?;
        let output = self.output(outpoint)?;
        Some(Event {
            direction: Direction::In,
            txid: inpoint.txid,
            index: inpoint.vin,
            outpoint: *outpoint,
            output,
            when: vertex.when,
            position: vertex.position,
        })
    }

    fn events_for<'a>(&self, outpoints: impl IntoIterator<Item = &'a OutPoint>) -> Vec<Event> {
        let mut events = Vec::new();
        for outpoint in outpoints {
            events.extend(self.out_event(outpoint));
            events.extend(self.redeeming(outpoint));
        }
        events
    }

    /// The stored output at `outpoint`, or why there is none.
    fn stored_output(&self, outpoint: &OutPoint) -> Result<&TxOut> {
        let vertex =
            self.transactions.get(&outpoint.txid).ok_or(Error::UnknownTransaction(outpoint.txid))?;
        vertex.transaction.output.get(outpoint.vout as usize).ok_or(Error::UnknownOutput(*outpoint))
    }

    fn register(&mut self, outpoint: OutPoint) -> Result<()> {
        if self.registered.insert(outpoint) {
            if let Some(inpoint) = self.spenders.get(&outpoint).copied() {
                self.set_redeem(outpoint, inpoint)?;
            }
        }
        Ok(())
    }

    fn store(&mut self, transaction: Transaction, when: When, position: u32) -> Result<Txid> {
        let txid = transaction.compute_txid();
        if let Some(existing) = self.transactions.get_mut(&txid) {
            // Re-import refreshes confirmation status only.
            if existing.when != when {
                debug!("Transaction {} moved from {:?} to {:?}", txid, existing.when, when);
                existing.when = when;
                existing.position = position;
            }
            return Ok(txid);
        }

        // Checked before anything is written so a rejected transaction leaves no trace.
        let mut claimed = BTreeSet::new();
        for (vin, input) in transaction.input.iter().enumerate() {
            let previous = input.previous_output;
            if let Some(existing) = self.spenders.get(&previous) {
                return Err(Error::IndexConflict(format!(
                    "{} already spent by {}, not {}",
                    previous,
                    existing,
                    Inpoint::new(txid, vin as u32)
                )));
            }
            if !claimed.insert(previous) {
                return Err(Error::IndexConflict(format!("{} spends {} twice", txid, previous)));
            }
        }

        for (vin, input) in transaction.input.iter().enumerate() {
            self.spenders.insert(input.previous_output, Inpoint::new(txid, vin as u32));
        }
        self.transactions.insert(
            txid,
            Vertex {
                transaction,
                when,
                position,
            },
        );
        Ok(txid)
    }
}

impl Txdb for MemoryTxdb {
    fn events_by_address(&self, address: &Address) -> Vec<Event> {
        self.addresses.get(address).map(|outpoints| self.events_for(outpoints)).unwrap_or_default()
    }

    fn events_by_script_hash(&self, hash: &sha256::Hash) -> Vec<Event> {
        self.scripts.get(hash).map(|outpoints| self.events_for(outpoints)).unwrap_or_default()
    }

    fn redeeming(&self, outpoint: &OutPoint) -> Option<Event> {
        let inpoint = self.redeems.get(outpoint)?;
        self.in_event(outpoint, inpoint)
    }

    fn output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.stored_output(outpoint).ok().cloned()
    }

    fn vertex(&self, txid: &Txid) -> Option<&Vertex> {
        self.transactions.get(txid)
    }
}

impl WritableTxdb for MemoryTxdb {
    fn insert_transaction(&mut self, transaction: Transaction, when: When, position: u32) -> Result<Txid> {
        self.store(transaction, when, position)
    }

    fn import_transaction(&mut self, transaction: Transaction, when: When, position: u32) -> Result<Txid> {
        let outputs = transaction.output.clone();
        let txid = self.store(transaction, when, position)?;

        for (vout, output) in outputs.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            self.add_script(script_hash(&output.script_pubkey), outpoint)?;
            if output.script_pubkey.is_p2pkh() {
                if let Ok(address) = Address::from_script(&output.script_pubkey, self.network) {
                    self.add_address(address, outpoint)?;
                }
            }
        }

        let inputs: Vec<OutPoint> =
            self.transactions[&txid].transaction.input.iter().map(|i| i.previous_output).collect();
        for (vin, previous) in inputs.into_iter().enumerate() {
            if self.registered.contains(&previous) {
                self.set_redeem(previous, Inpoint::new(txid, vin as u32))?;
            } else {
                debug!("Input {}:{} spends unobserved output {}", txid, vin, previous);
            }
        }

        Ok(txid)
    }

    fn add_address(&mut self, address: Address, outpoint: OutPoint) -> Result<()> {
        let output = self.stored_output(&outpoint)?;
        if output.script_pubkey != address.script_pubkey() {
            return Err(Error::IndexConflict(format!("{} does not pay {}", outpoint, address)));
        }
        self.addresses.entry(address).or_default().insert(outpoint);
        self.register(outpoint)
    }

    fn add_script(&mut self, hash: sha256::Hash, outpoint: OutPoint) -> Result<()> {
        let output = self.stored_output(&outpoint)?;
        if script_hash(&output.script_pubkey) != hash {
            return Err(Error::IndexConflict(format!("{} script does not hash to {}", outpoint, hash)));
        }
        self.scripts.entry(hash).or_default().insert(outpoint);
        self.register(outpoint)
    }

    fn set_redeem(&mut self, outpoint: OutPoint, inpoint: Inpoint) -> Result<()> {
        if !self.registered.contains(&outpoint) {
            return Err(Error::UnknownOutput(outpoint));
        }
        let spender =
            self.transactions.get(&inpoint.txid).ok_or(Error::UnknownTransaction(inpoint.txid))?;
        match spender.transaction.input.get(inpoint.vin as usize) {
            Some(input) if input.previous_output == outpoint => {}
            _ => return Err(Error::IndexConflict(format!("{} does not spend {}", inpoint, outpoint))),
        }
        match self.redeems.get(&outpoint) {
            Some(existing) if *existing != inpoint => Err(Error::IndexConflict(format!(
                "{} already spent by {}, not {}",
                outpoint, existing, inpoint
            ))),
            Some(_) => Ok(()),
            None => {
                self.redeems.insert(outpoint, inpoint);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{funding_tx, p2pkh_script, spend_tx, test_address, test_pubkey};
    use assert_matches::assert_matches;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_add_address_then_query() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let address = test_address(1);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 5_000)], 0);
        let txid = db.insert_transaction(funding, When::Confirmed(100), 0).unwrap();
        let outpoint = OutPoint::new(txid, 0);

        assert!(db.events_by_address(&address).is_empty());
        db.add_address(address.clone(), outpoint).unwrap();
        db.add_address(address.clone(), outpoint).unwrap();

        let events = db.events_by_address(&address);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outpoint, outpoint);
        assert_eq!(events[0].direction, Direction::Out);
        assert_eq!(events[0].value().to_sat(), 5_000);
    }

    #[test]
    fn test_set_redeem_then_redeeming() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 5_000)], 0);
        let funding_id = db.insert_transaction(funding, When::Confirmed(100), 0).unwrap();
        let outpoint = OutPoint::new(funding_id, 0);
        db.add_address(test_address(1), outpoint).unwrap();

        let spend = spend_tx(&[outpoint], &[(p2pkh_script(&test_pubkey(2)), 4_000)]);
        let spend_id = db.insert_transaction(spend, When::Confirmed(200), 0).unwrap();
        let inpoint = Inpoint::new(spend_id, 0);

        db.set_redeem(outpoint, inpoint).unwrap();
        db.set_redeem(outpoint, inpoint).unwrap();

        let redeem = db.redeeming(&outpoint).unwrap();
        assert_eq!(redeem.inpoint(), Some(inpoint));
        assert_eq!(redeem.direction, Direction::In);

        let events = db.events_by_address(&test_address(1));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_set_redeem_unknown_output() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 5_000)], 0);
        let funding_id = db.insert_transaction(funding, When::Confirmed(100), 0).unwrap();
        let outpoint = OutPoint::new(funding_id, 0);
        let spend = spend_tx(&[outpoint], &[(p2pkh_script(&test_pubkey(2)), 4_000)]);
        let spend_id = db.insert_transaction(spend, When::Unconfirmed, 0).unwrap();

        assert_matches!(
            db.set_redeem(outpoint, Inpoint::new(spend_id, 0)),
            Err(Error::UnknownOutput(op)) if op == outpoint
        );
    }

    #[test]
    fn test_contradictory_inserts_rejected() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 5_000)], 0);
        let txid = db.insert_transaction(funding, When::Confirmed(100), 0).unwrap();
        let outpoint = OutPoint::new(txid, 0);

        assert_matches!(db.add_address(test_address(2), outpoint), Err(Error::IndexConflict(_)));
        assert_matches!(
            db.add_address(test_address(1), OutPoint::new(txid, 3)),
            Err(Error::UnknownOutput(_))
        );
        let missing = OutPoint::new(Txid::from_byte_array([0xee; 32]), 0);
        assert_matches!(db.add_address(test_address(1), missing), Err(Error::UnknownTransaction(_)));
    }

    #[test]
    fn test_import_indexes_outputs_and_spends() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let script = p2pkh_script(&test_pubkey(1));
        let funding = funding_tx(&[(script.clone(), 7_000), (script.clone(), 3_000)], 0);
        let funding_id = db.import_transaction(funding, When::Confirmed(10), 1).unwrap();

        let events = db.events_by_script_hash(&script_hash(&script));
        assert_eq!(events.len(), 2);
        assert_eq!(db.events_by_address(&test_address(1)).len(), 2);

        let spent = OutPoint::new(funding_id, 1);
        let spend = spend_tx(&[spent], &[(p2pkh_script(&test_pubkey(5)), 2_500)]);
        let spend_id = db.import_transaction(spend, When::Unconfirmed, 0).unwrap();
        assert_eq!(db.redeeming(&spent).unwrap().txid, spend_id);
        assert!(db.redeeming(&OutPoint::new(funding_id, 0)).is_none());
    }

    #[test]
    fn test_import_out_of_order_links_spend() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 7_000)], 0);
        let spent = OutPoint::new(funding.compute_txid(), 0);
        let spend = spend_tx(&[spent], &[(p2pkh_script(&test_pubkey(5)), 6_000)]);

        let spend_id = db.import_transaction(spend, When::Confirmed(20), 0).unwrap();
        db.import_transaction(funding, When::Confirmed(10), 0).unwrap();
        assert_eq!(db.redeeming(&spent).unwrap().txid, spend_id);
    }

    #[test]
    fn test_double_spend_rejected_and_document_reloads() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 7_000)], 0);
        let funding_id = db.import_transaction(funding, When::Confirmed(10), 0).unwrap();
        let outpoint = OutPoint::new(funding_id, 0);

        let first = spend_tx(&[outpoint], &[(p2pkh_script(&test_pubkey(5)), 6_000)]);
        let second = spend_tx(&[outpoint], &[(p2pkh_script(&test_pubkey(6)), 6_500)]);
        let first_id = db.import_transaction(first, When::Unconfirmed, 0).unwrap();
        let second_id = second.compute_txid();

        assert_matches!(db.import_transaction(second.clone(), When::Unconfirmed, 1), Err(Error::IndexConflict(_)));
        assert_matches!(db.insert_transaction(second, When::Unconfirmed, 1), Err(Error::IndexConflict(_)));
        assert_eq!(db.transaction_count(), 2);
        assert!(db.vertex(&second_id).is_none());
        assert!(db.events_by_address(&test_address(6)).is_empty());
        assert_eq!(db.redeeming(&outpoint).unwrap().txid, first_id);

        let reloaded = MemoryTxdb::from_json(&db.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.transaction_count(), 2);
        assert_eq!(reloaded.redeeming(&outpoint).unwrap().txid, first_id);
        assert_eq!(reloaded.to_document(), db.to_document());
    }

    #[test]
    fn test_transaction_spending_one_output_twice() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let outpoint = OutPoint::new(Txid::from_byte_array([0x33; 32]), 0);
        let spend = spend_tx(&[outpoint, outpoint], &[(p2pkh_script(&test_pubkey(2)), 1_000)]);
        assert_matches!(db.import_transaction(spend, When::Unconfirmed, 0), Err(Error::IndexConflict(_)));
        assert_eq!(db.transaction_count(), 0);
    }

    #[test]
    fn test_atomically_rolls_back() {
        let mut db = MemoryTxdb::new(Network::Regtest);
        let funding = funding_tx(&[(p2pkh_script(&test_pubkey(1)), 5_000)], 0);

        let result: Result<()> = db.atomically(|db| {
            let txid = db.import_transaction(funding.clone(), When::Unconfirmed, 0)?;
            db.add_address(test_address(2), OutPoint::new(txid, 0))
        });
        assert!(result.is_err());
        assert_eq!(db.transaction_count(), 0);

        db.atomically(|db| db.import_transaction(funding, When::Unconfirmed, 0)).unwrap();
        assert_eq!(db.transaction_count(), 1);
    }
}
