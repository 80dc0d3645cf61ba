//! Per-transaction view of wallet events.

use std::collections::BTreeSet;

use bitcoin::{Amount, SignedAmount, Txid};

use crate::txdb::{Direction, Event, When};

/// What one transaction did to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub txid: Txid,
    pub when: When,
    pub position: u32,
    /// Value of wallet outputs created.
    pub received: Amount,
    /// Value of wallet outputs spent.
    pub spent: Amount,
    /// Balance after this transaction.
    pub balance: Amount,
}

impl HistoryEntry {
    /// Net change to the balance.
    pub fn moved(&self) -> SignedAmount {
        SignedAmount::from_sat(self.received.to_sat() as i64 - self.spent.to_sat() as i64)
    }
}

/// Wallet history in transaction order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    /// Group events by transaction. Duplicate events count once.
    pub fn from_events<I: IntoIterator<Item = Event>>(events: I) -> Self {
        let events: BTreeSet<Event> = events.into_iter().collect();
        let mut entries: Vec<HistoryEntry> = Vec::new();
        let mut balance = 0u64;

        for event in events {
            let value = event.value().to_sat();
            let same_tx = entries.last().is_some_and(|entry| entry.txid == event.txid);
            if !same_tx {
                entries.push(HistoryEntry {
                    txid: event.txid,
                    when: event.when,
                    position: event.position,
                    received: Amount::ZERO,
                    spent: Amount::ZERO,
                    balance: Amount::from_sat(balance),
                });
            }
            let Some(entry) = entries.last_mut() else {
                continue;
            };
            match event.direction {
                Direction::Out => {
                    entry.received += event.value();
                    balance += value;
                }
                Direction::In => {
                    entry.spent += event.value();
                    balance = balance.saturating_sub(value);
                }
            }
            entry.balance = Amount::from_sat(balance);
        }

        Self {
            entries,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn balance(&self) -> Amount {
        self.entries.last().map(|entry| entry.balance).unwrap_or(Amount::ZERO)
    }

    pub fn received(&self) -> Amount {
        self.entries.iter().map(|entry| entry.received).sum()
    }

    pub fn spent(&self) -> Amount {
        self.entries.iter().map(|entry| entry.spent).sum()
    }
}
