//! Rebuilding wallet state from the transaction index.
//!
//! A restore walks an address sequence, asking the index about each address
//! until a run of unused addresses as long as the look-ahead is found. The
//! events found make up the history, and the outputs never spent make up the
//! account.

use std::collections::{BTreeMap, BTreeSet};
use std::iter;

use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Amount, Network, OutPoint};
use tracing::{debug, info};

use crate::account::{Account, Redeemable, p2pk_script};
use crate::config::WalletOptions;
use crate::error::Result;
use crate::gap_limit::{DEFAULT_GAP_LIMIT, GapLimit, GapLimitStats};
use crate::history::History;
use crate::keys::derivation::prefixes;
use crate::keys::{AddressSequence, Derivation, DerivedPubkey, Pubkey};
use crate::txdb::{Direction, Event, Txdb, script_hash};

/// Everything the index knows about one key.
#[derive(Debug, Default)]
struct Probe {
    events: Vec<Event>,
    unspent: Vec<(OutPoint, Redeemable)>,
}

impl Probe {
    fn is_used(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Restored state of one address sequence.
#[derive(Debug, Clone)]
pub struct Restored {
    /// Events of every probed key, in transaction order.
    pub history: Vec<Event>,
    pub account: Account,
    /// First index not seen used.
    pub last: u32,
    /// The input sequence positioned at `last`.
    pub sequence: AddressSequence,
    pub stats: GapLimitStats,
}

impl Restored {
    pub fn balance(&self) -> Amount {
        self.account.value()
    }

    /// History grouped per transaction.
    pub fn summary(&self) -> History {
        History::from_events(self.history.iter().cloned())
    }
}

/// Restored state of an explicit list of keys.
#[derive(Debug, Clone, Default)]
pub struct WatchOnly {
    pub history: Vec<Event>,
    pub account: Account,
    /// Keys with any recorded activity.
    pub used: BTreeSet<Pubkey>,
}

impl WatchOnly {
    pub fn balance(&self) -> Amount {
        self.account.value()
    }

    pub fn summary(&self) -> History {
        History::from_events(self.history.iter().cloned())
    }
}

/// Restore scanner.
#[derive(Debug, Clone, Copy)]
pub struct Restore {
    network: Network,
    max_look_ahead: u32,
    check_sub_keys: bool,
}

impl Restore {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            max_look_ahead: DEFAULT_GAP_LIMIT,
            check_sub_keys: false,
        }
    }

    pub fn from_options(options: &WalletOptions) -> Self {
        Self {
            network: options.network,
            max_look_ahead: options.max_look_ahead,
            check_sub_keys: options.check_sub_keys,
        }
    }

    /// Consecutive unused addresses probed before stopping.
    pub fn with_max_look_ahead(mut self, max_look_ahead: u32) -> Self {
        self.max_look_ahead = max_look_ahead;
        self
    }

    /// Also probe the keys on the path from the sequence's parent to its addresses.
    pub fn with_check_sub_keys(mut self, check: bool) -> Self {
        self.check_sub_keys = check;
        self
    }

    /// Scan `sequence` against `txdb`.
    ///
    /// Keys already issued (below the sequence's `last`) are always probed.
    /// The scan continues from `last` and stops after `max_look_ahead`
    /// consecutive unused addresses; activity anywhere in that window reopens it.
    pub fn restore<C: Verification, D: Txdb + ?Sized>(
        &self,
        secp: &Secp256k1<C>,
        txdb: &D,
        sequence: &AddressSequence,
    ) -> Result<Restored> {
        let mut gap = GapLimit::new(self.max_look_ahead, sequence.last());
        let mut events = BTreeSet::new();
        let mut unspent = BTreeMap::new();
        let mut collect = |probe: Probe| {
            events.extend(probe.events);
            unspent.extend(probe.unspent);
        };

        if self.check_sub_keys {
            let path = sequence.path();
            for prefix in prefixes(path).into_iter().chain(iter::once(path.clone())) {
                let key = DerivedPubkey::resolve(secp, Derivation::new(*sequence.parent(), prefix))?;
                let probe = self.probe(txdb, &key)?;
                if probe.is_used() {
                    debug!("Sub key {} has activity", key.derivation.path);
                }
                collect(probe);
            }
        }

        if sequence.is_single() {
            // Every index names the same key, so one lookup covers the sequence.
            let probe = self.probe(txdb, &sequence.key_at(secp, 0)?)?;
            if probe.is_used() {
                gap.mark_used(0);
            }
            collect(probe);
            gap.finish();
        } else {
            for index in 0..sequence.last() {
                let probe = self.probe(txdb, &sequence.key_at(secp, index)?)?;
                if probe.is_used() {
                    gap.mark_used(index);
                }
                collect(probe);
            }
        }

        while let Some(index) = gap.next_probe() {
            let probe = self.probe(txdb, &sequence.key_at(secp, index)?)?;
            if probe.is_used() {
                debug!("Address {} of {} has activity", index, sequence.path());
                gap.mark_used(index);
            } else {
                gap.mark_unused(index);
            }
            collect(probe);
        }

        let last = if sequence.is_single() {
            sequence.last()
        } else {
            gap.resume_index()
        };
        let restored = Restored {
            history: events.into_iter().collect(),
            account: unspent.into_iter().collect(),
            last,
            sequence: sequence.with_last(last),
            stats: gap.stats(),
        };
        info!(
            "Restored {} events and {} unspent outputs worth {}, next index {}",
            restored.history.len(),
            restored.account.len(),
            restored.balance(),
            last
        );
        Ok(restored)
    }

    /// Scan an explicit list of keys. Every key is probed.
    pub fn watch<C: Verification, D: Txdb + ?Sized>(
        &self,
        secp: &Secp256k1<C>,
        txdb: &D,
        pubkeys: &[Pubkey],
    ) -> Result<WatchOnly> {
        let mut events = BTreeSet::new();
        let mut account = Account::new();
        let mut used = BTreeSet::new();

        for pubkey in pubkeys {
            let key = DerivedPubkey::resolve(secp, Derivation::master(*pubkey))?;
            let probe = self.probe(txdb, &key)?;
            if probe.is_used() {
                used.insert(*pubkey);
            }
            events.extend(probe.events);
            for (outpoint, redeemable) in probe.unspent {
                account.insert(outpoint, redeemable);
            }
        }

        info!("Watched {} keys, {} with activity", pubkeys.len(), used.len());
        Ok(WatchOnly {
            history: events.into_iter().collect(),
            account,
            used,
        })
    }

    /// Events for `key` as an address and as a bare public key, and its unspent outputs.
    fn probe<D: Txdb + ?Sized>(&self, txdb: &D, key: &DerivedPubkey) -> Result<Probe> {
        let mut events = txdb.events_by_address(&key.address(self.network));
        events.extend(txdb.events_by_script_hash(&script_hash(&p2pk_script(&key.pubkey)?)));

        let mut unspent = Vec::new();
        for event in &events {
            if event.direction != Direction::Out || txdb.redeeming(&event.outpoint).is_some() {
                continue;
            }
            let script = &event.output.script_pubkey;
            let redeemable = if script.is_p2pkh() {
                Redeemable::pay_to_address(event.output.clone(), key)?
            } else if script.is_p2pk() {
                Redeemable::pay_to_pubkey(event.output.clone(), key.derivation.clone())
            } else {
                continue;
            };
            unspent.push((event.outpoint, redeemable));
        }

        Ok(Probe {
            events,
            unspent,
        })
    }
}
