//! Local transaction database.
//!
//! An index of wallet-relevant outputs and the inputs that spend them, keyed by
//! address, by script hash and by outpoint. Block header and merkle proof
//! verification belong to the storage layer underneath and are not modelled here.

mod document;
pub mod memory;

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use bitcoin::hashes::{Hash, sha256};
use bitcoin::{Address, Amount, OutPoint, Script, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use document::TxdbDocument;
pub use memory::MemoryTxdb;

/// Hash under which an output script is watched.
pub fn script_hash(script: &Script) -> sha256::Hash {
    sha256::Hash::hash(script.as_bytes())
}

/// Reference to an input of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Inpoint {
    pub txid: Txid,
    pub vin: u32,
}

impl Inpoint {
    pub fn new(txid: Txid, vin: u32) -> Self {
        Self {
            txid,
            vin,
        }
    }
}

impl fmt::Display for Inpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vin)
    }
}

impl FromStr for Inpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (txid, vin) =
            s.split_once(':').ok_or_else(|| Error::MalformedInput(format!("inpoint {}", s)))?;
        Ok(Inpoint {
            txid: Txid::from_str(txid).map_err(|e| Error::MalformedInput(e.to_string()))?,
            vin: vin.parse().map_err(|_| Error::MalformedInput(format!("inpoint {}", s)))?,
        })
    }
}

/// Time at which a transaction happened, as far as the database knows.
///
/// Confirmed transactions sort by block timestamp; unconfirmed ones come last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    Confirmed(u32),
    Unconfirmed,
}

/// A stored transaction with its position in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub transaction: Transaction,
    pub when: When,
    /// Index of the transaction inside its block.
    pub position: u32,
}

impl Vertex {
    pub fn txid(&self) -> Txid {
        self.transaction.compute_txid()
    }
}

/// Spends sort before outputs of the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

/// An output becoming relevant to the wallet, or being spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub direction: Direction,
    /// Transaction the event happens in.
    pub txid: Txid,
    /// Output index for [`Direction::Out`], input index for [`Direction::In`].
    pub index: u32,
    /// The output concerned. For spends this is the output being spent.
    pub outpoint: OutPoint,
    pub output: TxOut,
    pub when: When,
    pub position: u32,
}

impl Event {
    pub fn value(&self) -> Amount {
        self.output.value
    }

    pub fn inpoint(&self) -> Option<Inpoint> {
        match self.direction {
            Direction::In => Some(Inpoint::new(self.txid, self.index)),
            Direction::Out => None,
        }
    }

    fn sort_key(&self) -> (When, u32, Txid, Direction, u32) {
        (self.when, self.position, self.txid, self.direction, self.index)
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read access to the index.
pub trait Txdb {
    /// Events for outputs paying `address`, plus the spends of those outputs.
    fn events_by_address(&self, address: &Address) -> Vec<Event>;

    /// Events for outputs whose script hashes to `hash`, plus their spends.
    fn events_by_script_hash(&self, hash: &sha256::Hash) -> Vec<Event>;

    /// The spend of `outpoint`, if one was recorded.
    fn redeeming(&self, outpoint: &OutPoint) -> Option<Event>;

    fn output(&self, outpoint: &OutPoint) -> Option<TxOut>;

    fn vertex(&self, txid: &Txid) -> Option<&Vertex>;
}

/// Mutations of the index.
pub trait WritableTxdb: Txdb {
    /// Store a transaction without indexing any of its outputs.
    fn insert_transaction(&mut self, transaction: Transaction, when: When, position: u32) -> Result<Txid>;

    /// Store a transaction and index every output and every spend of a known output.
    fn import_transaction(&mut self, transaction: Transaction, when: When, position: u32) -> Result<Txid>;

    /// Associate `outpoint` with `address`. Idempotent.
    fn add_address(&mut self, address: Address, outpoint: OutPoint) -> Result<()>;

    /// Associate `outpoint` with a script hash. Idempotent.
    fn add_script(&mut self, hash: sha256::Hash, outpoint: OutPoint) -> Result<()>;

    /// Record that `outpoint` was spent by `inpoint`.
    ///
    /// Fails with [`Error::UnknownOutput`] if `outpoint` was never associated
    /// with an address or script.
    fn set_redeem(&mut self, outpoint: OutPoint, inpoint: Inpoint) -> Result<()>;
}
