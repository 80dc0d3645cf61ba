//! Fee rates.

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

/// Fee rate in satoshis per kilobyte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate {
    sat_per_kb: u64,
}

impl Default for FeeRate {
    fn default() -> Self {
        Self {
            sat_per_kb: 50,
        }
    }
}

impl FeeRate {
    pub fn new(sat_per_kb: u64) -> Self {
        Self {
            sat_per_kb,
        }
    }

    pub fn from_sat_per_byte(sat_per_byte: u64) -> Self {
        Self {
            sat_per_kb: sat_per_byte * 1000,
        }
    }

    pub fn as_sat_per_kb(&self) -> u64 {
        self.sat_per_kb
    }

    /// Fee for a transaction of `size_bytes`, rounded up.
    pub fn calculate_fee(&self, size_bytes: usize) -> Amount {
        Amount::from_sat((self.sat_per_kb * size_bytes as u64).div_ceil(1000))
    }

    /// Whether `fee` pays at least this rate for `size_bytes`.
    pub fn is_paid_by(&self, fee: Amount, size_bytes: usize) -> bool {
        fee >= self.calculate_fee(size_bytes)
    }
}
