//! Change outputs.

use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Amount, ScriptBuf, TxOut};
use rand::Rng;
use tracing::debug;

use super::fee::FeeRate;
use super::split::{Split, added_outputs_size};
use crate::account::Redeemable;
use crate::config::WalletOptions;
use crate::error::{Error, Result};
use crate::keys::AddressSequence;

/// Change outputs and the change sequence advanced past their keys.
#[derive(Debug, Clone)]
pub struct Change {
    pub outputs: Vec<Redeemable>,
    pub sequence: AddressSequence,
}

impl Change {
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.outputs.iter().map(|o| o.value().to_sat()).sum())
    }

    pub fn tx_outs(&self) -> Vec<TxOut> {
        self.outputs.iter().map(|o| o.prevout.clone()).collect()
    }
}

/// Builds change for whatever a transaction leaves over.
#[derive(Debug, Clone)]
pub struct MakeChange {
    dust_threshold: u64,
    split: Option<Split>,
}

impl Default for MakeChange {
    fn default() -> Self {
        Self {
            dust_threshold: 546,
            split: None,
        }
    }
}

impl MakeChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: &WalletOptions) -> Result<Self> {
        Ok(Self {
            dust_threshold: options.dust_threshold,
            split: options.split()?,
        })
    }

    /// Below this value no change output is made.
    pub fn with_dust_threshold(mut self, threshold: u64) -> Self {
        self.dust_threshold = threshold;
        self
    }

    /// Spread large change over several outputs.
    pub fn with_split(mut self, split: Split) -> Self {
        self.split = Some(split);
        self
    }

    /// Change for `available` minus `required`.
    ///
    /// `required` is what the transaction already needs without change: the
    /// payments plus their fee, for a transaction of `existing` outputs. Each
    /// change output pays for its own size and for any growth of the output
    /// count. A remainder below the dust threshold is left to the fee.
    pub fn make_change<C: Verification, R: Rng + ?Sized>(
        &self,
        secp: &Secp256k1<C>,
        sequence: &AddressSequence,
        available: Amount,
        required: Amount,
        existing: usize,
        fee_rate: FeeRate,
        rng: &mut R,
    ) -> Result<Change> {
        let leftover = available.checked_sub(required).ok_or(Error::InsufficientFunds {
            available: available.to_sat(),
            required: required.to_sat(),
        })?;

        let none = Change {
            outputs: Vec::new(),
            sequence: sequence.clone(),
        };

        let output_fee = fee_rate.calculate_fee(added_outputs_size(existing, 1));
        let single = match leftover.checked_sub(output_fee) {
            Some(value) if value.to_sat() >= self.dust_threshold => value,
            _ => {
                debug!("Leftover {} is dust, adding it to the fee", leftover);
                return Ok(none);
            }
        };

        if let Some(split) = &self.split {
            if single.to_sat() > split.max_sats_per_output {
                let (outputs, sequence) = split.outputs(secp, sequence, leftover, existing, fee_rate, rng)?;
                debug!("Split change of {} into {} outputs", leftover, outputs.len());
                return Ok(Change {
                    outputs,
                    sequence,
                });
            }
        }

        let (key, sequence) = sequence.next(secp)?;
        let prevout = TxOut {
            value: single,
            script_pubkey: ScriptBuf::new_p2pkh(&key.pubkey.pubkey_hash()),
        };
        Ok(Change {
            outputs: vec![Redeemable::pay_to_address(prevout, &key)?],
            sequence,
        })
    }
}
