//! Coin selection.
//!
//! Chooses which wallet outputs fund a payment. Whatever the strategy, the
//! selected total always covers the payment plus the fee for the worst-case
//! size of the transaction spending them.

use core::cmp::Reverse;

use bitcoin::{Amount, OutPoint};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use tracing::debug;

use super::fee::FeeRate;
use crate::account::{Account, Redeemable};
use crate::config::WalletOptions;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Select smallest outputs first (consolidates the wallet)
    SmallestFirst,
    /// Select largest outputs first (fewest inputs)
    LargestFirst,
    /// Start from every output and randomly drop outputs while enough change
    /// remains, preferring to keep outputs near the ideal value per input.
    Weighted,
}

/// Result of coin selection
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected outputs, in the order they should be spent
    pub selected: Vec<(OutPoint, Redeemable)>,
    /// Outputs left in the account
    pub rest: Account,
    /// Total value of the selected outputs
    pub total: Amount,
    /// Worst-case size of the transaction without change
    pub estimated_size: usize,
    /// Fee for `estimated_size` at the requested rate
    pub fee: Amount,
}

/// Coin selector for choosing outputs.
#[derive(Debug, Clone)]
pub struct CoinSelector {
    strategy: SelectionStrategy,
    dust_threshold: u64,
    optimal_outputs_per_spend: u32,
    min_change_fraction: f64,
}

impl Default for CoinSelector {
    fn default() -> Self {
        Self::new(SelectionStrategy::Weighted)
    }
}

impl CoinSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            dust_threshold: 546,
            optimal_outputs_per_spend: 5,
            min_change_fraction: 0.1,
        }
    }

    pub fn from_options(strategy: SelectionStrategy, options: &WalletOptions) -> Self {
        Self::new(strategy)
            .with_dust_threshold(options.dust_threshold)
            .with_optimal_outputs_per_spend(options.optimal_outputs_per_spend)
            .with_min_change_fraction(options.min_change_fraction)
    }

    /// Smallest change the weighted strategy tries to leave.
    pub fn with_dust_threshold(mut self, threshold: u64) -> Self {
        self.dust_threshold = threshold;
        self
    }

    pub fn with_optimal_outputs_per_spend(mut self, outputs: u32) -> Self {
        self.optimal_outputs_per_spend = outputs.max(1);
        self
    }

    /// Change the weighted strategy aims for, as a fraction of the amount spent.
    pub fn with_min_change_fraction(mut self, fraction: f64) -> Self {
        self.min_change_fraction = fraction.max(0.0);
        self
    }

    /// Select outputs of `account` paying `target` plus fee.
    ///
    /// `base_size` is the size of the transaction without any inputs.
    pub fn select<R: Rng + ?Sized>(
        &self,
        account: &Account,
        target: Amount,
        fee_rate: FeeRate,
        base_size: usize,
        rng: &mut R,
    ) -> Result<Selection> {
        let available: Vec<(OutPoint, &Redeemable)> = account.iter().map(|(o, r)| (*o, r)).collect();
        let total_available = account.value();
        if total_available < target {
            return Err(Error::InsufficientFunds {
                available: total_available.to_sat(),
                required: target.to_sat(),
            });
        }

        let chosen = match self.strategy {
            SelectionStrategy::SmallestFirst => {
                let mut sorted = available;
                sorted.sort_by_key(|(_, r)| r.value());
                self.accumulate(sorted, target, fee_rate, base_size)?
            }
            SelectionStrategy::LargestFirst => {
                let mut sorted = available;
                sorted.sort_by_key(|(_, r)| Reverse(r.value()));
                self.accumulate(sorted, target, fee_rate, base_size)?
            }
            SelectionStrategy::Weighted => {
                let mut chosen = self.weighted(available, target, fee_rate, base_size, rng)?;
                chosen.shuffle(rng);
                chosen
            }
        };

        let selection = self.finish(account, chosen, target, fee_rate, base_size)?;
        debug!(
            "Selected {} of {} outputs worth {} for {} plus fee {}",
            selection.selected.len(),
            account.len(),
            selection.total,
            target,
            selection.fee
        );
        Ok(selection)
    }

    /// Take outputs in order until they cover the target and their own fee.
    fn accumulate<'a>(
        &self,
        outputs: Vec<(OutPoint, &'a Redeemable)>,
        target: Amount,
        fee_rate: FeeRate,
        base_size: usize,
    ) -> Result<Vec<(OutPoint, &'a Redeemable)>> {
        let mut selected = Vec::new();
        let mut total = 0u64;
        let mut inputs_size = 0usize;

        for (outpoint, redeemable) in outputs {
            total += redeemable.value().to_sat();
            inputs_size += redeemable.expected_input_size();
            selected.push((outpoint, redeemable));

            let required = target.to_sat() + fee_rate.calculate_fee(base_size + inputs_size).to_sat();
            if total >= required {
                return Ok(selected);
            }
        }

        Err(Error::InsufficientFunds {
            available: total,
            required: target.to_sat() + fee_rate.calculate_fee(base_size + inputs_size).to_sat(),
        })
    }

    fn weighted<'a, R: Rng + ?Sized>(
        &self,
        outputs: Vec<(OutPoint, &'a Redeemable)>,
        target: Amount,
        fee_rate: FeeRate,
        base_size: usize,
        rng: &mut R,
    ) -> Result<Vec<(OutPoint, &'a Redeemable)>> {
        let mut selected = outputs;
        let mut spent: u64 = selected.iter().map(|(_, r)| r.value().to_sat()).sum();
        let mut inputs_size: usize = selected.iter().map(|(_, r)| r.expected_input_size()).sum();
        let target = target.to_sat() as f64;
        let min_change = self.dust_threshold as f64;

        loop {
            let mut candidates = Vec::new();
            let mut weights = Vec::new();

            for (index, (_, redeemable)) in selected.iter().enumerate() {
                let value = redeemable.value().to_sat() as f64;
                let remaining = spent as f64 - value;
                let remaining_size = base_size + inputs_size - redeemable.expected_input_size();
                let required = target + fee_rate.calculate_fee(remaining_size).to_sat() as f64;

                if remaining <= required + min_change
                    || remaining <= required * (1.0 + self.min_change_fraction)
                {
                    continue;
                }

                let optimal = required / self.optimal_outputs_per_spend as f64;
                let value = value.max(1.0);
                let weight = if value > optimal {
                    value / optimal
                } else {
                    optimal / value
                };
                candidates.push(index);
                weights.push(weight);
            }

            if candidates.is_empty() {
                break;
            }

            let dist = WeightedIndex::new(&weights).map_err(|e| Error::Invalid(e.to_string()))?;
            let (_, removed) = selected.swap_remove(candidates[dist.sample(rng)]);
            spent -= removed.value().to_sat();
            inputs_size -= removed.expected_input_size();
        }

        Ok(selected)
    }

    fn finish(
        &self,
        account: &Account,
        chosen: Vec<(OutPoint, &Redeemable)>,
        target: Amount,
        fee_rate: FeeRate,
        base_size: usize,
    ) -> Result<Selection> {
        let total = Amount::from_sat(chosen.iter().map(|(_, r)| r.value().to_sat()).sum());
        let estimated_size = base_size + chosen.iter().map(|(_, r)| r.expected_input_size()).sum::<usize>();
        let fee = fee_rate.calculate_fee(estimated_size);
        let required = target + fee;
        if total < required {
            return Err(Error::InsufficientFunds {
                available: total.to_sat(),
                required: required.to_sat(),
            });
        }

        let rest = account
            .iter()
            .filter(|(outpoint, _)| !chosen.iter().any(|(o, _)| o == *outpoint))
            .map(|(o, r)| (*o, r.clone()))
            .collect();

        Ok(Selection {
            selected: chosen.into_iter().map(|(o, r)| (o, r.clone())).collect(),
            rest,
            total,
            estimated_size,
            fee,
        })
    }
}
