//! Splitting value into many randomly sized outputs.
//!
//! Output values are drawn from a log-triangular distribution: the logarithm of
//! the value is triangular between `ln(min)` and `ln(max)`, with the mode chosen
//! so the distribution has the requested mean.

use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Amount, ScriptBuf, TxOut};
use rand::Rng;
use rand::seq::SliceRandom;

use super::fee::FeeRate;
use super::nosig::varint_size;
use crate::account::Redeemable;
use crate::error::{Error, Result};
use crate::keys::AddressSequence;

/// Size of a pay-to-pubkey-hash output.
pub const P2PKH_OUTPUT_SIZE: usize = 34;

/// Bytes `added` P2PKH outputs add to a transaction that already has `existing`
/// outputs, including growth of the output count.
pub fn added_outputs_size(existing: usize, added: usize) -> usize {
    varint_size(existing + added) - varint_size(existing) + added * P2PKH_OUTPUT_SIZE
}

const MODE_SEARCH_STEPS: usize = 200;

/// A distribution whose logarithm is triangular.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogTriangular {
    low: f64,
    high: f64,
    mode: f64,
}

/// Mean of `e^X` for `X` triangular on `[a, b]` with mode `m`.
fn mean_of(a: f64, b: f64, m: f64) -> f64 {
    let left = ((m - a - 1.0) * m.exp() + a.exp()) / (m - a);
    let right = (b.exp() - (b - m + 1.0) * m.exp()) / (b - m);
    2.0 * (left + right) / (b - a)
}

/// The mean when the mode sits at `a`.
fn min_mean(a: f64, b: f64) -> f64 {
    2.0 * (b.exp() - (b - a + 1.0) * a.exp()) / ((b - a) * (b - a))
}

/// The mean when the mode sits at `b`.
fn max_mean(a: f64, b: f64) -> f64 {
    2.0 * ((b - a - 1.0) * b.exp() + a.exp()) / ((b - a) * (b - a))
}

impl LogTriangular {
    pub fn new(min: f64, max: f64, mean: f64) -> Result<Self> {
        if !(min > 0.0 && max > min) {
            return Err(Error::Invalid(format!("log triangular bounds {}..{} are not increasing", min, max)));
        }
        let (a, b) = (min.ln(), max.ln());
        let (lowest, highest) = (min_mean(a, b), max_mean(a, b));
        if mean < lowest || mean > highest {
            return Err(Error::Invalid(format!(
                "mean {} outside {:.0}..{:.0} for bounds {}..{}",
                mean, lowest, highest, min, max
            )));
        }

        // The mean grows with the mode, so bisect.
        let (mut lo, mut hi) = (a, b);
        let mut mode = (a + b) / 2.0;
        for _ in 0..MODE_SEARCH_STEPS {
            mode = (lo + hi) / 2.0;
            let guess = mean_of(a, b, mode);
            if (guess - mean).abs() < 1.0 {
                break;
            }
            if guess > mean {
                hi = mode;
            } else {
                lo = mode;
            }
        }

        Ok(Self {
            low: a,
            high: b,
            mode,
        })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let (a, b, c) = (self.low, self.high, self.mode);
        let u: f64 = rng.r#gen();
        let x = if u < (c - a) / (b - a) {
            a + (u * (b - a) * (c - a)).sqrt()
        } else {
            b - ((1.0 - u) * (b - a) * (b - c)).sqrt()
        };
        x.exp()
    }
}

/// Bounds for split output values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    pub min_sats_per_output: u64,
    pub max_sats_per_output: u64,
    pub mean_sats_per_output: f64,
    distribution: LogTriangular,
}

impl Split {
    pub fn new(min_sats_per_output: u64, max_sats_per_output: u64, mean_sats_per_output: f64) -> Result<Self> {
        let distribution =
            LogTriangular::new(min_sats_per_output as f64, max_sats_per_output as f64, mean_sats_per_output)?;
        Ok(Self {
            min_sats_per_output,
            max_sats_per_output,
            mean_sats_per_output,
            distribution,
        })
    }

    /// Turn `value` into outputs paying successive keys of `sequence`, to be
    /// added after `existing` outputs.
    ///
    /// Each output pays for its own size at `fee_rate`; the last output takes
    /// whatever is left once another random draw would fall below the minimum.
    /// Returns the shuffled outputs and the sequence advanced past every key used.
    pub fn outputs<C: Verification, R: Rng + ?Sized>(
        &self,
        secp: &Secp256k1<C>,
        sequence: &AddressSequence,
        value: Amount,
        existing: usize,
        fee_rate: FeeRate,
        rng: &mut R,
    ) -> Result<(Vec<Redeemable>, AddressSequence)> {
        let mut outputs = Vec::new();
        let mut sequence = sequence.clone();
        let mut remaining = value.to_sat() as i64;
        let min = self.min_sats_per_output as i64;

        loop {
            let count = outputs.len() + 1;
            let fees = fee_rate.calculate_fee(added_outputs_size(existing, count)).to_sat() as i64;
            let expected_remainder = remaining - fees;
            if expected_remainder < min {
                return Err(Error::InsufficientFunds {
                    available: value.to_sat(),
                    required: (value.to_sat() as i64 + min - expected_remainder) as u64,
                });
            }

            let draw = (self.distribution.sample(rng) + 0.5) as i64;
            let done = expected_remainder - draw < min;
            let output_value = if done {
                expected_remainder
            } else {
                draw
            };

            let (key, next) = sequence.next(secp)?;
            let prevout = TxOut {
                value: Amount::from_sat(output_value as u64),
                script_pubkey: ScriptBuf::new_p2pkh(&key.pubkey.pubkey_hash()),
            };
            outputs.push(Redeemable::pay_to_address(prevout, &key)?);
            sequence = next;

            if done {
                outputs.shuffle(rng);
                return Ok((outputs, sequence));
            }
            remaining -= output_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_xpub;
    use assert_matches::assert_matches;
    use bitcoin::bip32::DerivationPath;
    use core::str::FromStr;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_mean_limits_bracket_interior() {
        let (a, b) = (1_000f64.ln(), 1_000_000f64.ln());
        let middle = mean_of(a, b, (a + b) / 2.0);
        assert!(min_mean(a, b) < middle);
        assert!(middle < max_mean(a, b));
    }

    #[test]
    fn test_samples_stay_in_bounds() {
        let dist = LogTriangular::new(1_000.0, 100_000.0, 20_000.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let samples: Vec<f64> = (0..2_000).map(|_| dist.sample(&mut rng)).collect();
        assert!(samples.iter().all(|s| (999.0..=100_001.0).contains(s)));

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - 20_000.0).abs() < 2_500.0, "sample mean {}", mean);
    }

    #[test]
    fn test_unreachable_mean_rejected() {
        assert_matches!(LogTriangular::new(1_000.0, 100_000.0, 99_000.0), Err(Error::Invalid(_)));
        assert_matches!(LogTriangular::new(10.0, 5.0, 7.0), Err(Error::Invalid(_)));
    }

    #[test]
    fn test_split_outputs_account_for_fees() {
        let secp = Secp256k1::new();
        let sequence = AddressSequence::new(test_xpub(2), DerivationPath::from_str("m/1").unwrap(), 0).unwrap();
        let split = Split::new(1_000, 50_000, 10_000.0).unwrap();
        let fee_rate = FeeRate::new(1_000);
        let mut rng = StdRng::seed_from_u64(9);

        let value = Amount::from_sat(200_000);
        let (outputs, advanced) = split.outputs(&secp, &sequence, value, 0, fee_rate, &mut rng).unwrap();

        let total: u64 = outputs.iter().map(|o| o.value().to_sat()).sum();
        let fee = fee_rate.calculate_fee(added_outputs_size(0, outputs.len()));
        assert_eq!(total + fee.to_sat(), value.to_sat());
        assert!(outputs.iter().all(|o| o.value().to_sat() >= 1_000));
        assert_eq!(advanced.last() as usize, outputs.len());
    }

    #[test]
    fn test_added_outputs_size_counts_varint_growth() {
        assert_eq!(added_outputs_size(1, 1), 34);
        assert_eq!(added_outputs_size(0, 3), 3 * 34);
        assert_eq!(added_outputs_size(252, 1), 34 + 2);
        assert_eq!(added_outputs_size(250, 5), 5 * 34 + 2);
    }

    #[test]
    fn test_split_too_little() {
        let secp = Secp256k1::new();
        let sequence = AddressSequence::new(test_xpub(2), DerivationPath::from_str("m/1").unwrap(), 0).unwrap();
        let split = Split::new(1_000, 50_000, 10_000.0).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        assert_matches!(
            split.outputs(&secp, &sequence, Amount::from_sat(900), 0, FeeRate::new(1_000), &mut rng),
            Err(Error::InsufficientFunds { .. })
        );
    }
}
