//! Wallet policy options.

use std::path::Path;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spend::{FeeRate, Split};

/// Policy threaded into restore, selection and change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletOptions {
    /// Network addresses are encoded for.
    pub network: Network,

    /// Satoshis per kilobyte.
    pub fee_rate: u64,

    /// Consecutive unused addresses probed before a restore stops.
    pub max_look_ahead: u32,

    /// Also probe the keys between a sequence's parent and its addresses.
    pub check_sub_keys: bool,

    /// Smallest change output worth creating.
    pub dust_threshold: u64,

    /// Number of inputs the weighted selector aims for.
    pub optimal_outputs_per_spend: u32,

    /// Change the weighted selector tries to keep, as a fraction of the amount spent.
    pub min_change_fraction: f64,

    // Change splitting. All three must be set to enable it.
    pub min_split_value: Option<u64>,
    pub max_split_value: Option<u64>,
    pub mean_split_value: Option<f64>,
}

impl Default for WalletOptions {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            fee_rate: 50,
            max_look_ahead: 10,
            check_sub_keys: false,
            dust_threshold: 546,
            optimal_outputs_per_spend: 5,
            min_change_fraction: 0.1,
            min_split_value: None,
            max_split_value: None,
            mean_split_value: None,
        }
    }
}

impl WalletOptions {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    pub fn with_fee_rate(mut self, sat_per_kb: u64) -> Self {
        self.fee_rate = sat_per_kb;
        self
    }

    pub fn with_max_look_ahead(mut self, max_look_ahead: u32) -> Self {
        self.max_look_ahead = max_look_ahead;
        self
    }

    pub fn with_check_sub_keys(mut self, check: bool) -> Self {
        self.check_sub_keys = check;
        self
    }

    pub fn with_dust_threshold(mut self, threshold: u64) -> Self {
        self.dust_threshold = threshold;
        self
    }

    pub fn with_optimal_outputs_per_spend(mut self, outputs: u32) -> Self {
        self.optimal_outputs_per_spend = outputs;
        self
    }

    pub fn with_min_change_fraction(mut self, fraction: f64) -> Self {
        self.min_change_fraction = fraction;
        self
    }

    pub fn with_split(mut self, min: u64, max: u64, mean: f64) -> Self {
        self.min_split_value = Some(min);
        self.max_split_value = Some(max);
        self.mean_split_value = Some(mean);
        self
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::new(self.fee_rate)
    }

    /// The configured change split, if any.
    pub fn split(&self) -> Result<Option<Split>> {
        match (self.min_split_value, self.max_split_value, self.mean_split_value) {
            (Some(min), Some(max), Some(mean)) => Split::new(min, max, mean).map(Some),
            (None, None, None) => Ok(None),
            _ => Err(Error::Invalid(
                "min_split_value, max_split_value and mean_split_value must be set together".into(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_look_ahead == 0 {
            return Err(Error::Invalid("max_look_ahead must be > 0".into()));
        }
        if self.optimal_outputs_per_spend == 0 {
            return Err(Error::Invalid("optimal_outputs_per_spend must be > 0".into()));
        }
        if !(self.min_change_fraction >= 0.0 && self.min_change_fraction.is_finite()) {
            return Err(Error::Invalid(format!(
                "min_change_fraction {} must be a non-negative number",
                self.min_change_fraction
            )));
        }
        if let Some(split) = self.split()? {
            if split.min_sats_per_output < self.dust_threshold {
                return Err(Error::Invalid(format!(
                    "min_split_value {} is below the dust threshold {}",
                    split.min_sats_per_output, self.dust_threshold
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: WalletOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_default_options() {
        let options = WalletOptions::default();
        assert_eq!(options.fee_rate().as_sat_per_kb(), 50);
        assert_eq!(options.max_look_ahead, 10);
        assert!(!options.check_sub_keys);
        assert_eq!(options.dust_threshold, 546);
        assert!(options.split().unwrap().is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = WalletOptions::new(Network::Regtest)
            .with_fee_rate(2_000)
            .with_max_look_ahead(20)
            .with_check_sub_keys(true)
            .with_split(1_000, 100_000, 20_000.0);
        assert_eq!(options.network, Network::Regtest);
        assert_eq!(options.fee_rate().calculate_fee(250).to_sat(), 500);
        assert_eq!(options.split().unwrap().unwrap().max_sats_per_output, 100_000);
    }

    #[test]
    fn test_validation() {
        assert_matches!(WalletOptions::default().with_max_look_ahead(0).validate(), Err(Error::Invalid(_)));
        assert_matches!(
            WalletOptions::default().with_optimal_outputs_per_spend(0).validate(),
            Err(Error::Invalid(_))
        );
        assert_matches!(
            WalletOptions::default().with_split(100, 10_000, 1_000.0).validate(),
            Err(Error::Invalid(_))
        );

        let mut partial = WalletOptions::default();
        partial.min_split_value = Some(1_000);
        assert_matches!(partial.split(), Err(Error::Invalid(_)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options = WalletOptions::from_json_str(r#"{"network": "regtest", "fee_rate": 1000}"#).unwrap();
        assert_eq!(options.network, Network::Regtest);
        assert_eq!(options.fee_rate, 1_000);
        assert_eq!(options.max_look_ahead, 10);

        assert_matches!(WalletOptions::from_json_str("{\"fee_rate\": \"x\"}"), Err(Error::MalformedInput(_)));
        assert_matches!(WalletOptions::from_json_str("{\"max_look_ahead\": 0}"), Err(Error::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&WalletOptions::new(Network::Testnet)).unwrap()).unwrap();
        let options = WalletOptions::from_file(file.path()).unwrap();
        assert_eq!(options, WalletOptions::new(Network::Testnet));

        assert_matches!(WalletOptions::from_file("/nonexistent/options.json"), Err(Error::Io(_)));
    }
}
