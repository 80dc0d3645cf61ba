//! Building and signing transactions that spend the wallet's outputs.
//!
//! Spending happens in two phases. First a skeleton is built from the selected
//! inputs, the payments and any change, with every signature replaced by a
//! placeholder of the largest size a signature can take, so the fee computed
//! from the skeleton is always enough. Then each placeholder is signed with a
//! key derived from the keychain.

pub mod change;
pub mod fee;
pub mod nosig;
pub mod redeem;
pub mod selection;
pub mod split;

use std::collections::BTreeMap;

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxOut};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::account::{Account, AccountDiff, Redeemable};
use crate::config::WalletOptions;
use crate::error::{Error, Result};
use crate::keys::{Keychain, Pubkeychain};

pub use change::{Change, MakeChange};
pub use fee::FeeRate;
pub use nosig::{NosigInput, NosigTransaction, ScriptElement, ScriptTemplate, Sigop};
pub use redeem::{DefaultRedeem, Redeem, SighashDocument};
pub use selection::{CoinSelector, Selection, SelectionStrategy};
pub use split::Split;

/// One signed transaction with the skeleton it was signed from.
#[derive(Debug, Clone)]
pub struct SpentTransaction {
    pub transaction: Transaction,
    pub skeleton: NosigTransaction,
    /// How the account changes once the transaction is accepted.
    pub diff: AccountDiff,
}

impl SpentTransaction {
    pub fn fee(&self) -> Result<Amount> {
        self.skeleton.fee()
    }
}

/// The result of a spend: signed transactions and the key state to persist
/// once they are broadcast.
#[derive(Debug, Clone)]
pub struct Spent {
    pub transactions: Vec<SpentTransaction>,
    pub pubkeychain: Pubkeychain,
}

impl Spent {
    /// `account` after every transaction's diff, or an error leaving nothing applied.
    pub fn apply(&self, account: &Account) -> Result<Account> {
        self.transactions.iter().try_fold(account.clone(), |acc, tx| acc.apply(&tx.diff))
    }

    pub fn fee(&self) -> Result<Amount> {
        self.transactions.iter().try_fold(Amount::ZERO, |total, tx| Ok(total + tx.fee()?))
    }
}

/// The spend pipeline: selection, change, signing.
#[derive(Debug, Clone)]
pub struct Spend {
    selector: CoinSelector,
    change: MakeChange,
    sighash: EcdsaSighashType,
}

impl Default for Spend {
    fn default() -> Self {
        Self::new(CoinSelector::default(), MakeChange::default())
    }
}

impl Spend {
    pub fn new(selector: CoinSelector, change: MakeChange) -> Self {
        Self {
            selector,
            change,
            sighash: EcdsaSighashType::All,
        }
    }

    pub fn from_options(strategy: SelectionStrategy, options: &WalletOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::new(CoinSelector::from_options(strategy, options), MakeChange::from_options(options)?))
    }

    pub fn with_sighash(mut self, sighash: EcdsaSighashType) -> Self {
        self.sighash = sighash;
        self
    }

    /// Pay `payments` from `account`.
    ///
    /// Change goes to the pubkeychain's change sequence; the returned
    /// pubkeychain has that sequence advanced past every change key used.
    /// Nothing passed in is modified.
    #[allow(clippy::too_many_arguments)]
    pub fn spend<D: Redeem + ?Sized, R: Rng + ?Sized>(
        &self,
        secp: &Secp256k1<All>,
        account: &Account,
        pubkeychain: &Pubkeychain,
        keychain: &Keychain,
        payments: &[TxOut],
        fee_rate: FeeRate,
        redeem: &D,
        rng: &mut R,
    ) -> Result<Spent> {
        if payments.is_empty() {
            return Err(Error::Invalid("no payments to make".into()));
        }
        if !keychain.valid() {
            return Err(Error::MissingKey("keychain is empty".into()));
        }

        let target = Amount::from_sat(payments.iter().map(|p| p.value.to_sat()).sum());
        let available = account.value();
        if available < target {
            return Err(Error::InsufficientFunds {
                available: available.to_sat(),
                required: target.to_sat(),
            });
        }

        let base_size = NosigTransaction::new(Vec::new(), payments.to_vec()).expected_size();
        let selection = self.selector.select(account, target, fee_rate, base_size, rng)?;

        let inputs = self.inputs(&selection.selected);
        let fee = fee_rate.calculate_fee(NosigTransaction::new(inputs.clone(), payments.to_vec()).expected_size());
        let change = self.change.make_change(
            secp,
            pubkeychain.change(),
            selection.total,
            target + fee,
            payments.len(),
            fee_rate,
            rng,
        )?;
        debug!("Spending {} with fee {} and {} change outputs", target, fee, change.outputs.len());

        let mut outputs: Vec<(TxOut, Option<Redeemable>)> = payments.iter().map(|p| (p.clone(), None)).collect();
        outputs.extend(change.outputs.iter().map(|c| (c.prevout.clone(), Some(c.clone()))));
        outputs.shuffle(rng);

        let spent = self.sign(secp, keychain, &selection.selected, inputs, outputs, fee_rate, redeem)?;
        let pubkeychain = pubkeychain.update(pubkeychain.change_name(), change.sequence.last())?;

        info!(
            "Signed transaction {} paying {} with fee {}",
            spent.diff.txid,
            target,
            spent.skeleton.fee()?
        );
        Ok(Spent {
            transactions: vec![spent],
            pubkeychain,
        })
    }

    /// Spend `outpoints` back to the wallet as randomly sized change outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn split<D: Redeem + ?Sized, R: Rng + ?Sized>(
        &self,
        secp: &Secp256k1<All>,
        account: &Account,
        pubkeychain: &Pubkeychain,
        keychain: &Keychain,
        outpoints: &[OutPoint],
        split: &Split,
        fee_rate: FeeRate,
        redeem: &D,
        rng: &mut R,
    ) -> Result<Spent> {
        if outpoints.is_empty() {
            return Err(Error::Invalid("nothing to split".into()));
        }
        if !keychain.valid() {
            return Err(Error::MissingKey("keychain is empty".into()));
        }

        let mut selected = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let redeemable = account.get(outpoint).ok_or(Error::UnknownOutput(*outpoint))?;
            selected.push((*outpoint, redeemable.clone()));
        }
        let total = Amount::from_sat(selected.iter().map(|(_, r)| r.value().to_sat()).sum());

        let inputs = self.inputs(&selected);
        // Outputs and the growth of their count are charged for by the split itself.
        let base_size = NosigTransaction::new(inputs.clone(), Vec::new()).expected_size();
        let base_fee = fee_rate.calculate_fee(base_size);
        let value = total.checked_sub(base_fee).ok_or(Error::InsufficientFunds {
            available: total.to_sat(),
            required: base_fee.to_sat(),
        })?;

        let (change, sequence) = split.outputs(secp, pubkeychain.change(), value, 0, fee_rate, rng)?;
        let outputs = change.into_iter().map(|c| (c.prevout.clone(), Some(c))).collect();

        let spent = self.sign(secp, keychain, &selected, inputs, outputs, fee_rate, redeem)?;
        let pubkeychain = pubkeychain.update(pubkeychain.change_name(), sequence.last())?;

        info!("Split {} outputs worth {} into {}", outpoints.len(), total, spent.transaction.output.len());
        Ok(Spent {
            transactions: vec![spent],
            pubkeychain,
        })
    }

    fn inputs(&self, selected: &[(OutPoint, Redeemable)]) -> Vec<NosigInput> {
        selected
            .iter()
            .map(|(outpoint, redeemable)| NosigInput {
                previous_output: *outpoint,
                prevout: redeemable.prevout.clone(),
                script: redeemable.template(self.sighash),
                sequence: Sequence::MAX,
            })
            .collect()
    }

    /// Check the skeleton's fee, sign it and work out the account diff.
    #[allow(clippy::too_many_arguments)]
    fn sign<D: Redeem + ?Sized>(
        &self,
        secp: &Secp256k1<All>,
        keychain: &Keychain,
        selected: &[(OutPoint, Redeemable)],
        inputs: Vec<NosigInput>,
        outputs: Vec<(TxOut, Option<Redeemable>)>,
        fee_rate: FeeRate,
        redeem: &D,
    ) -> Result<SpentTransaction> {
        let mut insert = BTreeMap::new();
        let mut tx_outs = Vec::with_capacity(outputs.len());
        for (index, (output, owned)) in outputs.into_iter().enumerate() {
            if let Some(redeemable) = owned {
                insert.insert(index as u32, redeemable);
            }
            tx_outs.push(output);
        }

        let skeleton = NosigTransaction::new(inputs, tx_outs);
        let size = skeleton.expected_size();
        let fee = skeleton.fee()?;
        if !fee_rate.is_paid_by(fee, size) {
            return Err(Error::Invalid(format!(
                "fee {} is below {} for {} bytes",
                fee,
                fee_rate.calculate_fee(size),
                size
            )));
        }

        let transaction = skeleton.sign(secp, keychain, redeem)?;
        let diff = AccountDiff {
            txid: transaction.compute_txid(),
            insert,
            remove: selected.iter().enumerate().map(|(index, (outpoint, _))| (index as u32, *outpoint)).collect(),
        };

        Ok(SpentTransaction {
            transaction,
            skeleton,
            diff,
        })
    }
}
