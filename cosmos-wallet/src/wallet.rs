//! A wallet: secrets, public key state and spendable outputs together.

use bitcoin::secp256k1::{All, Secp256k1, Verification};
use bitcoin::{Address, Amount, Network, TxOut};
use rand::Rng;

use crate::account::Account;
use crate::error::Result;
use crate::keys::{Keychain, Pubkeychain};
use crate::restore::Restored;
use crate::spend::{FeeRate, Redeem, Spend, Spent};

#[derive(Debug, Clone)]
pub struct Wallet {
    pub keychain: Keychain,
    pub pubkeychain: Pubkeychain,
    pub account: Account,
}

impl Wallet {
    pub fn new(keychain: Keychain, pubkeychain: Pubkeychain, account: Account) -> Self {
        Self {
            keychain,
            pubkeychain,
            account,
        }
    }

    /// A wallet whose account and receive sequence come from a restore scan.
    pub fn restored(keychain: Keychain, pubkeychain: Pubkeychain, restored: Restored) -> Result<Self> {
        let receive = pubkeychain.receive();
        let scanned = &restored.sequence;
        let pubkeychain = if receive.parent() == scanned.parent() && receive.path() == scanned.path() {
            pubkeychain.update(pubkeychain.receive_name(), restored.last)?
        } else {
            pubkeychain
        };
        Ok(Self::new(keychain, pubkeychain, restored.account))
    }

    pub fn value(&self) -> Amount {
        self.account.value()
    }

    /// Issue a fresh receive address.
    pub fn receive<C: Verification>(&self, secp: &Secp256k1<C>, network: Network) -> Result<(Address, Wallet)> {
        let (key, pubkeychain) = self.pubkeychain.next_receive(secp)?;
        let wallet = Wallet {
            pubkeychain,
            ..self.clone()
        };
        Ok((key.address(network), wallet))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spend<D: Redeem + ?Sized, R: Rng + ?Sized>(
        &self,
        spend: &Spend,
        secp: &Secp256k1<All>,
        payments: &[TxOut],
        fee_rate: FeeRate,
        redeem: &D,
        rng: &mut R,
    ) -> Result<Spent> {
        spend.spend(secp, &self.account, &self.pubkeychain, &self.keychain, payments, fee_rate, redeem, rng)
    }

    /// The wallet once `spent` is broadcast. Fails without changing anything if
    /// any of its diffs does not apply.
    pub fn apply(&self, spent: &Spent) -> Result<Wallet> {
        let account = spent.apply(&self.account)?;
        Ok(Wallet {
            keychain: self.keychain.clone(),
            pubkeychain: spent.pubkeychain.clone(),
            account,
        })
    }
}
