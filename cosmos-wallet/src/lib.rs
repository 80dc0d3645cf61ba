//! Cosmos Wallet Library
//!
//! Wallet core for Bitcoin-style chains: hierarchical key derivation, keychains
//! of secrets, receive/change address sequences, a local transaction index,
//! gap-limit restore scanning, coin selection with change, and a two-phase
//! signing pipeline that sizes transactions before they are signed.
//!
//! Signatures commit to the legacy Bitcoin signature hash with the standard
//! sighash directives. Chains that require the FORKID flag (Bitcoin Cash,
//! Bitcoin SV) are not supported, and skeleton documents carrying it are
//! rejected on load.

#[cfg(test)]
mod test_utils;

pub mod account;
pub mod config;
pub mod error;
pub mod gap_limit;
pub mod history;
pub mod keys;
#[cfg(feature = "logging")]
pub mod logging;
pub mod restore;
pub mod spend;
pub mod txdb;
pub mod wallet;

pub use bitcoin;

pub use account::{Account, AccountDiff, Redeemable};
pub use config::WalletOptions;
pub use error::{Error, Result};
pub use gap_limit::{GapLimit, GapLimitStage};
pub use history::{History, HistoryEntry};
pub use keys::{AddressSequence, Derivation, DerivedPubkey, Keychain, MasterKeyKind, Pubkey, Pubkeychain, Secret};
#[cfg(feature = "logging")]
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use restore::{Restore, Restored, WatchOnly};
pub use spend::{
    CoinSelector, DefaultRedeem, FeeRate, MakeChange, NosigTransaction, Redeem, SelectionStrategy, Spend, Spent,
    Split,
};
pub use txdb::{Direction, Event, Inpoint, MemoryTxdb, Txdb, TxdbDocument, When, WritableTxdb};
pub use wallet::Wallet;

/// Re-export commonly used types
pub mod prelude {
    pub use super::{
        Account, AddressSequence, DefaultRedeem, Error, FeeRate, Keychain, MemoryTxdb, Pubkey, Pubkeychain, Restore,
        Result, Secret, Spend, Txdb, WalletOptions, WritableTxdb,
    };
}
