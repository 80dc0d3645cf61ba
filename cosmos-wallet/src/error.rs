//! Error types for the wallet core.

use bitcoin::{OutPoint, Txid};
use thiserror::Error;

/// Main error type for the wallet core.
#[derive(Debug, Error)]
pub enum Error {
    /// A document or string did not have the expected shape.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A key failed validation against every recognised key variant.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A public key is already bound to a different secret.
    #[error("Key conflict: {0} is already bound to a different secret")]
    KeyConflict(String),

    /// A derivation names a master key that is not in the keychain.
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// Signing needs a secret that the keychain cannot provide.
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// An outpoint was referenced that the database has never observed.
    #[error("Unknown output: {0}")]
    UnknownOutput(OutPoint),

    /// A transaction was referenced that the database does not store.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(Txid),

    /// An index insert contradicts what is already recorded.
    #[error("Index conflict: {0}")]
    IndexConflict(String),

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: u64,
        required: u64,
    },

    /// A structurally valid value that cannot be used for the requested operation.
    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedInput(err.to_string())
    }
}

impl From<bitcoin::bip32::Error> for Error {
    fn from(err: bitcoin::bip32::Error) -> Self {
        Error::InvalidKey(err.to_string())
    }
}

/// Result type alias for wallet operations.
pub type Result<T> = std::result::Result<T, Error>;
