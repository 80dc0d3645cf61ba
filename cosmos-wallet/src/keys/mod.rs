//! Keys, key expressions and the structures that hold them.

pub mod derivation;
pub mod key;
pub mod keychain;
pub mod pubkeychain;
pub mod sequence;

pub use derivation::{Derivation, DerivedPubkey};
pub use key::{MasterKeyKind, Pubkey, Secret};
pub use keychain::Keychain;
pub use pubkeychain::Pubkeychain;
pub use sequence::AddressSequence;
