//! Turning script templates into unlocking scripts.

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, LegacySighash, SighashCache};
use bitcoin::{ScriptBuf, Transaction, TxOut};

use super::nosig::{ScriptTemplate, Sigop};
use crate::error::{Error, Result};
use crate::keys::Keychain;

/// What a signature for one input commits to, and the means to make it.
pub struct SighashDocument<'a> {
    /// The transaction with all unlocking scripts empty.
    pub transaction: &'a Transaction,
    pub input_index: usize,
    /// The output this input spends.
    pub prevout: &'a TxOut,
    keychain: &'a Keychain,
    secp: &'a Secp256k1<All>,
}

impl<'a> SighashDocument<'a> {
    pub fn new(
        transaction: &'a Transaction,
        input_index: usize,
        prevout: &'a TxOut,
        keychain: &'a Keychain,
        secp: &'a Secp256k1<All>,
    ) -> Self {
        Self {
            transaction,
            input_index,
            prevout,
            keychain,
            secp,
        }
    }

    /// Legacy signature hash over the previous output's script.
    ///
    /// Only the standard Bitcoin directives exist here; replay-protected
    /// FORKID digests, as used by Bitcoin Cash and Bitcoin SV, are not produced.
    pub fn digest(&self, sighash: EcdsaSighashType) -> Result<LegacySighash> {
        SighashCache::new(self.transaction)
            .legacy_signature_hash(self.input_index, &self.prevout.script_pubkey, sighash.to_u32())
            .map_err(|e| Error::Invalid(e.to_string()))
    }

    /// DER signature with the sighash byte appended.
    ///
    /// Fails with [`Error::MissingKey`] if the keychain cannot produce the key.
    pub fn sign(&self, sigop: &Sigop) -> Result<Vec<u8>> {
        let secret = self.keychain.derive(self.secp, &sigop.key).map_err(|err| match err {
            Error::UnknownKey(name) => Error::MissingKey(name),
            other => other,
        })?;
        let (key, _) = secret.signing_key();
        let message = Message::from_digest(self.digest(sigop.sighash)?.to_byte_array());
        let signature = self.secp.sign_ecdsa(&message, &key);

        let mut bytes = signature.serialize_der().to_vec();
        bytes.push(sigop.sighash.to_u32() as u8);
        Ok(bytes)
    }
}

/// Produces the unlocking script for one input.
///
/// Implemented for closures, so a caller can pass custom redemption logic
/// (multisig, non-standard scripts) straight into signing.
pub trait Redeem {
    fn redeem(&self, document: &SighashDocument<'_>, template: &ScriptTemplate) -> Result<ScriptBuf>;
}

impl<F> Redeem for F
where
    F: Fn(&SighashDocument<'_>, &ScriptTemplate) -> Result<ScriptBuf>,
{
    fn redeem(&self, document: &SighashDocument<'_>, template: &ScriptTemplate) -> Result<ScriptBuf> {
        self(document, template)
    }
}

/// Redeems pay-to-pubkey-hash and pay-to-pubkey outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRedeem;

impl Redeem for DefaultRedeem {
    fn redeem(&self, document: &SighashDocument<'_>, template: &ScriptTemplate) -> Result<ScriptBuf> {
        let script = &document.prevout.script_pubkey;
        if !(script.is_p2pkh() || script.is_p2pk()) {
            return Err(Error::Invalid(format!("cannot redeem script {}", script)));
        }
        if template.placeholders().count() != 1 {
            return Err(Error::Invalid("expected exactly one signature".into()));
        }
        template.fill(document)
    }
}
