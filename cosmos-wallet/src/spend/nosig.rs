//! Unsigned transaction skeletons.
//!
//! A skeleton holds everything needed to size a transaction and compute its fee
//! before any signature exists. Signatures are represented by placeholders whose
//! encoded size is the largest a signature push can take, so the signed
//! transaction is never larger than the skeleton says.

use bitcoin::absolute::LockTime;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, consensus};
use serde::{Deserialize, Serialize};

use super::redeem::{Redeem, SighashDocument};
use crate::error::{Error, Result};
use crate::keys::{Derivation, Keychain};

/// DER signature of at most 72 bytes plus the sighash byte.
pub const MAX_SIGNATURE_SIZE: usize = 73;

/// A maximal signature with its push opcode.
pub const MAX_SIGNATURE_PUSH: usize = MAX_SIGNATURE_SIZE + 1;

/// Size of a Bitcoin-style variable length integer.
pub fn varint_size(value: usize) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x10000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Encode `data` as a single script push.
pub fn push_data(data: &[u8]) -> Result<Vec<u8>> {
    let bytes = PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| Error::Invalid(format!("cannot push {} bytes", data.len())))?;
    Ok(Builder::new().push_slice(bytes).into_script().into_bytes())
}

/// A signature still to be made: which key signs, committing to what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sigop {
    #[serde(with = "sighash_serde")]
    pub sighash: EcdsaSighashType,
    pub key: Derivation,
}

impl Sigop {
    pub fn new(sighash: EcdsaSighashType, key: Derivation) -> Self {
        Self {
            sighash,
            key,
        }
    }
}

mod sighash_serde {
    use bitcoin::sighash::EcdsaSighashType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sighash: &EcdsaSighashType, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(sighash.to_u32())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<EcdsaSighashType, D::Error> {
        let raw = u32::deserialize(d)?;
        EcdsaSighashType::from_standard(raw).map_err(serde::de::Error::custom)
    }
}

mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// One piece of an unlocking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptElement {
    /// Script bytes copied verbatim, push opcodes included.
    Literal(#[serde(with = "hex_serde")] Vec<u8>),
    /// A signature push, filled in at signing time.
    Placeholder(Sigop),
}

impl ScriptElement {
    pub fn expected_size(&self) -> usize {
        match self {
            ScriptElement::Literal(bytes) => bytes.len(),
            ScriptElement::Placeholder(_) => MAX_SIGNATURE_PUSH,
        }
    }
}

/// Unlocking script with signature placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptTemplate(Vec<ScriptElement>);

impl ScriptTemplate {
    /// Signatures in order, followed by `script_code` if it is not empty.
    pub fn new(sigops: Vec<Sigop>, script_code: Vec<u8>) -> Self {
        let mut elements: Vec<ScriptElement> = sigops.into_iter().map(ScriptElement::Placeholder).collect();
        if !script_code.is_empty() {
            elements.push(ScriptElement::Literal(script_code));
        }
        Self(elements)
    }

    pub fn from_elements(elements: Vec<ScriptElement>) -> Self {
        Self(elements)
    }

    pub fn elements(&self) -> &[ScriptElement] {
        &self.0
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Sigop> {
        self.0.iter().filter_map(|element| match element {
            ScriptElement::Placeholder(sigop) => Some(sigop),
            ScriptElement::Literal(_) => None,
        })
    }

    pub fn expected_size(&self) -> usize {
        self.0.iter().map(ScriptElement::expected_size).sum()
    }

    /// Replace every placeholder by a signature made through `document`.
    pub fn fill(&self, document: &SighashDocument<'_>) -> Result<ScriptBuf> {
        let mut bytes = Vec::with_capacity(self.expected_size());
        for element in &self.0 {
            match element {
                ScriptElement::Literal(literal) => bytes.extend_from_slice(literal),
                ScriptElement::Placeholder(sigop) => bytes.extend(push_data(&document.sign(sigop)?)?),
            }
        }
        Ok(ScriptBuf::from_bytes(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NosigInput {
    pub previous_output: OutPoint,
    /// The output being spent.
    pub prevout: TxOut,
    pub script: ScriptTemplate,
    pub sequence: Sequence,
}

impl NosigInput {
    pub fn expected_size(&self) -> usize {
        let script = self.script.expected_size();
        32 + 4 + varint_size(script) + script + 4
    }
}

/// A transaction whose inputs carry templates instead of unlocking scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NosigTransaction {
    pub version: i32,
    pub inputs: Vec<NosigInput>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

pub(crate) fn output_size(output: &TxOut) -> usize {
    let script = output.script_pubkey.len();
    8 + varint_size(script) + script
}

impl NosigTransaction {
    pub fn new(inputs: Vec<NosigInput>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Upper bound on the size of the signed transaction.
    pub fn expected_size(&self) -> usize {
        4 + varint_size(self.inputs.len())
            + self.inputs.iter().map(NosigInput::expected_size).sum::<usize>()
            + varint_size(self.outputs.len())
            + self.outputs.iter().map(output_size).sum::<usize>()
            + 4
    }

    /// Value of the outputs being spent.
    pub fn spent(&self) -> Amount {
        Amount::from_sat(self.inputs.iter().map(|i| i.prevout.value.to_sat()).sum())
    }

    /// Value of the outputs being created.
    pub fn sent(&self) -> Amount {
        Amount::from_sat(self.outputs.iter().map(|o| o.value.to_sat()).sum())
    }

    pub fn fee(&self) -> Result<Amount> {
        self.spent().checked_sub(self.sent()).ok_or_else(|| {
            Error::Invalid(format!("outputs {} exceed inputs {}", self.sent(), self.spent()))
        })
    }

    /// The transaction with empty unlocking scripts, as signatures commit to it.
    pub fn unsigned(&self) -> Transaction {
        Transaction {
            version: Version(self.version),
            lock_time: LockTime::from_consensus(self.lock_time),
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: input.previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: input.sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output: self.outputs.clone(),
        }
    }

    /// Produce the signed transaction, unlocking each input through `redeem`.
    pub fn sign<R: Redeem + ?Sized>(
        &self,
        secp: &Secp256k1<All>,
        keychain: &Keychain,
        redeem: &R,
    ) -> Result<Transaction> {
        if !keychain.valid() {
            return Err(Error::MissingKey("keychain is empty".into()));
        }
        let unsigned = self.unsigned();
        let mut signed = unsigned.clone();

        for (index, input) in self.inputs.iter().enumerate() {
            let document = SighashDocument::new(&unsigned, index, &input.prevout, keychain, secp);
            signed.input[index].script_sig = redeem.redeem(&document, &input.script)?;
        }

        let size = consensus::serialize(&signed).len();
        if size > self.expected_size() {
            return Err(Error::Invalid(format!(
                "signed size {} exceeds expected {}",
                size,
                self.expected_size()
            )));
        }
        Ok(signed)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
