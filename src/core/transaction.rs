// Transaction data structures, identity, signing and verification

use crate::core::{Hash256, PubKeyHash, SUBSIDY, hash160, sha256, Serializable};
use crate::core::serialize::{
    expect_consumed, read_hash, read_i32, read_len, read_u64, read_var_bytes, write_var_bytes,
    write_varint, CodecError,
};
use crate::error::LedgerError;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_OUT: i32 = -1;

/// Encode a verifying key as the raw `X || Y` point (64 bytes)
pub fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes()[1..].to_vec()
}

/// Parse a raw `X || Y` point back into a verifying key
pub fn decode_public_key(raw: &[u8]) -> Option<VerifyingKey> {
    if raw.len() != 64 {
        return None;
    }
    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(raw);
    VerifyingKey::from_sec1_bytes(&sec1).ok()
}

/// Transaction input - claims one output of a previous transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the claimed output (None for coinbase)
    pub txid: Option<Hash256>,
    /// Index of the claimed output, `COINBASE_OUT` for coinbase
    pub out: i32,
    /// Raw `r || s` signature
    pub signature: Vec<u8>,
    /// Raw `X || Y` public key; a coinbase input carries its memo here
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `txid:out` with the spender's key attached
    pub fn new(txid: Hash256, out: i32, pub_key: Vec<u8>) -> Self {
        Self {
            txid: Some(txid),
            out,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create a coinbase input carrying a memo
    pub fn coinbase(memo: &[u8]) -> Self {
        Self {
            txid: None,
            out: COINBASE_OUT,
            signature: Vec::new(),
            pub_key: memo.to_vec(),
        }
    }

    /// Check if this is a coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.txid.is_none() && self.out == COINBASE_OUT
    }

    /// Whether the attached public key hashes to `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        &hash160(&self.pub_key) == pub_key_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        let txid: &[u8] = match &self.txid {
            Some(id) => id.as_bytes(),
            None => &[],
        };
        // Writes into a Vec cannot fail
        let _ = write_var_bytes(buf, txid);
        buf.extend_from_slice(&self.out.to_le_bytes());
        let _ = write_var_bytes(buf, &self.signature);
        let _ = write_var_bytes(buf, &self.pub_key);
    }

    fn read_from(reader: &mut dyn Read) -> Result<Self, CodecError> {
        let txid_bytes = read_var_bytes(reader)?;
        let txid = match txid_bytes.len() {
            0 => None,
            _ => Some(Hash256::from_slice(&txid_bytes).map_err(CodecError::Invalid)?),
        };
        let out = read_i32(reader)?;
        let signature = read_var_bytes(reader)?;
        let pub_key = read_var_bytes(reader)?;

        Ok(Self {
            txid,
            out,
            signature,
            pub_key,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    /// Create a new transaction output
    pub fn new(value: u64, pub_key_hash: PubKeyHash) -> Self {
        Self {
            value,
            pub_key_hash,
        }
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        &self.pub_key_hash == pub_key_hash
    }

    pub(crate) fn write_to<W: Write + ?Sized>(&self, buf: &mut W) -> std::io::Result<()> {
        buf.write_all(&self.value.to_le_bytes())?;
        buf.write_all(&self.pub_key_hash)
    }

    pub(crate) fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let value = read_u64(reader)?;
        let mut pub_key_hash = [0u8; 20];
        reader.read_exact(&mut pub_key_hash)?;

        Ok(Self {
            value,
            pub_key_hash,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// SHA256 of the transaction serialized with this field cleared
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and assign its identity
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction crediting the block subsidy to `to`.
    /// Without a memo, 24 random bytes are used so repeated rewards to the
    /// same key get distinct ids.
    pub fn coinbase(to: &PubKeyHash, memo: Option<&str>) -> Self {
        let memo = match memo {
            Some(memo) => memo.to_string(),
            None => hex::encode(rand::random::<[u8; 24]>()),
        };
        Self::new(
            vec![TxInput::coinbase(memo.as_bytes())],
            vec![TxOutput::new(SUBSIDY, *to)],
        )
    }

    /// Exactly one input with no referenced id and index -1
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Digest of the transaction with its id cleared
    pub fn hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        sha256(&copy.serialize())
    }

    /// Whether the stored id matches the content
    pub fn has_valid_id(&self) -> bool {
        self.id == self.hash()
    }

    /// Copy with every input reduced to `{txid, out}`
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                txid: input.txid,
                out: input.out,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Resolve the output claimed by input `index`
    fn claimed_output<'a>(
        &self,
        index: usize,
        prev_txs: &'a HashMap<Hash256, Transaction>,
    ) -> Result<&'a TxOutput, LedgerError> {
        let input = &self.inputs[index];
        let txid = input.txid.ok_or(LedgerError::InvalidOutputIndex {
            txid: Hash256::zero(),
            index: input.out,
        })?;
        let prev = prev_txs
            .get(&txid)
            .ok_or(LedgerError::DanglingReference(txid))?;

        usize::try_from(input.out)
            .ok()
            .and_then(|out| prev.outputs.get(out))
            .ok_or(LedgerError::InvalidOutputIndex {
                txid,
                index: input.out,
            })
    }

    /// Digest input `index` is signed over: the trimmed copy with only that
    /// input exposing the lock of the output it claims
    fn signing_digest(
        &self,
        trimmed: &mut Transaction,
        index: usize,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<Hash256, LedgerError> {
        let claimed = self.claimed_output(index, prev_txs)?;

        trimmed.inputs[index].signature.clear();
        trimmed.inputs[index].pub_key = claimed.pub_key_hash.to_vec();
        let digest = trimmed.hash();
        trimmed.inputs[index].pub_key.clear();

        Ok(digest)
    }

    /// Sign every input with `key`. No-op for coinbase transactions.
    pub fn sign(
        &mut self,
        key: &SigningKey,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<(), LedgerError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let digest = self.signing_digest(&mut trimmed, index, prev_txs)?;
            let signature: Signature = key
                .sign_prehash(digest.as_bytes())
                .map_err(|e| LedgerError::Crypto(e.to_string()))?;
            self.inputs[index].signature = signature.to_bytes().to_vec();
        }

        Ok(())
    }

    /// Verify every input's signature against the output it claims.
    /// Always true for coinbase; a missing previous transaction is an error,
    /// a bad key or signature is `Ok(false)`. A spend must have inputs and
    /// may not create more value than it claims.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool, LedgerError> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.inputs.is_empty() {
            return Ok(false);
        }

        let mut trimmed = self.trimmed_copy();
        let mut claimed_value = 0u64;

        for (index, input) in self.inputs.iter().enumerate() {
            let claimed = self.claimed_output(index, prev_txs)?;
            if !input.uses_key(&claimed.pub_key_hash) {
                return Ok(false);
            }
            let Some(total) = claimed_value.checked_add(claimed.value) else {
                return Ok(false);
            };
            claimed_value = total;

            let digest = self.signing_digest(&mut trimmed, index, prev_txs)?;

            let Some(key) = decode_public_key(&input.pub_key) else {
                return Ok(false);
            };
            let Ok(signature) = Signature::from_slice(&input.signature) else {
                return Ok(false);
            };
            if key.verify_prehash(digest.as_bytes(), &signature).is_err() {
                return Ok(false);
            }
        }

        let spent = self
            .outputs
            .iter()
            .try_fold(0u64, |sum, output| sum.checked_add(output.value));
        Ok(spent.is_some_and(|spent| spent <= claimed_value))
    }

    /// Deserialize from a reader
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, CodecError> {
        let id = read_hash(reader)?;

        let input_count = read_len(reader)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_len(reader)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.id.as_bytes());

        let _ = write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(buf);
        }

        let _ = write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            let _ = output.write_to(buf);
        }
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        expect_consumed(&cursor)?;
        Ok(tx)
    }
}
