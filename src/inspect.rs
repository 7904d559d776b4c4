//! Host-side reader for transactions produced by the device.
//!
//! Decodes the wire format back into [`SignedTransaction`] values and builds a
//! short operator summary: who pays, whether the signatures hold, and what the
//! instructions do when that is knowable (memo text).

use crate::builder::MEMO_PROGRAM_ID;
use crate::error::DecodeError;
use crate::types::{
    Hash, Instruction, MessageHeader, Pubkey, SignatureBytes, SignedTransaction,
    TransactionMessage,
};
use crate::wire::{encode_message, validate_message};
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::fmt;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::Truncated(self.pos))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn compact_len(&mut self) -> Result<usize, DecodeError> {
        let (value, used) = decode_compact_length(&self.bytes[self.pos..])
            .map_err(|err| shift_offset(err, self.pos))?;
        self.pos += used;
        Ok(value as usize)
    }
}

fn shift_offset(err: DecodeError, base: usize) -> DecodeError {
    match err {
        DecodeError::Truncated(at) => DecodeError::Truncated(base + at),
        DecodeError::NonCanonicalLength(at) => DecodeError::NonCanonicalLength(base + at),
        DecodeError::LengthOverflow(at) => DecodeError::LengthOverflow(base + at),
        other => other,
    }
}

/// Decodes a compact-u16 prefix, returning the value and bytes consumed.
///
/// Rejects encodings longer than three bytes, values above `u16::MAX` and
/// aliases with a redundant zero continuation group.
pub fn decode_compact_length(bytes: &[u8]) -> Result<(u16, usize), DecodeError> {
    let mut value: u32 = 0;
    for i in 0..3 {
        let byte = *bytes.get(i).ok_or(DecodeError::Truncated(i))?;
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && byte == 0 {
                return Err(DecodeError::NonCanonicalLength(0));
            }
            return u16::try_from(value)
                .map(|v| (v, i + 1))
                .map_err(|_| DecodeError::LengthOverflow(0));
        }
    }
    Err(DecodeError::LengthOverflow(0))
}

fn read_message(r: &mut Reader<'_>) -> Result<TransactionMessage, DecodeError> {
    let header = MessageHeader {
        required_signatures: r.u8()?,
        readonly_signed_count: r.u8()?,
        readonly_unsigned_count: r.u8()?,
    };

    let n_accounts = r.compact_len()?;
    let mut accounts = Vec::with_capacity(n_accounts.min(64));
    for _ in 0..n_accounts {
        accounts.push(r.array::<32>()?);
    }

    let recent_blockhash: Hash = r.array::<32>()?;

    let n_ix = r.compact_len()?;
    let mut instructions = Vec::with_capacity(n_ix.min(64));
    for _ in 0..n_ix {
        let program_account_index = r.u8()?;
        let n = r.compact_len()?;
        let account_indices = r.take(n)?.to_vec();
        let len = r.compact_len()?;
        let data = r.take(len)?.to_vec();
        instructions.push(Instruction {
            program_account_index,
            account_indices,
            data,
        });
    }

    let msg = TransactionMessage {
        header,
        accounts,
        recent_blockhash,
        instructions,
    };
    validate_message(&msg)?;
    Ok(msg)
}

fn finish(r: &Reader<'_>) -> Result<(), DecodeError> {
    let rest = r.bytes.len() - r.pos;
    if rest != 0 {
        return Err(DecodeError::TrailingBytes(rest));
    }
    Ok(())
}

pub fn decode_message(bytes: &[u8]) -> Result<TransactionMessage, DecodeError> {
    let mut r = Reader::new(bytes);
    let msg = read_message(&mut r)?;
    finish(&r)?;
    Ok(msg)
}

pub fn decode_signed_transaction(bytes: &[u8]) -> Result<SignedTransaction, DecodeError> {
    let mut r = Reader::new(bytes);
    let n_sigs = r.compact_len()?;
    let mut signatures: Vec<SignatureBytes> = Vec::with_capacity(n_sigs.min(16));
    for _ in 0..n_sigs {
        signatures.push(r.array::<64>()?);
    }
    let message = read_message(&mut r)?;
    finish(&r)?;
    Ok(SignedTransaction {
        signatures,
        message,
    })
}

/// Decodes the base64 text of a `TRANSACTION:` response.
pub fn decode_base64_transaction(text: &str) -> Result<SignedTransaction, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|err| DecodeError::Base64(err.to_string()))?;
    decode_signed_transaction(&bytes)
}

/// What an instruction appears to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    Memo { text: String },
    Unknown { program_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub fee_payer: String,
    pub fee_payer_is_signer: bool,
    pub signatures_required: u8,
    /// One entry per signature, in signer order.
    pub signatures_valid: Vec<bool>,
    pub blockhash: String,
    pub instructions: Vec<InstructionKind>,
}

impl TransactionSummary {
    pub fn all_signatures_valid(&self) -> bool {
        !self.signatures_valid.is_empty() && self.signatures_valid.iter().all(|ok| *ok)
    }
}

fn verify_one(key: &Pubkey, message: &[u8], sig: &SignatureBytes) -> bool {
    VerifyingKey::from_bytes(key)
        .map(|vk| vk.verify(message, &Signature::from_bytes(sig)).is_ok())
        .unwrap_or(false)
}

/// Summarizes a decoded transaction, checking each signature against its
/// signer and the fee payer against `expected_signer`.
pub fn introspect(tx: &SignedTransaction, expected_signer: Option<&Pubkey>) -> TransactionSummary {
    let msg = &tx.message;
    let fee_payer_key = msg.accounts.first();

    let signed_bytes = encode_message(msg).unwrap_or_default();
    let signatures_valid = tx
        .signatures
        .iter()
        .zip(&msg.accounts)
        .map(|(sig, key)| !signed_bytes.is_empty() && verify_one(key, &signed_bytes, sig))
        .collect();

    let instructions = msg
        .instructions
        .iter()
        .map(|ix| {
            let program = msg
                .accounts
                .get(ix.program_account_index as usize)
                .copied()
                .unwrap_or_default();
            match (program == MEMO_PROGRAM_ID, std::str::from_utf8(&ix.data)) {
                (true, Ok(text)) => InstructionKind::Memo {
                    text: text.to_string(),
                },
                _ => InstructionKind::Unknown {
                    program_id: bs58::encode(program).into_string(),
                },
            }
        })
        .collect();

    TransactionSummary {
        fee_payer: fee_payer_key
            .map(|k| bs58::encode(k).into_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        fee_payer_is_signer: match (fee_payer_key, expected_signer) {
            (Some(payer), Some(expected)) => payer == expected,
            (Some(_), None) => msg.header.required_signatures >= 1,
            _ => false,
        },
        signatures_required: msg.header.required_signatures,
        signatures_valid,
        blockhash: bs58::encode(msg.recent_blockhash).into_string(),
        instructions,
    }
}

impl fmt::Display for TransactionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fee payer: {}", self.fee_payer)?;
        if !self.fee_payer_is_signer {
            writeln!(f, "WARNING: fee payer is not the expected signer")?;
        }
        writeln!(f, "Signatures required: {}", self.signatures_required)?;
        for (i, ok) in self.signatures_valid.iter().enumerate() {
            writeln!(f, "Signature {}: {}", i, if *ok { "valid" } else { "INVALID" })?;
        }
        writeln!(f, "Blockhash: {}", self.blockhash)?;
        for ix in &self.instructions {
            match ix {
                InstructionKind::Memo { text } => writeln!(f, "Memo: {text}")?,
                InstructionKind::Unknown { program_id } => {
                    writeln!(f, "Instruction for program {program_id}")?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_compact_length;

    #[test]
    fn compact_length_decodes_what_encoder_writes() {
        for n in [0u16, 1, 127, 128, 300, 16383, 16384, u16::MAX] {
            let bytes = encode_compact_length(n);
            assert_eq!(decode_compact_length(&bytes).unwrap(), (n, bytes.len()));
        }
    }

    #[test]
    fn compact_length_rejects_aliases_and_overflow() {
        assert_eq!(
            decode_compact_length(&[0x80, 0x00]),
            Err(DecodeError::NonCanonicalLength(0))
        );
        assert_eq!(
            decode_compact_length(&[0xff, 0xff, 0x04]),
            Err(DecodeError::LengthOverflow(0))
        );
        assert_eq!(
            decode_compact_length(&[0x80, 0x80, 0x80, 0x01]),
            Err(DecodeError::LengthOverflow(0))
        );
        assert_eq!(decode_compact_length(&[0x80]), Err(DecodeError::Truncated(1)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let msg = TransactionMessage {
            header: MessageHeader {
                required_signatures: 1,
                readonly_signed_count: 0,
                readonly_unsigned_count: 0,
            },
            accounts: vec![[1u8; 32]],
            recent_blockhash: [0u8; 32],
            instructions: vec![],
        };
        let mut bytes = encode_message(&msg).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), msg);
        bytes.push(0);
        assert_eq!(decode_message(&bytes), Err(DecodeError::TrailingBytes(1)));
    }
}
