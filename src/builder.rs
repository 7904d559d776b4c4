//! Builds the device's fixed demonstration transaction: one memo instruction
//! paid for and signed by the device key.
//!
//! The recent blockhash is a constant, so the output is byte-for-byte
//! reproducible for a given key. The network will refuse it as stale; hosts
//! that need a submittable transaction build the message themselves and send
//! it through the `SIGN` command instead.

use crate::error::Result;
use crate::keystore::KeyStore;
use crate::types::{Hash, Instruction, MessageHeader, Pubkey, SignedTransaction, TransactionMessage};
use crate::wire::{encode_message, encode_signed_transaction};
use base64::Engine;

pub const MEMO_TEXT: &str = "Hello from ESP32 Solana Signer!";

/// `MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr`
pub const MEMO_PROGRAM_ID: Pubkey = [
    5, 74, 83, 90, 153, 41, 33, 6, 77, 36, 232, 113, 96, 218, 56, 124, 124, 53, 181, 221, 188, 146,
    187, 129, 228, 31, 168, 64, 65, 5, 68, 141,
];

/// `11111111111111111111111111111112`
pub const PLACEHOLDER_BLOCKHASH: Hash = {
    let mut hash = [0u8; 32];
    hash[31] = 1;
    hash
};

/// The unsigned memo message for `payer`.
pub fn placeholder_message(payer: Pubkey) -> TransactionMessage {
    TransactionMessage {
        header: MessageHeader {
            required_signatures: 1,
            readonly_signed_count: 0,
            readonly_unsigned_count: 1,
        },
        accounts: vec![payer, MEMO_PROGRAM_ID],
        recent_blockhash: PLACEHOLDER_BLOCKHASH,
        instructions: vec![Instruction {
            program_account_index: 1,
            account_indices: vec![0],
            data: MEMO_TEXT.as_bytes().to_vec(),
        }],
    }
}

/// Assembles and signs the placeholder transaction.
pub fn build_placeholder_transaction(keys: &KeyStore) -> Result<SignedTransaction> {
    let message = placeholder_message(keys.public_key());
    // The signature covers the serialized message itself, never a digest of it.
    let message_bytes = encode_message(&message)?;
    let signature = keys.sign(&message_bytes);

    Ok(SignedTransaction {
        signatures: vec![signature],
        message,
    })
}

/// Base64 of the encoded placeholder transaction, as sent in `TRANSACTION:`.
pub fn build_placeholder(keys: &KeyStore) -> Result<String> {
    let tx = build_placeholder_transaction(keys)?;
    let bytes = encode_signed_transaction(&tx)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Diagnostic description of the placeholder transaction's constants.
pub fn info_string() -> String {
    format!(
        "memo='{}';blockhash={};program={}",
        MEMO_TEXT,
        bs58::encode(PLACEHOLDER_BLOCKHASH).into_string(),
        bs58::encode(MEMO_PROGRAM_ID).into_string(),
    )
}
