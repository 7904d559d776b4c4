//! Byte-exact encoder for the ledger's legacy transaction wire format.
//!
//! ```text
//! transaction := compact(n_sigs) sig[64]*n_sigs message
//! message     := header[3] compact(n_keys) key[32]*n_keys blockhash[32]
//!                compact(n_ix) instruction*n_ix
//! instruction := program_index[1] compact(n) index[1]*n compact(len) data[len]
//! ```
//!
//! Every variable-length array carries a compact-u16 prefix: seven value bits
//! per byte, low group first, high bit set while more bytes follow.
//!
//! The device only ever produces this format, so there is no decoder here;
//! see [`crate::inspect`] for the host-side reader.

use crate::error::WireError;
use crate::types::{Instruction, SignedTransaction, TransactionMessage};

/// Encodes `n` as a compact-u16 length prefix (1 to 3 bytes).
pub fn encode_compact_length(n: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(3);
    write_compact_length(&mut out, n);
    out
}

fn write_compact_length(out: &mut Vec<u8>, n: u16) {
    let mut rem = n;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), WireError> {
    let n = u16::try_from(len).map_err(|_| WireError::LengthOverflow(len))?;
    write_compact_length(out, n);
    Ok(())
}

/// Checks the invariants the network verifier would reject on.
pub fn validate_message(msg: &TransactionMessage) -> Result<(), WireError> {
    let accounts = msg.accounts.len();
    let required = msg.header.required_signatures;
    if required as usize > accounts
        || (required as usize + msg.header.readonly_unsigned_count as usize) > accounts
    {
        return Err(WireError::InvalidHeader { required, accounts });
    }
    // The first signer pays the fee and must stay writable.
    if msg.header.readonly_signed_count >= required {
        return Err(WireError::ReadonlyFeePayer {
            readonly: msg.header.readonly_signed_count,
            required,
        });
    }

    for (i, ix) in msg.instructions.iter().enumerate() {
        let indices = std::iter::once(&ix.program_account_index).chain(&ix.account_indices);
        for &index in indices {
            if index as usize >= accounts {
                return Err(WireError::IndexOutOfRange {
                    instruction: i,
                    index,
                    accounts,
                });
            }
        }
    }
    Ok(())
}

fn write_instruction(out: &mut Vec<u8>, ix: &Instruction) -> Result<(), WireError> {
    out.push(ix.program_account_index);
    write_len(out, ix.account_indices.len())?;
    out.extend_from_slice(&ix.account_indices);
    write_len(out, ix.data.len())?;
    out.extend_from_slice(&ix.data);
    Ok(())
}

fn write_message(out: &mut Vec<u8>, msg: &TransactionMessage) -> Result<(), WireError> {
    validate_message(msg)?;

    out.push(msg.header.required_signatures);
    out.push(msg.header.readonly_signed_count);
    out.push(msg.header.readonly_unsigned_count);

    write_len(out, msg.accounts.len())?;
    for key in &msg.accounts {
        out.extend_from_slice(key);
    }

    out.extend_from_slice(&msg.recent_blockhash);

    write_len(out, msg.instructions.len())?;
    for ix in &msg.instructions {
        write_instruction(out, ix)?;
    }
    Ok(())
}

fn message_size_hint(msg: &TransactionMessage) -> usize {
    let ix_bytes: usize = msg
        .instructions
        .iter()
        .map(|ix| 1 + 3 + ix.account_indices.len() + 3 + ix.data.len())
        .sum();
    3 + 3 + 32 * msg.accounts.len() + 32 + 3 + ix_bytes
}

/// Serializes the message: the exact bytes a signer signs.
pub fn encode_message(msg: &TransactionMessage) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(message_size_hint(msg));
    write_message(&mut out, msg)?;
    Ok(out)
}

/// Serializes a full transaction: signatures followed by the message.
pub fn encode_signed_transaction(tx: &SignedTransaction) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(3 + 64 * tx.signatures.len() + message_size_hint(&tx.message));
    write_len(&mut out, tx.signatures.len())?;
    for sig in &tx.signatures {
        out.extend_from_slice(sig);
    }
    write_message(&mut out, &tx.message)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageHeader;

    fn memo_message() -> TransactionMessage {
        TransactionMessage {
            header: MessageHeader {
                required_signatures: 1,
                readonly_signed_count: 0,
                readonly_unsigned_count: 1,
            },
            accounts: vec![[7u8; 32], [9u8; 32]],
            recent_blockhash: [3u8; 32],
            instructions: vec![Instruction {
                program_account_index: 1,
                account_indices: vec![0],
                data: b"hi".to_vec(),
            }],
        }
    }

    #[test]
    fn compact_length_known_encodings() {
        assert_eq!(encode_compact_length(0), vec![0x00]);
        assert_eq!(encode_compact_length(1), vec![0x01]);
        assert_eq!(encode_compact_length(127), vec![0x7f]);
        assert_eq!(encode_compact_length(128), vec![0x80, 0x01]);
        assert_eq!(encode_compact_length(300), vec![0xac, 0x02]);
        assert_eq!(encode_compact_length(16383), vec![0xff, 0x7f]);
        assert_eq!(encode_compact_length(16384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode_compact_length(u16::MAX), vec![0xff, 0xff, 0x03]);
    }

    #[test]
    fn message_layout_is_byte_exact() {
        let bytes = encode_message(&memo_message()).unwrap();

        let mut expected = vec![1, 0, 1, 2];
        expected.extend_from_slice(&[7u8; 32]);
        expected.extend_from_slice(&[9u8; 32]);
        expected.extend_from_slice(&[3u8; 32]);
        expected.extend_from_slice(&[1, 1, 1, 0, 2, b'h', b'i']);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn signed_transaction_prefixes_signatures() {
        let tx = SignedTransaction {
            signatures: vec![[0xaa; 64]],
            message: memo_message(),
        };
        let bytes = encode_signed_transaction(&tx).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..65], &[0xaa; 64][..]);
        assert_eq!(&bytes[65..], &encode_message(&tx.message).unwrap()[..]);
    }

    #[test]
    fn rejects_out_of_range_account_index() {
        let mut msg = memo_message();
        msg.instructions[0].account_indices = vec![2];
        assert_eq!(
            encode_message(&msg),
            Err(WireError::IndexOutOfRange {
                instruction: 0,
                index: 2,
                accounts: 2
            })
        );
    }

    #[test]
    fn rejects_header_with_too_many_signers() {
        let mut msg = memo_message();
        msg.header.required_signatures = 3;
        assert!(matches!(
            encode_message(&msg),
            Err(WireError::InvalidHeader { required: 3, .. })
        ));
    }

    #[test]
    fn rejects_read_only_fee_payer() {
        let mut msg = memo_message();
        msg.header.readonly_signed_count = 1;
        assert_eq!(
            encode_message(&msg),
            Err(WireError::ReadonlyFeePayer {
                readonly: 1,
                required: 1
            })
        );

        msg.header.required_signatures = 0;
        msg.header.readonly_signed_count = 0;
        assert!(matches!(
            encode_message(&msg),
            Err(WireError::ReadonlyFeePayer { required: 0, .. })
        ));
    }

    #[test]
    fn long_memo_uses_two_byte_length() {
        let mut msg = memo_message();
        msg.instructions[0].data = vec![b'x'; 200];
        let bytes = encode_message(&msg).unwrap();
        // header + count + 2 keys + blockhash + ix count + program + n + index
        let data_len_at = 3 + 1 + 64 + 32 + 1 + 1 + 1 + 1;
        assert_eq!(&bytes[data_len_at..data_len_at + 2], &[0xc8, 0x01]);
        assert_eq!(bytes.len(), data_len_at + 2 + 200);
    }
}
