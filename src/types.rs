//! Structured values of the ledger's legacy transaction format.

pub type Pubkey = [u8; 32];
pub type Hash = [u8; 32];
pub type SignatureBytes = [u8; 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Number of leading accounts that must sign.
    pub required_signatures: u8,
    pub readonly_signed_count: u8,
    pub readonly_unsigned_count: u8,
}

/// An instruction compiled against a message's account table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_account_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// The signed portion of a transaction. `accounts[0]` is the fee payer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMessage {
    pub header: MessageHeader,
    pub accounts: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub signatures: Vec<SignatureBytes>,
    pub message: TransactionMessage,
}

impl SignedTransaction {
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}
