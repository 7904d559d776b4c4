//! Error types shared across the signer.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SignerError>;

/// Everything that can go wrong while serving a command.
///
/// The `Display` text of each variant is what the host sees after `ERROR:`.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Unknown command")]
    MalformedCommand(String),

    #[error("Invalid base64 encoding")]
    Decode(#[from] base64::DecodeError),

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Line too long")]
    LineTooLong,

    #[error("Confirmation timeout")]
    ConfirmationTimeout,

    #[error("Key store fault: {0}")]
    KeyStoreFault(String),

    #[error("Transaction creation failed: {0}")]
    Wire(#[from] WireError),

    #[error("LOCKED")]
    Locked,

    #[error("OTP_DISABLED")]
    OtpDisabled,

    #[error("{0}")]
    Otp(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Format violations detected while encoding a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("length {0} does not fit a compact-u16 prefix")]
    LengthOverflow(usize),

    #[error("instruction {instruction} references account {index} but only {accounts} exist")]
    IndexOutOfRange {
        instruction: usize,
        index: u8,
        accounts: usize,
    },

    #[error("header requires {required} signers but only {accounts} accounts exist")]
    InvalidHeader { required: u8, accounts: usize },

    #[error("{readonly} of {required} signers are read-only, leaving no writable fee payer")]
    ReadonlyFeePayer { readonly: u8, required: u8 },
}

/// Failures of the host-side decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("compact length at offset {0} is not canonical")]
    NonCanonicalLength(usize),

    #[error("compact length at offset {0} overflows u16")]
    LengthOverflow(usize),

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error(transparent)]
    Format(#[from] WireError),
}
