//! Serial-attached Ed25519 signer.
//!
//! The device keeps one keypair in non-volatile storage, answers a small line
//! protocol, and signs only after a physical button press. It can also build a
//! complete ledger transaction (a single memo instruction) by hand, without
//! any ledger SDK.

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod gate;
pub mod inspect;
pub mod keystore;
pub mod protocol;
pub mod storage;
pub mod twofa;
pub mod types;
pub mod verify;
pub mod wire;

pub use builder::{
    build_placeholder, build_placeholder_transaction, info_string, MEMO_PROGRAM_ID, MEMO_TEXT,
    PLACEHOLDER_BLOCKHASH,
};
pub use config::Config;
pub use engine::{EngineState, ProtocolEngine};
pub use error::{DecodeError, Result, SignerError, WireError};
pub use feedback::{Event, FeedbackSink, LogFeedback, RecordingFeedback};
pub use gate::{AutoPress, ConfirmationGate, FileLine, InputLine, Unplugged};
pub use inspect::{
    decode_base64_transaction, decode_compact_length, decode_message, decode_signed_transaction,
    introspect, TransactionSummary,
};
pub use keystore::KeyStore;
pub use protocol::{Command, Response};
pub use storage::{FileStorage, KeyStorage, MemoryStorage};
pub use types::{Instruction, MessageHeader, SignedTransaction, TransactionMessage};
pub use verify::validate_signature;
pub use wire::{encode_compact_length, encode_message, encode_signed_transaction};
