//! Line protocol: command parsing and response rendering.
//!
//! Requests and responses are single lines of ASCII text. Binary payloads are
//! base64 (standard alphabet, padded); keys and hashes are base58.

use base64::Engine;
use std::fmt;

/// One parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetPublicKey,
    /// Raw base64 text of the bytes to sign; decoded by the engine.
    Sign(String),
    CreateTransaction,
    TransactionInfo,
    Shutdown,
    OtpBegin,
    OtpConfirm { code: String, unix: Option<u64> },
    OtpUnlock { code: String, unix: Option<u64> },
    Unknown(String),
}

const SIGN_PREFIX: &str = "SIGN:";
const OTP_CONFIRM_PREFIX: &str = "OTP_CONFIRM:";
const OTP_UNLOCK_PREFIX: &str = "OTP_UNLOCK:";

fn parse_otp_args(rest: &str) -> (String, Option<u64>) {
    let mut parts = rest.splitn(2, ':');
    let code = parts.next().unwrap_or("").to_string();
    let unix = parts.next().and_then(|s| s.parse::<u64>().ok());
    (code, unix)
}

impl Command {
    /// Parses a trimmed, non-empty line.
    ///
    /// Besides the explicit `SIGN:<base64>` form, a bare line that decodes as
    /// base64 is taken as a signing request.
    pub fn parse(line: &str) -> Self {
        match line {
            "GET_PUBKEY" => Command::GetPublicKey,
            "CREATE_TX" => Command::CreateTransaction,
            "TX_INFO" => Command::TransactionInfo,
            "SHUTDOWN" => Command::Shutdown,
            "OTP_BEGIN" => Command::OtpBegin,
            _ => {
                if let Some(payload) = line.strip_prefix(SIGN_PREFIX) {
                    Command::Sign(payload.to_string())
                } else if let Some(rest) = line.strip_prefix(OTP_CONFIRM_PREFIX) {
                    let (code, unix) = parse_otp_args(rest);
                    Command::OtpConfirm { code, unix }
                } else if let Some(rest) = line.strip_prefix(OTP_UNLOCK_PREFIX) {
                    let (code, unix) = parse_otp_args(rest);
                    Command::OtpUnlock { code, unix }
                } else if base64::engine::general_purpose::STANDARD.decode(line).is_ok() {
                    Command::Sign(line.to_string())
                } else {
                    Command::Unknown(line.to_string())
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::GetPublicKey => "GET_PUBKEY",
            Command::Sign(_) => "SIGN",
            Command::CreateTransaction => "CREATE_TX",
            Command::TransactionInfo => "TX_INFO",
            Command::Shutdown => "SHUTDOWN",
            Command::OtpBegin => "OTP_BEGIN",
            Command::OtpConfirm { .. } => "OTP_CONFIRM",
            Command::OtpUnlock { .. } => "OTP_UNLOCK",
            Command::Unknown(_) => "UNKNOWN",
        }
    }
}

/// One response line, without its terminating newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    PublicKey(String),
    Signature(String),
    Transaction(String),
    TxInfo(String),
    ShutdownOk,
    OtpSecret(String),
    OtpConfirmed,
    UnlockedUntil(u64),
    Error(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::PublicKey(key) => write!(f, "PUBKEY:{key}"),
            Response::Signature(sig) => write!(f, "SIGNATURE:{sig}"),
            Response::Transaction(tx) => write!(f, "TRANSACTION:{tx}"),
            Response::TxInfo(info) => write!(f, "TX_INFO:{info}"),
            Response::ShutdownOk => write!(f, "SHUTDOWN_OK"),
            Response::OtpSecret(b32) => write!(
                f,
                "OTP_SECRET:{b32};ALGO=SHA1;DIGITS={};PERIOD={}",
                crate::twofa::OTP_DIGITS,
                crate::twofa::OTP_PERIOD
            ),
            Response::OtpConfirmed => write!(f, "OTP_CONFIRMED"),
            Response::UnlockedUntil(t) => write!(f, "UNLOCKED_UNTIL:{t}"),
            // Keep a stray newline in a reason from splitting the response.
            Response::Error(reason) => {
                let reason = reason.replace(|c: char| c == '\r' || c == '\n', " ");
                write!(f, "ERROR:{reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_commands() {
        assert_eq!(Command::parse("GET_PUBKEY"), Command::GetPublicKey);
        assert_eq!(Command::parse("CREATE_TX"), Command::CreateTransaction);
        assert_eq!(Command::parse("TX_INFO"), Command::TransactionInfo);
        assert_eq!(Command::parse("SHUTDOWN"), Command::Shutdown);
    }

    #[test]
    fn sign_prefix_and_bare_payload() {
        assert_eq!(Command::parse("SIGN:aGVsbG8="), Command::Sign("aGVsbG8=".into()));
        assert_eq!(Command::parse("aGVsbG8="), Command::Sign("aGVsbG8=".into()));
        // Explicit form keeps even undecodable payloads so the engine can
        // report the decode failure.
        assert_eq!(Command::parse("SIGN:%%%"), Command::Sign("%%%".into()));
    }

    #[test]
    fn unknown_text_is_not_a_sign_request() {
        assert_eq!(Command::parse("FOO"), Command::Unknown("FOO".into()));
        assert_eq!(
            Command::parse("get_pubkey please"),
            Command::Unknown("get_pubkey please".into())
        );
    }

    #[test]
    fn otp_arguments() {
        assert_eq!(
            Command::parse("OTP_UNLOCK:123456:1700000000"),
            Command::OtpUnlock {
                code: "123456".into(),
                unix: Some(1_700_000_000)
            }
        );
        assert_eq!(
            Command::parse("OTP_CONFIRM:654321"),
            Command::OtpConfirm {
                code: "654321".into(),
                unix: None
            }
        );
    }

    #[test]
    fn error_reason_stays_on_one_line() {
        assert_eq!(
            Response::Error("bad\nthing".into()).to_string(),
            "ERROR:bad thing"
        );
    }
}
