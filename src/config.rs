//! Device configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Command-line flags are applied on top of the file.

use crate::error::{Result, SignerError};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest signing window a single `OTP_UNLOCK` may open.
pub const MAX_UNLOCK_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the persisted key records.
    pub storage_dir: PathBuf,
    /// How long `SIGN` waits for the button before giving up.
    pub confirm_timeout_ms: u64,
    /// Button polling period.
    pub poll_interval_ms: u64,
    /// Longest accepted command line, newline excluded.
    pub max_line_len: usize,
    /// Require a TOTP unlock before signing.
    pub twofa: bool,
    /// Length of the signing window opened by `OTP_UNLOCK`.
    pub unlock_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./signer-nvs"),
            confirm_timeout_ms: 30_000,
            poll_interval_ms: 200,
            max_line_len: 4096,
            twofa: false,
            unlock_secs: 120,
        }
    }
}

impl Config {
    /// Reads a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|err| SignerError::Config(format!("{}: {err}", path.display())))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| SignerError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirm_timeout_ms == 0 {
            return Err(SignerError::Config("confirm_timeout_ms must be positive".into()));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > self.confirm_timeout_ms {
            return Err(SignerError::Config(
                "poll_interval_ms must be positive and no longer than the timeout".into(),
            ));
        }
        if self.max_line_len < 16 {
            return Err(SignerError::Config("max_line_len must be at least 16".into()));
        }
        if self.unlock_secs == 0 || self.unlock_secs > MAX_UNLOCK_SECS {
            return Err(SignerError::Config(format!(
                "unlock_secs must be between 1 and {MAX_UNLOCK_SECS}"
            )));
        }
        Ok(())
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
