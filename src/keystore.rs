//! Custody of the device's single Ed25519 keypair.
//!
//! # Lifecycle
//! - First boot: a keypair is generated from the OS random source and both
//!   halves are written to storage under [`KEY_RECORD`] before anything else
//!   happens.
//! - Every later boot: the record is read back and validated. A record that is
//!   present but unusable is a [`SignerError::KeyStoreFault`]; it is never
//!   silently replaced.
//!
//! The secret half never leaves this module except as signatures.

use crate::error::{Result, SignerError};
use crate::storage::KeyStorage;
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Storage key of the persisted keypair.
pub const KEY_RECORD: &str = "solana_key";

#[derive(Serialize, Deserialize)]
struct KeyRecord {
    secret_key: [u8; 32],
    public_key: [u8; 32],
}

/// The device identity.
pub struct KeyStore {
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("public_key", &self.public_key_base58())
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Loads the persisted keypair, generating and persisting one on first boot.
    ///
    /// # Errors
    /// - [`SignerError::KeyStoreFault`] if a record exists but is malformed.
    /// - [`SignerError::Storage`] / [`SignerError::Io`] if storage itself fails.
    pub fn load_or_create(storage: &mut dyn KeyStorage) -> Result<Self> {
        match Self::load_existing(storage)? {
            Some(store) => {
                info!(pubkey = %store.public_key_base58(), "loaded existing key");
                Ok(store)
            }
            None => {
                info!("no key found, generating new keypair");
                let signing_key = SigningKey::generate(&mut OsRng);
                let record = KeyRecord {
                    secret_key: signing_key.to_bytes(),
                    public_key: signing_key.verifying_key().to_bytes(),
                };
                let bytes = serde_json::to_vec(&record)
                    .map_err(|err| SignerError::Storage(err.to_string()))?;
                storage.set_raw_once(KEY_RECORD, &bytes)?;

                let store = Self { signing_key };
                info!(pubkey = %store.public_key_base58(), "saved new key");
                Ok(store)
            }
        }
    }

    /// Loads the persisted keypair without ever generating one.
    pub fn load_existing(storage: &dyn KeyStorage) -> Result<Option<Self>> {
        let Some(bytes) = storage.get_raw(KEY_RECORD)? else {
            return Ok(None);
        };
        Self::from_record(&bytes).map(Some).map_err(|err| {
            error!(%err, "persisted key material rejected");
            err
        })
    }

    /// Erases the persisted keypair. The next boot generates a fresh identity.
    pub fn wipe(storage: &mut dyn KeyStorage) -> Result<()> {
        storage.remove(KEY_RECORD)?;
        info!("key material wiped");
        Ok(())
    }

    fn from_record(bytes: &[u8]) -> Result<Self> {
        let record: KeyRecord = serde_json::from_slice(bytes)
            .map_err(|err| SignerError::KeyStoreFault(format!("unreadable key record: {err}")))?;

        // Reject a damaged public half on its own before comparing it with
        // the one the secret derives.
        let point = CompressedEdwardsY(record.public_key)
            .decompress()
            .ok_or_else(|| SignerError::KeyStoreFault("public key is not a curve point".into()))?;
        if point.is_small_order() {
            return Err(SignerError::KeyStoreFault("public key has small order".into()));
        }

        let signing_key = SigningKey::from_bytes(&record.secret_key);
        if signing_key.verifying_key().to_bytes() != record.public_key {
            return Err(SignerError::KeyStoreFault(
                "public key does not match secret key".into(),
            ));
        }

        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_base58(&self) -> String {
        bs58::encode(self.public_key()).into_string()
    }

    /// Signs `message` exactly as given. Ed25519 digests internally, so no
    /// pre-hash is applied; a hashed message would not verify on the ledger.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}
