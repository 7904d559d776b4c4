//! Host-side check of a `SIGNATURE:` response.

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Validates a device signature over `message`.
///
/// # Arguments
///
/// - `public_key`: base58 text from a `PUBKEY:` response.
/// - `message`: the exact bytes that were sent for signing.
/// - `signature`: base64 text from a `SIGNATURE:` response.
///
/// # Returns
///
/// - `Ok(())` if the signature is valid.
/// - An error if any input is malformed or the signature does not verify.
pub fn validate_signature(
    public_key: &str,
    message: &[u8],
    signature: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    // Step 1: Decode the public key
    let key_bytes: [u8; 32] = bs58::decode(public_key.trim())
        .into_vec()?
        .try_into()
        .map_err(|_| "Invalid length for public key")?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| "Invalid public key")?;

    // Step 2: Decode the signature
    let signature_bytes: [u8; 64] = base64::engine::general_purpose::STANDARD
        .decode(signature.trim())?
        .try_into()
        .map_err(|_| "Invalid length for signature")?;
    let signature = Signature::from_bytes(&signature_bytes);

    // Step 3: Verify against the raw message; the device never pre-hashes
    verifying_key
        .verify(message, &signature)
        .map_err(|_| "Signature verification failed")?;

    Ok(())
}
