//! Optional second factor: a TOTP authenticator enrolled on the device.
//!
//! When enabled, `SIGN` requires a recent `OTP_UNLOCK` on top of the button
//! press. Codes follow RFC 6238 with HMAC-SHA1, six digits and a 30 second
//! step; one step of drift either way is accepted. Accepted steps only move
//! forward, so no code is ever accepted twice.

use crate::error::{Result, SignerError};
use crate::storage::KeyStorage;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

type HmacSha1 = Hmac<Sha1>;

pub const OTP_BYTES: usize = 20;
pub const OTP_DIGITS: u32 = 6;
pub const OTP_PERIOD: u64 = 30;
pub const OTP_WINDOW: i64 = 1;

const OTP_SECRET_KEY: &str = "otp_secret";
const OTP_LASTSTEP_KEY: &str = "otp_last";
const OTP_ENROLLED_KEY: &str = "otp_enrolled";

/// Source of the device's notion of wall-clock time.
pub trait Clock {
    fn unix_time(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Generates and persists a fresh secret, clearing any half-finished
/// enrollment. Returns the secret as unpadded Base32 for the authenticator app.
pub fn begin(storage: &mut dyn KeyStorage) -> Result<String> {
    if is_enrolled(storage)? {
        return Err(SignerError::Otp("already enrolled".into()));
    }
    let mut secret = [0u8; OTP_BYTES];
    OsRng.fill_bytes(&mut secret);

    storage.set_raw(OTP_SECRET_KEY, &secret)?;
    storage.set_raw(OTP_LASTSTEP_KEY, &0u64.to_le_bytes())?;
    storage.set_raw(OTP_ENROLLED_KEY, &[0])?;
    info!("otp enrollment started");

    Ok(BASE32_NOPAD.encode(&secret))
}

/// Completes enrollment with a first valid code.
pub fn confirm(storage: &mut dyn KeyStorage, code: &str, now: u64) -> Result<()> {
    let secret = get_secret(storage)?.ok_or_else(|| SignerError::Otp("secret missing".into()))?;
    let last = get_u64(storage, OTP_LASTSTEP_KEY)?.unwrap_or(0);
    let accepted = verify_code(code, &secret, now, last)
        .ok_or_else(|| SignerError::Otp("OTP_BAD_CODE".into()))?;

    storage.set_raw(OTP_LASTSTEP_KEY, &accepted.to_le_bytes())?;
    storage.set_raw(OTP_ENROLLED_KEY, &[1])?;
    info!("otp enrollment confirmed");
    Ok(())
}

/// Checks a code and returns the time until which signing is unlocked.
pub fn unlock(
    storage: &mut dyn KeyStorage,
    code: &str,
    now: u64,
    unlock_secs: u64,
) -> Result<u64> {
    if !is_enrolled(storage)? {
        return Err(SignerError::Otp("not enrolled".into()));
    }
    let secret = get_secret(storage)?.ok_or_else(|| SignerError::Otp("secret missing".into()))?;
    let last = get_u64(storage, OTP_LASTSTEP_KEY)?.unwrap_or(0);
    let accepted = verify_code(code, &secret, now, last)
        .ok_or_else(|| SignerError::Otp("OTP_BAD_CODE".into()))?;
    let until = now
        .checked_add(unlock_secs)
        .ok_or_else(|| SignerError::Otp("unlock time out of range".into()))?;

    storage.set_raw(OTP_LASTSTEP_KEY, &accepted.to_le_bytes())?;
    Ok(until)
}

pub fn is_enrolled(storage: &dyn KeyStorage) -> Result<bool> {
    Ok(matches!(storage.get_raw(OTP_ENROLLED_KEY)?.as_deref(), Some([1])))
}

fn get_secret(storage: &dyn KeyStorage) -> Result<Option<[u8; OTP_BYTES]>> {
    Ok(storage
        .get_raw(OTP_SECRET_KEY)?
        .and_then(|bytes| <[u8; OTP_BYTES]>::try_from(bytes.as_slice()).ok()))
}

fn get_u64(storage: &dyn KeyStorage, key: &str) -> Result<Option<u64>> {
    Ok(storage
        .get_raw(key)?
        .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
        .map(u64::from_le_bytes))
}

/// RFC 4226 HOTP truncated to six digits.
pub fn hotp(secret: &[u8], counter: u64) -> u32 {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC takes keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let off = (digest[19] & 0x0f) as usize;
    let dbc = ((u32::from(digest[off]) & 0x7f) << 24)
        | (u32::from(digest[off + 1]) << 16)
        | (u32::from(digest[off + 2]) << 8)
        | u32::from(digest[off + 3]);
    dbc % 10u32.pow(OTP_DIGITS)
}

/// The step at which `code` is valid around `now`. Steps at or before
/// `last_step` are spent.
pub fn verify_code(code: &str, secret: &[u8], now: u64, last_step: u64) -> Option<u64> {
    if code.len() != OTP_DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let step_now = (now / OTP_PERIOD) as i64;
    for w in -OTP_WINDOW..=OTP_WINDOW {
        let step = step_now + w;
        if step < 0 || step as u64 <= last_step {
            continue;
        }
        let expected = format!("{:06}", hotp(secret, step as u64));
        if bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
            return Some(step as u64);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn hotp_matches_rfc4226_vectors() {
        assert_eq!(hotp(RFC_SECRET, 0), 755224);
        assert_eq!(hotp(RFC_SECRET, 1), 287082);
        assert_eq!(hotp(RFC_SECRET, 9), 520489);
    }

    #[test]
    fn verify_accepts_adjacent_step_and_refuses_replay() {
        // now = 59s is step 1; code for step 1 is 287082
        assert_eq!(verify_code("287082", RFC_SECRET, 59, 0), Some(1));
        assert_eq!(verify_code("287082", RFC_SECRET, 59, 1), None);
        assert_eq!(verify_code("755224", RFC_SECRET, 59, 1), None);
        assert_eq!(verify_code("755224", RFC_SECRET, 29, 0), None);
        assert_eq!(verify_code("28708", RFC_SECRET, 59, 0), None);
        assert_eq!(verify_code("abcdef", RFC_SECRET, 59, 0), None);
    }

    #[test]
    fn enrollment_then_unlock() {
        let mut storage = MemoryStorage::new();
        let b32 = begin(&mut storage).unwrap();
        let secret = BASE32_NOPAD.decode(b32.as_bytes()).unwrap();
        assert_eq!(secret.len(), OTP_BYTES);
        assert!(!is_enrolled(&storage).unwrap());

        let now = 1_700_000_000;
        let code = format!("{:06}", hotp(&secret, now / OTP_PERIOD));
        confirm(&mut storage, &code, now).unwrap();
        assert!(is_enrolled(&storage).unwrap());
        assert!(begin(&mut storage).is_err());

        // same step is now spent
        assert!(unlock(&mut storage, &code, now, 120).is_err());

        let later = now + OTP_PERIOD;
        let code = format!("{:06}", hotp(&secret, later / OTP_PERIOD));
        assert_eq!(unlock(&mut storage, &code, later, 120).unwrap(), later + 120);
    }

    fn enrolled_at(now: u64) -> (MemoryStorage, Vec<u8>) {
        let mut storage = MemoryStorage::new();
        let b32 = begin(&mut storage).unwrap();
        let secret = BASE32_NOPAD.decode(b32.as_bytes()).unwrap();
        let code = format!("{:06}", hotp(&secret, now / OTP_PERIOD + 1));
        confirm(&mut storage, &code, now).unwrap();
        (storage, secret)
    }

    #[test]
    fn older_step_cannot_reopen_a_spent_code() {
        let now = 1_700_000_010;
        let (mut storage, secret) = enrolled_at(now - 2 * OTP_PERIOD);
        let step = now / OTP_PERIOD;
        let current = format!("{:06}", hotp(&secret, step));
        let previous = format!("{:06}", hotp(&secret, step - 1));

        assert_eq!(unlock(&mut storage, &current, now, 120).unwrap(), now + 120);
        assert!(unlock(&mut storage, &previous, now, 120).is_err());
        assert!(unlock(&mut storage, &current, now, 120).is_err());
    }

    #[test]
    fn unlock_near_end_of_time_is_refused() {
        let now = u64::MAX - 5;
        let (mut storage, secret) = enrolled_at(now - 2 * OTP_PERIOD);
        let code = format!("{:06}", hotp(&secret, now / OTP_PERIOD));
        assert!(matches!(
            unlock(&mut storage, &code, now, 120),
            Err(SignerError::Otp(_))
        ));
        // The step is not spent by a refused unlock.
        assert_eq!(unlock(&mut storage, &code, now, 5).unwrap(), u64::MAX);
    }

    #[test]
    fn unlock_requires_enrollment() {
        let mut storage = MemoryStorage::new();
        assert!(unlock(&mut storage, "000000", 0, 120).is_err());
    }
}
