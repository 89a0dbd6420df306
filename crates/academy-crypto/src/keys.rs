//! Key management for the cache
//!
//! The active key lives inside a [`KeyHolder`]. Callers take the lock, do
//! their whole operation against the guarded [`ActiveKey`], and release it.
//! Rotation swaps the key while holding the same lock, so nothing encrypts
//! or decrypts against a half-rotated state.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ring::pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::cipher::{self, CipherError, KEY_SIZE};

/// PBKDF2 work factor for passphrase-derived keys
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Passphrase is empty")]
    EmptyPassphrase,

    #[error("Salt is empty")]
    EmptySalt,
}

/// Derive a 256-bit key from a passphrase with PBKDF2-HMAC-SHA256
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyError> {
    let secret = passphrase.expose_secret();
    if secret.is_empty() {
        return Err(KeyError::EmptyPassphrase);
    }
    if salt.is_empty() {
        return Err(KeyError::EmptySalt);
    }

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        secret.as_bytes(),
        key.as_mut(),
    );
    Ok(key)
}

/// The key currently used for new encryptions, plus how many times it has
/// been replaced.
pub struct ActiveKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
    generation: u64,
}

impl ActiveKey {
    pub fn bytes(&self) -> &[u8] {
        self.key.as_ref()
    }

    /// Starts at 0 and increments on every [`ActiveKey::replace`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn encrypt_hex(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        cipher::seal_hex(self.bytes(), plaintext)
    }

    pub fn decrypt_hex(&self, text: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        cipher::open_hex(self.bytes(), text)
    }

    /// Swap in a new key. The old one is zeroized when dropped here.
    pub fn replace(&mut self, key: Zeroizing<[u8; KEY_SIZE]>) -> u64 {
        self.key = key;
        self.generation += 1;
        self.generation
    }
}

impl fmt::Debug for ActiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveKey")
            .field("key", &"[REDACTED]")
            .field("generation", &self.generation)
            .finish()
    }
}

pub type ActiveKeyGuard<'a> = MutexGuard<'a, ActiveKey>;

/// Owner of the active key. Share it with `Arc`.
#[derive(Debug)]
pub struct KeyHolder {
    active: Mutex<ActiveKey>,
}

impl KeyHolder {
    pub fn new(key: Zeroizing<[u8; KEY_SIZE]>) -> Self {
        Self {
            active: Mutex::new(ActiveKey { key, generation: 0 }),
        }
    }

    pub fn from_passphrase(passphrase: &SecretString, salt: &[u8]) -> Result<Self, KeyError> {
        Ok(Self::new(derive_key(passphrase, salt)?))
    }

    /// Random key, not recoverable after the process exits
    pub fn random() -> Self {
        Self::new(cipher::generate_key())
    }

    /// Exclusive access to the active key.
    ///
    /// A poisoned lock still holds a valid key (replace is a single move),
    /// so the guard is recovered rather than propagated.
    pub fn lock(&self) -> ActiveKeyGuard<'_> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive_key(&secret("correct horse"), b"salt").unwrap();
        let b = derive_key(&secret("correct horse"), b"salt").unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_derive_depends_on_passphrase_and_salt() {
        let base = derive_key(&secret("correct horse"), b"salt").unwrap();
        let other_pass = derive_key(&secret("battery staple"), b"salt").unwrap();
        let other_salt = derive_key(&secret("correct horse"), b"pepper").unwrap();

        assert_ne!(*base, *other_pass);
        assert_ne!(*base, *other_salt);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(matches!(
            derive_key(&secret(""), b"salt"),
            Err(KeyError::EmptyPassphrase)
        ));
        assert!(matches!(
            derive_key(&secret("pw"), b""),
            Err(KeyError::EmptySalt)
        ));
    }

    #[test]
    fn test_replace_bumps_generation_and_changes_key() {
        let holder = KeyHolder::random();
        let mut active = holder.lock();
        let sealed = active.encrypt_hex(b"payload").unwrap();

        assert_eq!(active.generation(), 0);
        assert_eq!(active.replace(cipher::generate_key()), 1);
        assert!(active.decrypt_hex(&sealed).is_err());
        drop(active);

        assert_eq!(holder.generation(), 1);
    }

    #[test]
    fn test_debug_redacts_key() {
        let holder = KeyHolder::random();
        let rendered = format!("{:?}", holder);
        assert!(rendered.contains("REDACTED"));
    }
}
