//! ChaCha20-Poly1305 authenticated encryption for cache files
//!
//! Why an AEAD instead of plain AES-CBC/CTR?
//! - A wrong key or a flipped byte fails loudly instead of decrypting to junk
//! - Constant-time in software, no AES-NI needed on small deployment boxes
//! - 256-bit keys match what the PBKDF2 passphrase derivation produces
//!
//! Every message gets its own random nonce, prepended to the output:
//!
//! ```text
//! nonce (12) || ciphertext || tag (16)
//! ```
//!
//! The cache stores this as lowercase hex so the file stays plain text.

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// 256-bit key (32 bytes)
pub const KEY_SIZE: usize = 32;
/// 96-bit nonce (12 bytes)
pub const NONCE_SIZE: usize = 12;
/// Poly1305 tag (16 bytes)
pub const TAG_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed - wrong key, or data corrupted or tampered")]
    DecryptionFailed,

    #[error("Invalid key size: expected {KEY_SIZE}, got {0}")]
    InvalidKeySize(usize),

    #[error("Ciphertext too short: {0} bytes")]
    Truncated(usize),

    #[error("Ciphertext is not valid hex: {0}")]
    InvalidEncoding(#[from] hex::FromHexError),
}

/// Fresh random key from the OS RNG, scrubbed on drop
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

/// One per message. Never reuse a nonce under the same key.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305, CipherError> {
    if key.len() != KEY_SIZE {
        return Err(CipherError::InvalidKeySize(key.len()));
    }
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| CipherError::InvalidKeySize(key.len()))
}

/// Seal `plaintext` under `key` with a fresh nonce.
///
/// Output layout: nonce || ciphertext || tag
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = cipher_for(key)?;
    let nonce = generate_nonce();

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;

    Ok([&nonce[..], &sealed[..]].concat())
}

/// Decrypt data produced by [`encrypt`]
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let cipher = cipher_for(key)?;

    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CipherError::Truncated(data.len()));
    }

    let (nonce_bytes, encrypted) = data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| CipherError::DecryptionFailed)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt and hex-encode in one step
pub fn seal_hex(key: &[u8], plaintext: &[u8]) -> Result<String, CipherError> {
    encrypt(key, plaintext).map(hex::encode)
}

/// Hex-decode and decrypt in one step. Surrounding whitespace is ignored.
pub fn open_hex(key: &[u8], text: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let data = hex::decode(text.trim())?;
    decrypt(key, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let plaintext = br#"{"courses":["algebra","biology"]}"#;

        let ciphertext = encrypt(&*key, plaintext).unwrap();
        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
        assert_ne!(&ciphertext[NONCE_SIZE..NONCE_SIZE + plaintext.len()], plaintext);

        let decrypted = decrypt(&*key, &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let key = generate_key();
        let a = encrypt(&*key, b"same").unwrap();
        let b = encrypt(&*key, b"same").unwrap();

        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_key();
        let mut ciphertext = encrypt(&*key, b"secret data").unwrap();

        if let Some(byte) = ciphertext.last_mut() {
            *byte ^= 0xFF;
        }

        assert!(matches!(
            decrypt(&*key, &ciphertext),
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_key();
        let key2 = generate_key();

        let ciphertext = encrypt(&*key1, b"secret data").unwrap();
        assert!(decrypt(&*key2, &ciphertext).is_err());
    }

    #[test]
    fn test_bad_key_size_rejected() {
        assert!(matches!(
            encrypt(&[0u8; 16], b"x"),
            Err(CipherError::InvalidKeySize(16))
        ));
    }

    #[test]
    fn test_short_input_is_truncated_error() {
        let key = generate_key();
        assert!(matches!(
            decrypt(&*key, &[0u8; 5]),
            Err(CipherError::Truncated(5))
        ));
    }

    #[test]
    fn test_hex_armor() {
        let key = generate_key();
        let text = seal_hex(&*key, b"hello").unwrap();

        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let padded = format!("  {}\n", text);
        assert_eq!(open_hex(&*key, &padded).unwrap().as_slice(), b"hello");

        assert!(matches!(
            open_hex(&*key, "not hex at all"),
            Err(CipherError::InvalidEncoding(_))
        ));
    }
}
