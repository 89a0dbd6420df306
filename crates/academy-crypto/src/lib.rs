//! Academy Crypto - symmetric encryption for the local cache
//!
//! This crate provides:
//! - ChaCha20-Poly1305 authenticated encryption with a fresh nonce per message
//! - Hex armor for text-safe on-disk storage
//! - Passphrase key derivation (PBKDF2-HMAC-SHA256)
//! - A key holder that owns the active key and serializes access to it

pub mod cipher;
pub mod keys;

pub use cipher::{CipherError, KEY_SIZE, NONCE_SIZE};
pub use keys::{ActiveKey, ActiveKeyGuard, KeyError, KeyHolder};
