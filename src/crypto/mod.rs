//! Symmetric crypto primitives for the login engine.
//!
//! Everything secret in a stash lives inside an [`EncryptedBox`]; every
//! factor proof is an HMAC; every memorized factor is stretched with scrypt
//! before it touches a box. No other module does its own cipher work.

pub mod encryption;
pub mod kdf;

pub use encryption::EncryptedBox;
pub use kdf::{derive_key, hmac_sha256, normalize_username, user_id, Snrp};
