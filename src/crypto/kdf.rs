//! Key stretching and proof HMACs.
//!
//! Memorized factors are stretched with scrypt before use. The cost
//! parameters travel with each factor's salt in an [`Snrp`] block, so the
//! work factor can be raised for new accounts without breaking stashes
//! written under the old cost.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::encryption::random_bytes;
use crate::error::{LoginError, LoginResult};

type HmacSha256 = Hmac<Sha256>;

/// Default scrypt cost: n=16384, r=1, p=1.
const DEFAULT_N: u32 = 16384;
const DEFAULT_R: u32 = 1;
const DEFAULT_P: u32 = 1;

/// Fixed protocol salt for deriving `userId` from a username. Shared by
/// every client so the authority can index accounts by the same value.
const USER_ID_SALT: [u8; 32] = [
    0xb5, 0x86, 0x5f, 0xfb, 0x9f, 0xa7, 0xb3, 0xbf, 0xe4, 0xb2, 0x38, 0x4d,
    0x47, 0xce, 0x83, 0x0e, 0xe2, 0x2e, 0xd4, 0x52, 0xf3, 0xf4, 0xa4, 0x7e,
    0xd1, 0xe3, 0x89, 0x44, 0xf7, 0x56, 0xc1, 0x0c,
];

/// Salt plus scrypt cost parameters for one stretched factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snrp {
    /// Base64 salt.
    pub salt: String,
    pub n: u32,
    pub r: u32,
    pub p: u32,
}

impl Snrp {
    /// Fresh random salt at the current default cost.
    pub fn generate() -> Self {
        Self {
            salt: base64::engine::general_purpose::STANDARD.encode(random_bytes(32)),
            n: DEFAULT_N,
            r: DEFAULT_R,
            p: DEFAULT_P,
        }
    }

    /// The fixed-salt parameter block used for `userId` and the password
    /// online proof.
    pub fn user_id_snrp() -> Self {
        Self {
            salt: base64::engine::general_purpose::STANDARD.encode(USER_ID_SALT),
            n: DEFAULT_N,
            r: DEFAULT_R,
            p: DEFAULT_P,
        }
    }
}

/// Stretch `secret` into a 256-bit key using the given parameters.
pub fn derive_key(secret: &[u8], snrp: &Snrp) -> LoginResult<[u8; 32]> {
    let salt = base64::engine::general_purpose::STANDARD
        .decode(&snrp.salt)
        .map_err(|_| LoginError::Decrypt)?;

    // scrypt wants log2(n); reject anything that is not a power of two.
    if snrp.n < 2 || !snrp.n.is_power_of_two() {
        return Err(LoginError::Decrypt);
    }
    let log_n = snrp.n.trailing_zeros() as u8;
    let params =
        scrypt::Params::new(log_n, snrp.r, snrp.p, 32).map_err(|_| LoginError::Decrypt)?;

    let mut out = [0u8; 32];
    scrypt::scrypt(secret, &salt, &params, &mut out).map_err(|_| LoginError::Decrypt)?;
    Ok(out)
}

/// HMAC-SHA256 proof over `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Normalize a username the way the authority indexes it.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Derive the opaque account identifier from a username.
pub fn user_id(username: &str) -> LoginResult<[u8; 32]> {
    let normalized = normalize_username(username);
    derive_key(normalized.as_bytes(), &Snrp::user_id_snrp())
}
