//! Time-based one-time passwords as a stacked second factor.
//!
//! OTP never derives a key; it only hardens another factor. A node with
//! `otpKey` set makes the authority reject any request that is missing a
//! valid code, replying with a reset token the account owner can use to
//! escape a lost authenticator.

use serde_json::json;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::context::LoginContext;
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{auth_json_node, login_fetch};
use crate::login::payload::{apply_login_payload, LoginPayload};
use crate::login::tree::LoginTree;
use crate::stash::types::LoginStash;

/// Code length and step match the common authenticator-app defaults.
const OTP_DIGITS: usize = 6;
const OTP_STEP: u64 = 30;
const OTP_SECRET_BYTES: usize = 20;

fn totp_for(otp_key: &str) -> LoginResult<TOTP> {
    let secret = Secret::Encoded(otp_key.to_string())
        .to_bytes()
        .map_err(|_| LoginError::Decrypt)?;
    TOTP::new(Algorithm::SHA1, OTP_DIGITS, 1, OTP_STEP, secret).map_err(|_| LoginError::Decrypt)
}

/// The current code for a base32 OTP key.
pub fn totp_now(otp_key: &str) -> LoginResult<String> {
    let totp = totp_for(otp_key)?;
    totp.generate_current()
        .map_err(|e| LoginError::Network(e.to_string()))
}

/// Check a submitted code against a key, allowing one step of clock skew.
pub fn totp_check(otp_key: &str, code: &str) -> LoginResult<bool> {
    let totp = totp_for(otp_key)?;
    totp.check_current(code)
        .map_err(|e| LoginError::Network(e.to_string()))
}

/// Generate a fresh base32 OTP key.
pub fn generate_otp_key() -> String {
    let raw = crate::crypto::encryption::random_bytes(OTP_SECRET_BYTES);
    match Secret::Raw(raw).to_encoded() {
        Secret::Encoded(text) => text,
        Secret::Raw(_) => unreachable!("to_encoded always yields the encoded variant"),
    }
}

/// Turn on OTP for the whole account. The key is generated locally and
/// registered with the authority; the local stash adopts it only after
/// the commit succeeds. OTP guards the tree root, so the root must be
/// unlocked.
pub async fn enable_otp(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
    otp_timeout: u32,
) -> LoginResult<String> {
    let root = login.root();
    if root.login_key.is_none() {
        return Err(LoginError::BadFactor);
    }
    let otp_key = generate_otp_key();

    let mut body = auth_json_node(stash_tree, root, &ctx.client_id)?;
    body["data"] = json!({ "otpKey": otp_key, "otpTimeout": otp_timeout });
    let results = login_fetch(ctx.authority.as_ref(), "PUT", "/v2/login/otp", body).await?;

    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;
    let merged = apply_login_payload(stash_tree, &payload);
    ctx.store.save(&merged)?;

    tracing::info!("OTP enabled");
    Ok(otp_key)
}

/// Turn OTP off for the whole account.
pub async fn disable_otp(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
) -> LoginResult<LoginStash> {
    let root = login.root();
    if root.login_key.is_none() {
        return Err(LoginError::BadFactor);
    }
    let body = auth_json_node(stash_tree, root, &ctx.client_id)?;
    let results = login_fetch(ctx.authority.as_ref(), "DELETE", "/v2/login/otp", body).await?;

    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;
    let merged = apply_login_payload(stash_tree, &payload);
    ctx.store.save(&merged)?;

    tracing::info!("OTP disabled");
    Ok(merged)
}

/// Adopt an OTP key on this device (from a QR scan or a reset flow), so
/// future requests for the account carry codes.
pub fn repair_otp(ctx: &LoginContext, stash_tree: &LoginStash, otp_key: &str) -> LoginResult<LoginStash> {
    // Reject garbage before it poisons every future request.
    totp_for(otp_key)?;

    let mut merged = stash_tree.clone();
    merged.otp_key = Some(otp_key.to_string());
    ctx.store.save(&merged)?;
    Ok(merged)
}

/// Attach a current code to a request body when the stash demands one.
pub fn stamp_otp(body: &mut serde_json::Value, stash: &LoginStash) -> LoginResult<()> {
    if let Some(otp_key) = &stash.otp_key {
        body["otp"] = serde_json::Value::String(totp_now(otp_key)?);
    }
    Ok(())
}

/// Attach an explicit key's current code, overriding the stash.
pub fn stamp_otp_key(body: &mut serde_json::Value, otp_key: &str) -> LoginResult<()> {
    body["otp"] = serde_json::Value::String(totp_now(otp_key)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_produce_checkable_codes() {
        let otp_key = generate_otp_key();
        let code = totp_now(&otp_key).unwrap();
        assert_eq!(code.len(), OTP_DIGITS);
        assert!(totp_check(&otp_key, &code).unwrap());
    }

    #[test]
    fn wrong_code_fails_the_check() {
        let otp_key = generate_otp_key();
        assert!(!totp_check(&otp_key, "000000").unwrap() || totp_now(&otp_key).unwrap() == "000000");
    }

    #[test]
    fn different_keys_disagree() {
        let a = generate_otp_key();
        let b = generate_otp_key();
        assert_ne!(a, b);
    }

    #[test]
    fn corrupt_key_is_rejected() {
        assert!(totp_now("!!!not base32!!!").is_err());
    }

    #[test]
    fn stamping_respects_enrollment() {
        let mut body = serde_json::json!({});
        let mut stash = LoginStash::new(vec![1u8; 32], "");
        stamp_otp(&mut body, &stash).unwrap();
        assert!(body.get("otp").is_none());

        stash.otp_key = Some(generate_otp_key());
        stamp_otp(&mut body, &stash).unwrap();
        assert!(body.get("otp").is_some());
    }
}
