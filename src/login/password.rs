//! Password factor.
//!
//! Two independent stretches of `username + password`:
//! - `passwordAuth`, stretched with the fixed protocol salt, is the online
//!   proof the authority stores and compares.
//! - `passwordKey`, stretched with the per-account `passwordKeySnrp` salt,
//!   unwraps `passwordBox` into the root login key.
//!
//! Because the two derivations never mix, the authority can verify a
//! login without ever holding anything that decrypts a box.

use base64::Engine;
use chrono::Utc;
use serde_json::json;

use crate::context::LoginContext;
use crate::crypto::{derive_key, normalize_username, user_id, EncryptedBox, Snrp};
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{auth_json_node, login_fetch};
use crate::login::otp::{stamp_otp, stamp_otp_key};
use crate::login::payload::{apply_login_payload, LoginPayload};
use crate::login::tree::{make_login_tree, LoginTree, SecretKey};
use crate::stash::types::LoginStash;

fn password_input(username: &str, password: &str) -> Vec<u8> {
    let mut input = normalize_username(username).into_bytes();
    input.extend_from_slice(password.as_bytes());
    input
}

/// The online proof for a username + password pair.
pub fn password_auth(username: &str, password: &str) -> LoginResult<[u8; 32]> {
    derive_key(&password_input(username, password), &Snrp::user_id_snrp())
}

/// The box-unwrapping key for a username + password pair.
pub fn password_key(username: &str, password: &str, snrp: &Snrp) -> LoginResult<[u8; 32]> {
    derive_key(&password_input(username, password), snrp)
}

/// Log in with a password.
///
/// Proves the password to the authority, merges the returned payload into
/// the cached stash, and unlocks the tree down to the context's app id.
/// When the authority is unreachable and a cached `passwordBox` exists,
/// falls back to a purely local unlock.
pub async fn login_with_password(
    ctx: &LoginContext,
    username: &str,
    password: &str,
    otp_key: Option<&str>,
) -> LoginResult<LoginTree> {
    let username = normalize_username(username);
    let cached = ctx.store.load_by_username(&username)?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut body = json!({
        "userId": b64.encode(user_id(&username)?),
        "passwordAuth": b64.encode(password_auth(&username, password)?),
        "clientId": b64.encode(&ctx.client_id),
    });
    match (otp_key, &cached) {
        (Some(key), _) => stamp_otp_key(&mut body, key)?,
        (None, Some(stash)) => stamp_otp(&mut body, stash)?,
        (None, None) => {}
    }

    match login_fetch(ctx.authority.as_ref(), "POST", "/v2/login", body).await {
        Ok(results) => {
            let payload: LoginPayload =
                serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;

            let snrp = payload.password_key_snrp.clone().ok_or(LoginError::Decrypt)?;
            let sealed = payload.password_box.clone().ok_or(LoginError::Decrypt)?;
            let root_key = sealed.decrypt_key(&password_key(&username, password, &snrp)?)?;

            let base = cached.unwrap_or_default();
            let mut merged = apply_login_payload(&base, &payload);
            merged.username = Some(username);
            merged.last_login = Some(Utc::now());

            let tree = make_login_tree(&merged, SecretKey::new(root_key), &ctx.app_id)?;
            tree.adopt_local_secrets(&mut merged);
            ctx.store.save(&merged)?;
            Ok(tree)
        }

        // Offline fallback: the cached boxes can still prove the password.
        Err(LoginError::Network(reason)) => {
            let Some(mut stash) = cached else {
                return Err(LoginError::Network(reason));
            };
            let (Some(snrp), Some(sealed)) =
                (stash.password_key_snrp.clone(), stash.password_box.clone())
            else {
                return Err(LoginError::Network(reason));
            };
            tracing::info!("authority unreachable; trying offline password login");

            let root_key = sealed
                .decrypt_key(&password_key(&username, password, &snrp)?)
                .map_err(|_| LoginError::BadFactor)?;

            stash.last_login = Some(Utc::now());
            ctx.store.save(&stash)?;
            make_login_tree(&stash, SecretKey::new(root_key), &ctx.app_id)
        }

        Err(other) => Err(other),
    }
}

/// Verify a password locally against the cached stash. Never errors for a
/// plain mismatch.
pub fn check_password(stash_tree: &LoginStash, password: &str) -> LoginResult<bool> {
    let Some(username) = stash_tree.username.as_deref() else {
        return Ok(false);
    };
    let (Some(snrp), Some(sealed)) = (&stash_tree.password_key_snrp, &stash_tree.password_box)
    else {
        return Ok(false);
    };
    let key = password_key(username, password, snrp)?;
    Ok(sealed.decrypt_key(&key).is_ok())
}

/// Set or replace the account password.
///
/// Re-wraps the existing root login key under the new password-derived
/// key (never regenerates it, which would strand every other factor),
/// commits to the authority, and only then touches the local stash.
pub async fn change_password(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
    new_password: &str,
) -> LoginResult<LoginStash> {
    let root = login.root();
    // Password lives on the tree root; the root must be unlocked.
    let root_key = root.login_key.as_ref().ok_or(LoginError::BadFactor)?;
    let username = stash_tree
        .username
        .as_deref()
        .ok_or(LoginError::BadFactor)?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let snrp = Snrp::generate();
    let auth = password_auth(username, new_password)?;
    let wrap = password_key(username, new_password, &snrp)?;
    let password_box = EncryptedBox::encrypt(root_key.as_bytes(), &wrap)?;
    let password_auth_box = EncryptedBox::encrypt(&auth, root_key.as_bytes())?;

    let mut body = auth_json_node(stash_tree, root, &ctx.client_id)?;
    body["data"] = json!({
        "passwordAuth": b64.encode(auth),
        "passwordBox": password_box,
        "passwordKeySnrp": snrp,
        "passwordAuthBox": password_auth_box,
    });
    let results = login_fetch(ctx.authority.as_ref(), "PUT", "/v2/login/password", body).await?;

    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;
    let merged = apply_login_payload(stash_tree, &payload);
    save_with_retry(ctx, &merged)?;

    tracing::info!("password changed");
    Ok(merged)
}

/// Remove password login from the account.
pub async fn delete_password(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
) -> LoginResult<LoginStash> {
    let root = login.root();
    if root.login_key.is_none() {
        return Err(LoginError::BadFactor);
    }

    let body = auth_json_node(stash_tree, root, &ctx.client_id)?;
    let results = login_fetch(ctx.authority.as_ref(), "DELETE", "/v2/login/password", body).await?;

    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;
    let merged = apply_login_payload(stash_tree, &payload);
    save_with_retry(ctx, &merged)?;
    Ok(merged)
}

/// The authority has already committed; losing the local write would
/// strand the device on stale credentials, so try twice before giving up.
pub(crate) fn save_with_retry(ctx: &LoginContext, stash: &LoginStash) -> LoginResult<()> {
    if ctx.store.save(stash).is_ok() {
        return Ok(());
    }
    ctx.store.save(stash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_auth_is_deterministic_per_account() {
        let a = password_auth("alice", "hunter2").unwrap();
        assert_eq!(a, password_auth(" Alice ", "hunter2").unwrap());
        assert_ne!(a, password_auth("alice", "hunter3").unwrap());
        assert_ne!(a, password_auth("bob", "hunter2").unwrap());
    }

    #[test]
    fn auth_and_wrap_keys_never_coincide() {
        let snrp = Snrp::generate();
        let auth = password_auth("alice", "hunter2").unwrap();
        let wrap = password_key("alice", "hunter2", &snrp).unwrap();
        assert_ne!(auth, wrap);
    }

    #[test]
    fn check_password_accepts_and_rejects_locally() {
        let root_key = SecretKey::generate();
        let snrp = Snrp::generate();
        let wrap = password_key("alice", "hunter2", &snrp).unwrap();

        let mut stash = LoginStash::new(vec![1u8; 32], "");
        stash.username = Some("alice".into());
        stash.password_key_snrp = Some(snrp);
        stash.password_box =
            Some(EncryptedBox::encrypt(root_key.as_bytes(), &wrap).unwrap());

        assert!(check_password(&stash, "hunter2").unwrap());
        assert!(!check_password(&stash, "wrong one").unwrap());
    }

    #[test]
    fn check_password_without_a_password_is_false() {
        let mut stash = LoginStash::new(vec![1u8; 32], "");
        stash.username = Some("alice".into());
        assert!(!check_password(&stash, "anything").unwrap());
    }
}
