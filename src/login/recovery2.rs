//! Recovery-questions factor (recovery2).
//!
//! The recovery key is a random 32-byte secret the user backs up out of
//! band. The authority indexes the account by `HMAC(username,
//! recovery2Key)` and stores one HMAC per *ordered* answer; a login
//! attempt must present the same answers in the same order. The questions
//! themselves travel inside `question2Box`, so only a holder of the
//! recovery key can even read them.

use base64::Engine;
use chrono::Utc;
use serde_json::json;

use crate::context::LoginContext;
use crate::crypto::{hmac_sha256, normalize_username, EncryptedBox};
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{auth_json_node, login_fetch};
use crate::login::otp::stamp_otp;
use crate::login::password::save_with_retry;
use crate::login::payload::{apply_login_payload, LoginPayload};
use crate::login::tree::{make_login_tree, LoginTree, SecretKey};

fn decode_key(recovery2_key: &str) -> LoginResult<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(recovery2_key)
        .map_err(|_| LoginError::Decrypt)?;
    bytes.as_slice().try_into().map_err(|_| LoginError::Decrypt)
}

/// Account index the authority stores for recovery lookups.
pub fn recovery2_id(recovery2_key: &[u8], username: &str) -> [u8; 32] {
    hmac_sha256(recovery2_key, normalize_username(username).as_bytes())
}

/// Ordered per-answer proofs.
pub fn recovery2_auth(recovery2_key: &[u8], answers: &[String]) -> Vec<String> {
    let b64 = base64::engine::general_purpose::STANDARD;
    answers
        .iter()
        .map(|answer| b64.encode(hmac_sha256(recovery2_key, answer.as_bytes())))
        .collect()
}

/// Log in by answering the recovery questions.
///
/// Fails with `RecoveryAnswer` on a wrong answer count or any mismatched
/// answer; never partially succeeds.
pub async fn login_with_recovery2(
    ctx: &LoginContext,
    recovery2_key: &str,
    username: &str,
    answers: &[String],
) -> LoginResult<LoginTree> {
    let key = decode_key(recovery2_key)?;
    let username = normalize_username(username);
    let cached = ctx.store.load_by_username(&username)?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut body = json!({
        "recovery2Id": b64.encode(recovery2_id(&key, &username)),
        "recovery2Auth": recovery2_auth(&key, answers),
        "clientId": b64.encode(&ctx.client_id),
    });
    if let Some(stash) = &cached {
        stamp_otp(&mut body, stash)?;
    }

    let results = login_fetch(ctx.authority.as_ref(), "POST", "/v2/login", body).await?;
    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;

    let sealed = payload.recovery2_box.clone().ok_or(LoginError::Decrypt)?;
    let root_key = sealed.decrypt_key(&key)?;

    let base = cached.unwrap_or_default();
    let mut merged = apply_login_payload(&base, &payload);
    merged.username = Some(username);
    merged.last_login = Some(Utc::now());

    let tree = make_login_tree(&merged, SecretKey::new(root_key), &ctx.app_id)?;
    tree.adopt_local_secrets(&mut merged);
    ctx.store.save(&merged)?;
    Ok(tree)
}

/// Fetch the recovery questions for an account. Requires only the
/// recovery key and username, not an authenticated login.
pub async fn fetch_recovery2_questions(
    ctx: &LoginContext,
    recovery2_key: &str,
    username: &str,
) -> LoginResult<Vec<String>> {
    let key = decode_key(recovery2_key)?;
    let username = normalize_username(username);
    let b64 = base64::engine::general_purpose::STANDARD;

    let body = json!({
        "recovery2Id": b64.encode(recovery2_id(&key, &username)),
    });
    let results = login_fetch(ctx.authority.as_ref(), "POST", "/v2/login", body).await?;

    let sealed: EncryptedBox = serde_json::from_value(
        results.get("question2Box").cloned().unwrap_or_default(),
    )
    .map_err(|_| LoginError::Decrypt)?;
    let plain = sealed.decrypt(&key)?;
    serde_json::from_slice(&plain).map_err(|_| LoginError::Decrypt)
}

/// Set or replace the recovery questions and answers.
///
/// Returns the base64 recovery key the user must back up. Reuses the
/// device's cached key when one exists so previously printed backups stay
/// valid; the root login key is re-wrapped, never regenerated.
pub async fn change_recovery(
    ctx: &LoginContext,
    stash_tree: &crate::stash::types::LoginStash,
    login: &LoginTree,
    questions: &[String],
    answers: &[String],
) -> LoginResult<String> {
    if questions.is_empty() || questions.len() != answers.len() {
        return Err(LoginError::RecoveryAnswer);
    }
    let root = login.root();
    let root_key = root.login_key.as_ref().ok_or(LoginError::BadFactor)?;
    let username = stash_tree
        .username
        .as_deref()
        .ok_or(LoginError::BadFactor)?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let key_bytes = match &stash_tree.recovery2_key {
        Some(existing) => existing
            .as_slice()
            .try_into()
            .map_err(|_| LoginError::Decrypt)?,
        None => crate::crypto::encryption::random_key(),
    };

    let question_json = serde_json::to_vec(questions).map_err(|_| LoginError::Decrypt)?;
    let question2_box = EncryptedBox::encrypt(&question_json, &key_bytes)?;
    let recovery2_box = EncryptedBox::encrypt(root_key.as_bytes(), &key_bytes)?;
    let recovery2_key_box = EncryptedBox::encrypt(&key_bytes, root_key.as_bytes())?;

    let mut body = auth_json_node(stash_tree, root, &ctx.client_id)?;
    body["data"] = json!({
        "recovery2Id": b64.encode(recovery2_id(&key_bytes, username)),
        "recovery2Auth": recovery2_auth(&key_bytes, answers),
        "question2Box": question2_box,
        "recovery2Box": recovery2_box,
        "recovery2KeyBox": recovery2_key_box,
    });
    let results = login_fetch(ctx.authority.as_ref(), "PUT", "/v2/login/recovery2", body).await?;

    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;
    let mut merged = apply_login_payload(stash_tree, &payload);
    merged.recovery2_key = Some(key_bytes.to_vec());
    save_with_retry(ctx, &merged)?;

    tracing::info!("recovery questions changed");
    Ok(b64.encode(key_bytes))
}

/// Remove recovery login from the account.
pub async fn delete_recovery(
    ctx: &LoginContext,
    stash_tree: &crate::stash::types::LoginStash,
    login: &LoginTree,
) -> LoginResult<crate::stash::types::LoginStash> {
    let root = login.root();
    if root.login_key.is_none() {
        return Err(LoginError::BadFactor);
    }

    let body = auth_json_node(stash_tree, root, &ctx.client_id)?;
    let results = login_fetch(ctx.authority.as_ref(), "DELETE", "/v2/login/recovery2", body).await?;

    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;
    let mut merged = apply_login_payload(stash_tree, &payload);
    merged.recovery2_key = None;
    save_with_retry(ctx, &merged)?;
    Ok(merged)
}
