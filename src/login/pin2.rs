//! PIN factor (pin2).
//!
//! A PIN is useless without the device-local `pin2Key`, so a stolen PIN
//! alone proves nothing. The key lives only in this device's stash, on the
//! node whose `appId` matches the context; the authority indexes the
//! account by `pin2Id = HMAC(appId | username, pin2Key)` and verifies
//! `pin2Auth = HMAC(pin, pin2Key)` without learning the PIN.
//!
//! `pin2TextBox` wraps the PIN text under the node's login key, which is
//! what keeps `check_pin` working even while PIN *login* is disabled.

use base64::Engine;
use chrono::Utc;
use serde_json::json;

use crate::context::LoginContext;
use crate::crypto::{hmac_sha256, normalize_username, EncryptedBox};
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{auth_json, login_fetch};
use crate::login::otp::stamp_otp;
use crate::login::password::save_with_retry;
use crate::login::payload::{apply_login_payload, LoginPayload};
use crate::login::tree::{find_mut, make_login_tree_keyed, search_tree, LoginTree, SecretKey};
use crate::stash::types::LoginStash;

/// Options for [`change_pin`].
#[derive(Debug, Clone, Default)]
pub struct ChangePinOptions {
    /// The new PIN, or `None` to keep the one stored on this device.
    pub pin: Option<String>,
    /// Whether PIN *login* should be possible afterwards. `check_pin`
    /// keeps working either way.
    pub enable_login: bool,
}

/// The identity bytes hashed into `pin2Id`: the username when the account
/// has one, the root login id otherwise.
fn pin2_identity(stash_root: &LoginStash) -> Vec<u8> {
    match &stash_root.username {
        Some(username) => normalize_username(username).into_bytes(),
        None => stash_root.login_id.clone(),
    }
}

/// Account index the authority stores for PIN lookups.
pub fn pin2_id(pin2_key: &[u8], app_id: &str, identity: &[u8]) -> [u8; 32] {
    let mut data = app_id.as_bytes().to_vec();
    data.extend_from_slice(identity);
    hmac_sha256(pin2_key, &data)
}

/// Per-attempt proof of the PIN.
pub fn pin2_auth(pin2_key: &[u8], pin: &str) -> [u8; 32] {
    hmac_sha256(pin2_key, pin.as_bytes())
}

/// The stash node PIN login would use for this app id, if any.
pub fn find_pin2_stash<'a>(stash_tree: &'a LoginStash, app_id: &str) -> Option<&'a LoginStash> {
    search_tree(stash_tree, |node| {
        node.app_id == app_id && node.pin2_key.is_some()
    })
}

/// Recompute the `pin2Id` for a stash's enrollment on `app_id`, when the
/// device holds the `pin2Key`. The id itself is never persisted.
pub(crate) fn stash_pin2_id(stash_tree: &LoginStash, app_id: &str) -> Option<Vec<u8>> {
    let node = find_pin2_stash(stash_tree, app_id)?;
    let pin2_key = node.pin2_key.as_ref()?;
    Some(pin2_id(pin2_key, app_id, &pin2_identity(stash_tree)).to_vec())
}

/// Whether PIN login is possible for a locally known user on this device.
pub fn pin_login_enabled(ctx: &LoginContext, username: &str) -> LoginResult<bool> {
    let Some(stash) = ctx.store.load_by_username(username)? else {
        return Ok(false);
    };
    Ok(find_pin2_stash(&stash, &ctx.app_id).is_some())
}

/// Log in with a PIN.
pub async fn login_with_pin(ctx: &LoginContext, username: &str, pin: &str) -> LoginResult<LoginTree> {
    let stash = ctx
        .store
        .load_by_username(username)?
        .ok_or(LoginError::UserNotFound)?;
    let node = find_pin2_stash(&stash, &ctx.app_id).ok_or(LoginError::PinNotEnabled)?;
    let pin2_key = node.pin2_key.clone().ok_or(LoginError::PinNotEnabled)?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut body = json!({
        "pin2Id": b64.encode(pin2_id(&pin2_key, &ctx.app_id, &pin2_identity(&stash))),
        "pin2Auth": b64.encode(pin2_auth(&pin2_key, pin)),
        "clientId": b64.encode(&ctx.client_id),
    });
    stamp_otp(&mut body, &stash)?;

    let results = login_fetch(ctx.authority.as_ref(), "POST", "/v2/login", body).await?;
    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;

    let sealed = payload.pin2_box.clone().ok_or(LoginError::Decrypt)?;
    let pin2_key_bytes: [u8; 32] = pin2_key
        .as_slice()
        .try_into()
        .map_err(|_| LoginError::Decrypt)?;
    let login_key = sealed.decrypt_key(&pin2_key_bytes)?;

    let mut merged = apply_login_payload(&stash, &payload);
    merged.last_login = Some(Utc::now());

    let tree = make_login_tree_keyed(&merged, SecretKey::new(login_key), &ctx.app_id)?;
    tree.adopt_local_secrets(&mut merged);
    ctx.store.save(&merged)?;
    Ok(tree)
}

/// Set, change, enable, or disable the PIN for an unlocked login.
///
/// The active node's login key is re-wrapped under the (possibly new)
/// `pin2Key`; the login key itself never changes. The authority commit
/// happens before any local mutation.
pub async fn change_pin(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
    opts: ChangePinOptions,
) -> LoginResult<LoginStash> {
    let active = login.active();
    let login_key = login.login_key();

    // Resolve the PIN text: the caller's, or the one already on disk.
    let pin = match &opts.pin {
        Some(pin) => pin.clone(),
        None => {
            let text = get_pin(stash_tree, login)?;
            text.ok_or(LoginError::PinNotEnabled)?
        }
    };

    let pin2_text_box = EncryptedBox::encrypt(pin.as_bytes(), login_key.as_bytes())?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut body = auth_json(stash_tree, login, &ctx.client_id)?;
    let new_pin2_key = if opts.enable_login {
        // Reuse the device's pin2Key so other copies of it stay valid.
        let stash_node = search_tree(stash_tree, |n| n.login_id == active.login_id);
        let pin2_key = stash_node
            .and_then(|n| n.pin2_key.clone())
            .unwrap_or_else(|| crate::crypto::encryption::random_bytes(32));
        let pin2_key_bytes: [u8; 32] = pin2_key
            .as_slice()
            .try_into()
            .map_err(|_| LoginError::Decrypt)?;

        body["data"] = json!({
            "pin2Id": b64.encode(pin2_id(&pin2_key, &ctx.app_id, &pin2_identity(stash_tree))),
            "pin2Auth": b64.encode(pin2_auth(&pin2_key, &pin)),
            "pin2Box": EncryptedBox::encrypt(login_key.as_bytes(), &pin2_key_bytes)?,
            "pin2KeyBox": EncryptedBox::encrypt(&pin2_key, login_key.as_bytes())?,
            "pin2TextBox": pin2_text_box,
        });
        Some(pin2_key)
    } else {
        // Login off: the server keeps only the text box.
        body["data"] = json!({ "pin2TextBox": pin2_text_box });
        None
    };

    let results = login_fetch(ctx.authority.as_ref(), "PUT", "/v2/login/pin2", body).await?;
    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;

    let mut merged = apply_login_payload(stash_tree, &payload);
    if let Some(node) = find_mut(&mut merged, &active.login_id) {
        node.pin2_key = new_pin2_key;
    }
    save_with_retry(ctx, &merged)?;

    tracing::info!(enabled = opts.enable_login, "PIN changed");
    Ok(merged)
}

/// Verify a PIN against the locally stored text without touching the
/// authority or enabling anything.
pub fn check_pin(stash_tree: &LoginStash, login: &LoginTree, pin: &str) -> LoginResult<bool> {
    match get_pin(stash_tree, login)? {
        Some(stored) => Ok(stored == pin),
        None => Err(LoginError::PinNotEnabled),
    }
}

/// The PIN text stored for an unlocked login, if any.
pub fn get_pin(stash_tree: &LoginStash, login: &LoginTree) -> LoginResult<Option<String>> {
    let active = login.active();
    let stash_node = search_tree(stash_tree, |n| n.login_id == active.login_id);
    let Some(sealed) = stash_node.and_then(|n| n.pin2_text_box.as_ref()) else {
        return Ok(None);
    };
    let plain = sealed.decrypt(login.login_key().as_bytes())?;
    String::from_utf8(plain).map(Some).map_err(|_| LoginError::Decrypt)
}

/// Remove PIN login and the stored PIN text entirely.
pub async fn delete_pin(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
) -> LoginResult<LoginStash> {
    let active = login.active();

    let body = auth_json(stash_tree, login, &ctx.client_id)?;
    let results = login_fetch(ctx.authority.as_ref(), "DELETE", "/v2/login/pin2", body).await?;
    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;

    let mut merged = apply_login_payload(stash_tree, &payload);
    if let Some(node) = find_mut(&mut merged, &active.login_id) {
        node.pin2_key = None;
    }
    save_with_retry(ctx, &merged)?;
    Ok(merged)
}
