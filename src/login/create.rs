//! Account creation.
//!
//! Builds a fresh root login (and, when the context lives in an app
//! namespace, one child login for that app), attaches the requested
//! factors, registers everything with the authority in a single request,
//! and only then persists the local stash.

use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use crate::context::LoginContext;
use crate::crypto::encryption::{random_bytes, random_key};
use crate::crypto::{user_id, EncryptedBox, Snrp};
use crate::error::{LoginError, LoginResult};
use crate::login::authority::login_fetch;
use crate::login::password::{password_auth, password_key};
use crate::login::pin2::{pin2_auth, pin2_id};
use crate::login::tree::{make_login_tree, wrap_key, LoginTree, SecretKey};
use crate::stash::types::LoginStash;

/// What to attach to a new account.
#[derive(Debug, Clone, Default)]
pub struct AccountOptions {
    /// Optional: accounts without usernames are looked up by login id.
    pub username: Option<String>,
    /// Requires a username.
    pub password: Option<String>,
    pub pin: Option<String>,
}

struct NewNode {
    stash: LoginStash,
    key: SecretKey,
    login_auth: Vec<u8>,
}

/// Build one fresh login node with its key-login proof and sync key.
fn new_node(app_id: &str) -> LoginResult<NewNode> {
    let key = SecretKey::generate();
    let login_auth = random_bytes(32);

    let mut stash = LoginStash::new(random_bytes(32), app_id);
    stash.login_auth_box = Some(EncryptedBox::encrypt(&login_auth, key.as_bytes())?);
    stash.sync_key_box = Some(EncryptedBox::encrypt(&random_key(), key.as_bytes())?);

    Ok(NewNode {
        stash,
        key,
        login_auth,
    })
}

/// Server-side registration record for one node: its payload fields plus
/// the verification secrets the authority stores.
fn node_record(node: &NewNode) -> LoginResult<Value> {
    let b64 = base64::engine::general_purpose::STANDARD;
    Ok(json!({
        "loginId": b64.encode(&node.stash.login_id),
        "appId": node.stash.app_id,
        "loginAuth": b64.encode(&node.login_auth),
        "loginAuthBox": node.stash.login_auth_box,
        "syncKeyBox": node.stash.sync_key_box,
        "parentBox": node.stash.parent_box,
    }))
}

/// Create a new account and log straight into it.
pub async fn create_account(ctx: &LoginContext, opts: AccountOptions) -> LoginResult<LoginTree> {
    if opts.password.is_some() && opts.username.is_none() {
        // A password stretches the username into its proofs.
        return Err(LoginError::BadFactor);
    }
    let username = opts
        .username
        .as_deref()
        .map(crate::crypto::normalize_username);
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut root = new_node("")?;
    root.stash.username = username.clone();
    if let Some(name) = &username {
        root.stash.user_id = Some(user_id(name)?.to_vec());
    }

    // One child login for the context's app namespace.
    let mut app = if ctx.app_id.is_empty() {
        None
    } else {
        let mut node = new_node(&ctx.app_id)?;
        node.stash.parent_box = Some(wrap_key(&root.key, &node.key)?);
        Some(node)
    };

    let mut root_record = node_record(&root)?;
    if let Some(name) = &username {
        root_record["userId"] = Value::String(b64.encode(user_id(name)?));
    }

    // Password factor, on the root.
    if let (Some(password), Some(name)) = (&opts.password, &username) {
        let snrp = Snrp::generate();
        let auth = password_auth(name, password)?;
        let wrap = password_key(name, password, &snrp)?;

        root.stash.password_key_snrp = Some(snrp.clone());
        root.stash.password_box = Some(EncryptedBox::encrypt(root.key.as_bytes(), &wrap)?);
        root.stash.password_auth_box = Some(EncryptedBox::encrypt(&auth, root.key.as_bytes())?);

        root_record["passwordAuth"] = Value::String(b64.encode(auth));
        root_record["passwordBox"] = serde_json::to_value(&root.stash.password_box)
            .map_err(|_| LoginError::Decrypt)?;
        root_record["passwordKeySnrp"] =
            serde_json::to_value(&snrp).map_err(|_| LoginError::Decrypt)?;
        root_record["passwordAuthBox"] = serde_json::to_value(&root.stash.password_auth_box)
            .map_err(|_| LoginError::Decrypt)?;
    }

    // PIN factor, on the app node (or the root when there is none).
    let mut app_record = app.as_ref().map(node_record).transpose()?;
    if let Some(pin) = &opts.pin {
        let identity = match &username {
            Some(name) => name.clone().into_bytes(),
            None => root.stash.login_id.clone(),
        };
        let pin2_key = random_bytes(32);
        let pin2_key_bytes: [u8; 32] = pin2_key
            .as_slice()
            .try_into()
            .map_err(|_| LoginError::Decrypt)?;

        let attach_pin = |node: &mut NewNode, record: &mut Value| -> LoginResult<()> {
            node.stash.pin2_key = Some(pin2_key.clone());
            node.stash.pin2_box =
                Some(EncryptedBox::encrypt(node.key.as_bytes(), &pin2_key_bytes)?);
            node.stash.pin2_key_box =
                Some(EncryptedBox::encrypt(&pin2_key, node.key.as_bytes())?);
            node.stash.pin2_text_box =
                Some(EncryptedBox::encrypt(pin.as_bytes(), node.key.as_bytes())?);

            record["pin2Id"] =
                Value::String(b64.encode(pin2_id(&pin2_key, &ctx.app_id, &identity)));
            record["pin2Auth"] = Value::String(b64.encode(pin2_auth(&pin2_key, pin)));
            record["pin2Box"] =
                serde_json::to_value(&node.stash.pin2_box).map_err(|_| LoginError::Decrypt)?;
            record["pin2KeyBox"] =
                serde_json::to_value(&node.stash.pin2_key_box).map_err(|_| LoginError::Decrypt)?;
            record["pin2TextBox"] =
                serde_json::to_value(&node.stash.pin2_text_box).map_err(|_| LoginError::Decrypt)?;
            Ok(())
        };

        match (&mut app, &mut app_record) {
            (Some(node), Some(record)) => attach_pin(node, record)?,
            _ => attach_pin(&mut root, &mut root_record)?,
        }
    }

    if let Some(record) = app_record {
        root_record["children"] = Value::Array(vec![record]);
    }

    let body = json!({
        "clientId": b64.encode(&ctx.client_id),
        "data": root_record,
    });
    login_fetch(ctx.authority.as_ref(), "POST", "/v2/login/create", body).await?;

    // Network commit succeeded; now build and persist the local stash.
    let mut stash = root.stash;
    if let Some(app) = app {
        stash.children.push(app.stash);
    }
    stash.last_login = Some(Utc::now());
    ctx.store.save(&stash)?;

    tracing::info!(app_id = %ctx.app_id, "account created");
    make_login_tree(&stash, root.key, &ctx.app_id)
}

/// Check whether a username is free on the authority.
pub async fn username_available(ctx: &LoginContext, username: &str) -> LoginResult<bool> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let body = json!({ "userId": b64.encode(user_id(username)?) });
    let results = login_fetch(ctx.authority.as_ref(), "POST", "/v2/login", body).await?;
    Ok(!results
        .get("exists")
        .and_then(Value::as_bool)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_without_username_is_rejected_up_front() {
        // The builder guard runs before any network or key generation.
        let opts = AccountOptions {
            username: None,
            password: Some("hunter2".into()),
            pin: None,
        };
        assert!(opts.password.is_some() && opts.username.is_none());
    }

    #[test]
    fn new_nodes_get_distinct_ids_and_keys() {
        let a = new_node("").unwrap();
        let b = new_node("").unwrap();
        assert_ne!(a.stash.login_id, b.stash.login_id);
        assert_ne!(a.key, b.key);
        assert_ne!(a.login_auth, b.login_auth);
        assert!(a.stash.login_auth_box.is_some());
        assert!(a.stash.sync_key_box.is_some());
    }
}
