//! Raw-key login.
//!
//! A caller that already holds a node's login key (from secure device
//! storage, a QR hand-off, or a backup) can unlock the cached stash with
//! no network at all. The authoritative refresh happens afterwards as a
//! detached task: the caller gets its tree immediately, and a sync
//! failure (including a pending device-approval voucher) arrives on the
//! context's event channel instead of failing the login.

use chrono::Utc;

use crate::context::{LoginContext, LoginEvent};
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{auth_json, login_fetch};
use crate::login::payload::{apply_login_payload, LoginPayload};
use crate::login::tree::{make_login_tree_keyed, LoginTree, SecretKey};

/// Log in with the app node's login key. Works fully offline.
pub async fn login_with_key(
    ctx: &LoginContext,
    username: &str,
    login_key: &SecretKey,
) -> LoginResult<LoginTree> {
    let stash = ctx
        .store
        .load_by_username(username)?
        .ok_or(LoginError::UserNotFound)?;

    let tree = make_login_tree_keyed(&stash, login_key.clone(), &ctx.app_id)?;

    let mut updated = stash.clone();
    updated.last_login = Some(Utc::now());
    ctx.store.save(&updated)?;

    spawn_background_sync(ctx, updated, login_key.clone());
    Ok(tree)
}

/// Fire-and-forget stash refresh after an offline login.
fn spawn_background_sync(ctx: &LoginContext, stash: crate::stash::types::LoginStash, key: SecretKey) {
    let authority = ctx.authority.clone();
    let store = ctx.store.clone();
    let events_tx = ctx.events_tx.clone();
    let client_id = ctx.client_id.clone();
    let app_id = ctx.app_id.clone();
    let login_id = stash.login_id.clone();

    tokio::spawn(async move {
        let result = async {
            let tree = make_login_tree_keyed(&stash, key, &app_id)?;
            let body = auth_json(&stash, &tree, &client_id)?;
            let results = login_fetch(authority.as_ref(), "POST", "/v2/login", body).await?;
            let payload: LoginPayload = serde_json::from_value(results)
                .map_err(|e| LoginError::Network(e.to_string()))?;

            let mut merged = apply_login_payload(&stash, &payload);
            tree.adopt_local_secrets(&mut merged);
            store.save(&merged)?;
            Ok::<(), LoginError>(())
        }
        .await;

        if let Err(error) = result {
            tracing::warn!(error = %error, "background stash sync failed");
            let _ = events_tx.send(LoginEvent::SyncFailed { login_id, error });
        }
    });
}
