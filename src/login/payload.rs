//! Server login payloads and the stash merge.
//!
//! The authority is the source of truth for everything it stores: merging
//! a payload replaces the server-owned fields wholesale, so deletions
//! propagate. Local-only fields (`username`, `pin2_key`, `recovery2_key`)
//! always survive, and `lastLogin` only ever moves forward. Children merge
//! keyed by `loginId`; a payload whose `children` field is absent is a
//! targeted update and never prunes local children.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::LoginContext;
use crate::crypto::{EncryptedBox, Snrp};
use crate::error::LoginResult;
use crate::login::authority::{auth_json, login_fetch};
use crate::login::tree::{search_tree, LoginTree};
use crate::stash::types::{b64, b64_opt, LoginStash, Voucher};

/// One node of a server login reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginPayload {
    #[serde(with = "b64")]
    pub login_id: Vec<u8>,
    pub app_id: String,
    #[serde(with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_box: Option<EncryptedBox>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_auth_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_key_snrp: Option<Snrp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin2_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin2_key_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin2_text_box: Option<EncryptedBox>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub question2_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery2_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery2_key_box: Option<EncryptedBox>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_auth_box: Option<EncryptedBox>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_boxes: Vec<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_key_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_key_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_text_box: Option<EncryptedBox>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_reset_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_timeout: Option<u32>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_vouchers: Vec<Voucher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,

    /// `None` marks a targeted update; `Some` is a complete snapshot of
    /// this node's children and prunes whatever it omits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<LoginPayload>>,
}

/// Merge an authoritative payload into the cached stash tree.
///
/// The payload may describe the root or any node inside the tree; the
/// matching node is located by `loginId`. A payload that matches nothing
/// leaves the stash untouched. Idempotent.
pub fn apply_login_payload(stash_tree: &LoginStash, payload: &LoginPayload) -> LoginStash {
    if stash_tree.login_id.is_empty() {
        return stash_from_payload(payload);
    }
    if search_tree(stash_tree, |node| node.login_id == payload.login_id).is_none() {
        tracing::warn!("login payload matches no cached node; ignoring");
        return stash_tree.clone();
    }
    merge_at(stash_tree, payload)
}

fn merge_at(stash: &LoginStash, payload: &LoginPayload) -> LoginStash {
    if stash.login_id == payload.login_id {
        return merge_node(stash, payload);
    }
    let mut out = stash.clone();
    out.children = stash
        .children
        .iter()
        .map(|child| merge_at(child, payload))
        .collect();
    out
}

fn merge_node(local: &LoginStash, payload: &LoginPayload) -> LoginStash {
    let children = match &payload.children {
        // Targeted update: the server said nothing about children.
        None => local.children.clone(),
        // Complete snapshot: merge by loginId, prune what the server omits.
        Some(server_children) => server_children
            .iter()
            .map(|server_child| {
                match local
                    .children
                    .iter()
                    .find(|child| child.login_id == server_child.login_id)
                {
                    Some(local_child) => merge_node(local_child, server_child),
                    None => stash_from_payload(server_child),
                }
            })
            .collect(),
    };

    LoginStash {
        login_id: payload.login_id.clone(),
        username: local.username.clone(),
        app_id: payload.app_id.clone(),
        user_id: payload.user_id.clone(),
        parent_box: payload.parent_box.clone(),
        password_auth_box: payload.password_auth_box.clone(),
        password_box: payload.password_box.clone(),
        password_key_snrp: payload.password_key_snrp.clone(),
        pin2_key: local.pin2_key.clone(),
        pin2_box: payload.pin2_box.clone(),
        pin2_key_box: payload.pin2_key_box.clone(),
        pin2_text_box: payload.pin2_text_box.clone(),
        recovery2_key: local.recovery2_key.clone(),
        question2_box: payload.question2_box.clone(),
        recovery2_box: payload.recovery2_box.clone(),
        recovery2_key_box: payload.recovery2_key_box.clone(),
        login_auth_box: payload.login_auth_box.clone(),
        key_boxes: payload.key_boxes.clone(),
        mnemonic_box: payload.mnemonic_box.clone(),
        root_key_box: payload.root_key_box.clone(),
        sync_key_box: payload.sync_key_box.clone(),
        user_text_box: payload.user_text_box.clone(),
        otp_key: payload.otp_key.clone(),
        otp_reset_date: payload.otp_reset_date,
        otp_timeout: payload.otp_timeout,
        pending_vouchers: payload.pending_vouchers.clone(),
        last_login: match (local.last_login, payload.last_login) {
            (Some(ours), Some(theirs)) => Some(ours.max(theirs)),
            (ours, theirs) => ours.or(theirs),
        },
        children,
    }
}

/// Build a brand-new stash subtree from a payload (first login on a
/// device, or a child the server knows and we don't).
pub fn stash_from_payload(payload: &LoginPayload) -> LoginStash {
    let empty = LoginStash::new(payload.login_id.clone(), payload.app_id.clone());
    merge_node(&empty, payload)
}

/// Project a stash tree into payload form: the server-owned fields only,
/// with children as a complete snapshot. This is what an approving device
/// hands to an edge-login peer.
pub fn payload_from_stash(stash: &LoginStash) -> LoginPayload {
    LoginPayload {
        login_id: stash.login_id.clone(),
        app_id: stash.app_id.clone(),
        user_id: stash.user_id.clone(),
        parent_box: stash.parent_box.clone(),
        password_auth_box: stash.password_auth_box.clone(),
        password_box: stash.password_box.clone(),
        password_key_snrp: stash.password_key_snrp.clone(),
        pin2_box: stash.pin2_box.clone(),
        pin2_key_box: stash.pin2_key_box.clone(),
        pin2_text_box: stash.pin2_text_box.clone(),
        question2_box: stash.question2_box.clone(),
        recovery2_box: stash.recovery2_box.clone(),
        recovery2_key_box: stash.recovery2_key_box.clone(),
        login_auth_box: stash.login_auth_box.clone(),
        key_boxes: stash.key_boxes.clone(),
        mnemonic_box: stash.mnemonic_box.clone(),
        root_key_box: stash.root_key_box.clone(),
        sync_key_box: stash.sync_key_box.clone(),
        user_text_box: stash.user_text_box.clone(),
        otp_key: stash.otp_key.clone(),
        otp_reset_date: stash.otp_reset_date,
        otp_timeout: stash.otp_timeout,
        pending_vouchers: stash.pending_vouchers.clone(),
        last_login: stash.last_login,
        children: Some(stash.children.iter().map(payload_from_stash).collect()),
    }
}

/// Fetch the authoritative payload for an unlocked login, merge it into
/// the cached stash, and persist the result. Idempotent.
pub async fn sync_login(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
) -> LoginResult<LoginStash> {
    let body = auth_json(stash_tree, login, &ctx.client_id)?;
    let results = login_fetch(ctx.authority.as_ref(), "POST", "/v2/login", body).await?;
    let payload: LoginPayload = serde_json::from_value(results)
        .map_err(|e| crate::error::LoginError::Network(e.to_string()))?;

    let merged = apply_login_payload(stash_tree, &payload);
    ctx.store.save(&merged)?;
    Ok(merged)
}
