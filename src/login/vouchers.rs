//! Device-approval vouchers.
//!
//! When an unrecognized device attempts key-based login, the authority
//! queues a voucher instead of rejecting outright. Decisions can only be
//! submitted from a device that already holds the login key; afterwards
//! the local voucher mirror is refreshed by merging the reply payload.

use serde_json::json;

use crate::context::LoginContext;
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{auth_json, login_fetch};
use crate::login::password::save_with_retry;
use crate::login::payload::{apply_login_payload, LoginPayload};
use crate::login::tree::LoginTree;
use crate::stash::types::LoginStash;

/// Approve and/or reject pending vouchers on the server.
pub async fn change_voucher_status(
    ctx: &LoginContext,
    stash_tree: &LoginStash,
    login: &LoginTree,
    approve: &[String],
    reject: &[String],
) -> LoginResult<LoginStash> {
    let mut body = auth_json(stash_tree, login, &ctx.client_id)?;
    body["data"] = json!({
        "approveVouchers": approve,
        "rejectVouchers": reject,
    });

    let results = login_fetch(ctx.authority.as_ref(), "POST", "/v2/login/vouchers", body).await?;
    let payload: LoginPayload =
        serde_json::from_value(results).map_err(|e| LoginError::Network(e.to_string()))?;

    let merged = apply_login_payload(stash_tree, &payload);
    save_with_retry(ctx, &merged)?;

    tracing::info!(
        approved = approve.len(),
        rejected = reject.len(),
        "voucher decisions submitted"
    );
    Ok(merged)
}
