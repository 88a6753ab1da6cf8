//! The remote-authority protocol boundary.
//!
//! Everything the engine says to the server goes through one operation:
//! `login_fetch(method, path, body)`. The reply envelope is
//! `{ statusCode, results }`; status codes map onto the error taxonomy
//! here, in one place, so the factor modules never parse raw envelopes.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::{LoginError, LoginResult};
use crate::login::tree::{search_tree, LoginTree};
use crate::stash::types::LoginStash;

/// Reply status codes.
pub mod status {
    pub const OK: i64 = 0;
    pub const ERROR: i64 = 1;
    pub const ACCOUNT_EXISTS: i64 = 2;
    pub const NO_ACCOUNT: i64 = 3;
    pub const INVALID_FACTOR: i64 = 4;
    pub const OTP_REQUIRED: i64 = 5;
    pub const VOUCHER_PENDING: i64 = 6;
    pub const RECOVERY_MISMATCH: i64 = 7;
}

/// Transport to the remote authority. Implementations only move JSON;
/// protocol-level failures ride inside the reply envelope.
#[async_trait]
pub trait LoginAuthority: Send + Sync {
    async fn send(&self, method: &str, path: &str, body: Value) -> LoginResult<Value>;
}

/// Perform one authority round-trip and decode the reply envelope.
pub async fn login_fetch(
    authority: &dyn LoginAuthority,
    method: &str,
    path: &str,
    body: Value,
) -> LoginResult<Value> {
    let reply = authority.send(method, path, body).await?;
    decode_reply(reply)
}

/// Map a reply envelope to its results or the matching error.
pub fn decode_reply(reply: Value) -> LoginResult<Value> {
    let code = reply
        .get("statusCode")
        .and_then(Value::as_i64)
        .unwrap_or(status::ERROR);
    let results = reply.get("results").cloned().unwrap_or(Value::Null);

    match code {
        status::OK => Ok(results),
        status::NO_ACCOUNT => Err(LoginError::UserNotFound),
        status::INVALID_FACTOR => Err(LoginError::BadFactor),
        status::RECOVERY_MISMATCH => Err(LoginError::RecoveryAnswer),
        status::OTP_REQUIRED => Err(LoginError::Otp {
            reset_token: results
                .get("otpResetToken")
                .and_then(Value::as_str)
                .map(String::from),
            reset_date: results
                .get("otpResetDate")
                .and_then(Value::as_str)
                .and_then(|text| text.parse().ok()),
        }),
        status::VOUCHER_PENDING => Err(LoginError::VoucherPending {
            voucher_id: results
                .get("voucherId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            activates: results
                .get("voucherActivates")
                .and_then(Value::as_str)
                .and_then(|text| text.parse().ok())
                .unwrap_or_else(chrono::Utc::now),
        }),
        other => Err(LoginError::Server { code: other }),
    }
}

/// Build the authenticated request body for an already-unlocked login:
/// the active node's id and key-login proof, the device's client id, and
/// a one-time code when the node is OTP-protected.
pub fn auth_json(
    stash_tree: &LoginStash,
    login: &LoginTree,
    client_id: &[u8],
) -> LoginResult<Value> {
    auth_json_node(stash_tree, login.active(), client_id)
}

/// Same, but authenticating as a specific unlocked node. Factor changes
/// that live on the tree root use this even when the active node is a
/// sub-login.
pub fn auth_json_node(
    stash_tree: &LoginStash,
    node: &crate::login::tree::LoginNode,
    client_id: &[u8],
) -> LoginResult<Value> {
    let b64 = base64::engine::general_purpose::STANDARD;

    let login_auth = match &node.login_auth {
        Some(secret) => b64.encode(secret),
        // A node without a key-login proof cannot speak for itself.
        None => return Err(LoginError::BadFactor),
    };

    let mut body = json!({
        "loginId": b64.encode(&node.login_id),
        "loginAuth": login_auth,
        "clientId": b64.encode(client_id),
    });

    let stash_node = search_tree(stash_tree, |n| n.login_id == node.login_id);
    if let Some(otp_key) = stash_node.and_then(|n| n.otp_key.as_deref()) {
        body["otp"] = Value::String(crate::login::otp::totp_now(otp_key)?);
    }
    Ok(body)
}

/// HTTP client for the production authority.
pub struct AuthorityClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl AuthorityClient {
    pub fn new(base_url: &str, api_key: &str) -> LoginResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| LoginError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }
}

#[async_trait]
impl LoginAuthority for AuthorityClient {
    async fn send(&self, method: &str, path: &str, body: Value) -> LoginResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let request = match method {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "DELETE" => self.http.delete(&url),
            other => {
                return Err(LoginError::Network(format!("unsupported method {other}")));
            }
        };

        let response = request
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LoginError::Network(e.to_string()))?;

        let status = response.status();
        match response.json::<Value>().await {
            Ok(reply) => Ok(reply),
            // The authority wraps protocol errors in envelopes; a body
            // that isn't one means the transport itself failed.
            Err(_) if !status.is_success() => Err(LoginError::Server {
                code: i64::from(status.as_u16()),
            }),
            Err(e) => Err(LoginError::Network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reply_yields_results() {
        let reply = json!({ "statusCode": 0, "results": { "hello": 1 } });
        let results = decode_reply(reply).unwrap();
        assert_eq!(results["hello"], 1);
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        let cases = [
            (status::NO_ACCOUNT, "UserNotFound"),
            (status::INVALID_FACTOR, "BadFactor"),
            (status::RECOVERY_MISMATCH, "RecoveryAnswer"),
        ];
        for (code, name) in cases {
            let err = decode_reply(json!({ "statusCode": code })).unwrap_err();
            let debug = format!("{err:?}");
            assert!(debug.contains(name), "code {code} mapped to {debug}");
        }
    }

    #[test]
    fn otp_reply_carries_reset_token() {
        let reply = json!({
            "statusCode": status::OTP_REQUIRED,
            "results": { "otpResetToken": "reset-me" }
        });
        match decode_reply(reply).unwrap_err() {
            LoginError::Otp { reset_token, .. } => {
                assert_eq!(reset_token.as_deref(), Some("reset-me"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn voucher_reply_carries_voucher_id() {
        let reply = json!({
            "statusCode": status::VOUCHER_PENDING,
            "results": { "voucherId": "v-1", "voucherActivates": "2026-01-01T00:00:00Z" }
        });
        match decode_reply(reply).unwrap_err() {
            LoginError::VoucherPending { voucher_id, .. } => assert_eq!(voucher_id, "v-1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_status_code_is_a_server_error() {
        assert!(matches!(
            decode_reply(json!({})).unwrap_err(),
            LoginError::Server { code: 1 }
        ));
    }
}
