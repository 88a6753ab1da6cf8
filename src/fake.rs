//! In-process fake authority for tests and demos.
//!
//! Speaks the complete wire protocol (account creation, every login
//! variant, factor setup and removal, OTP enforcement, voucher decisions,
//! and the edge-login lobby) against an in-memory database, so the whole
//! engine can be exercised with no network. Several contexts may share
//! one instance to play the roles of different devices.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::{EncryptedBox, Snrp};
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{status, LoginAuthority};
use crate::login::edge::{lobby_shared_key, EdgeLoginReply};
use crate::login::otp::totp_check;
use crate::login::payload::LoginPayload;
use crate::stash::types::{Voucher, VoucherStatus};

fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn decode_field(body: &Value, field: &str) -> Option<Vec<u8>> {
    body.get(field)
        .and_then(Value::as_str)
        .and_then(|text| b64().decode(text).ok())
}

fn box_field(body: &Value, field: &str) -> Option<EncryptedBox> {
    serde_json::from_value(body.get(field)?.clone()).ok()
}

/// One server-side login row. Mirrors the payload fields and adds the
/// verification secrets the client never gets back.
#[derive(Debug, Clone, Default)]
struct LoginRow {
    login_id: Vec<u8>,
    app_id: String,
    user_id: Option<Vec<u8>>,
    login_auth: Vec<u8>,
    password_auth: Option<Vec<u8>>,
    pin2_id: Option<Vec<u8>>,
    pin2_auth: Option<Vec<u8>>,
    recovery2_id: Option<Vec<u8>>,
    recovery2_auth: Option<Vec<String>>,
    otp_key: Option<String>,
    otp_timeout: Option<u32>,

    parent_box: Option<EncryptedBox>,
    password_box: Option<EncryptedBox>,
    password_key_snrp: Option<Snrp>,
    password_auth_box: Option<EncryptedBox>,
    pin2_box: Option<EncryptedBox>,
    pin2_key_box: Option<EncryptedBox>,
    pin2_text_box: Option<EncryptedBox>,
    question2_box: Option<EncryptedBox>,
    recovery2_box: Option<EncryptedBox>,
    recovery2_key_box: Option<EncryptedBox>,
    login_auth_box: Option<EncryptedBox>,
    sync_key_box: Option<EncryptedBox>,

    vouchers: Vec<Voucher>,
    voucher_clients: HashMap<String, Vec<u8>>,
    approved_clients: HashSet<Vec<u8>>,
    last_login: Option<chrono::DateTime<Utc>>,
    children: Vec<LoginRow>,
}

impl LoginRow {
    fn from_record(record: &Value) -> LoginResult<Self> {
        let mut row = LoginRow {
            login_id: decode_field(record, "loginId").ok_or(LoginError::Server { code: 1 })?,
            app_id: record
                .get("appId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            user_id: decode_field(record, "userId"),
            login_auth: decode_field(record, "loginAuth").ok_or(LoginError::Server { code: 1 })?,
            password_auth: decode_field(record, "passwordAuth"),
            pin2_id: decode_field(record, "pin2Id"),
            pin2_auth: decode_field(record, "pin2Auth"),
            recovery2_id: decode_field(record, "recovery2Id"),
            recovery2_auth: None,
            parent_box: box_field(record, "parentBox"),
            password_box: box_field(record, "passwordBox"),
            password_key_snrp: record
                .get("passwordKeySnrp")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            password_auth_box: box_field(record, "passwordAuthBox"),
            pin2_box: box_field(record, "pin2Box"),
            pin2_key_box: box_field(record, "pin2KeyBox"),
            pin2_text_box: box_field(record, "pin2TextBox"),
            question2_box: box_field(record, "question2Box"),
            recovery2_box: box_field(record, "recovery2Box"),
            recovery2_key_box: box_field(record, "recovery2KeyBox"),
            login_auth_box: box_field(record, "loginAuthBox"),
            sync_key_box: box_field(record, "syncKeyBox"),
            ..Default::default()
        };

        if let Some(children) = record.get("children").and_then(Value::as_array) {
            for child in children {
                row.children.push(LoginRow::from_record(child)?);
            }
        }
        Ok(row)
    }

    /// The payload the client sees: boxes yes, secrets no. Children are
    /// always a complete snapshot.
    fn to_payload(&self) -> LoginPayload {
        LoginPayload {
            login_id: self.login_id.clone(),
            app_id: self.app_id.clone(),
            user_id: self.user_id.clone(),
            parent_box: self.parent_box.clone(),
            password_auth_box: self.password_auth_box.clone(),
            password_box: self.password_box.clone(),
            password_key_snrp: self.password_key_snrp.clone(),
            pin2_box: self.pin2_box.clone(),
            pin2_key_box: self.pin2_key_box.clone(),
            pin2_text_box: self.pin2_text_box.clone(),
            question2_box: self.question2_box.clone(),
            recovery2_box: self.recovery2_box.clone(),
            recovery2_key_box: self.recovery2_key_box.clone(),
            login_auth_box: self.login_auth_box.clone(),
            sync_key_box: self.sync_key_box.clone(),
            otp_key: self.otp_key.clone(),
            otp_timeout: self.otp_timeout,
            pending_vouchers: self.vouchers.clone(),
            last_login: self.last_login,
            children: Some(self.children.iter().map(LoginRow::to_payload).collect()),
            ..Default::default()
        }
    }

}

#[derive(Default)]
struct LobbyRow {
    public_key: [u8; 32],
    login_request: Value,
    reply: Option<Value>,
    rejected: bool,
}

#[derive(Default)]
struct FakeDb {
    logins: Vec<LoginRow>,
    lobbies: HashMap<String, LobbyRow>,
}

/// The fake authority.
#[derive(Default)]
pub struct FakeAuthority {
    db: Mutex<FakeDb>,
    offline: AtomicBool,
}

fn envelope(code: i64, results: Value) -> Value {
    json!({ "statusCode": code, "results": results })
}

fn ok(results: Value) -> Value {
    envelope(status::OK, results)
}

impl FakeAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate losing the network. Every request fails with
    /// `LoginError::Network` until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Approve a pending edge login: seal `payload` and the app node's
    /// login key to the lobby's ephemeral public key, the way a real
    /// logged-in device would.
    pub fn approve_lobby(
        &self,
        lobby_id: &str,
        username: Option<&str>,
        payload: LoginPayload,
        login_key: &[u8; 32],
    ) -> LoginResult<()> {
        let mut db = self.db.lock();
        let lobby = db
            .lobbies
            .get_mut(lobby_id)
            .ok_or(LoginError::Server { code: 1 })?;

        let reply = EdgeLoginReply {
            username: username.map(String::from),
            login_key: b64().encode(login_key),
            payload,
        };
        let plain = serde_json::to_vec(&reply).map_err(|_| LoginError::Decrypt)?;

        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let shared = secret.diffie_hellman(&PublicKey::from(lobby.public_key));
        let key = lobby_shared_key(shared.as_bytes(), lobby_id);
        let sealed = EncryptedBox::encrypt(&plain, &key)?;

        lobby.reply = Some(json!({
            "status": "approved",
            "replyPublicKey": b64().encode(PublicKey::from(&secret).as_bytes()),
            "replyBox": sealed,
        }));
        Ok(())
    }

    /// The login-request descriptor published with a lobby, as an
    /// approving device would display it before deciding.
    pub fn lobby_request(&self, lobby_id: &str) -> Option<Value> {
        let db = self.db.lock();
        db.lobbies
            .get(lobby_id)
            .map(|lobby| lobby.login_request.clone())
    }

    /// Reject a pending edge login.
    pub fn reject_lobby(&self, lobby_id: &str) -> LoginResult<()> {
        let mut db = self.db.lock();
        let lobby = db
            .lobbies
            .get_mut(lobby_id)
            .ok_or(LoginError::Server { code: 1 })?;
        lobby.rejected = true;
        Ok(())
    }

    /// Wipe one account's approved-device list, as if every device but
    /// the account's passwords had been forgotten.
    pub fn forget_devices(&self, user_id: &[u8]) {
        let mut db = self.db.lock();
        if let Some(row) = db
            .logins
            .iter_mut()
            .find(|row| row.user_id.as_deref() == Some(user_id))
        {
            row.approved_clients.clear();
        }
    }

    // ── Request handlers ─────────────────────────────────────────

    fn handle_create(&self, body: &Value) -> LoginResult<Value> {
        let record = body.get("data").ok_or(LoginError::Server { code: 1 })?;
        let row = LoginRow::from_record(record)?;

        let mut db = self.db.lock();
        let duplicate = db.logins.iter().any(|existing| {
            existing.login_id == row.login_id
                || (row.user_id.is_some() && existing.user_id == row.user_id)
        });
        if duplicate {
            return Ok(envelope(status::ACCOUNT_EXISTS, Value::Null));
        }

        let mut row = row;
        if let Some(client_id) = decode_field(body, "clientId") {
            mark_approved(&mut row, &client_id);
        }
        db.logins.push(row);
        Ok(ok(Value::Null))
    }

    fn handle_login(&self, body: &Value) -> LoginResult<Value> {
        let mut db = self.db.lock();
        let client_id = decode_field(body, "clientId");

        // Username availability probe: a bare userId.
        if body.get("passwordAuth").is_none()
            && body.get("pin2Id").is_none()
            && body.get("recovery2Id").is_none()
            && body.get("loginId").is_none()
        {
            let Some(user_id) = decode_field(body, "userId") else {
                return Ok(envelope(status::ERROR, Value::Null));
            };
            let exists = db
                .logins
                .iter()
                .any(|row| row.user_id.as_deref() == Some(user_id.as_slice()));
            return Ok(ok(json!({ "exists": exists })));
        }

        // Password login.
        if let Some(password_auth) = decode_field(body, "passwordAuth") {
            let user_id = decode_field(body, "userId").unwrap_or_default();
            let Some(root) = db
                .logins
                .iter_mut()
                .find(|row| row.user_id.as_deref() == Some(user_id.as_slice()))
            else {
                return Ok(envelope(status::NO_ACCOUNT, Value::Null));
            };
            if let Some(reply) = check_otp(root, body) {
                return Ok(reply);
            }
            if root.password_auth.as_deref() != Some(password_auth.as_slice()) {
                return Ok(envelope(status::INVALID_FACTOR, Value::Null));
            }
            if let Some(client_id) = &client_id {
                mark_approved(root, client_id);
            }
            root.last_login = Some(Utc::now());
            return Ok(ok(payload_value(root)));
        }

        // PIN login.
        if let Some(pin2_id) = decode_field(body, "pin2Id") {
            let Some(node) = find_node_mut(&mut db.logins, &|row| {
                row.pin2_id.as_deref() == Some(pin2_id.as_slice())
            }) else {
                return Ok(envelope(status::NO_ACCOUNT, Value::Null));
            };
            if let Some(reply) = check_otp(node, body) {
                return Ok(reply);
            }
            let pin2_auth = decode_field(body, "pin2Auth").unwrap_or_default();
            if node.pin2_auth.as_deref() != Some(pin2_auth.as_slice()) {
                return Ok(envelope(status::INVALID_FACTOR, Value::Null));
            }
            if let Some(client_id) = &client_id {
                mark_approved(node, client_id);
            }
            node.last_login = Some(Utc::now());
            return Ok(ok(payload_value(node)));
        }

        // Recovery: question fetch, then answer check.
        if let Some(recovery2_id) = decode_field(body, "recovery2Id") {
            let Some(node) = find_node_mut(&mut db.logins, &|row| {
                row.recovery2_id.as_deref() == Some(recovery2_id.as_slice())
            }) else {
                return Ok(envelope(status::NO_ACCOUNT, Value::Null));
            };

            let Some(submitted) = body.get("recovery2Auth").and_then(Value::as_array) else {
                // No answers: hand out the (sealed) questions only.
                return Ok(ok(json!({ "question2Box": node.question2_box })));
            };
            if let Some(reply) = check_otp(node, body) {
                return Ok(reply);
            }

            let submitted: Vec<String> = submitted
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            if node.recovery2_auth.as_ref() != Some(&submitted) {
                return Ok(envelope(status::RECOVERY_MISMATCH, Value::Null));
            }
            if let Some(client_id) = &client_id {
                mark_approved(node, client_id);
            }
            node.last_login = Some(Utc::now());
            return Ok(ok(payload_value(node)));
        }

        // Key login.
        if let Some(login_id) = decode_field(body, "loginId") {
            let Some(node) = find_node_mut(&mut db.logins, &|row| row.login_id == login_id)
            else {
                return Ok(envelope(status::NO_ACCOUNT, Value::Null));
            };
            if let Some(reply) = check_otp(node, body) {
                return Ok(reply);
            }
            let login_auth = decode_field(body, "loginAuth").unwrap_or_default();
            if node.login_auth != login_auth {
                return Ok(envelope(status::INVALID_FACTOR, Value::Null));
            }

            // Unknown devices queue behind a voucher instead of failing.
            let Some(client_id) = client_id else {
                return Ok(envelope(status::INVALID_FACTOR, Value::Null));
            };
            if !node.approved_clients.contains(&client_id) {
                let voucher = issue_voucher(node, &client_id, body);
                return Ok(envelope(
                    status::VOUCHER_PENDING,
                    json!({
                        "voucherId": voucher.voucher_id,
                        "voucherActivates": voucher.activates.to_rfc3339(),
                    }),
                ));
            }

            // Key logins don't bump lastLogin server-side; the device
            // already stamps its own stash, and keeping the reply stable
            // keeps sync idempotent.
            return Ok(ok(payload_value(node)));
        }

        Ok(envelope(status::ERROR, Value::Null))
    }

    /// Authenticate a factor-change request and return the target row.
    fn authed_row<'a>(
        db: &'a mut FakeDb,
        body: &Value,
    ) -> Result<&'a mut LoginRow, Value> {
        let login_id = decode_field(body, "loginId").unwrap_or_default();
        let login_auth = decode_field(body, "loginAuth").unwrap_or_default();

        let Some(node) = find_node_mut(&mut db.logins, &|row| row.login_id == login_id) else {
            return Err(envelope(status::NO_ACCOUNT, Value::Null));
        };
        if let Some(reply) = check_otp(node, body) {
            return Err(reply);
        }
        if node.login_auth != login_auth {
            return Err(envelope(status::INVALID_FACTOR, Value::Null));
        }
        Ok(node)
    }

    fn handle_password_change(&self, body: &Value, delete: bool) -> LoginResult<Value> {
        let mut db = self.db.lock();
        let node = match Self::authed_row(&mut db, body) {
            Ok(node) => node,
            Err(reply) => return Ok(reply),
        };

        if delete {
            node.password_auth = None;
            node.password_box = None;
            node.password_key_snrp = None;
            node.password_auth_box = None;
        } else {
            let data = body.get("data").cloned().unwrap_or_default();
            node.password_auth = decode_field(&data, "passwordAuth");
            node.password_box = box_field(&data, "passwordBox");
            node.password_key_snrp = data
                .get("passwordKeySnrp")
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            node.password_auth_box = box_field(&data, "passwordAuthBox");
        }
        Ok(ok(payload_value(node)))
    }

    fn handle_pin2_change(&self, body: &Value, delete: bool) -> LoginResult<Value> {
        let mut db = self.db.lock();
        let node = match Self::authed_row(&mut db, body) {
            Ok(node) => node,
            Err(reply) => return Ok(reply),
        };

        if delete {
            node.pin2_id = None;
            node.pin2_auth = None;
            node.pin2_box = None;
            node.pin2_key_box = None;
            node.pin2_text_box = None;
        } else {
            // The data block replaces the whole pin2 group: a text-box-only
            // update means PIN login is being switched off.
            let data = body.get("data").cloned().unwrap_or_default();
            node.pin2_id = decode_field(&data, "pin2Id");
            node.pin2_auth = decode_field(&data, "pin2Auth");
            node.pin2_box = box_field(&data, "pin2Box");
            node.pin2_key_box = box_field(&data, "pin2KeyBox");
            node.pin2_text_box = box_field(&data, "pin2TextBox");
        }
        Ok(ok(payload_value(node)))
    }

    fn handle_recovery2_change(&self, body: &Value, delete: bool) -> LoginResult<Value> {
        let mut db = self.db.lock();
        let node = match Self::authed_row(&mut db, body) {
            Ok(node) => node,
            Err(reply) => return Ok(reply),
        };

        if delete {
            node.recovery2_id = None;
            node.recovery2_auth = None;
            node.question2_box = None;
            node.recovery2_box = None;
            node.recovery2_key_box = None;
        } else {
            let data = body.get("data").cloned().unwrap_or_default();
            node.recovery2_id = decode_field(&data, "recovery2Id");
            node.recovery2_auth = data.get("recovery2Auth").and_then(Value::as_array).map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            });
            node.question2_box = box_field(&data, "question2Box");
            node.recovery2_box = box_field(&data, "recovery2Box");
            node.recovery2_key_box = box_field(&data, "recovery2KeyBox");
        }
        Ok(ok(payload_value(node)))
    }

    fn handle_otp_change(&self, body: &Value, delete: bool) -> LoginResult<Value> {
        let mut db = self.db.lock();
        let node = match Self::authed_row(&mut db, body) {
            Ok(node) => node,
            Err(reply) => return Ok(reply),
        };

        if delete {
            node.otp_key = None;
            node.otp_timeout = None;
        } else {
            let data = body.get("data").cloned().unwrap_or_default();
            node.otp_key = data
                .get("otpKey")
                .and_then(Value::as_str)
                .map(String::from);
            node.otp_timeout = data
                .get("otpTimeout")
                .and_then(Value::as_u64)
                .map(|v| v as u32);
        }
        Ok(ok(payload_value(node)))
    }

    fn handle_vouchers(&self, body: &Value) -> LoginResult<Value> {
        let mut db = self.db.lock();
        let node = match Self::authed_row(&mut db, body) {
            Ok(node) => node,
            Err(reply) => return Ok(reply),
        };

        let data = body.get("data").cloned().unwrap_or_default();
        let listed = |field: &str| -> Vec<String> {
            data.get(field)
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };

        for voucher_id in listed("approveVouchers") {
            if let Some(client) = node.voucher_clients.remove(&voucher_id) {
                node.approved_clients.insert(client);
            }
            node.vouchers.retain(|v| v.voucher_id != voucher_id);
        }
        for voucher_id in listed("rejectVouchers") {
            node.voucher_clients.remove(&voucher_id);
            node.vouchers.retain(|v| v.voucher_id != voucher_id);
        }
        Ok(ok(payload_value(node)))
    }

    fn handle_lobby_create(&self, body: &Value) -> LoginResult<Value> {
        let lobby_id = body
            .get("lobbyId")
            .and_then(Value::as_str)
            .ok_or(LoginError::Server { code: 1 })?
            .to_string();
        let public_key: [u8; 32] = decode_field(body, "publicKey")
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .ok_or(LoginError::Server { code: 1 })?;

        let mut db = self.db.lock();
        db.lobbies.insert(
            lobby_id,
            LobbyRow {
                public_key,
                login_request: body.get("loginRequest").cloned().unwrap_or_default(),
                reply: None,
                rejected: false,
            },
        );
        Ok(ok(Value::Null))
    }

    fn handle_lobby_poll(&self, lobby_id: &str) -> LoginResult<Value> {
        let db = self.db.lock();
        let Some(lobby) = db.lobbies.get(lobby_id) else {
            return Ok(envelope(status::ERROR, Value::Null));
        };
        if lobby.rejected {
            return Ok(ok(json!({ "status": "rejected" })));
        }
        match &lobby.reply {
            Some(reply) => Ok(ok(reply.clone())),
            None => Ok(ok(json!({ "status": "pending" }))),
        }
    }
}

/// Mark a client approved on a row and every row beneath it.
fn mark_approved(row: &mut LoginRow, client_id: &[u8]) {
    row.approved_clients.insert(client_id.to_vec());
    for child in &mut row.children {
        mark_approved(child, client_id);
    }
}

fn payload_value(row: &LoginRow) -> Value {
    serde_json::to_value(row.to_payload()).unwrap_or(Value::Null)
}

fn find_node_mut<'a>(
    logins: &'a mut [LoginRow],
    pred: &dyn Fn(&LoginRow) -> bool,
) -> Option<&'a mut LoginRow> {
    fn walk<'a>(row: &'a mut LoginRow, pred: &dyn Fn(&LoginRow) -> bool) -> Option<&'a mut LoginRow> {
        if pred(row) {
            return Some(row);
        }
        row.children.iter_mut().find_map(|child| walk(child, pred))
    }
    logins.iter_mut().find_map(|row| walk(row, pred))
}

/// OTP gate: `Some(reply)` means the request must bounce.
fn check_otp(row: &LoginRow, body: &Value) -> Option<Value> {
    let otp_key = row.otp_key.as_deref()?;
    let submitted = body.get("otp").and_then(Value::as_str).unwrap_or_default();
    let valid = totp_check(otp_key, submitted).unwrap_or(false);
    if valid {
        return None;
    }
    Some(envelope(
        status::OTP_REQUIRED,
        json!({
            "otpResetToken": format!("reset-{}", uuid::Uuid::new_v4()),
            "otpResetDate": (Utc::now() + Duration::days(7)).to_rfc3339(),
        }),
    ))
}

fn issue_voucher(row: &mut LoginRow, client_id: &[u8], body: &Value) -> Voucher {
    // One voucher per asking device.
    if let Some(existing) = row
        .voucher_clients
        .iter()
        .find(|(_, client)| client.as_slice() == client_id)
        .map(|(id, _)| id.clone())
    {
        if let Some(voucher) = row.vouchers.iter().find(|v| v.voucher_id == existing) {
            return voucher.clone();
        }
    }

    let voucher = Voucher {
        voucher_id: format!("voucher-{}", uuid::Uuid::new_v4()),
        status: VoucherStatus::Pending,
        activates: Utc::now() + Duration::days(7),
        created: Utc::now(),
        device_description: body
            .get("deviceDescription")
            .and_then(Value::as_str)
            .map(String::from),
        ip: Some("127.0.0.1".into()),
        ip_description: Some("localhost".into()),
    };
    row.voucher_clients
        .insert(voucher.voucher_id.clone(), client_id.to_vec());
    row.vouchers.push(voucher.clone());
    voucher
}

#[async_trait]
impl LoginAuthority for FakeAuthority {
    async fn send(&self, method: &str, path: &str, body: Value) -> LoginResult<Value> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LoginError::Network("fake authority is offline".into()));
        }

        match (method, path) {
            ("POST", "/v2/login/create") => self.handle_create(&body),
            ("POST", "/v2/login") => self.handle_login(&body),
            ("PUT", "/v2/login/password") => self.handle_password_change(&body, false),
            ("DELETE", "/v2/login/password") => self.handle_password_change(&body, true),
            ("PUT", "/v2/login/pin2") => self.handle_pin2_change(&body, false),
            ("DELETE", "/v2/login/pin2") => self.handle_pin2_change(&body, true),
            ("PUT", "/v2/login/recovery2") => self.handle_recovery2_change(&body, false),
            ("DELETE", "/v2/login/recovery2") => self.handle_recovery2_change(&body, true),
            ("PUT", "/v2/login/otp") => self.handle_otp_change(&body, false),
            ("DELETE", "/v2/login/otp") => self.handle_otp_change(&body, true),
            ("POST", "/v2/login/vouchers") => self.handle_vouchers(&body),
            ("POST", "/v2/lobby") => self.handle_lobby_create(&body),
            ("GET", path) if path.starts_with("/v2/lobby/") => {
                self.handle_lobby_poll(path.trim_start_matches("/v2/lobby/"))
            }
            _ => Ok(envelope(status::ERROR, Value::Null)),
        }
    }
}
