//! Edge login: QR / cross-device pairing through a polled lobby.
//!
//! The requesting device publishes an ephemeral X25519 public key under an
//! opaque lobby id, then polls until an already-logged-in device replies
//! with a login payload sealed to that key (X25519 ECDH → HKDF-SHA256 →
//! AES-256-GCM). Polling is jittered so a fleet of clients doesn't beat
//! on the authority in lockstep.
//!
//! The outcome is decided exactly once. A cancellation that loses the
//! race against local approval does not un-approve the login; a poll
//! reply that loses the race against cancellation is silently dropped.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use hkdf::Hkdf;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::context::LoginContext;
use crate::crypto::EncryptedBox;
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{login_fetch, LoginAuthority};
use crate::login::payload::{stash_from_payload, LoginPayload};
use crate::login::tree::{make_login_tree_keyed, LoginTree, SecretKey};
use crate::stash::StashStore;

const HKDF_INFO: &[u8] = b"loginstash:edge-login";

/// Polling knobs. The defaults suit interactive QR flows; tests shrink
/// them.
#[derive(Debug, Clone)]
pub struct EdgeLoginOptions {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for EdgeLoginOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// Terminal result of an edge-login attempt.
#[derive(Debug)]
pub enum EdgeLoginOutcome {
    Approved(LoginTree),
    Rejected,
    TimedOut,
    Canceled,
}

/// A pairing attempt in flight.
pub struct PendingEdgeLogin {
    /// Lobby id to render into the QR code / deep link.
    pub id: String,
    cancel_token: CancellationToken,
    outcome: Arc<Mutex<Option<EdgeLoginOutcome>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl PendingEdgeLogin {
    /// Stop polling and release the ephemeral keypair. If the attempt
    /// already reached a terminal state, this does nothing.
    pub fn cancel(&self) {
        set_once(&self.outcome, EdgeLoginOutcome::Canceled);
        self.cancel_token.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> EdgeLoginOutcome {
        let _ = self.handle.await;
        self.outcome
            .lock()
            .take()
            .unwrap_or(EdgeLoginOutcome::Canceled)
    }
}

/// Store `outcome` unless a terminal state already exists. Returns true
/// when this call decided the outcome.
fn set_once(slot: &Mutex<Option<EdgeLoginOutcome>>, outcome: EdgeLoginOutcome) -> bool {
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(outcome);
        true
    } else {
        false
    }
}

/// Derive the lobby's sealing key from the ECDH shared secret.
pub(crate) fn lobby_shared_key(shared: &[u8], lobby_id: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(lobby_id.as_bytes()), shared);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF output length");
    okm
}

/// What an approving device seals to the ephemeral key.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EdgeLoginReply {
    pub username: Option<String>,
    /// Base64 login key for the requested app node.
    pub login_key: String,
    pub payload: LoginPayload,
}

/// Start an edge-login attempt: create the lobby and begin polling.
pub async fn request_edge_login(
    ctx: &LoginContext,
    opts: EdgeLoginOptions,
) -> LoginResult<PendingEdgeLogin> {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    let b64 = base64::engine::general_purpose::STANDARD;

    let lobby_id = hex::encode(&Sha256::digest(public.as_bytes())[..10]);
    let body = json!({
        "lobbyId": lobby_id,
        "publicKey": b64.encode(public.as_bytes()),
        "loginRequest": {
            "appId": ctx.app_id,
            "deviceDescription": ctx.device_description,
        },
    });
    login_fetch(ctx.authority.as_ref(), "POST", "/v2/lobby", body).await?;
    tracing::info!(lobby_id = %lobby_id, "edge login lobby created");

    let cancel_token = CancellationToken::new();
    let outcome = Arc::new(Mutex::new(None));
    let handle = tokio::spawn(poll_lobby(PollTask {
        authority: ctx.authority.clone(),
        store: ctx.store.clone(),
        app_id: ctx.app_id.clone(),
        lobby_id: lobby_id.clone(),
        secret,
        opts,
        cancel_token: cancel_token.clone(),
        outcome: outcome.clone(),
    }));

    Ok(PendingEdgeLogin {
        id: lobby_id,
        cancel_token,
        outcome,
        handle,
    })
}

struct PollTask {
    authority: Arc<dyn LoginAuthority>,
    store: StashStore,
    app_id: String,
    lobby_id: String,
    secret: StaticSecret,
    opts: EdgeLoginOptions,
    cancel_token: CancellationToken,
    outcome: Arc<Mutex<Option<EdgeLoginOutcome>>>,
}

async fn poll_lobby(task: PollTask) {
    let deadline = tokio::time::Instant::now() + task.opts.max_wait;
    let path = format!("/v2/lobby/{}", task.lobby_id);

    loop {
        // Jitter each wait by ±25% so clients don't herd.
        let jittered = task
            .opts
            .poll_interval
            .mul_f64(rand::thread_rng().gen_range(0.75..1.25));

        tokio::select! {
            _ = task.cancel_token.cancelled() => {
                set_once(&task.outcome, EdgeLoginOutcome::Canceled);
                return;
            }
            _ = tokio::time::sleep(jittered) => {}
        }

        if tokio::time::Instant::now() >= deadline {
            set_once(&task.outcome, EdgeLoginOutcome::TimedOut);
            return;
        }

        let reply = login_fetch(task.authority.as_ref(), "GET", &path, json!({})).await;
        // A reply landing after cancellation is dropped, not processed.
        if task.cancel_token.is_cancelled() {
            set_once(&task.outcome, EdgeLoginOutcome::Canceled);
            return;
        }

        match reply {
            Ok(results) => match results.get("status").and_then(Value::as_str) {
                Some("approved") => {
                    match unseal_reply(&task, &results) {
                        Ok(tree) => {
                            set_once(&task.outcome, EdgeLoginOutcome::Approved(tree));
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "edge login reply failed to unseal");
                            set_once(&task.outcome, EdgeLoginOutcome::Rejected);
                        }
                    }
                    return;
                }
                Some("rejected") => {
                    set_once(&task.outcome, EdgeLoginOutcome::Rejected);
                    return;
                }
                _ => {} // still pending
            },
            Err(error) => {
                // Transient poll failures don't kill the attempt.
                tracing::debug!(error = %error, "lobby poll failed; retrying");
            }
        }
    }
}

/// Decrypt an approval reply, persist the received stash, and unlock it.
fn unseal_reply(task: &PollTask, results: &Value) -> LoginResult<LoginTree> {
    let b64 = base64::engine::general_purpose::STANDARD;

    let their_public: [u8; 32] = b64
        .decode(
            results
                .get("replyPublicKey")
                .and_then(Value::as_str)
                .ok_or(LoginError::Decrypt)?,
        )
        .map_err(|_| LoginError::Decrypt)?
        .as_slice()
        .try_into()
        .map_err(|_| LoginError::Decrypt)?;
    let sealed: EncryptedBox =
        serde_json::from_value(results.get("replyBox").cloned().ok_or(LoginError::Decrypt)?)
            .map_err(|_| LoginError::Decrypt)?;

    let shared = task.secret.diffie_hellman(&PublicKey::from(their_public));
    let key = lobby_shared_key(shared.as_bytes(), &task.lobby_id);
    let plain = sealed.decrypt(&key)?;
    let reply: EdgeLoginReply =
        serde_json::from_slice(&plain).map_err(|_| LoginError::Decrypt)?;

    let login_key: [u8; 32] = b64
        .decode(&reply.login_key)
        .map_err(|_| LoginError::Decrypt)?
        .as_slice()
        .try_into()
        .map_err(|_| LoginError::Decrypt)?;

    let mut stash = stash_from_payload(&reply.payload);
    stash.username = reply.username;
    stash.last_login = Some(Utc::now());
    task.store.save(&stash)?;

    make_login_tree_keyed(&stash, SecretKey::new(login_key), &task.app_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_key_matches_across_both_sides() {
        let ours = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let theirs = StaticSecret::random_from_rng(rand::rngs::OsRng);

        let our_key =
            lobby_shared_key(ours.diffie_hellman(&PublicKey::from(&theirs)).as_bytes(), "lobby-1");
        let their_key =
            lobby_shared_key(theirs.diffie_hellman(&PublicKey::from(&ours)).as_bytes(), "lobby-1");
        assert_eq!(our_key, their_key);
    }

    #[test]
    fn shared_key_binds_the_lobby_id() {
        let ours = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let theirs = PublicKey::from(&StaticSecret::random_from_rng(rand::rngs::OsRng));
        let shared = ours.diffie_hellman(&theirs);

        assert_ne!(
            lobby_shared_key(shared.as_bytes(), "lobby-1"),
            lobby_shared_key(shared.as_bytes(), "lobby-2")
        );
    }

    #[test]
    fn outcome_is_set_exactly_once() {
        let slot = Mutex::new(None);
        assert!(set_once(&slot, EdgeLoginOutcome::Rejected));
        assert!(!set_once(&slot, EdgeLoginOutcome::Canceled));
        assert!(matches!(*slot.lock(), Some(EdgeLoginOutcome::Rejected)));
    }
}
