//! Session context: the shared handles every login operation needs.
//!
//! One context per device process. It owns the authority transport, the
//! stash store, the persistent client id that identifies this device to
//! the authority, and the event channel background work reports on.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::crypto::encryption::random_bytes;
use crate::error::{LoginError, LoginResult};
use crate::login::authority::{AuthorityClient, LoginAuthority};
use crate::stash::StashStore;

/// Connection settings for a login context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginContextConfig {
    /// Authority base URL (e.g., https://auth.example.com).
    pub authority_url: String,
    /// API key sent with every authority request.
    pub api_key: String,
    /// Application namespace this context logs into.
    pub app_id: String,
    /// Human-readable description shown on approval screens.
    pub device_description: Option<String>,
    /// Directory holding the cached stash files.
    pub stash_dir: PathBuf,
}

/// Out-of-band outcomes from detached work.
#[derive(Debug)]
pub enum LoginEvent {
    /// A fire-and-forget stash sync failed. The login that spawned it
    /// already succeeded; this is advisory.
    SyncFailed {
        login_id: Vec<u8>,
        error: LoginError,
    },
}

/// Shared state for all login operations on this device.
pub struct LoginContext {
    pub app_id: String,
    pub device_description: Option<String>,
    pub(crate) client_id: Vec<u8>,
    pub(crate) authority: Arc<dyn LoginAuthority>,
    pub(crate) store: StashStore,
    pub(crate) events_tx: mpsc::UnboundedSender<LoginEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LoginEvent>>>,
}

impl LoginContext {
    /// Build a context talking to the production authority.
    pub fn new(config: LoginContextConfig) -> LoginResult<Self> {
        let authority = Arc::new(AuthorityClient::new(&config.authority_url, &config.api_key)?);
        Self::with_authority(config, authority)
    }

    /// Build a context over any authority transport. Tests inject the
    /// in-process fake through this.
    pub fn with_authority(
        config: LoginContextConfig,
        authority: Arc<dyn LoginAuthority>,
    ) -> LoginResult<Self> {
        let store = StashStore::new(&config.stash_dir)?;
        let client_id = load_client_id(&config.stash_dir)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            app_id: config.app_id,
            device_description: config.device_description,
            client_id,
            authority,
            store,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Take the event receiver. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LoginEvent>> {
        self.events_rx.lock().take()
    }

    /// Locally known accounts for this context's app id.
    pub fn local_users(&self) -> LoginResult<Vec<crate::stash::UserInfo>> {
        self.store.list(&self.app_id)
    }

    /// The stash store backing this context.
    pub fn store(&self) -> &StashStore {
        &self.store
    }
}

/// Load or create the persistent device client id.
fn load_client_id(stash_dir: &std::path::Path) -> LoginResult<Vec<u8>> {
    std::fs::create_dir_all(stash_dir)?;
    let path = stash_dir.join("client_id");
    if path.exists() {
        let text = std::fs::read_to_string(&path)?;
        return hex::decode(text.trim()).map_err(|_| {
            LoginError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "corrupt client_id file",
            ))
        });
    }

    let client_id = random_bytes(16);
    std::fs::write(&path, hex::encode(&client_id))?;
    tracing::info!("generated new device client id");
    Ok(client_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &std::path::Path) -> LoginContextConfig {
        LoginContextConfig {
            authority_url: "https://auth.example.com".into(),
            api_key: "test-key".into(),
            app_id: "co.example.app".into(),
            device_description: Some("unit test".into()),
            stash_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn client_id_persists_across_contexts() {
        let tmp = TempDir::new().unwrap();
        let first = LoginContext::new(config(tmp.path())).unwrap();
        let second = LoginContext::new(config(tmp.path())).unwrap();
        assert_eq!(first.client_id, second.client_id);
        assert_eq!(first.client_id.len(), 16);
    }

    #[test]
    fn different_directories_get_different_client_ids() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let first = LoginContext::new(config(a.path())).unwrap();
        let second = LoginContext::new(config(b.path())).unwrap();
        assert_ne!(first.client_id, second.client_id);
    }

    #[test]
    fn events_receiver_is_single_take() {
        let tmp = TempDir::new().unwrap();
        let ctx = LoginContext::new(config(tmp.path())).unwrap();
        assert!(ctx.take_events().is_some());
        assert!(ctx.take_events().is_none());
    }
}
