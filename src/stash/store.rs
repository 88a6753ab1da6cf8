//! On-disk stash storage.
//!
//! One JSON file per root stash, named from the base64url login id. Writes
//! go through write-temp-then-rename so a crash mid-write never leaves a
//! half-written stash, and are serialized per root id; reads take no lock
//! because the rename replaces files atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::types::LoginStash;
use crate::crypto::normalize_username;
use crate::error::{LoginError, LoginResult};
use crate::login::tree::search_tree;

/// Summary of one locally known account, for login screens.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub username: Option<String>,
    pub login_id: Vec<u8>,
    pub pin_login_enabled: bool,
    pub key_login_enabled: bool,
    pub recovery2_key: Option<Vec<u8>>,
    pub last_login: Option<DateTime<Utc>>,
}

/// File-backed store of root login stashes. Clones share the same lock
/// table, so per-root write serialization holds across clones.
#[derive(Clone)]
pub struct StashStore {
    dir: PathBuf,
    /// Per-root write locks, keyed by stash filename.
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl StashStore {
    /// Open (or create) the stash directory.
    pub fn new(dir: &Path) -> LoginResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn file_name(login_id: &[u8]) -> String {
        let id = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(login_id);
        format!("{id}.json")
    }

    fn write_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Persist a root stash atomically.
    pub fn save(&self, stash: &LoginStash) -> LoginResult<()> {
        if stash.login_id.is_empty() {
            return Err(LoginError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "stash has no loginId",
            )));
        }

        let name = Self::file_name(&stash.login_id);
        let lock = self.write_lock(&name);
        let _guard = lock.lock();

        let json = serde_json::to_vec_pretty(stash).map_err(|e| {
            LoginError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(file = %name, "login stash saved");
        Ok(())
    }

    /// Remove a root stash. Missing files are not an error.
    pub fn delete(&self, login_id: &[u8]) -> LoginResult<()> {
        let name = Self::file_name(login_id);
        let lock = self.write_lock(&name);
        let _guard = lock.lock();

        let path = self.dir.join(&name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Load every root stash on this device.
    pub fn load_all(&self) -> LoginResult<Vec<LoginStash>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match serde_json::from_slice::<LoginStash>(&bytes) {
                Ok(stash) => out.push(stash),
                // A corrupt file must not block the other accounts.
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable stash"),
            }
        }
        Ok(out)
    }

    pub fn load_by_login_id(&self, login_id: &[u8]) -> LoginResult<Option<LoginStash>> {
        let path = self.dir.join(Self::file_name(login_id));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|_| LoginError::Decrypt)
    }

    pub fn load_by_username(&self, username: &str) -> LoginResult<Option<LoginStash>> {
        let wanted = normalize_username(username);
        Ok(self
            .load_all()?
            .into_iter()
            .find(|stash| stash.username.as_deref() == Some(wanted.as_str())))
    }

    pub fn load_by_user_id(&self, user_id: &[u8]) -> LoginResult<Option<LoginStash>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|stash| stash.user_id.as_deref() == Some(user_id)))
    }

    /// Find the root stash whose PIN enrollment for `app_id` matches the
    /// given `pin2Id`. The id is recomputed from each stash's local
    /// `pin2Key`, since the id itself is never persisted.
    pub fn load_by_pin2_id(&self, pin2_id: &[u8], app_id: &str) -> LoginResult<Option<LoginStash>> {
        Ok(self.load_all()?.into_iter().find(|stash| {
            crate::login::pin2::stash_pin2_id(stash, app_id).as_deref() == Some(pin2_id)
        }))
    }

    /// Find the root stash whose recovery enrollment matches the given
    /// `recovery2Id`, recomputed from the local `recovery2Key`.
    pub fn load_by_recovery2_id(&self, recovery2_id: &[u8]) -> LoginResult<Option<LoginStash>> {
        Ok(self.load_all()?.into_iter().find(|stash| {
            let (Some(key), Some(username)) = (&stash.recovery2_key, &stash.username) else {
                return false;
            };
            crate::login::recovery2::recovery2_id(key, username).as_slice() == recovery2_id
        }))
    }

    /// Locally known accounts, summarized for the given application id.
    /// Scans root stashes only; children are namespaced per app, not
    /// globally indexed.
    pub fn list(&self, app_id: &str) -> LoginResult<Vec<UserInfo>> {
        let mut out = Vec::new();
        for stash in self.load_all()? {
            let app_node = search_tree(&stash, |node| node.app_id == app_id);
            let pin_login_enabled =
                search_tree(&stash, |node| node.app_id == app_id && node.pin2_key.is_some())
                    .is_some();

            out.push(UserInfo {
                username: stash.username.clone(),
                login_id: stash.login_id.clone(),
                pin_login_enabled,
                key_login_enabled: app_node.map(|n| n.key_login_enabled()).unwrap_or(false),
                recovery2_key: stash.recovery2_key.clone(),
                last_login: stash.last_login,
            });
        }
        out.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stash(login_id: u8, username: &str) -> LoginStash {
        let mut stash = LoginStash::new(vec![login_id; 32], "");
        stash.username = Some(username.into());
        stash
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        let original = stash(1, "alice");
        store.save(&original).unwrap();

        let loaded = store.load_by_login_id(&[1u8; 32]).unwrap().unwrap();
        assert_eq!(loaded, original);
        let by_name = store.load_by_username("Alice ").unwrap().unwrap();
        assert_eq!(by_name, original);
    }

    #[test]
    fn missing_stash_is_absent_not_error() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        assert!(store.load_by_login_id(&[9u8; 32]).unwrap().is_none());
        assert!(store.load_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn save_replaces_previous_contents() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        let mut original = stash(1, "alice");
        store.save(&original).unwrap();

        original.username = Some("alice2".into());
        store.save(&original).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].username.as_deref(), Some("alice2"));
    }

    #[test]
    fn delete_removes_only_the_target() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        store.save(&stash(1, "alice")).unwrap();
        store.save(&stash(2, "bob")).unwrap();

        store.delete(&[1u8; 32]).unwrap();
        store.delete(&[1u8; 32]).unwrap(); // second delete is a no-op

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].username.as_deref(), Some("bob"));
    }

    #[test]
    fn corrupt_file_does_not_block_listing() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        store.save(&stash(1, "alice")).unwrap();
        std::fs::write(tmp.path().join("broken.json"), b"not json").unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn list_reports_factor_availability() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        let mut with_pin = stash(1, "alice");
        with_pin.pin2_key = Some(vec![5u8; 32]);
        store.save(&with_pin).unwrap();
        store.save(&stash(2, "bob")).unwrap();

        let users = store.list("").unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[0].pin_login_enabled); // alice
        assert!(!users[1].pin_login_enabled); // bob
    }

    #[test]
    fn lookup_by_recomputed_factor_ids() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();

        let mut enrolled = stash(1, "alice");
        enrolled.pin2_key = Some(vec![5u8; 32]);
        enrolled.recovery2_key = Some(vec![6u8; 32]);
        store.save(&enrolled).unwrap();
        store.save(&stash(2, "bob")).unwrap();

        let pin2_id = crate::login::pin2::pin2_id(&[5u8; 32], "", b"alice");
        let found = store.load_by_pin2_id(&pin2_id, "").unwrap().unwrap();
        assert_eq!(found.username.as_deref(), Some("alice"));
        assert!(store.load_by_pin2_id(&[0u8; 32], "").unwrap().is_none());

        let recovery2_id = crate::login::recovery2::recovery2_id(&[6u8; 32], "alice");
        let found = store.load_by_recovery2_id(&recovery2_id).unwrap().unwrap();
        assert_eq!(found.username.as_deref(), Some("alice"));
        assert!(store.load_by_recovery2_id(&[0u8; 32]).unwrap().is_none());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = StashStore::new(tmp.path()).unwrap();
        store.save(&stash(1, "alice")).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
