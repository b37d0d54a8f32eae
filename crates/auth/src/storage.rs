//! Credential persistence: a narrow key/value backend plus typed facades.
//!
//! Only this crate constructs [`TokenStore`] and [`PkceStore`]; everything
//! outside the session manager sees derived session state, never raw keys.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use tracing::warn;

use crate::types::StoredTokens;

pub(crate) const KEY_TOKEN: &str = "token";
pub(crate) const KEY_TOKEN_EXPIRATION: &str = "token_expiration";
pub(crate) const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub(crate) const KEY_CODE_VERIFIER: &str = "code_verifier";
pub(crate) const KEY_STATE: &str = "state";

/// Minimal string-map storage, the localStorage analog.
///
/// `set_many`/`remove_many` exist so multi-field records (token + expiry)
/// are committed in one write and can never be observed torn.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut map = self.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// JSON-file backend. Every mutation rewrites the whole map through a
/// temp-file-and-rename so a crash never leaves a partial record.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<config dir>/playlistwiz/credentials.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "playlistwiz", "playlistwiz")
            .context("could not determine a config directory")?;
        Ok(dirs.config_dir().join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("corrupt credential file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => {
                Err(e).with_context(|| format!("reading credential file {}", self.path.display()))
            },
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(map)?;
        std::fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut map = self.read_map()?;
        apply(&mut map);
        self.write_map(&map)
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|map| {
            map.remove(key);
        })
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        self.mutate(|map| {
            for (key, value) in entries {
                map.insert((*key).to_string(), value.clone());
            }
        })
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        self.mutate(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
    }
}

/// Typed facade over the durable token record.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// The stored record, or `None` when either the token or its expiry is
    /// missing. An unparseable expiry counts as missing.
    pub fn load(&self) -> Result<Option<StoredTokens>> {
        let Some(access_token) = self.backend.get(KEY_TOKEN)? else {
            return Ok(None);
        };
        let Some(raw_expiry) = self.backend.get(KEY_TOKEN_EXPIRATION)? else {
            return Ok(None);
        };
        let Ok(expires_at_ms) = raw_expiry.parse::<u64>() else {
            warn!(raw = %raw_expiry, "unparseable token expiration; treating as no session");
            return Ok(None);
        };
        Ok(Some(StoredTokens {
            access_token,
            refresh_token: self.backend.get(KEY_REFRESH_TOKEN)?,
            expires_at_ms,
        }))
    }

    /// Persist a full record from a code exchange, all fields in one write.
    pub fn save(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at_ms: u64,
    ) -> Result<()> {
        let mut entries = vec![
            (KEY_TOKEN, access_token.to_string()),
            (KEY_TOKEN_EXPIRATION, expires_at_ms.to_string()),
        ];
        if let Some(rt) = refresh_token {
            entries.push((KEY_REFRESH_TOKEN, rt.to_string()));
        }
        self.backend.set_many(&entries)
    }

    /// Overwrite token + expiry after a refresh. The refresh token is only
    /// rewritten when the provider rotated it.
    pub fn update_access(
        &self,
        access_token: &str,
        expires_at_ms: u64,
        rotated_refresh_token: Option<&str>,
    ) -> Result<()> {
        let mut entries = vec![
            (KEY_TOKEN, access_token.to_string()),
            (KEY_TOKEN_EXPIRATION, expires_at_ms.to_string()),
        ];
        if let Some(rt) = rotated_refresh_token {
            entries.push((KEY_REFRESH_TOKEN, rt.to_string()));
        }
        self.backend.set_many(&entries)
    }

    /// Remove the whole record. Idempotent.
    pub fn clear(&self) -> Result<()> {
        self.backend
            .remove_many(&[KEY_TOKEN, KEY_TOKEN_EXPIRATION, KEY_REFRESH_TOKEN])
    }
}

/// Typed facade over the ephemeral verifier/state pair.
#[derive(Clone)]
pub struct PkceStore {
    backend: Arc<dyn StorageBackend>,
}

impl PkceStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist the pair, overwriting any prior uncommitted attempt.
    pub fn store(&self, verifier: &str, state: &str) -> Result<()> {
        self.backend.set_many(&[
            (KEY_CODE_VERIFIER, verifier.to_string()),
            (KEY_STATE, state.to_string()),
        ])
    }

    pub fn retrieve(&self) -> Result<(Option<String>, Option<String>)> {
        Ok((
            self.backend.get(KEY_CODE_VERIFIER)?,
            self.backend.get(KEY_STATE)?,
        ))
    }

    /// Remove both values. Idempotent.
    pub fn clear(&self) -> Result<()> {
        self.backend.remove_many(&[KEY_CODE_VERIFIER, KEY_STATE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_round_trip() {
        let store = PkceStore::new(Arc::new(MemoryStorage::new()));
        store.store("verifier-1", "state-1").unwrap();
        let (verifier, state) = store.retrieve().unwrap();
        assert_eq!(verifier.as_deref(), Some("verifier-1"));
        assert_eq!(state.as_deref(), Some("state-1"));

        store.clear().unwrap();
        assert_eq!(store.retrieve().unwrap(), (None, None));
    }

    #[test]
    fn test_pkce_clear_is_idempotent() {
        let store = PkceStore::new(Arc::new(MemoryStorage::new()));
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.retrieve().unwrap(), (None, None));
    }

    #[test]
    fn test_pkce_store_overwrites_previous_attempt() {
        let store = PkceStore::new(Arc::new(MemoryStorage::new()));
        store.store("stale-verifier", "stale-state").unwrap();
        store.store("fresh-verifier", "fresh-state").unwrap();
        let (verifier, state) = store.retrieve().unwrap();
        assert_eq!(verifier.as_deref(), Some("fresh-verifier"));
        assert_eq!(state.as_deref(), Some("fresh-state"));
    }

    #[test]
    fn test_token_store_round_trip() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.load().unwrap().is_none());

        store.save("AT1", Some("RT1"), 1_234_567).unwrap();
        let tokens = store.load().unwrap().unwrap();
        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(tokens.expires_at_ms, 1_234_567);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_update_access_keeps_refresh_token() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));
        store.save("AT1", Some("RT1"), 1_000).unwrap();
        store.update_access("AT2", 2_000, None).unwrap();

        let tokens = store.load().unwrap().unwrap();
        assert_eq!(tokens.access_token, "AT2");
        assert_eq!(tokens.expires_at_ms, 2_000);
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
    }

    #[test]
    fn test_update_access_persists_rotated_refresh_token() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));
        store.save("AT1", Some("RT1"), 1_000).unwrap();
        store.update_access("AT2", 2_000, Some("RT2")).unwrap();
        let tokens = store.load().unwrap().unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT2"));
    }

    #[test]
    fn test_garbage_expiry_is_no_session() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set(KEY_TOKEN, "AT1").unwrap();
        backend.set(KEY_TOKEN_EXPIRATION, "not-a-number").unwrap();
        let store = TokenStore::new(backend);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("credentials.json"));
        storage
            .set_many(&[("token", "AT1".to_string()), ("state", "S1".to_string())])
            .unwrap();
        assert_eq!(storage.get("token").unwrap().as_deref(), Some("AT1"));

        storage.remove("token").unwrap();
        assert_eq!(storage.get("token").unwrap(), None);
        assert_eq!(storage.get("state").unwrap().as_deref(), Some("S1"));
        // No stray temp file left behind.
        assert!(!dir.path().join("credentials.json.tmp").exists());
    }

    #[test]
    fn test_file_storage_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nope.json"));
        assert_eq!(storage.get("token").unwrap(), None);
        storage.remove("token").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("credentials.json"));
        storage.set("token", "AT1").unwrap();
        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
