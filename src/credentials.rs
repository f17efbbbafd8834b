//! The persisted key/value store backing credential/endpoint resolution
//! (`spec.md` §4.5, §6.5). Modeled as a small capability trait rather than
//! reaching for browser storage directly, per Design Notes §9 ("inject a
//! small capability object... keep the core pure"); the default
//! implementation mirrors the teacher's `Profile` row in
//! `services/receiver/src/db.rs` (`server_url`/`token`, load-then-save) but
//! is JSON-file-backed since this SDK carries no embedded database
//! elsewhere in its own footprint.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("reading credential store at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing credential store at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential store at {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine a config directory for the default credential store")]
    NoConfigDir,
}

/// The two named persisted slots from `spec.md` §6.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    SandboxUrl,
    SessionToken,
}

/// A capability object for the two persisted credential slots. Implementors
/// need not be a file at all — a test double, a browser `localStorage`
/// shim behind an FFI boundary, or an in-memory map all satisfy this trait.
pub trait CredentialStore: Send + Sync {
    fn get(&self, slot: Slot) -> Option<String>;
    fn set(&self, slot: Slot, value: Option<String>);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    sandbox_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
}

/// Default [`CredentialStore`]: a JSON file under the user's config
/// directory, written on every `set` call.
pub struct JsonFileCredentialStore {
    path: PathBuf,
    state: Mutex<StoredCredentials>,
}

impl JsonFileCredentialStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self, CredentialStoreError> {
        let path = path.into();
        let state = Self::load(&path)?;
        Ok(JsonFileCredentialStore {
            path,
            state: Mutex::new(state),
        })
    }

    /// `dirs::config_dir()/sandbox-sdk/credentials.json`
    /// (Open Question decision #5 in `DESIGN.md`).
    pub fn default_location() -> Result<Self, CredentialStoreError> {
        let dir = dirs::config_dir().ok_or(CredentialStoreError::NoConfigDir)?;
        Self::at_path(dir.join("sandbox-sdk").join("credentials.json"))
    }

    fn load(path: &Path) -> Result<StoredCredentials, CredentialStoreError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| CredentialStoreError::Malformed {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredCredentials::default()),
            Err(source) => Err(CredentialStoreError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn persist(&self, state: &StoredCredentials) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        if let Err(e) = fs::create_dir_all(parent) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to create credential store directory");
            return;
        }
        let json = match serde_json::to_string_pretty(state) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize credential store");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, json) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write credential store");
            return;
        }
        set_owner_only_permissions(&self.path);
    }
}

impl CredentialStore for JsonFileCredentialStore {
    fn get(&self, slot: Slot) -> Option<String> {
        let state = self.state.lock().unwrap();
        match slot {
            Slot::SandboxUrl => state.sandbox_url.clone(),
            Slot::SessionToken => state.session_token.clone(),
        }
    }

    fn set(&self, slot: Slot, value: Option<String>) {
        let mut state = self.state.lock().unwrap();
        match slot {
            Slot::SandboxUrl => state.sandbox_url = value,
            Slot::SessionToken => state.session_token = value,
        }
        self.persist(&state);
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

/// An in-memory store, useful for tests and for callers that don't want any
/// filesystem persistence.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: Mutex<StoredCredentials>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, slot: Slot) -> Option<String> {
        let state = self.state.lock().unwrap();
        match slot {
            Slot::SandboxUrl => state.sandbox_url.clone(),
            Slot::SessionToken => state.session_token.clone(),
        }
    }

    fn set(&self, slot: Slot, value: Option<String>) {
        let mut state = self.state.lock().unwrap();
        match slot {
            Slot::SandboxUrl => state.sandbox_url = value,
            Slot::SessionToken => state.session_token = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_round_trips_both_slots() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(store.get(Slot::SandboxUrl), None);

        store.set(Slot::SandboxUrl, Some("https://abc.sandbox.example.com".to_owned()));
        store.set(Slot::SessionToken, Some("tok_123".to_owned()));

        assert_eq!(
            store.get(Slot::SandboxUrl),
            Some("https://abc.sandbox.example.com".to_owned())
        );
        assert_eq!(store.get(Slot::SessionToken), Some("tok_123".to_owned()));
    }

    #[test]
    fn json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        {
            let store = JsonFileCredentialStore::at_path(&path).unwrap();
            store.set(Slot::SessionToken, Some("tok_abc".to_owned()));
        }

        let reopened = JsonFileCredentialStore::at_path(&path).unwrap();
        assert_eq!(reopened.get(Slot::SessionToken), Some("tok_abc".to_owned()));
        assert_eq!(reopened.get(Slot::SandboxUrl), None);
    }

    #[test]
    fn missing_file_starts_empty_rather_than_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist-yet.json");

        let store = JsonFileCredentialStore::at_path(&path).unwrap();
        assert_eq!(store.get(Slot::SandboxUrl), None);
    }
}
