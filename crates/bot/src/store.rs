//! Durable company password storage.
//!
//! The state file is a flat JSON object mapping the company id (as a string)
//! to its password. Writes go to a sibling temporary file which is synced and
//! renamed over the target, so a crash mid-write leaves the previous state
//! intact.

use serde::Deserialize;
use shared::CompanyId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;

/// All stored passwords, keyed by company
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    passwords: BTreeMap<CompanyId, String>,
}

/// Layouts accepted when reading the state file
#[derive(Deserialize)]
#[serde(untagged)]
enum StateFile {
    /// Written by older releases: `{"companies": {"3": "pw"}}`
    Wrapped {
        companies: BTreeMap<String, String>,
    },
    Flat(BTreeMap<String, String>),
}

impl PersistedState {
    /// Read the state file. A missing or blank file is an empty state.
    pub async fn load(path: &Path) -> Result<Self, StorageError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(StorageError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw = match serde_json::from_str::<StateFile>(&content) {
            Ok(StateFile::Wrapped { companies }) => companies,
            Ok(StateFile::Flat(map)) => map,
            Err(source) => {
                // Re-parse as a plain map for a more useful error message
                let source = serde_json::from_str::<BTreeMap<String, String>>(&content)
                    .err()
                    .unwrap_or(source);
                return Err(StorageError::Parse {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut passwords = BTreeMap::new();
        for (key, password) in raw {
            let id = key
                .trim()
                .parse::<u8>()
                .map_err(|_| StorageError::InvalidCompanyId {
                    path: path.to_path_buf(),
                    key: key.clone(),
                })?;
            passwords.insert(CompanyId(id), password);
        }

        Ok(Self { passwords })
    }

    /// Atomically replace the state file with this state
    pub async fn save(&self, path: &Path) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let on_disk: BTreeMap<String, &str> = self
            .passwords
            .iter()
            .map(|(id, password)| (id.to_string(), password.as_str()))
            .collect();
        let mut json = serde_json::to_string_pretty(&on_disk)?;
        json.push('\n');

        let tmp_path = temp_path(path);
        if let Err(e) = replace_file(&tmp_path, path, json.as_bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }
        Ok(())
    }

    pub fn get(&self, company_id: CompanyId) -> Option<&str> {
        self.passwords.get(&company_id).map(String::as_str)
    }

    pub fn insert(&mut self, company_id: CompanyId, password: String) -> Option<String> {
        self.passwords.insert(company_id, password)
    }

    pub fn remove(&mut self, company_id: CompanyId) -> Option<String> {
        self.passwords.remove(&company_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CompanyId, &str)> {
        self.passwords.iter().map(|(id, pw)| (*id, pw.as_str()))
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }
}

async fn replace_file(tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp_path, path).await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Password state bound to its file. Every mutation is persisted before it
/// returns.
#[derive(Debug)]
pub struct PasswordStore {
    path: PathBuf,
    state: PersistedState,
}

impl PasswordStore {
    /// Load the store, failing on an unreadable or corrupt file
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let state = PersistedState::load(&path).await?;
        Ok(Self { path, state })
    }

    /// Load the store, starting empty if the file cannot be used
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match PersistedState::load(&path).await {
            Ok(state) => {
                tracing::info!(
                    path = %path.display(),
                    companies = state.len(),
                    "Loaded password state"
                );
                Self { path, state }
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not load password state, starting empty");
                Self {
                    path,
                    state: PersistedState::default(),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, company_id: CompanyId) -> Option<&str> {
        self.state.get(company_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CompanyId, &str)> {
        self.state.iter()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Store a password and persist it. On failure the previous value is
    /// restored so nothing unsaved is treated as durable.
    pub async fn set(
        &mut self,
        company_id: CompanyId,
        password: String,
    ) -> Result<(), StorageError> {
        let previous = self.state.insert(company_id, password);
        if let Err(e) = self.state.save(&self.path).await {
            match previous {
                Some(old) => self.state.insert(company_id, old),
                None => self.state.remove(company_id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Forget a company's password. Returns whether one was stored.
    pub async fn clear(&mut self, company_id: CompanyId) -> Result<bool, StorageError> {
        let Some(previous) = self.state.remove(company_id) else {
            return Ok(false);
        };
        if let Err(e) = self.state.save(&self.path).await {
            self.state.insert(company_id, previous);
            return Err(e);
        }
        Ok(true)
    }
}
