//! Repository metadata records and their CRUD stores.
//!
//! A record carries the repository id and its reference tables. The store
//! digests every record it hands out; callers echo that digest back on
//! update so concurrent writers lose with `StaleVersion` instead of
//! clobbering each other.

use std::{fs, path::PathBuf, sync::Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{errors::GitError, repository::refs::RepositoryRefs};

/// A single repository's metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub refs: RepositoryRefs,
    /// Digest of the record as last fetched from the store, echoed back on
    /// update for compare-and-swap. Never serialized.
    #[serde(skip)]
    pub version: [u8; 32],
}

impl Repository {
    /// An empty repository: HEAD on `heads/master`, master at the null
    /// hash.
    pub fn new(id: &str) -> Repository {
        Repository {
            id: id.to_string(),
            refs: RepositoryRefs::default(),
            version: [0u8; 32],
        }
    }

    /// Digest of the serialized record, used as the store version.
    pub fn digest(&self) -> [u8; 32] {
        let json = serde_json::to_vec(self).expect("metadata records always serialize");
        Sha256::digest(&json).into()
    }
}

/// Repository metadata storage.
///
/// `update` applies compare-and-swap on the version obtained from a prior
/// `get`; a mismatch fails `StaleVersion` and leaves the store unchanged.
pub trait RepoStore: Send + Sync {
    /// Fetch a record; its `version` reflects the stored state.
    fn get_repo(&self, id: &str) -> Result<Repository, GitError>;

    /// Insert a new record; fails `AlreadyExists` on duplicates. Returns
    /// the record with its fresh version.
    fn create_repo(&self, repo: Repository) -> Result<Repository, GitError>;

    /// Replace an existing record; fails `RepoNotFound` or `StaleVersion`.
    /// Returns the record with its fresh version.
    fn update_repo(&self, repo: Repository) -> Result<Repository, GitError>;

    /// Remove a record; fails `RepoNotFound` when absent.
    fn remove_repo(&self, id: &str) -> Result<(), GitError>;
}

/// In-memory metadata store.
///
/// Reads go straight to the concurrent map and return a point-in-time
/// snapshot; writes serialize on one mutex.
#[derive(Default)]
pub struct MemRepoStore {
    records: DashMap<String, Repository>,
    write_lock: Mutex<()>,
}

impl MemRepoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RepoStore for MemRepoStore {
    fn get_repo(&self, id: &str) -> Result<Repository, GitError> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| GitError::RepoNotFound(id.to_string()))
    }

    fn create_repo(&self, mut repo: Repository) -> Result<Repository, GitError> {
        let _guard = self.write_lock.lock().expect("metadata write lock poisoned");
        if self.records.contains_key(&repo.id) {
            return Err(GitError::AlreadyExists(repo.id));
        }
        repo.version = repo.digest();
        self.records.insert(repo.id.clone(), repo.clone());
        Ok(repo)
    }

    fn update_repo(&self, mut repo: Repository) -> Result<Repository, GitError> {
        let _guard = self.write_lock.lock().expect("metadata write lock poisoned");
        let current = self
            .records
            .get(&repo.id)
            .map(|r| r.version)
            .ok_or_else(|| GitError::RepoNotFound(repo.id.clone()))?;
        if current != repo.version {
            return Err(GitError::StaleVersion(repo.id));
        }
        repo.version = repo.digest();
        self.records.insert(repo.id.clone(), repo.clone());
        Ok(repo)
    }

    fn remove_repo(&self, id: &str) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().expect("metadata write lock poisoned");
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GitError::RepoNotFound(id.to_string()))
    }
}

/// Filesystem metadata store.
///
/// Mirrors the in-memory behavior and additionally maintains, per repo, a
/// bare repository directory plus a JSON sidecar file next to it. On
/// restart the sidecars are the source of truth.
pub struct FsRepoStore {
    data_dir: PathBuf,
    records: DashMap<String, Repository>,
    write_lock: Mutex<()>,
}

impl FsRepoStore {
    pub fn new(data_dir: PathBuf) -> FsRepoStore {
        FsRepoStore {
            data_dir,
            records: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn repo_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(id)
    }

    fn sidecar_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    /// Lay out an empty bare repository: HEAD, config, objects/, refs/.
    fn init_bare_layout(&self, id: &str) -> Result<(), GitError> {
        let dir = self.repo_dir(id);
        fs::create_dir_all(dir.join("objects").join("info"))?;
        fs::create_dir_all(dir.join("objects").join("pack"))?;
        fs::create_dir_all(dir.join("refs").join("heads"))?;
        fs::create_dir_all(dir.join("refs").join("tags"))?;
        fs::write(dir.join("HEAD"), "ref: refs/heads/master\n")?;
        fs::write(
            dir.join("config"),
            "[core]\n\trepositoryformatversion = 0\n\tbare = true\n",
        )?;
        Ok(())
    }

    fn persist(&self, repo: &Repository) -> Result<(), GitError> {
        let path = self.sidecar_path(&repo.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(repo).expect("metadata records always serialize"))?;
        Ok(())
    }

    fn load(&self, id: &str) -> Option<Repository> {
        let bytes = fs::read(self.sidecar_path(id)).ok()?;
        match serde_json::from_slice::<Repository>(&bytes) {
            Ok(mut repo) => {
                repo.id = id.to_string();
                repo.version = repo.digest();
                Some(repo)
            }
            Err(err) => {
                tracing::warn!("unreadable metadata sidecar for {id}: {err}");
                None
            }
        }
    }
}

impl RepoStore for FsRepoStore {
    fn get_repo(&self, id: &str) -> Result<Repository, GitError> {
        if let Some(repo) = self.records.get(id) {
            return Ok(repo.value().clone());
        }
        let repo = self
            .load(id)
            .ok_or_else(|| GitError::RepoNotFound(id.to_string()))?;
        self.records.insert(id.to_string(), repo.clone());
        Ok(repo)
    }

    fn create_repo(&self, mut repo: Repository) -> Result<Repository, GitError> {
        let _guard = self.write_lock.lock().expect("metadata write lock poisoned");
        if self.records.contains_key(&repo.id) || self.repo_dir(&repo.id).exists() {
            return Err(GitError::AlreadyExists(repo.id));
        }
        self.init_bare_layout(&repo.id)?;
        repo.version = repo.digest();
        self.persist(&repo)?;
        self.records.insert(repo.id.clone(), repo.clone());
        Ok(repo)
    }

    fn update_repo(&self, mut repo: Repository) -> Result<Repository, GitError> {
        let _guard = self.write_lock.lock().expect("metadata write lock poisoned");
        let current = self
            .records
            .get(&repo.id)
            .map(|r| r.version)
            .or_else(|| self.load(&repo.id).map(|r| r.version))
            .ok_or_else(|| GitError::RepoNotFound(repo.id.clone()))?;
        if current != repo.version {
            return Err(GitError::StaleVersion(repo.id));
        }
        repo.version = repo.digest();
        self.persist(&repo)?;
        self.records.insert(repo.id.clone(), repo.clone());
        Ok(repo)
    }

    fn remove_repo(&self, id: &str) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().expect("metadata write lock poisoned");
        let removed_record = self.records.remove(id).is_some();
        if !removed_record && !self.repo_dir(id).exists() {
            return Err(GitError::RepoNotFound(id.to_string()));
        }
        if self.repo_dir(id).exists() {
            fs::remove_dir_all(self.repo_dir(id))?;
        }
        if self.sidecar_path(id).exists() {
            fs::remove_file(self.sidecar_path(id))?;
        }
        Ok(())
    }
}
