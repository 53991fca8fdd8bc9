//! Per-repository content-addressed object storage.
//!
//! Two backends sit behind the [`ObjectStore`] contract: an in-memory map
//! and a loose-object filesystem layout. [`ObjectStorage`] is the
//! multi-tenant registry handing out one store per repository id,
//! creating stores on demand.

pub mod filesystem;
pub mod memory;

use std::sync::Arc;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{object::types::ObjectType, pack::entry::Entry},
};

/// Content-addressed store of typed, zlib-encoded objects plus the
/// repository's loose refs.
///
/// Implementations are safe for concurrent readers and concurrent writers;
/// writes are idempotent by hash, so racing writers of the same object
/// resolve to the same bytes.
pub trait ObjectStore: Send + Sync {
    /// Insert an object, idempotently. Returns its hash.
    fn put(&self, entry: Entry) -> Result<ObjectHash, GitError>;

    /// Fetch an object by hash.
    fn get(&self, hash: &ObjectHash) -> Result<Entry, GitError>;

    /// Fetch an object and require a particular type.
    fn get_typed(&self, hash: &ObjectHash, expected: ObjectType) -> Result<Entry, GitError> {
        let entry = self.get(hash)?;
        if entry.obj_type != expected {
            return Err(GitError::ObjectNotFound(format!(
                "{hash} is a {}, wanted a {expected}",
                entry.obj_type
            )));
        }
        Ok(entry)
    }

    /// Whether an object exists.
    fn has(&self, hash: &ObjectHash) -> bool;

    /// Enumerate loose refs as `(full name, hash)` pairs.
    fn iter_refs(&self) -> Vec<(String, ObjectHash)>;

    /// Point a ref at a hash, creating it if needed.
    fn set_ref(&self, name: &str, hash: ObjectHash) -> Result<(), GitError>;

    /// Remove a ref.
    fn delete_ref(&self, name: &str) -> Result<(), GitError>;
}

/// Registry of per-repository object stores, keyed by repository id.
pub trait ObjectStorage: Send + Sync {
    /// Store for the given id, created on first use.
    fn get_store(&self, id: &str) -> Arc<dyn ObjectStore>;
}
