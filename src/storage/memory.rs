//! In-memory object store backend.
//!
//! Objects are held zlib-compressed in a concurrent map keyed by hash,
//! refs in a second map. The registry creates one store per repository id
//! on first use.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use dashmap::DashMap;
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{object::types::ObjectType, pack::entry::Entry},
    storage::{ObjectStorage, ObjectStore},
};

/// A stored object: its type, uncompressed size, and zlib-compressed body.
#[derive(Clone)]
struct StoredObject {
    obj_type: ObjectType,
    size: usize,
    zdata: Vec<u8>,
}

/// Object store backed by concurrent in-memory maps.
#[derive(Default)]
pub struct MemObjectStore {
    objects: DashMap<ObjectHash, StoredObject>,
    refs: DashMap<String, ObjectHash>,
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemObjectStore {
    fn put(&self, entry: Entry) -> Result<ObjectHash, GitError> {
        let hash = entry.hash;
        if self.objects.contains_key(&hash) {
            // Same hash means same bytes; the overwrite would be a no-op.
            return Ok(hash);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&entry.data)?;
        let zdata = encoder.finish()?;
        self.objects.insert(
            hash,
            StoredObject {
                obj_type: entry.obj_type,
                size: entry.data.len(),
                zdata,
            },
        );
        Ok(hash)
    }

    fn get(&self, hash: &ObjectHash) -> Result<Entry, GitError> {
        let stored = self
            .objects
            .get(hash)
            .ok_or_else(|| GitError::ObjectNotFound(hash.to_string()))?;
        let mut data = Vec::with_capacity(stored.size);
        ZlibDecoder::new(stored.zdata.as_slice()).read_to_end(&mut data)?;
        Ok(Entry {
            obj_type: stored.obj_type,
            data,
            hash: *hash,
        })
    }

    fn has(&self, hash: &ObjectHash) -> bool {
        self.objects.contains_key(hash)
    }

    fn iter_refs(&self) -> Vec<(String, ObjectHash)> {
        let mut refs: Vec<_> = self
            .refs
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect();
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        refs
    }

    fn set_ref(&self, name: &str, hash: ObjectHash) -> Result<(), GitError> {
        self.refs.insert(name.to_string(), hash);
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<(), GitError> {
        self.refs.remove(name);
        Ok(())
    }
}

/// Registry handing out in-memory stores by repository id.
#[derive(Default)]
pub struct MemObjectStorage {
    stores: DashMap<String, Arc<MemObjectStore>>,
}

impl MemObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStorage for MemObjectStorage {
    fn get_store(&self, id: &str) -> Arc<dyn ObjectStore> {
        self.stores
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemObjectStore::new()))
            .clone()
    }
}
