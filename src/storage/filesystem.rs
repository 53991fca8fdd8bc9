//! Filesystem object store backend.
//!
//! Each repository is a bare directory under the data dir: loose objects
//! at `objects/<aa>/<38-hex>` compressed with the `"<type> <size>\0"`
//! header, refs as one-line files under `refs/heads/` and `refs/tags/`.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use bstr::ByteSlice;
use dashmap::DashMap;
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{object::types::ObjectType, pack::entry::Entry},
    storage::{ObjectStorage, ObjectStore},
};

/// Loose-object store rooted at one bare repository directory.
pub struct FsObjectStore {
    repo_dir: PathBuf,
}

impl FsObjectStore {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    fn object_path(&self, hash: &ObjectHash) -> PathBuf {
        let hex = hash.to_string();
        self.repo_dir.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn ref_path(&self, name: &str) -> Result<PathBuf, GitError> {
        // Refs are caller-controlled names; keep them inside the ref tree.
        if name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(GitError::InvalidRef(name.to_string()));
        }
        Ok(self.repo_dir.join(name))
    }

    fn collect_refs(dir: &Path, prefix: &str, out: &mut Vec<(String, ObjectHash)>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let full = format!("{prefix}/{name}");
            if path.is_dir() {
                Self::collect_refs(&path, &full, out);
            } else if let Ok(content) = fs::read_to_string(&path)
                && let Ok(hash) = ObjectHash::from_str(content.trim())
            {
                out.push((full, hash));
            } else {
                tracing::warn!("skipping unreadable ref file {}", path.display());
            }
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, entry: Entry) -> Result<ObjectHash, GitError> {
        let hash = entry.hash;
        let path = self.object_path(&hash);
        if path.exists() {
            // Same hash, same bytes: nothing to rewrite.
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(entry.obj_type.to_bytes())?;
        encoder.write_all(b" ")?;
        encoder.write_all(entry.data.len().to_string().as_bytes())?;
        encoder.write_all(b"\x00")?;
        encoder.write_all(&entry.data)?;
        let zdata = encoder.finish()?;

        // Write-then-rename so racing writers of the same object land on
        // identical bytes without exposing a torn file.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &zdata)?;
        fs::rename(&tmp, &path)?;
        Ok(hash)
    }

    fn get(&self, hash: &ObjectHash) -> Result<Entry, GitError> {
        let path = self.object_path(hash);
        let zdata =
            fs::read(&path).map_err(|_| GitError::ObjectNotFound(hash.to_string()))?;

        let mut raw = Vec::new();
        ZlibDecoder::new(zdata.as_slice()).read_to_end(&mut raw)?;

        let nul = raw
            .find_byte(b'\x00')
            .ok_or_else(|| GitError::BadObject(format!("loose object {hash} has no header")))?;
        let header = String::from_utf8_lossy(&raw[..nul]).to_string();
        let (type_str, size_str) = header
            .split_once(' ')
            .ok_or_else(|| GitError::BadObject(format!("malformed loose header: {header}")))?;
        let obj_type = ObjectType::from_string(type_str)?;
        let size: usize = size_str
            .parse()
            .map_err(|_| GitError::BadObject(format!("malformed loose size: {size_str}")))?;
        let data = raw[nul + 1..].to_vec();
        if data.len() != size {
            return Err(GitError::BadObject(format!(
                "loose object {hash}: header declares {size} bytes, found {}",
                data.len()
            )));
        }

        Ok(Entry {
            obj_type,
            data,
            hash: *hash,
        })
    }

    fn has(&self, hash: &ObjectHash) -> bool {
        self.object_path(hash).exists()
    }

    fn iter_refs(&self) -> Vec<(String, ObjectHash)> {
        let mut refs = Vec::new();
        Self::collect_refs(&self.repo_dir.join("refs"), "refs", &mut refs);
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        refs
    }

    fn set_ref(&self, name: &str, hash: ObjectHash) -> Result<(), GitError> {
        let path = self.ref_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{hash}\n"))?;
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<(), GitError> {
        let path = self.ref_path(name)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Registry handing out filesystem stores under one data directory.
pub struct FsObjectStorage {
    data_dir: PathBuf,
    stores: DashMap<String, Arc<FsObjectStore>>,
}

impl FsObjectStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            stores: DashMap::new(),
        }
    }
}

impl ObjectStorage for FsObjectStorage {
    fn get_store(&self, id: &str) -> Arc<dyn ObjectStore> {
        self.stores
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(FsObjectStore::new(self.data_dir.join(id))))
            .clone()
    }
}
