//! Lightweight representation of a decoded git object coming out of a pack
//! stream, with helpers to convert from strongly typed objects.

use std::hash::{Hash, Hasher};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree, types::ObjectType,
    },
};

/// Git object data as carried through packs and object stores.
#[derive(Eq, Clone, Debug)]
pub struct Entry {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    pub hash: ObjectHash,
}

impl Entry {
    /// Build an entry from a base type and body, computing the hash.
    pub fn new(obj_type: ObjectType, data: Vec<u8>) -> Result<Entry, GitError> {
        if !obj_type.is_base() {
            return Err(GitError::InvalidObjectType(obj_type.to_string()));
        }
        let hash = ObjectHash::from_type_and_data(obj_type, &data);
        Ok(Entry {
            obj_type,
            data,
            hash,
        })
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.hash == other.hash
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.hash.hash(state);
    }
}

impl From<Blob> for Entry {
    fn from(value: Blob) -> Self {
        Self {
            obj_type: ObjectType::Blob,
            hash: value.id,
            data: value.data,
        }
    }
}

impl From<Commit> for Entry {
    fn from(value: Commit) -> Self {
        Self {
            obj_type: ObjectType::Commit,
            data: value.to_data().expect("commit serialization is infallible"),
            hash: value.id,
        }
    }
}

impl From<Tree> for Entry {
    fn from(value: Tree) -> Self {
        Self {
            obj_type: ObjectType::Tree,
            data: value.to_data().expect("tree serialization is infallible"),
            hash: value.id,
        }
    }
}

impl From<Tag> for Entry {
    fn from(value: Tag) -> Self {
        Self {
            obj_type: ObjectType::Tag,
            data: value.to_data().expect("tag serialization is infallible"),
            hash: value.id,
        }
    }
}
