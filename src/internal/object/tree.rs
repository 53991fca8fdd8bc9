//! The tree object represents a directory: a concatenation of entries
//! `<octal-mode> <name>\0<20-byte-hash>`, ordered by name.
//!
//! The graph walker only needs each entry's hash; modes are parsed so the
//! walker can tell sub-trees from blobs and so serialization round-trips.

use std::fmt::Display;

use bstr::ByteSlice;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, types::ObjectType},
};

/// File mode of a tree entry, as the octal literal git writes.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl TreeItemMode {
    /// Parse the octal mode bytes preceding the space separator.
    pub fn from_bytes(mode: &[u8]) -> Result<TreeItemMode, GitError> {
        Ok(match mode {
            b"100644" | b"100664" => TreeItemMode::Blob,
            b"100755" => TreeItemMode::BlobExecutable,
            b"120000" => TreeItemMode::Link,
            b"40000" | b"040000" => TreeItemMode::Tree,
            b"160000" => TreeItemMode::Commit,
            _ => {
                return Err(GitError::BadObject(format!(
                    "unknown tree entry mode: {}",
                    String::from_utf8_lossy(mode)
                )));
            }
        })
    }

    /// The canonical octal literal git writes for this mode.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    /// Whether the entry references another tree object.
    pub fn is_tree(self) -> bool {
        self == TreeItemMode::Tree
    }
}

/// A single `<mode> <name>\0<hash>` entry.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }
}

/// A directory listing plus its content address.
#[derive(Eq, Debug, Clone)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.id)?;
        for item in &self.tree_items {
            writeln!(
                f,
                "{} {} {}",
                String::from_utf8_lossy(item.mode.to_bytes()),
                item.id,
                item.name
            )?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, sorting them by name and computing the
    /// content hash.
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, GitError> {
        tree_items.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let mut tree_items = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = rest
                .find_byte(b' ')
                .ok_or(GitError::BadObject("tree entry missing mode".to_string()))?;
            let mode = TreeItemMode::from_bytes(&rest[..space])?;
            rest = &rest[space + 1..];

            let nul = rest
                .find_byte(b'\x00')
                .ok_or(GitError::BadObject("tree entry missing name".to_string()))?;
            let name = String::from_utf8_lossy(&rest[..nul]).to_string();
            rest = &rest[nul + 1..];

            if rest.len() < 20 {
                return Err(GitError::BadObject("tree entry truncated hash".to_string()));
            }
            let id = ObjectHash::from_bytes(&rest[..20])?;
            rest = &rest[20..];

            tree_items.push(TreeItem { mode, id, name });
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.to_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(b'\x00');
            data.extend(item.id.as_ref());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::blob::Blob;

    /// Tree entries round-trip through serialize/parse.
    #[test]
    fn test_round_trip() {
        let blob = Blob::from_content("hello");
        let item1 = TreeItem::new(TreeItemMode::Blob, blob.id, "hello.txt".to_string());
        let item2 = TreeItem::new(TreeItemMode::Tree, blob.id, "sub".to_string());
        let tree = Tree::from_tree_items(vec![item1.clone(), item2.clone()]).unwrap();

        let parsed = Tree::from_bytes(&tree.to_data().unwrap(), tree.id).unwrap();
        assert_eq!(parsed.id, tree.id);
        assert_eq!(parsed.tree_items.len(), 2);
        assert_eq!(parsed.tree_items[0], item1);
        assert_eq!(parsed.tree_items[1], item2);
    }

    /// The empty tree hashes to git's well-known id.
    #[test]
    fn test_empty_tree() {
        let tree = Tree::from_tree_items(vec![]).unwrap();
        assert_eq!(tree.id.to_string(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    /// Truncated entries fail instead of panicking.
    #[test]
    fn test_malformed_tree() {
        assert!(Tree::from_bytes(b"100644 broken", ObjectHash::ZERO).is_err());
        assert!(Tree::from_bytes(b"100644 f\x00shorthash", ObjectHash::ZERO).is_err());
        assert!(Tree::from_bytes(b"999999 f\x00", ObjectHash::ZERO).is_err());
    }
}
