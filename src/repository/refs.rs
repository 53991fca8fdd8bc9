//! Repository reference tables: named heads and tags plus the HEAD
//! pointer, with compare-and-swap update semantics.
//!
//! Ref names on the wire carry the `refs/` prefix
//! (`refs/heads/<n>`, `refs/tags/<n>`); HEAD's `ref` field and the JSON
//! surface use the short `heads/<n>` / `tags/<n>` form, mirroring the
//! metadata wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{errors::GitError, hash::ObjectHash};

/// The HEAD ref and hash information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub hash: ObjectHash,
}

impl Default for RepositoryHead {
    fn default() -> Self {
        Self {
            ref_name: "heads/master".to_string(),
            hash: ObjectHash::ZERO,
        }
    }
}

/// Heads and tags tables plus HEAD.
///
/// Callers never get the maps by mutable reference; all mutation goes
/// through [`update_ref`](RepositoryRefs::update_ref) and
/// [`set_head`](RepositoryRefs::set_head) so the owning repository lock
/// covers every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRefs {
    #[serde(default)]
    pub head: RepositoryHead,
    #[serde(default)]
    heads: BTreeMap<String, ObjectHash>,
    #[serde(default)]
    tags: BTreeMap<String, ObjectHash>,
}

impl Default for RepositoryRefs {
    fn default() -> Self {
        let mut heads = BTreeMap::new();
        heads.insert("master".to_string(), ObjectHash::ZERO);
        Self {
            head: RepositoryHead::default(),
            heads,
            tags: BTreeMap::new(),
        }
    }
}

/// Split a full ref name into its category and short name.
fn split_ref(ref_name: &str) -> Result<(&str, &str), GitError> {
    let rest = ref_name
        .strip_prefix("refs/")
        .ok_or_else(|| GitError::InvalidRef(ref_name.to_string()))?;
    let (category, name) = rest
        .split_once('/')
        .ok_or_else(|| GitError::InvalidRef(ref_name.to_string()))?;
    if name.is_empty() || !matches!(category, "heads" | "tags") {
        return Err(GitError::InvalidRef(ref_name.to_string()));
    }
    Ok((category, name))
}

impl RepositoryRefs {
    /// Look up a head by short name.
    pub fn head_hash(&self, name: &str) -> Option<ObjectHash> {
        self.heads.get(name).copied()
    }

    /// Look up a tag by short name.
    pub fn tag_hash(&self, name: &str) -> Option<ObjectHash> {
        self.tags.get(name).copied()
    }

    /// Advertised refs: non-null heads then non-null tags, each under its
    /// full `refs/...` name. Null entries are placeholders for refs that
    /// do not exist yet.
    pub fn advertised(&self) -> Vec<(String, ObjectHash)> {
        let mut out = Vec::new();
        for (name, hash) in &self.heads {
            if !hash.is_zero() {
                out.push((format!("refs/heads/{name}"), *hash));
            }
        }
        for (name, hash) in &self.tags {
            if !hash.is_zero() {
                out.push((format!("refs/tags/{name}"), *hash));
            }
        }
        out
    }

    /// Apply one pushed ref transition with optimistic concurrency on the
    /// previous hash.
    ///
    /// * create when `old` is null, delete when `new` is null;
    /// * an absent entry with a non-null `old` fails `RefNotFound`;
    /// * a stored hash differing from `old` fails `StaleRef` and leaves
    ///   the tables unchanged;
    /// * a successful update of HEAD's target refreshes `head.hash`.
    pub fn update_ref(
        &mut self,
        ref_name: &str,
        old: ObjectHash,
        new: ObjectHash,
    ) -> Result<(), GitError> {
        let (category, name) = split_ref(ref_name)?;
        let table = match category {
            "heads" => &mut self.heads,
            "tags" => &mut self.tags,
            _ => unreachable!("split_ref admits heads and tags only"),
        };

        match table.get(name).copied() {
            None => {
                if !old.is_zero() {
                    return Err(GitError::RefNotFound(ref_name.to_string()));
                }
                if new.is_zero() {
                    return Err(GitError::RefNotFound(ref_name.to_string()));
                }
                table.insert(name.to_string(), new);
            }
            Some(stored) => {
                if stored != old {
                    return Err(GitError::StaleRef {
                        reference: ref_name.to_string(),
                        stored: stored.to_string(),
                        reported: old.to_string(),
                    });
                }
                if new.is_zero() {
                    table.remove(name);
                } else {
                    table.insert(name.to_string(), new);
                }
            }
        }

        if self.head.ref_name == format!("{category}/{name}") {
            self.head.hash = if new.is_zero() { ObjectHash::ZERO } else { new };
        }
        Ok(())
    }

    /// Repoint HEAD at an existing head or tag, given the short
    /// `heads/<n>` / `tags/<n>` form. Returns the target hash.
    pub fn set_head(&mut self, ref_name: &str) -> Result<ObjectHash, GitError> {
        let (category, name) = ref_name
            .split_once('/')
            .ok_or_else(|| GitError::InvalidRef(ref_name.to_string()))?;
        let hash = match category {
            "heads" => self.heads.get(name).copied(),
            "tags" => self.tags.get(name).copied(),
            _ => None,
        }
        .ok_or_else(|| GitError::InvalidRef(ref_name.to_string()))?;

        self.head = RepositoryHead {
            ref_name: ref_name.to_string(),
            hash,
        };
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> ObjectHash {
        ObjectHash([byte; 20])
    }

    /// A fresh table has HEAD on heads/master pointing at the null hash.
    #[test]
    fn test_defaults() {
        let refs = RepositoryRefs::default();
        assert_eq!(refs.head.ref_name, "heads/master");
        assert!(refs.head.hash.is_zero());
        assert_eq!(refs.head_hash("master"), Some(ObjectHash::ZERO));
        assert!(refs.advertised().is_empty());
    }

    /// First push onto the default master entry updates HEAD too.
    #[test]
    fn test_first_push_updates_head() {
        let mut refs = RepositoryRefs::default();
        refs.update_ref("refs/heads/master", ObjectHash::ZERO, h(1))
            .unwrap();
        assert_eq!(refs.head_hash("master"), Some(h(1)));
        assert_eq!(refs.head.hash, h(1));
        assert_eq!(refs.advertised(), vec![("refs/heads/master".to_string(), h(1))]);
    }

    /// A mismatched old hash fails StaleRef and changes nothing.
    #[test]
    fn test_stale_ref_leaves_table_unchanged() {
        let mut refs = RepositoryRefs::default();
        refs.update_ref("refs/heads/master", ObjectHash::ZERO, h(1))
            .unwrap();
        let err = refs
            .update_ref("refs/heads/master", h(9), h(2))
            .unwrap_err();
        assert!(matches!(err, GitError::StaleRef { .. }));
        assert_eq!(refs.head_hash("master"), Some(h(1)));
        assert_eq!(refs.head.hash, h(1));
    }

    /// Updating an absent ref with a non-null old hash fails RefNotFound;
    /// a null old hash creates it.
    #[test]
    fn test_create_semantics() {
        let mut refs = RepositoryRefs::default();
        assert!(matches!(
            refs.update_ref("refs/heads/dev", h(1), h(2)),
            Err(GitError::RefNotFound(_))
        ));
        refs.update_ref("refs/heads/dev", ObjectHash::ZERO, h(2))
            .unwrap();
        assert_eq!(refs.head_hash("dev"), Some(h(2)));
        // HEAD still tracks master.
        assert!(refs.head.hash.is_zero());
    }

    /// A null new hash deletes the entry; deleting HEAD's target nulls
    /// HEAD's hash.
    #[test]
    fn test_delete_semantics() {
        let mut refs = RepositoryRefs::default();
        refs.update_ref("refs/heads/master", ObjectHash::ZERO, h(1))
            .unwrap();
        refs.update_ref("refs/heads/master", h(1), ObjectHash::ZERO)
            .unwrap();
        assert_eq!(refs.head_hash("master"), None);
        assert!(refs.head.hash.is_zero());
    }

    /// Tags use the same discipline against their own table.
    #[test]
    fn test_tags() {
        let mut refs = RepositoryRefs::default();
        refs.update_ref("refs/tags/v1", ObjectHash::ZERO, h(3))
            .unwrap();
        assert_eq!(refs.tag_hash("v1"), Some(h(3)));
        assert!(matches!(
            refs.update_ref("refs/tags/v1", h(4), h(5)),
            Err(GitError::StaleRef { .. })
        ));
    }

    /// Prefixes outside refs/heads and refs/tags are invalid.
    #[test]
    fn test_invalid_prefixes() {
        let mut refs = RepositoryRefs::default();
        for name in ["refs/notes/x", "heads/master", "refs/heads", "refs/"] {
            assert!(
                matches!(
                    refs.update_ref(name, ObjectHash::ZERO, h(1)),
                    Err(GitError::InvalidRef(_))
                ),
                "expected InvalidRef for {name}"
            );
        }
    }

    /// set_head targets existing entries only.
    #[test]
    fn test_set_head() {
        let mut refs = RepositoryRefs::default();
        refs.update_ref("refs/heads/dev", ObjectHash::ZERO, h(2))
            .unwrap();
        assert_eq!(refs.set_head("heads/dev").unwrap(), h(2));
        assert_eq!(refs.head.ref_name, "heads/dev");
        assert!(refs.set_head("heads/missing").is_err());
        assert!(refs.set_head("bogus").is_err());
    }
}
