//! Object type enumeration shared by the object model and the pack codec.

use std::fmt::Display;

use crate::errors::GitError;

/// In git, each object type is assigned a unique integer value used to tag
/// the object inside a pack entry header:
///
/// * `Commit` (1), `Tree` (2), `Blob` (3), `Tag` (4): base objects.
/// * `OffsetDelta` (6): a delta whose base is located by a negative offset
///   within the same pack.
/// * `RefDelta` (7): a delta whose base is named by hash.
///
/// Pack headers only carry 3 type bits; type 5 is reserved and never
/// produced here.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta = 6,
    RefDelta,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "ofs-delta"),
            ObjectType::RefDelta => write!(f, "ref-delta"),
        }
    }
}

impl ObjectType {
    /// The textual tag used in the loose-object header and hash preimage.
    ///
    /// Delta kinds never appear there; callers must only pass base types.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            ObjectType::Commit => b"commit",
            ObjectType::Tree => b"tree",
            ObjectType::Blob => b"blob",
            ObjectType::Tag => b"tag",
            ObjectType::OffsetDelta | ObjectType::RefDelta => {
                unreachable!("delta types have no object header tag")
            }
        }
    }

    /// Parse the textual object type from a loose-object header.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::InvalidObjectType(s.to_string())),
        }
    }

    /// Convert to the 3-bit pack header type id.
    pub fn to_pack_type_u8(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OffsetDelta => 6,
            ObjectType::RefDelta => 7,
        }
    }

    /// Decode a 3-bit pack header type id.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::RefDelta),
            _ => Err(GitError::InvalidObjectType(format!(
                "invalid pack object type number: {number}"
            ))),
        }
    }

    /// Whether this is a plain base object rather than a delta.
    pub fn is_base(&self) -> bool {
        !matches!(self, ObjectType::OffsetDelta | ObjectType::RefDelta)
    }
}
