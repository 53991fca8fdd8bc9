//! The annotated tag object marks a point in history: it names a target
//! object, the target's type, the tag name, the tagger, and a message.
//!
//! Tags are stored and served like any other object; the walker treats
//! them as terminal.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, types::ObjectType},
};

#[derive(Eq, Debug, Clone)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_id: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    /// The tagger line plus message, kept verbatim for round-tripping.
    pub rest: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_id)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        write!(f, "{}", self.rest)
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let mut rest = data;

        let line_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| GitError::BadObject("tag has no object header".to_string()))?;
        let object_line = rest[..line_end]
            .strip_prefix(b"object ")
            .ok_or_else(|| GitError::BadObject("tag does not start with object".to_string()))?;
        let hex = std::str::from_utf8(object_line)
            .map_err(|_| GitError::BadObject("tag object line is not utf-8".to_string()))?;
        let object_id = ObjectHash::from_str(hex)
            .map_err(|_| GitError::BadObject("tag object hash is malformed".to_string()))?;
        rest = &rest[line_end + 1..];

        let line_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| GitError::BadObject("tag has no type header".to_string()))?;
        let type_line = rest[..line_end]
            .strip_prefix(b"type ")
            .ok_or_else(|| GitError::BadObject("expected type header".to_string()))?;
        let object_type = ObjectType::from_string(&String::from_utf8_lossy(type_line))?;
        rest = &rest[line_end + 1..];

        let line_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| GitError::BadObject("tag has no tag header".to_string()))?;
        let name_line = rest[..line_end]
            .strip_prefix(b"tag ")
            .ok_or_else(|| GitError::BadObject("expected tag header".to_string()))?;
        let tag_name = String::from_utf8_lossy(name_line).to_string();
        rest = &rest[line_end + 1..];

        Ok(Tag {
            id: hash,
            object_id,
            object_type,
            tag_name,
            rest: String::from_utf8_lossy(rest).to_string(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_id.to_string().as_bytes());
        data.push(b'\n');
        data.extend(b"type ");
        data.extend(self.object_type.to_bytes());
        data.push(b'\n');
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.push(b'\n');
        data.extend(self.rest.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_TAG: &[u8] = b"object 341e54913a3a43069f2927cc0f703e5a9f730df1\n\
type commit\n\
tag v1.0\n\
tagger tester <tester@example.com> 1757467768 +0800\n\
\n\
release one\n";

    /// Parsing extracts target, type, and name; serialization round-trips.
    #[test]
    fn test_round_trip() {
        let hash = ObjectHash::from_type_and_data(ObjectType::Tag, RAW_TAG);
        let tag = Tag::from_bytes(RAW_TAG, hash).unwrap();
        assert_eq!(
            tag.object_id.to_string(),
            "341e54913a3a43069f2927cc0f703e5a9f730df1"
        );
        assert_eq!(tag.object_type, ObjectType::Commit);
        assert_eq!(tag.tag_name, "v1.0");
        assert_eq!(tag.to_data().unwrap(), RAW_TAG);
    }

    /// Headers out of order fail cleanly.
    #[test]
    fn test_malformed_tag() {
        assert!(Tag::from_bytes(b"type commit\n", ObjectHash::ZERO).is_err());
    }
}
