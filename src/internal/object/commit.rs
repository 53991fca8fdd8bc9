//! The commit object records a snapshot of the project: the id of the top
//! level tree, zero or more parent commit ids, author/committer lines, and
//! the commit message.
//!
//! The server only needs the `tree` and `parent` headers to walk the
//! object graph; author, committer, and any further headers (gpgsig,
//! encoding) ride along textually so a parsed commit re-serializes to the
//! exact bytes it was read from.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, types::ObjectType},
};

/// A parsed commit body.
///
/// `message` holds everything after the committer line, including the
/// blank-line separator and any extended headers, so that
/// `to_data(from_bytes(b)) == b`.
#[derive(Eq, Debug, Clone)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_ids: Vec<ObjectHash>,
    pub author: String,
    pub committer: String,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.tree_id)?;
        for parent in &self.parent_ids {
            writeln!(f, "parent {parent}")?;
        }
        writeln!(f, "{}", self.author)?;
        writeln!(f, "{}", self.committer)?;
        write!(f, "{}", self.message)
    }
}

impl Commit {
    /// Build a commit from its pieces, computing the content hash.
    pub fn new(
        author: String,
        committer: String,
        tree_id: ObjectHash,
        parent_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Commit {
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_ids,
            author,
            committer,
            message: format!("\n{message}"),
        };
        commit.id = ObjectHash::from_type_and_data(
            ObjectType::Commit,
            &commit.to_data().expect("commit serialization is infallible"),
        );
        commit
    }

    fn parse_hash_line(line: &[u8], what: &str) -> Result<ObjectHash, GitError> {
        let hex = std::str::from_utf8(line)
            .map_err(|_| GitError::BadObject(format!("commit {what} line is not utf-8")))?;
        ObjectHash::from_str(hex)
            .map_err(|_| GitError::BadObject(format!("commit {what} hash is malformed")))
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let mut rest = data;

        // First header must be the tree id.
        let line_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| GitError::BadObject("commit has no tree header".to_string()))?;
        let tree_line = rest[..line_end]
            .strip_prefix(b"tree ")
            .ok_or_else(|| GitError::BadObject("commit does not start with tree".to_string()))?;
        let tree_id = Self::parse_hash_line(tree_line, "tree")?;
        rest = &rest[line_end + 1..];

        let mut parent_ids = Vec::new();
        while let Some(parent_line) = rest.strip_prefix(b"parent ") {
            let end = parent_line
                .find_byte(b'\n')
                .ok_or_else(|| GitError::BadObject("unterminated parent header".to_string()))?;
            parent_ids.push(Self::parse_hash_line(&parent_line[..end], "parent")?);
            rest = &parent_line[end + 1..];
        }

        let author_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| GitError::BadObject("commit has no author header".to_string()))?;
        if !rest.starts_with(b"author ") {
            return Err(GitError::BadObject("expected author header".to_string()));
        }
        let author = String::from_utf8_lossy(&rest[..author_end]).to_string();
        rest = &rest[author_end + 1..];

        let committer_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| GitError::BadObject("commit has no committer header".to_string()))?;
        if !rest.starts_with(b"committer ") {
            return Err(GitError::BadObject("expected committer header".to_string()));
        }
        let committer = String::from_utf8_lossy(&rest[..committer_end]).to_string();
        rest = &rest[committer_end + 1..];

        let message = String::from_utf8_lossy(rest).to_string();

        Ok(Commit {
            id: hash,
            tree_id,
            parent_ids,
            author,
            committer,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.push(b'\n');

        for parent in &self.parent_ids {
            data.extend(b"parent ");
            data.extend(parent.to_string().as_bytes());
            data.push(b'\n');
        }

        data.extend(self.author.as_bytes());
        data.push(b'\n');
        data.extend(self.committer.as_bytes());
        data.push(b'\n');
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
