//! 20-byte SHA-1 object identity.
//!
//! Every git object, ref target, and pack trailer in this server is a
//! SHA-1 value rendered as 40 lowercase hex characters. The all-zero hash
//! is the distinguished null value used for ref creation/deletion and for
//! empty repositories.

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha1::{Digest, Sha1};

use crate::{errors::GitError, internal::object::types::ObjectType};

/// Concrete object ID carrying the raw SHA-1 bytes.
///
/// Supports conversion to/from hex strings, byte slices, and stream reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectHash(pub [u8; 20]);

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Parse 40 hex characters (either case) into an `ObjectHash`.
impl FromStr for ObjectHash {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(GitError::InvalidHash(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| GitError::InvalidHash(s.to_string()))?;
        let mut h = [0u8; 20];
        h.copy_from_slice(&bytes);
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    /// The null hash: signals ref creation/deletion and empty repositories.
    pub const ZERO: ObjectHash = ObjectHash([0u8; 20]);

    /// Zero-filled hex string, 40 characters.
    pub fn zero_str() -> String {
        Self::ZERO.to_string()
    }

    /// Whether this is the all-zero null hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Compute the SHA-1 of raw data.
    pub fn new(data: &[u8]) -> ObjectHash {
        let h = Sha1::digest(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(h.as_ref());
        ObjectHash(bytes)
    }

    /// Hash an object the way git does: `SHA1("<type> <size>\0" || data)`.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut hasher = Sha1::new();
        hasher.update(object_type.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\x00");
        hasher.update(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(hasher.finalize().as_ref());
        ObjectHash(bytes)
    }

    /// Create an `ObjectHash` from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, GitError> {
        if bytes.len() != 20 {
            return Err(GitError::InvalidHash(hex::encode(bytes)));
        }
        let mut h = [0u8; 20];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    /// Read 20 hash bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; 20];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    /// Return the raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// On the JSON surface hashes travel as 40-char lowercase hex strings.
impl Serialize for ObjectHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectHash::from_str(&s).map_err(de::Error::custom)
    }
}
