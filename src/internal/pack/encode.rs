//! PACK v2 writer.
//!
//! Serializes an unordered collection of base objects into a pack stream:
//! 12-byte header, per-object type/size header plus a fresh zlib stream,
//! and the SHA-1 trailer over everything written. Deltas are never
//! produced; every entry is emitted in its non-delta form.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use flate2::{Compression, write::ZlibEncoder};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::pack::entry::Entry,
    utils::HashWriter,
};

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// Incremental pack writer. Entries may arrive in any order; two runs over
/// the same set may produce byte-different packs with the same contents.
pub struct PackWriter<W: Write> {
    writer: HashWriter<W>,
    expected: usize,
    written: usize,
}

impl<W: Write> PackWriter<W> {
    /// Start a pack for `count` objects, writing the header immediately.
    pub fn new(inner: W, count: usize) -> Result<Self, GitError> {
        let mut writer = HashWriter::new(inner);
        writer.write_all(PACK_MAGIC)?;
        writer.write_u32::<BigEndian>(PACK_VERSION)?;
        writer.write_u32::<BigEndian>(count as u32)?;
        Ok(Self {
            writer,
            expected: count,
            written: 0,
        })
    }

    /// Append one object: tag/size header, then a zlib stream of its body
    /// with default compression and an explicit flush.
    pub fn write_entry(&mut self, entry: &Entry) -> Result<(), GitError> {
        if !entry.obj_type.is_base() {
            return Err(GitError::InvalidObjectType(entry.obj_type.to_string()));
        }

        // Low 4 bits of the size ride in the first byte with the type tag;
        // the rest follows as little-endian 7-bit groups.
        let mut header = Vec::with_capacity(4);
        let mut size = entry.data.len();
        let mut byte = (entry.obj_type.to_pack_type_u8() << 4) | ((size & 0x0f) as u8);
        size >>= 4;
        while size != 0 {
            header.push(byte | 0x80);
            byte = (size & 0x7f) as u8;
            size >>= 7;
        }
        header.push(byte);
        self.writer.write_all(&header)?;

        let mut encoder = ZlibEncoder::new(&mut self.writer, Compression::default());
        encoder.write_all(&entry.data)?;
        encoder.flush()?;
        encoder.finish()?;

        self.written += 1;
        Ok(())
    }

    /// Write the SHA-1 trailer and return it together with the inner
    /// writer.
    pub fn finish(self) -> Result<(ObjectHash, W), GitError> {
        if self.written != self.expected {
            return Err(GitError::InvalidPackFile(format!(
                "declared {} objects, wrote {}",
                self.expected, self.written
            )));
        }
        let signature = self.writer.final_hash();
        let mut inner = self.writer.inner;
        inner.write_all(signature.as_ref())?;
        Ok((signature, inner))
    }
}

/// Encode a whole entry set in iteration order, returning the trailer hash
/// and the writer.
pub fn encode_pack<W: Write>(entries: &[Entry], inner: W) -> Result<(ObjectHash, W), GitError> {
    let mut writer = PackWriter::new(inner, entries.len())?;
    for entry in entries {
        writer.write_entry(entry)?;
    }
    writer.finish()
}
