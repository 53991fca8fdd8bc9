//! PACK v2 streaming decoder.
//!
//! Parses the `PACK` header, materializes base and deltified objects in
//! stream order, and verifies the SHA-1 trailer over every byte consumed.
//! Ofs-deltas resolve against an earlier object in the same pack by start
//! offset; ref-deltas resolve by hash against the pack so far or, through
//! the caller-supplied lookup, against objects already in a store.

use std::{
    collections::HashMap,
    io::{BufRead, Read},
};

use byteorder::{BigEndian, ReadBytesExt};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::types::ObjectType,
        pack::{delta::delta_apply, entry::Entry, wrapper::Wrapper},
    },
    utils::read_bytes,
};

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// Summary of a fully decoded pack.
#[derive(Debug)]
pub struct Pack {
    /// Declared object count, all of which were materialized.
    pub number: usize,
    /// Verified trailer hash.
    pub signature: ObjectHash,
}

impl Pack {
    /// Decode a complete pack from `reader`.
    ///
    /// Every materialized object is handed to `callback` together with its
    /// start offset inside the pack. `base_lookup` supplies ref-delta
    /// bases that live outside this pack (objects from earlier pushes).
    pub fn decode<R, B, F>(
        reader: &mut R,
        base_lookup: B,
        mut callback: F,
    ) -> Result<Pack, GitError>
    where
        R: BufRead,
        B: Fn(&ObjectHash) -> Option<Entry>,
        F: FnMut(Entry, usize),
    {
        let mut pack = Wrapper::new(reader);

        let magic = read_bytes(&mut pack, 4)?;
        if magic != PACK_MAGIC {
            return Err(GitError::InvalidPackHeader(format!(
                "magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        let version = pack.read_u32::<BigEndian>()?;
        if version != PACK_VERSION {
            return Err(GitError::InvalidPackHeader(format!("version {version}")));
        }
        let number = pack.read_u32::<BigEndian>()? as usize;

        // Bases for later deltas, addressable both ways.
        let mut by_offset: HashMap<usize, Entry> = HashMap::new();
        let mut by_hash: HashMap<ObjectHash, Entry> = HashMap::new();

        for _ in 0..number {
            let offset = pack.bytes_read();
            let (obj_type, size) = read_entry_header(&mut pack)?;

            let entry = match obj_type {
                t if t.is_base() => {
                    let (data, hash) = inflate_base(&mut pack, t, size)?;
                    Entry {
                        obj_type: t,
                        data,
                        hash,
                    }
                }
                ObjectType::OffsetDelta => {
                    let distance = read_offset_encoding(&mut pack)?;
                    let base_offset = offset.checked_sub(distance).ok_or_else(|| {
                        GitError::InvalidPackFile(format!(
                            "ofs-delta distance {distance} before pack start"
                        ))
                    })?;
                    let base = by_offset.get(&base_offset).cloned().ok_or_else(|| {
                        GitError::InvalidPackFile(format!(
                            "no object starts at ofs-delta base offset {base_offset}"
                        ))
                    })?;
                    resolve_delta(&mut pack, &base, size)?
                }
                ObjectType::RefDelta => {
                    let base_hash = ObjectHash::from_stream(&mut pack)?;
                    let base = by_hash
                        .get(&base_hash)
                        .cloned()
                        .or_else(|| base_lookup(&base_hash))
                        .ok_or_else(|| GitError::ObjectNotFound(base_hash.to_string()))?;
                    resolve_delta(&mut pack, &base, size)?
                }
                _ => unreachable!("entry header types are exhaustive"),
            };

            by_offset.insert(offset, entry.clone());
            by_hash.insert(entry.hash, entry.clone());
            callback(entry, offset);
        }

        // Snapshot the running hash before consuming the trailer bytes.
        let computed = pack.final_hash();
        let expected = ObjectHash::from_stream(&mut pack)?;
        if computed != expected {
            return Err(GitError::BadChecksum {
                computed: computed.to_string(),
                expected: expected.to_string(),
            });
        }

        Ok(Pack {
            number,
            signature: expected,
        })
    }
}

/// Read a pack entry header: 3 type bits plus the uncompressed size in
/// little-endian 7-bit groups (low 4 bits in the first byte).
fn read_entry_header(pack: &mut impl Read) -> Result<(ObjectType, usize), GitError> {
    let mut byte = [0u8; 1];
    pack.read_exact(&mut byte)?;
    let obj_type = ObjectType::from_pack_type_u8((byte[0] >> 4) & 0x07)?;
    let mut size = (byte[0] & 0x0f) as usize;
    let mut shift = 4;
    while byte[0] & 0x80 != 0 {
        pack.read_exact(&mut byte)?;
        size |= ((byte[0] & 0x7f) as usize) << shift;
        shift += 7;
        if shift > 63 {
            return Err(GitError::InvalidPackFile(
                "entry size varint overflows".to_string(),
            ));
        }
    }
    Ok((obj_type, size))
}

/// Read an ofs-delta base distance: big-endian 7-bit groups with a +1
/// accumulation per continuation byte.
fn read_offset_encoding(pack: &mut impl Read) -> Result<usize, GitError> {
    let mut byte = [0u8; 1];
    pack.read_exact(&mut byte)?;
    let mut value = (byte[0] & 0x7f) as usize;
    while byte[0] & 0x80 != 0 {
        pack.read_exact(&mut byte)?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_shl(7))
            .map(|v| v | (byte[0] & 0x7f) as usize)
            .ok_or_else(|| {
                GitError::InvalidPackFile("ofs-delta distance overflows".to_string())
            })?;
    }
    Ok(value)
}

/// Inflate one base object body. The declared type and size seed the
/// object-id hash; the inflated length must match the declared size.
fn inflate_base(
    pack: &mut impl BufRead,
    obj_type: ObjectType,
    size: usize,
) -> Result<(Vec<u8>, ObjectHash), GitError> {
    use crate::internal::zlib::inflate::ReadBoxed;

    let mut reader = ReadBoxed::new(pack, obj_type, size);
    let mut data = Vec::with_capacity(size);
    reader.read_to_end(&mut data)?;
    if data.len() != size {
        return Err(GitError::InvalidPackFile(format!(
            "object inflated to {} bytes, header declared {}",
            data.len(),
            size
        )));
    }
    let hash = reader.final_hash();
    Ok((data, hash))
}

/// Inflate a delta payload, which carries no object identity of its own.
fn inflate_delta_payload(pack: &mut impl BufRead) -> Result<Vec<u8>, GitError> {
    use crate::internal::zlib::inflate::ReadBoxed;

    let mut reader = ReadBoxed::new_for_delta(pack);
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

/// Inflate a delta payload and apply it against `base`, producing a new
/// base-typed entry.
fn resolve_delta(
    pack: &mut impl BufRead,
    base: &Entry,
    declared_size: usize,
) -> Result<Entry, GitError> {
    let delta = inflate_delta_payload(pack)?;
    if delta.len() != declared_size {
        return Err(GitError::InvalidPackFile(format!(
            "delta inflated to {} bytes, header declared {}",
            delta.len(),
            declared_size
        )));
    }
    let data = delta_apply(&mut std::io::Cursor::new(delta), &base.data)?;
    Entry::new(base.obj_type, data)
}
