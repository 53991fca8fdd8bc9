//! Reader wrapper that tracks how many bytes of a pack have been consumed
//! while keeping a running SHA-1 for trailer verification.

use std::io::{self, BufRead, Read};

use sha1::{Digest, Sha1};

use crate::hash::ObjectHash;

/// Wraps a `BufRead`, hashing every byte read or consumed through it and
/// counting the stream position. The decoder uses the position to resolve
/// ofs-delta bases and the hash to verify the pack trailer.
pub struct Wrapper<R> {
    inner: R,
    hash: Sha1,
    bytes_read: usize,
}

impl<R> Wrapper<R>
where
    R: BufRead,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hash: Sha1::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes read so far; equals the current pack offset.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Snapshot of the running SHA-1 over everything consumed so far.
    pub fn final_hash(&self) -> ObjectHash {
        let digest: [u8; 20] = self.hash.clone().finalize().into();
        ObjectHash(digest)
    }
}

impl<R> BufRead for Wrapper<R>
where
    R: BufRead,
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        // fill_buf on a buffered reader re-returns the already-buffered
        // bytes, so the consumed prefix can be hashed before advancing.
        let buffer = self
            .inner
            .fill_buf()
            .expect("consume follows a successful fill_buf");
        self.hash.update(&buffer[..amt]);
        self.inner.consume(amt);
        self.bytes_read += amt;
    }
}

impl<R> Read for Wrapper<R>
where
    R: BufRead,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let o = self.inner.read(buf)?;
        self.hash.update(&buf[..o]);
        self.bytes_read += o;
        Ok(o)
    }
}
