//! Shared I/O utilities: byte readers and a checksum writer that mirrors a
//! SHA-1 over everything written through it.

use std::io::{self, Read, Write};

use sha1::{Digest, Sha1};

use crate::hash::ObjectHash;

/// Read exactly `len` bytes from the reader.
pub fn read_bytes(file: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writer adapter that forwards all bytes to `inner` while keeping a running
/// SHA-1 over them. The pack encoder uses it to produce the trailer.
pub struct HashWriter<W> {
    pub inner: W,
    hash: Sha1,
}

impl<W: Write> HashWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hash: Sha1::new(),
        }
    }

    /// Finalize a snapshot of the running hash without consuming the writer.
    pub fn final_hash(&self) -> ObjectHash {
        let digest: [u8; 20] = self.hash.clone().finalize().into();
        ObjectHash(digest)
    }
}

impl<W: Write> Write for HashWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hash.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::HashWriter;
    use crate::hash::ObjectHash;

    /// The running hash must equal the SHA-1 of the bytes written.
    #[test]
    fn hash_writer_tracks_payload() {
        let mut writer = HashWriter::new(Vec::new());
        writer.write_all(b"Hello, ").unwrap();
        writer.write_all(b"world!").unwrap();
        assert_eq!(writer.inner, b"Hello, world!");
        assert_eq!(writer.final_hash(), ObjectHash::new(b"Hello, world!"));
    }
}
