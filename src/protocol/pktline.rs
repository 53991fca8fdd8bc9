//! pkt-line framing for the smart protocol.
//!
//! Each frame is four ASCII hex digits giving the total length (including
//! the digits themselves) followed by the payload. Length `0000` is the
//! flush packet and carries no payload. Valid payload lengths are
//! 1..=65515 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::GitError;

/// The flush packet marker.
pub const FLUSH_PKT: &[u8; 4] = b"0000";

/// Largest payload a single pkt-line can carry.
pub const MAX_PKT_PAYLOAD: usize = 65515;

/// Frame one payload as a pkt-line.
pub fn pkt_line(payload: &[u8]) -> Result<Bytes, GitError> {
    if payload.is_empty() || payload.len() > MAX_PKT_PAYLOAD {
        return Err(GitError::BadPktLine(format!(
            "payload length {} outside 1..={MAX_PKT_PAYLOAD}",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put(format!("{:04x}", payload.len() + 4).as_bytes());
    buf.put(payload);
    Ok(buf.freeze())
}

/// Append a pkt-line built from a string to the buffer. Callers pass
/// protocol-generated lines that are known to fit a single packet.
pub fn add_pkt_line_string(pkt_line_stream: &mut BytesMut, buf_str: String) {
    debug_assert!(!buf_str.is_empty() && buf_str.len() <= MAX_PKT_PAYLOAD);
    let buf_str_length = buf_str.len() + 4;
    pkt_line_stream.put(format!("{buf_str_length:04x}").as_bytes());
    pkt_line_stream.put(buf_str.as_bytes());
}

/// Append the flush packet.
pub fn add_flush_pkt(pkt_line_stream: &mut BytesMut) {
    pkt_line_stream.put(&FLUSH_PKT[..]);
}

/// Synonym for [`add_flush_pkt`]; the wire encoding of "nil" is the flush
/// packet.
pub fn add_nil_pkt(pkt_line_stream: &mut BytesMut) {
    add_flush_pkt(pkt_line_stream);
}

/// One decoded frame: a payload or a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Bytes),
    Flush,
}

/// Pull-based pkt-line decoder over an in-memory request body.
///
/// Yields frames until the underlying bytes run out; whatever follows the
/// last consumed frame (for receive-pack, the raw pack stream) stays
/// available through [`into_rest`](PktLineReader::into_rest).
pub struct PktLineReader {
    bytes: Bytes,
}

impl PktLineReader {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Decode the next frame; `None` at end of input.
    pub fn read_line(&mut self) -> Result<Option<PktLine>, GitError> {
        if self.bytes.is_empty() {
            return Ok(None);
        }
        if self.bytes.len() < 4 {
            return Err(GitError::BadPktLine("truncated length prefix".to_string()));
        }

        let header = &self.bytes[..4];
        let header_str = core::str::from_utf8(header)
            .map_err(|_| GitError::BadPktLine(format!("non-ascii length: {header:?}")))?;
        let pkt_length = usize::from_str_radix(header_str, 16)
            .map_err(|_| GitError::BadPktLine(format!("non-hex length: {header_str:?}")))?;

        if pkt_length == 0 {
            self.bytes.advance(4);
            return Ok(Some(PktLine::Flush));
        }
        if pkt_length <= 4 || pkt_length > MAX_PKT_PAYLOAD + 4 {
            return Err(GitError::BadPktLine(format!(
                "length {pkt_length} outside valid range"
            )));
        }
        if self.bytes.len() < pkt_length {
            return Err(GitError::BadPktLine(format!(
                "need {} payload bytes, have {}",
                pkt_length - 4,
                self.bytes.len() - 4
            )));
        }

        self.bytes.advance(4);
        let payload = self.bytes.copy_to_bytes(pkt_length - 4);
        Ok(Some(PktLine::Data(payload)))
    }

    /// Hand back whatever was not consumed as pkt-lines.
    pub fn into_rest(self) -> Bytes {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Any payload in range round-trips through encode/decode.
    #[test]
    fn test_round_trip() {
        let payload = b"want 0123456789abcdef0123456789abcdef01234567\n";
        let encoded = pkt_line(payload).unwrap();
        assert!(encoded.starts_with(b"0032"));

        let mut reader = PktLineReader::new(encoded);
        match reader.read_line().unwrap() {
            Some(PktLine::Data(data)) => assert_eq!(&data[..], payload),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(reader.read_line().unwrap().is_none());
    }

    /// The flush packet encodes as `0000` and decodes back to a flush.
    #[test]
    fn test_flush() {
        let mut buf = BytesMut::new();
        add_flush_pkt(&mut buf);
        assert_eq!(&buf[..], b"0000");

        let mut reader = PktLineReader::new(buf.freeze());
        assert_eq!(reader.read_line().unwrap(), Some(PktLine::Flush));
    }

    /// Payload bounds: empty and oversized payloads are rejected.
    #[test]
    fn test_encode_bounds() {
        assert!(pkt_line(b"").is_err());
        assert!(pkt_line(&vec![0u8; MAX_PKT_PAYLOAD]).is_ok());
        assert!(pkt_line(&vec![0u8; MAX_PKT_PAYLOAD + 1]).is_err());
    }

    /// Malformed lengths fail with BadPktLine.
    #[test]
    fn test_malformed_lengths() {
        for input in [
            &b"zzzz"[..],        // non-hex
            &b"0003"[..],        // below minimum
            &b"0008ab"[..],      // truncated payload
            &b"00"[..],          // truncated header
            &b"fff0"[..],        // beyond maximum, no payload anyway
        ] {
            let mut reader = PktLineReader::new(Bytes::copy_from_slice(input));
            assert!(
                matches!(reader.read_line(), Err(GitError::BadPktLine(_))),
                "expected BadPktLine for {input:?}"
            );
        }
    }

    /// Bytes after the consumed frames stay available for the pack stream.
    #[test]
    fn test_into_rest() {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, "hello\n".to_string());
        add_flush_pkt(&mut buf);
        buf.put(&b"PACKDATA"[..]);

        let mut reader = PktLineReader::new(buf.freeze());
        assert!(matches!(reader.read_line().unwrap(), Some(PktLine::Data(_))));
        assert_eq!(reader.read_line().unwrap(), Some(PktLine::Flush));
        assert_eq!(&reader.into_rest()[..], b"PACKDATA");
    }
}
