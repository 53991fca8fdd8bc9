//! Streaming zlib support for pack entry bodies.

pub mod inflate;
