//! Internal object model, pack codec, and zlib plumbing.

pub mod object;
pub mod pack;
pub mod zlib;
