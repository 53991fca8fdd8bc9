//! Error types for git-depot.
//!
//! This module defines a unified error enumeration used across object
//! parsing, pack encoding/decoding, reference transactions, the metadata
//! store, and the smart-HTTP protocol driver. It integrates with
//! `thiserror` to provide `Display` implementations and error source
//! chaining where applicable.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the git-depot server.
pub enum GitError {
    /// Repository not found.
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    /// Object missing from the store.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Reference does not exist in the heads/tags tables.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// Duplicate repository create.
    #[error("repository exists: {0}")]
    AlreadyExists(String),

    /// Malformed hash literal.
    #[error("the `{0}` is not a valid hash value")]
    InvalidHash(String),

    /// Reference outside `refs/heads/` and `refs/tags/`.
    #[error("invalid ref: {0}")]
    InvalidRef(String),

    /// Compare-and-swap on a ref failed: the stored hash differs from the
    /// old hash the client reported.
    #[error("previous hash mismatch for {reference}: {stored} != {reported}")]
    StaleRef {
        reference: String,
        stored: String,
        reported: String,
    },

    /// Metadata optimistic-concurrency mismatch.
    #[error("stale repository version for {0}")]
    StaleVersion(String),

    /// Malformed pkt-line framing.
    #[error("bad pkt-line: {0}")]
    BadPktLine(String),

    /// Malformed or unsupported git object body.
    #[error("bad object: {0}")]
    BadObject(String),

    /// Invalid or unsupported git object type.
    #[error("the `{0}` is not a valid git object type")]
    InvalidObjectType(String),

    /// Pack trailer SHA-1 did not match the stream.
    #[error("pack checksum mismatch: computed {computed}, trailer {expected}")]
    BadChecksum { computed: String, expected: String },

    /// Malformed or unsupported pack stream.
    #[error("the `{0}` is not a valid pack file")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("the `{0}` is not a valid pack header")]
    InvalidPackHeader(String),

    /// Delta object reconstruction error.
    #[error("delta object error: {0}")]
    DeltaObjectError(String),

    /// Invalid CLI or function argument.
    #[error("argument parse failed: {0}")]
    InvalidArgument(String),

    /// I/O error from an underlying reader, writer, or the filesystem.
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
}
