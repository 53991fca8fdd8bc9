//! Repository metadata: reference tables and the CRUD stores that persist
//! them.

pub mod refs;
pub mod store;

pub use refs::{RepositoryHead, RepositoryRefs};
pub use store::{FsRepoStore, MemRepoStore, RepoStore, Repository};
