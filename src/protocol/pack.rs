//! Pack generation for upload-pack: walks the object graph from the
//! client's wants and streams the closure as a PACK v2 body.

use std::{
    collections::{HashSet, VecDeque},
    io::{self, Write},
    sync::Arc,
};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::{ObjectTrait, commit::Commit, tree::Tree, types::ObjectType},
        pack::{encode::encode_pack, entry::Entry},
    },
    storage::ObjectStore,
};

/// Walks wants into an object closure and encodes it.
pub struct PackGenerator {
    store: Arc<dyn ObjectStore>,
}

impl PackGenerator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Transitive closure of the wants: each commit contributes its tree
    /// and parents, each tree its entries; blobs and tags are terminal.
    ///
    /// Missing objects are logged and skipped so the closure stays
    /// best-effort; the peer re-requests anything absent on a later
    /// fetch. The visited set guards against cycles in corrupt graphs.
    pub fn collect_closure(&self, wants: &[ObjectHash]) -> Vec<Entry> {
        let mut visited: HashSet<ObjectHash> = HashSet::new();
        let mut queue: VecDeque<ObjectHash> = wants.iter().copied().collect();
        let mut entries = Vec::new();

        while let Some(hash) = queue.pop_front() {
            if hash.is_zero() || !visited.insert(hash) {
                continue;
            }
            let entry = match self.store.get(&hash) {
                Ok(entry) => entry,
                Err(_) => {
                    tracing::warn!("closure walk skipping missing object {hash}");
                    continue;
                }
            };

            match entry.obj_type {
                ObjectType::Commit => match Commit::from_bytes(&entry.data, entry.hash) {
                    Ok(commit) => {
                        queue.push_back(commit.tree_id);
                        queue.extend(commit.parent_ids);
                    }
                    Err(err) => {
                        tracing::warn!("closure walk cannot parse commit {hash}: {err}");
                    }
                },
                ObjectType::Tree => match Tree::from_bytes(&entry.data, entry.hash) {
                    Ok(tree) => queue.extend(tree.tree_items.iter().map(|item| item.id)),
                    Err(err) => {
                        tracing::warn!("closure walk cannot parse tree {hash}: {err}");
                    }
                },
                ObjectType::Blob | ObjectType::Tag => {}
                ObjectType::OffsetDelta | ObjectType::RefDelta => {
                    // Stores only hold base objects; a delta here means
                    // corruption upstream.
                    tracing::warn!("closure walk skipping delta entry {hash}");
                    continue;
                }
            }

            entries.push(entry);
        }

        entries
    }

    /// Stream the full closure of the wants as a pack body.
    ///
    /// The encoder runs on a blocking task feeding a channel, so the
    /// response body can start flowing while later objects compress.
    pub fn generate_full_pack(
        &self,
        wants: Vec<ObjectHash>,
    ) -> Result<ReceiverStream<Vec<u8>>, GitError> {
        let entries = self.collect_closure(&wants);
        tracing::debug!("upload-pack closure: {} objects", entries.len());

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        tokio::task::spawn_blocking(move || {
            let writer = ChannelWriter { tx };
            if let Err(err) = encode_pack(&entries, writer) {
                tracing::error!("failed to encode pack stream: {err}");
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// `io::Write` adapter that ships chunks into an mpsc channel.
struct ChannelWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pack receiver dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
