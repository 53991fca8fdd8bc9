//! The smart-HTTP protocol state machine: reference advertisement plus
//! the receive-pack and upload-pack conversations, composed from the
//! pkt-line codec, the pack codec, and the reference tables.

use std::{io::Cursor, str::FromStr, sync::Arc};

use bytes::{Buf, Bytes, BytesMut};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::pack::decode::Pack,
    protocol::{
        pack::PackGenerator,
        pktline::{PktLine, PktLineReader, add_flush_pkt, add_pkt_line_string},
        types::{CAP_LIST, LF, NUL, RefCommand, SP, ServiceType},
    },
    repository::Repository,
    storage::ObjectStore,
};

/// Driver for one repository's smart-HTTP conversations.
///
/// The repository metadata record travels in and out of each call
/// explicitly; the caller owns persistence and locking.
pub struct SmartProtocol {
    store: Arc<dyn ObjectStore>,
    pub command_list: Vec<RefCommand>,
}

/// Read the next space/NUL-delimited token off the front of a line.
fn next_token(line: &mut Bytes) -> String {
    let mut buf = Vec::new();
    while line.has_remaining() {
        let c = line.get_u8();
        if c.is_ascii_whitespace() || c == 0 {
            break;
        }
        buf.push(c);
    }
    String::from_utf8_lossy(&buf).to_string()
}

impl SmartProtocol {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            command_list: Vec::new(),
        }
    }

    /// Build the `info/refs` advertisement body for the given service.
    ///
    /// Refs still at the null hash are placeholders and are not
    /// advertised; a repository with none advertised sends the
    /// `capabilities^{}` form.
    pub fn git_info_refs(&self, repo: &Repository, service_type: ServiceType) -> BytesMut {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, format!("# service={service_type}{LF}"));
        add_flush_pkt(&mut buf);

        let advertised = repo.refs.advertised();
        if advertised.is_empty() {
            let zero = ObjectHash::zero_str();
            add_pkt_line_string(
                &mut buf,
                format!("{zero}{SP}capabilities^{{}}{NUL}{CAP_LIST}{LF}"),
            );
        } else {
            let mut caps = CAP_LIST.to_string();
            if service_type == ServiceType::UploadPack {
                caps.push_str(&format!(" symref=HEAD:refs/{}", repo.refs.head.ref_name));
            }
            let head_hash = repo.refs.head.hash;
            add_pkt_line_string(&mut buf, format!("{head_hash}{SP}HEAD{NUL}{caps}{LF}"));
            for (name, hash) in advertised {
                add_pkt_line_string(&mut buf, format!("{hash}{SP}{name}{LF}"));
            }
        }

        add_flush_pkt(&mut buf);
        tracing::debug!("info/refs advertisement: {} bytes", buf.len());
        buf
    }

    /// Parse one `<old> <new> <ref>[\0caps]` command line.
    fn parse_ref_command(mut line: Bytes) -> Option<RefCommand> {
        let old = next_token(&mut line);
        let new = next_token(&mut line);
        let ref_name = next_token(&mut line);
        if old.is_empty() || new.is_empty() || ref_name.is_empty() {
            return None;
        }
        Some(RefCommand::new(old, new, ref_name))
    }

    /// Serve one receive-pack (push) request body, mutating `repo`'s
    /// reference tables in place.
    ///
    /// Every failure folds into the report-status body: a pack that does
    /// not verify yields `unpack <msg>` and each ref command then fails
    /// on its own because the objects it needs never landed. Ref updates
    /// are only applied after the trailer verified, so an aborted request
    /// cannot leave the tables pointing at missing objects.
    pub fn git_receive_pack(&mut self, repo: &mut Repository, body: Bytes) -> Bytes {
        self.command_list.clear();
        let mut report = BytesMut::new();

        let mut reader = PktLineReader::new(body);
        loop {
            match reader.read_line() {
                Ok(Some(PktLine::Data(line))) => match Self::parse_ref_command(line) {
                    Some(command) => self.command_list.push(command),
                    None => {
                        tracing::warn!("ignoring malformed ref-update command");
                    }
                },
                Ok(Some(PktLine::Flush)) => break,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("receive-pack command stream: {err}");
                    add_pkt_line_string(&mut report, format!("unpack {err}\n"));
                    add_flush_pkt(&mut report);
                    return report.freeze();
                }
            }
        }

        let pack_data = reader.into_rest();
        let unpack_result = if pack_data.is_empty() {
            // Delete-only pushes carry no pack.
            Ok(())
        } else {
            self.unpack(pack_data)
        };

        match &unpack_result {
            Ok(()) => add_pkt_line_string(&mut report, "unpack ok\n".to_string()),
            Err(err) => {
                tracing::warn!("receive-pack unpack failed: {err}");
                add_pkt_line_string(&mut report, format!("unpack {err}\n"));
            }
        }

        // Status lines come back in command order.
        for command in &mut self.command_list {
            Self::apply_command(&self.store, repo, command);
            add_pkt_line_string(&mut report, command.report_line());
        }

        add_flush_pkt(&mut report);
        report.freeze()
    }

    /// Decode the pushed pack and commit its objects to the store.
    ///
    /// Entries stage in memory until the trailer verified; a corrupt pack
    /// therefore leaves the store untouched and every ref command that
    /// needed its objects fails the existence check afterwards.
    fn unpack(&self, pack_data: Bytes) -> Result<(), GitError> {
        let store = &self.store;
        let mut entries = Vec::new();
        let pack = Pack::decode(
            &mut Cursor::new(pack_data.as_ref()),
            |hash| store.get(hash).ok(),
            |entry, _offset| entries.push(entry),
        )?;
        for entry in entries {
            store.put(entry)?;
        }
        tracing::debug!(
            "unpacked {} objects, pack {}",
            pack.number,
            pack.signature
        );
        Ok(())
    }

    /// Apply one ref-update command against the metadata tables and mirror
    /// the outcome into the store's loose refs.
    fn apply_command(store: &Arc<dyn ObjectStore>, repo: &mut Repository, command: &mut RefCommand) {
        let old = match ObjectHash::from_str(&command.old_hash) {
            Ok(hash) => hash,
            Err(err) => {
                command.failed(err.to_string());
                return;
            }
        };
        let new = match ObjectHash::from_str(&command.new_hash) {
            Ok(hash) => hash,
            Err(err) => {
                command.failed(err.to_string());
                return;
            }
        };

        // Never point a ref at an object the store does not hold.
        if !new.is_zero() && !store.has(&new) {
            command.failed("missing necessary objects".to_string());
            return;
        }

        match repo.refs.update_ref(&command.ref_name, old, new) {
            Ok(()) => {
                let mirror = if new.is_zero() {
                    store.delete_ref(&command.ref_name)
                } else {
                    store.set_ref(&command.ref_name, new)
                };
                if let Err(err) = mirror {
                    tracing::warn!("loose ref mirror for {} failed: {err}", command.ref_name);
                }
                command.success();
            }
            Err(err) => command.failed(err.to_string()),
        }
    }

    /// Serve one upload-pack (fetch) request body.
    ///
    /// Returns the `NAK` pkt-line followed by the pack stream of the full
    /// closure. Haves are collected but ignored: no common-commit
    /// negotiation happens in protocol v1 here.
    pub fn git_upload_pack(
        &self,
        body: Bytes,
    ) -> Result<(BytesMut, ReceiverStream<Vec<u8>>), GitError> {
        let mut wants: Vec<ObjectHash> = Vec::new();
        let mut haves: Vec<ObjectHash> = Vec::new();

        let mut reader = PktLineReader::new(body);
        loop {
            match reader.read_line()? {
                None => break,
                Some(PktLine::Flush) => continue,
                Some(PktLine::Data(mut line)) => {
                    let command = next_token(&mut line);
                    match command.as_str() {
                        "want" => wants.push(ObjectHash::from_str(&next_token(&mut line))?),
                        "have" => haves.push(ObjectHash::from_str(&next_token(&mut line))?),
                        "done" => break,
                        other => {
                            tracing::warn!("unknown upload-pack command: {other}");
                        }
                    }
                }
            }
        }

        tracing::debug!("upload-pack: wants={} haves={}", wants.len(), haves.len());

        let mut protocol_buf = BytesMut::new();
        add_pkt_line_string(&mut protocol_buf, "NAK\n".to_string());

        let generator = PackGenerator::new(self.store.clone());
        let pack_stream = generator.generate_full_pack(wants)?;
        Ok((protocol_buf, pack_stream))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use futures::StreamExt;

    use super::*;
    use crate::{
        internal::{
            object::{
                blob::Blob,
                commit::Commit,
                tree::{Tree, TreeItem, TreeItemMode},
            },
            pack::{encode::encode_pack, entry::Entry},
        },
        protocol::pktline::FLUSH_PKT,
        storage::memory::MemObjectStore,
    };

    fn store() -> Arc<dyn ObjectStore> {
        Arc::new(MemObjectStore::new())
    }

    fn sample_objects() -> (Commit, Tree, Blob) {
        let blob = Blob::from_content("hello");
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            "hello.txt".to_string(),
        )])
        .unwrap();
        let commit = Commit::new(
            "author tester <tester@example.com> 0 +0000".to_string(),
            "committer tester <tester@example.com> 0 +0000".to_string(),
            tree.id,
            vec![],
            "init commit",
        );
        (commit, tree, blob)
    }

    fn push_body(commands: &[String], pack: &[u8]) -> Bytes {
        let mut body = BytesMut::new();
        for command in commands {
            add_pkt_line_string(&mut body, command.clone());
        }
        body.put(&FLUSH_PKT[..]);
        body.put(pack);
        body.freeze()
    }

    fn read_lines(bytes: Bytes) -> Vec<Option<String>> {
        let mut reader = PktLineReader::new(bytes);
        let mut lines = Vec::new();
        while let Some(frame) = reader.read_line().unwrap() {
            match frame {
                PktLine::Data(data) => {
                    lines.push(Some(String::from_utf8_lossy(&data).to_string()))
                }
                PktLine::Flush => lines.push(None),
            }
        }
        lines
    }

    /// Empty-repo advertisement sends the capabilities^{} form.
    #[test]
    fn test_info_refs_empty_repo() {
        let smart = SmartProtocol::new(store());
        let repo = Repository::new("a/b");
        let buf = smart.git_info_refs(&repo, ServiceType::UploadPack);

        let lines = read_lines(buf.freeze());
        assert_eq!(
            lines[0].as_deref(),
            Some("# service=git-upload-pack\n")
        );
        assert_eq!(lines[1], None);
        assert_eq!(
            lines[2].as_deref(),
            Some(&*format!(
                "{} capabilities^{{}}\x00report-status delete-refs ofs-delta\n",
                "0".repeat(40)
            ))
        );
        assert_eq!(lines[3], None);
        assert_eq!(lines.len(), 4);
    }

    /// A non-empty repo advertises HEAD (with symref for upload-pack) and
    /// each ref.
    #[test]
    fn test_info_refs_with_refs() {
        let smart = SmartProtocol::new(store());
        let mut repo = Repository::new("a/b");
        let hash = ObjectHash::new(b"tip");
        repo.refs
            .update_ref("refs/heads/master", ObjectHash::ZERO, hash)
            .unwrap();

        let lines = read_lines(smart.git_info_refs(&repo, ServiceType::UploadPack).freeze());
        let head_line = lines[2].as_deref().unwrap();
        assert!(head_line.starts_with(&format!("{hash} HEAD\x00")));
        assert!(head_line.contains("report-status delete-refs ofs-delta"));
        assert!(head_line.ends_with(" symref=HEAD:refs/heads/master\n"));
        assert_eq!(
            lines[3].as_deref(),
            Some(&*format!("{hash} refs/heads/master\n"))
        );

        // receive-pack advertisements carry no symref.
        let lines = read_lines(
            smart
                .git_info_refs(&repo, ServiceType::ReceivePack)
                .freeze(),
        );
        assert!(!lines[2].as_deref().unwrap().contains("symref"));
    }

    /// A first push decodes the pack, updates the ref, and reports ok.
    #[test]
    fn test_receive_pack_first_push() {
        let store = store();
        let mut smart = SmartProtocol::new(store.clone());
        let mut repo = Repository::new("a/b");

        let (commit, tree, blob) = sample_objects();
        let entries = vec![
            Entry::from(commit.clone()),
            Entry::from(tree.clone()),
            Entry::from(blob.clone()),
        ];
        let (_, pack) = encode_pack(&entries, Vec::new()).unwrap();

        let body = push_body(
            &[format!(
                "{} {} refs/heads/master\x00report-status",
                ObjectHash::zero_str(),
                commit.id
            )],
            &pack,
        );
        let report = smart.git_receive_pack(&mut repo, body);

        let lines = read_lines(report);
        assert_eq!(lines[0].as_deref(), Some("unpack ok\n"));
        assert_eq!(lines[1].as_deref(), Some("ok refs/heads/master\n"));
        assert_eq!(lines[2], None);

        assert_eq!(repo.refs.head_hash("master"), Some(commit.id));
        assert_eq!(repo.refs.head.hash, commit.id);
        assert!(store.has(&commit.id));
        assert!(store.has(&tree.id));
        assert!(store.has(&blob.id));
        assert_eq!(
            store.iter_refs(),
            vec![("refs/heads/master".to_string(), commit.id)]
        );
    }

    /// A stale old hash yields ng and leaves the ref unchanged.
    #[test]
    fn test_receive_pack_stale_old_hash() {
        let store = store();
        let mut smart = SmartProtocol::new(store.clone());
        let mut repo = Repository::new("a/b");

        let (commit, tree, blob) = sample_objects();
        let entries = vec![
            Entry::from(commit.clone()),
            Entry::from(tree),
            Entry::from(blob),
        ];
        let (_, pack) = encode_pack(&entries, Vec::new()).unwrap();
        let body = push_body(
            &[format!(
                "{} {} refs/heads/master",
                ObjectHash::zero_str(),
                commit.id
            )],
            &pack,
        );
        smart.git_receive_pack(&mut repo, body);

        // Second push reports the wrong old hash.
        let wrong_old = ObjectHash::new(b"nope");
        let body = push_body(
            &[format!("{wrong_old} {} refs/heads/master", commit.id)],
            &[],
        );
        let lines = read_lines(smart.git_receive_pack(&mut repo, body));
        assert_eq!(lines[0].as_deref(), Some("unpack ok\n"));
        assert!(lines[1].as_deref().unwrap().starts_with("ng refs/heads/master"));
        assert_eq!(repo.refs.head_hash("master"), Some(commit.id));
    }

    /// A corrupt pack trailer reports unpack failure and applies nothing.
    #[test]
    fn test_receive_pack_corrupt_pack() {
        let store = store();
        let mut smart = SmartProtocol::new(store.clone());
        let mut repo = Repository::new("a/b");

        let (commit, tree, blob) = sample_objects();
        let entries = vec![
            Entry::from(commit.clone()),
            Entry::from(tree),
            Entry::from(blob),
        ];
        let (_, mut pack) = encode_pack(&entries, Vec::new()).unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0xff;

        let body = push_body(
            &[format!(
                "{} {} refs/heads/master",
                ObjectHash::zero_str(),
                commit.id
            )],
            &pack,
        );
        let lines = read_lines(smart.git_receive_pack(&mut repo, body));

        assert!(lines[0].as_deref().unwrap().starts_with("unpack "));
        assert_ne!(lines[0].as_deref(), Some("unpack ok\n"));
        assert!(lines[1].as_deref().unwrap().starts_with("ng refs/heads/master"));
        assert_eq!(repo.refs.head_hash("master"), Some(ObjectHash::ZERO));
    }

    /// delete-refs: a null new hash removes the ref and its loose mirror.
    #[test]
    fn test_receive_pack_delete_ref() {
        let store = store();
        let mut smart = SmartProtocol::new(store.clone());
        let mut repo = Repository::new("a/b");

        let (commit, tree, blob) = sample_objects();
        let entries = vec![
            Entry::from(commit.clone()),
            Entry::from(tree),
            Entry::from(blob),
        ];
        let (_, pack) = encode_pack(&entries, Vec::new()).unwrap();
        let body = push_body(
            &[format!(
                "{} {} refs/heads/dev",
                ObjectHash::zero_str(),
                commit.id
            )],
            &pack,
        );
        smart.git_receive_pack(&mut repo, body);
        assert_eq!(repo.refs.head_hash("dev"), Some(commit.id));

        let body = push_body(
            &[format!(
                "{} {} refs/heads/dev",
                commit.id,
                ObjectHash::zero_str()
            )],
            &[],
        );
        let lines = read_lines(smart.git_receive_pack(&mut repo, body));
        assert_eq!(lines[1].as_deref(), Some("ok refs/heads/dev\n"));
        assert_eq!(repo.refs.head_hash("dev"), None);
        assert!(store.iter_refs().is_empty());
    }

    /// Multiple commands report independently, in input order.
    #[test]
    fn test_receive_pack_mixed_results() {
        let store = store();
        let mut smart = SmartProtocol::new(store.clone());
        let mut repo = Repository::new("a/b");

        let (commit, tree, blob) = sample_objects();
        let entries = vec![
            Entry::from(commit.clone()),
            Entry::from(tree),
            Entry::from(blob),
        ];
        let (_, pack) = encode_pack(&entries, Vec::new()).unwrap();

        let missing = ObjectHash::new(b"not pushed");
        let body = push_body(
            &[
                format!("{} {} refs/heads/master", ObjectHash::zero_str(), commit.id),
                format!("{} {missing} refs/heads/dev", ObjectHash::zero_str()),
                format!("{} {} refs/notes/x", ObjectHash::zero_str(), commit.id),
            ],
            &pack,
        );
        let lines = read_lines(smart.git_receive_pack(&mut repo, body));

        assert_eq!(lines[0].as_deref(), Some("unpack ok\n"));
        assert_eq!(lines[1].as_deref(), Some("ok refs/heads/master\n"));
        assert!(lines[2].as_deref().unwrap().starts_with("ng refs/heads/dev"));
        assert!(lines[3].as_deref().unwrap().starts_with("ng refs/notes/x"));
        assert_eq!(lines[4], None);
    }

    /// upload-pack answers NAK and streams the closure of the wants.
    #[tokio::test]
    async fn test_upload_pack_full_closure() {
        let store = store();
        let (commit, tree, blob) = sample_objects();
        store.put(Entry::from(commit.clone())).unwrap();
        store.put(Entry::from(tree.clone())).unwrap();
        store.put(Entry::from(blob.clone())).unwrap();

        let smart = SmartProtocol::new(store);
        let mut body = BytesMut::new();
        add_pkt_line_string(&mut body, format!("want {}\n", commit.id));
        body.put(&FLUSH_PKT[..]);
        add_pkt_line_string(&mut body, "done\n".to_string());

        let (nak, mut stream) = smart.git_upload_pack(body.freeze()).unwrap();
        assert_eq!(read_lines(nak.freeze())[0].as_deref(), Some("NAK\n"));

        let mut pack_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            pack_bytes.extend_from_slice(&chunk);
        }

        let mut hashes = Vec::new();
        Pack::decode(
            &mut Cursor::new(pack_bytes),
            |_| None,
            |entry, _| hashes.push(entry.hash),
        )
        .unwrap();
        assert_eq!(hashes.len(), 3);
        assert!(hashes.contains(&commit.id));
        assert!(hashes.contains(&tree.id));
        assert!(hashes.contains(&blob.id));
    }

    /// Malformed want hashes surface as errors for the transport layer.
    #[test]
    fn test_upload_pack_bad_want() {
        let smart = SmartProtocol::new(store());
        let mut body = BytesMut::new();
        add_pkt_line_string(&mut body, "want nothex\n".to_string());
        assert!(smart.git_upload_pack(body.freeze()).is_err());
    }
}
