//! Push/fetch scenarios against the filesystem backend: loose objects,
//! ref files, metadata sidecars, and state surviving a server restart.

use std::{io::Cursor, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode},
};
use bytes::{BufMut, BytesMut};
use tempfile::TempDir;
use tower::util::ServiceExt;

use git_depot::{
    hash::ObjectHash,
    internal::{
        object::{commit::Commit, tree::Tree},
        pack::{decode::Pack, encode::encode_pack, entry::Entry},
    },
    protocol::pktline::{FLUSH_PKT, PktLine, PktLineReader, add_pkt_line_string},
    server::{AppState, app},
};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

fn split_pkt_lines(bytes: Bytes) -> (Vec<Option<String>>, Bytes) {
    let mut reader = PktLineReader::new(bytes);
    let mut lines = Vec::new();
    loop {
        match reader.read_line() {
            Ok(Some(PktLine::Data(data))) => {
                lines.push(Some(String::from_utf8_lossy(&data).to_string()))
            }
            Ok(Some(PktLine::Flush)) => lines.push(None),
            Ok(None) | Err(_) => break,
        }
    }
    (lines, reader.into_rest())
}

fn empty_commit() -> (Commit, Tree) {
    let tree = Tree::from_tree_items(vec![]).unwrap();
    let commit = Commit::new(
        "author tester <tester@example.com> 1700000000 +0000".to_string(),
        "committer tester <tester@example.com> 1700000000 +0000".to_string(),
        tree.id,
        vec![],
        "empty commit",
    );
    (commit, tree)
}

/// A full create → push → fetch cycle on disk, then a fresh process view
/// of the same data dir.
#[tokio::test]
async fn push_and_fetch_on_disk() {
    let dir = TempDir::new().unwrap();
    let router = app(Arc::new(AppState::on_disk(dir.path().to_path_buf())));

    let request = Request::builder()
        .method("PUT")
        .uri("/team/repo")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::OK);

    // Bare layout exists before any push.
    let repo_dir = dir.path().join("team/repo");
    assert!(repo_dir.join("HEAD").exists());
    assert!(repo_dir.join("objects").is_dir());

    // Push an empty commit.
    let (commit, tree) = empty_commit();
    let entries = vec![Entry::from(commit.clone()), Entry::from(tree.clone())];
    let (_, pack) = encode_pack(&entries, Vec::new()).unwrap();

    let mut body = BytesMut::new();
    add_pkt_line_string(
        &mut body,
        format!(
            "{} {} refs/heads/master\x00report-status",
            ObjectHash::zero_str(),
            commit.id
        ),
    );
    body.put(&FLUSH_PKT[..]);
    body.put(&pack[..]);

    let request = Request::builder()
        .method("POST")
        .uri("/team/repo/git-receive-pack")
        .body(Body::from(body.freeze()))
        .unwrap();
    let (status, report) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    let (lines, _) = split_pkt_lines(report);
    assert_eq!(lines[0].as_deref(), Some("unpack ok\n"));
    assert_eq!(lines[1].as_deref(), Some("ok refs/heads/master\n"));

    // Loose objects and the ref file landed in the bare layout.
    let commit_hex = commit.id.to_string();
    assert!(
        repo_dir
            .join("objects")
            .join(&commit_hex[..2])
            .join(&commit_hex[2..])
            .exists()
    );
    assert_eq!(
        std::fs::read_to_string(repo_dir.join("refs/heads/master"))
            .unwrap()
            .trim(),
        commit_hex
    );

    // A restarted server sees the same repository.
    let restarted = app(Arc::new(AppState::on_disk(dir.path().to_path_buf())));
    let request = Request::builder()
        .uri("/team/repo/info/refs?service=git-upload-pack")
        .body(Body::empty())
        .unwrap();
    let (status, advertisement) = send(&restarted, request).await;
    assert_eq!(status, StatusCode::OK);
    let (lines, _) = split_pkt_lines(advertisement);
    assert!(
        lines[2]
            .as_deref()
            .unwrap()
            .starts_with(&format!("{commit_hex} HEAD\x00"))
    );

    // Fetch from the restarted instance and verify the pack.
    let mut body = BytesMut::new();
    add_pkt_line_string(&mut body, format!("want {commit_hex}\n"));
    body.put(&FLUSH_PKT[..]);
    add_pkt_line_string(&mut body, "done\n".to_string());
    let request = Request::builder()
        .method("POST")
        .uri("/team/repo/git-upload-pack")
        .body(Body::from(body.freeze()))
        .unwrap();
    let (status, response) = send(&restarted, request).await;
    assert_eq!(status, StatusCode::OK);

    let (lines, pack_bytes) = split_pkt_lines(response);
    assert_eq!(lines[0].as_deref(), Some("NAK\n"));
    let mut hashes = Vec::new();
    Pack::decode(
        &mut Cursor::new(pack_bytes.to_vec()),
        |_| None,
        |entry, _| hashes.push(entry.hash),
    )
    .unwrap();
    assert!(hashes.contains(&commit.id));
    assert!(hashes.contains(&tree.id));
}
