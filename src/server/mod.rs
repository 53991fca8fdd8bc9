//! HTTP surface: request dispatch for the three smart-HTTP endpoints and
//! the JSON repository metadata routes.
//!
//! Repository ids contain slashes (`owner/name`), so requests are matched
//! by suffix from a single fallback handler rather than by fixed route
//! patterns. The id and service travel as explicit handler arguments from
//! here on down.

use std::{convert::Infallible, path::PathBuf, str::FromStr, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{Method, StatusCode, header},
    response::Response,
};
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Mutex;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    protocol::{ServiceType, SmartProtocol},
    repository::{FsRepoStore, MemRepoStore, RepoStore, Repository, refs::RepositoryRefs},
    storage::{
        ObjectStorage, filesystem::FsObjectStorage, memory::MemObjectStorage,
    },
};

/// Shared server state: the metadata store, the object storage registry,
/// and one push lock per repository.
pub struct AppState {
    pub repos: Arc<dyn RepoStore>,
    pub storage: Arc<dyn ObjectStorage>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    /// Everything in memory; state dies with the process.
    pub fn in_memory() -> AppState {
        AppState {
            repos: Arc::new(MemRepoStore::new()),
            storage: Arc::new(MemObjectStorage::new()),
            locks: DashMap::new(),
        }
    }

    /// Bare repositories and metadata sidecars under `data_dir`.
    pub fn on_disk(data_dir: PathBuf) -> AppState {
        AppState {
            repos: Arc::new(FsRepoStore::new(data_dir.clone())),
            storage: Arc::new(FsObjectStorage::new(data_dir)),
            locks: DashMap::new(),
        }
    }

    /// The mutex serializing receive-pack sessions on one repository.
    fn repo_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

type SharedState = Arc<AppState>;

/// Build the router. Every request funnels through [`dispatch`].
pub fn app(state: SharedState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

const RECEIVE_PACK_SUFFIX: &str = "/git-receive-pack";
const UPLOAD_PACK_SUFFIX: &str = "/git-upload-pack";
const INFO_REFS_SUFFIX: &str = "/info/refs";

async fn dispatch(State(state): State<SharedState>, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    tracing::debug!("{method} {path}");

    match method {
        Method::GET if path != INFO_REFS_SUFFIX && path.ends_with(INFO_REFS_SUFFIX) => {
            let repo_id = trim_route(&path, INFO_REFS_SUFFIX);
            match service_from_query(&query) {
                Some(service) => handle_info_refs(state, repo_id, service).await,
                None => plain_response(StatusCode::BAD_REQUEST, "invalid service"),
            }
        }
        Method::POST if path != RECEIVE_PACK_SUFFIX && path.ends_with(RECEIVE_PACK_SUFFIX) => {
            let repo_id = trim_route(&path, RECEIVE_PACK_SUFFIX);
            handle_receive_pack(state, repo_id, req).await
        }
        Method::POST if path != UPLOAD_PACK_SUFFIX && path.ends_with(UPLOAD_PACK_SUFFIX) => {
            let repo_id = trim_route(&path, UPLOAD_PACK_SUFFIX);
            handle_upload_pack(state, repo_id, req).await
        }
        _ => {
            let repo_id = path.trim_start_matches('/').to_string();
            handle_repository(state, method, repo_id, req).await
        }
    }
}

/// `/a/b/info/refs` with suffix `/info/refs` yields `a/b`.
fn trim_route(path: &str, suffix: &str) -> String {
    path.trim_end_matches(suffix)
        .trim_start_matches('/')
        .to_string()
}

/// The `service` query parameter, if it names a smart service.
fn service_from_query(query: &str) -> Option<ServiceType> {
    query
        .split('&')
        .find_map(|param| match param.split_once('=') {
            Some(("service", value)) => ServiceType::from_str(value).ok(),
            _ => None,
        })
}

fn status_for(err: &GitError) -> StatusCode {
    match err {
        GitError::RepoNotFound(_) | GitError::ObjectNotFound(_) | GitError::RefNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        GitError::AlreadyExists(_) | GitError::StaleVersion(_) => StatusCode::CONFLICT,
        GitError::InvalidHash(_)
        | GitError::InvalidRef(_)
        | GitError::InvalidArgument(_)
        | GitError::BadPktLine(_)
        | GitError::BadObject(_)
        | GitError::InvalidObjectType(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(message.to_string()))
        .expect("static response parts are valid")
}

fn json_repo_response(repo: &Repository) -> Response {
    let body = serde_json::to_vec(repo).expect("metadata records always serialize");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("static response parts are valid")
}

fn json_error_response(err: &GitError) -> Response {
    let body = json!({ "error": err.to_string() }).to_string();
    Response::builder()
        .status(status_for(err))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("static response parts are valid")
}

async fn read_body(req: Request) -> Result<Bytes, GitError> {
    axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|err| GitError::IOError(std::io::Error::other(err)))
}

/// `GET /<id>/info/refs?service=<svc>` — reference advertisement.
async fn handle_info_refs(state: SharedState, repo_id: String, service: ServiceType) -> Response {
    let repo = match state.repos.get_repo(&repo_id) {
        Ok(repo) => repo,
        Err(err) => return plain_response(StatusCode::NOT_FOUND, &err.to_string()),
    };

    let smart = SmartProtocol::new(state.storage.get_store(&repo_id));
    let advertisement = smart.git_info_refs(&repo, service);

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("application/x-{service}-advertisement"),
        )
        .body(Body::from(advertisement.freeze()))
        .expect("static response parts are valid")
}

/// `POST /<id>/git-receive-pack` — push.
async fn handle_receive_pack(state: SharedState, repo_id: String, req: Request) -> Response {
    // One push at a time per repository.
    let lock = state.repo_lock(&repo_id);
    let _guard = lock.lock().await;

    let mut repo = match state.repos.get_repo(&repo_id) {
        Ok(repo) => repo,
        Err(err) => return plain_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(err) => {
            tracing::error!("receive-pack body read failed: {err}");
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    };

    let mut smart = SmartProtocol::new(state.storage.get_store(&repo_id));
    let report = smart.git_receive_pack(&mut repo, body);

    if let Err(err) = state.repos.update_repo(repo) {
        tracing::error!("failed to persist repository {repo_id}: {err}");
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "application/x-git-receive-pack-result",
        )
        .body(Body::from(report))
        .expect("static response parts are valid")
}

/// `POST /<id>/git-upload-pack` — fetch.
async fn handle_upload_pack(state: SharedState, repo_id: String, req: Request) -> Response {
    if let Err(err) = state.repos.get_repo(&repo_id) {
        return plain_response(StatusCode::NOT_FOUND, &err.to_string());
    }
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(err) => {
            tracing::error!("upload-pack body read failed: {err}");
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    };

    let smart = SmartProtocol::new(state.storage.get_store(&repo_id));
    let (nak, pack_stream) = match smart.git_upload_pack(body) {
        Ok(parts) => parts,
        Err(err) => return plain_response(status_for(&err), &err.to_string()),
    };

    // NAK pkt-line first, then the raw pack bytes with no further framing.
    let response_stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(nak.freeze()) })
        .chain(pack_stream.map(|chunk| Ok(Bytes::from(chunk))));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-git-upload-pack-result")
        .body(Body::from_stream(response_stream))
        .expect("static response parts are valid")
}

/// Keep HEAD coherent after a metadata write: it must name an existing
/// entry, except that the initial `heads/master` may dangle at the null
/// hash while the repository is empty.
fn normalize_head(refs: &mut RepositoryRefs) -> Result<(), GitError> {
    let name = refs.head.ref_name.clone();
    match refs.set_head(&name) {
        Ok(_) => Ok(()),
        Err(_) if name == "heads/master" => {
            refs.head.hash = ObjectHash::ZERO;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// `GET`/`PUT`/`POST /<id>` — metadata read / create / update.
async fn handle_repository(
    state: SharedState,
    method: Method,
    repo_id: String,
    req: Request,
) -> Response {
    // Ids are hierarchical; a bare segment is not a repository.
    if !repo_id.contains('/') {
        return plain_response(StatusCode::NOT_FOUND, "");
    }

    let result = match method {
        Method::GET => state.repos.get_repo(&repo_id),
        Method::PUT => create_repository(&state, &repo_id, req).await,
        Method::POST => update_repository(&state, &repo_id, req).await,
        _ => return plain_response(StatusCode::METHOD_NOT_ALLOWED, ""),
    };

    match result {
        Ok(repo) => json_repo_response(&repo),
        Err(err) => json_error_response(&err),
    }
}

async fn create_repository(
    state: &SharedState,
    repo_id: &str,
    req: Request,
) -> Result<Repository, GitError> {
    let body = read_body(req).await?;

    // An empty body creates a default record; the id always comes from
    // the URL.
    let mut repo = if body.is_empty() {
        Repository::new(repo_id)
    } else {
        serde_json::from_slice::<Repository>(&body)
            .map_err(|err| GitError::InvalidArgument(format!("invalid metadata body: {err}")))?
    };
    repo.id = repo_id.to_string();
    normalize_head(&mut repo.refs)?;

    state.repos.create_repo(repo)
}

async fn update_repository(
    state: &SharedState,
    repo_id: &str,
    req: Request,
) -> Result<Repository, GitError> {
    let body = read_body(req).await?;

    // Decode onto the existing record: only fields present in the body
    // replace their current values.
    let mut repo = state.repos.get_repo(repo_id)?;
    if !body.is_empty() {
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|err| GitError::InvalidArgument(format!("invalid metadata body: {err}")))?;
        if let Some(refs_value) = value.get("refs") {
            repo.refs = serde_json::from_value::<RepositoryRefs>(refs_value.clone())
                .map_err(|err| GitError::InvalidArgument(format!("invalid refs body: {err}")))?;
        }
        normalize_head(&mut repo.refs)?;
    }

    state.repos.update_repo(repo)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Suffix trimming recovers the repository id.
    #[test]
    fn test_trim_route() {
        assert_eq!(trim_route("/a/b/info/refs", INFO_REFS_SUFFIX), "a/b");
        assert_eq!(
            trim_route("/team/x/y/git-receive-pack", RECEIVE_PACK_SUFFIX),
            "team/x/y"
        );
    }

    /// Only the two smart services pass the query filter.
    #[test]
    fn test_service_from_query() {
        assert_eq!(
            service_from_query("service=git-upload-pack"),
            Some(ServiceType::UploadPack)
        );
        assert_eq!(
            service_from_query("foo=1&service=git-receive-pack"),
            Some(ServiceType::ReceivePack)
        );
        assert_eq!(service_from_query("service=git-annex"), None);
        assert_eq!(service_from_query(""), None);
    }
}
