//! Axum router and request dispatch for the smart HTTP endpoints.
//!
//! Routes are matched on the path suffix, everything before the suffix being
//! the repository:
//! - `GET  <repo>/info/refs?service=<svc>` - ref advertisement
//! - `POST <repo>/git-upload-pack`         - fetch/clone exchange
//! - `POST <repo>/git-receive-pack`        - push exchange
//!
//! Any other path is refused with 403.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use super::auth::{extract_credential, AuthBackend, RequestMeta};
use super::bridge::Bridge;
use super::resolver::{RepoContext, RepoResolver, ResolveError};
use crate::protocol::RpcKind;

const INFO_REFS_SUFFIX: &str = "/info/refs";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Authentication settings for the git routes.
#[derive(Clone)]
pub struct AuthGate {
    pub realm: String,
    /// Without a backend every request is refused.
    pub backend: Option<Arc<dyn AuthBackend>>,
}

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub resolver: RepoResolver,
    pub bridge: Bridge,
    /// `None` disables authentication.
    pub auth: Option<AuthGate>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`].  All paths go through [`dispatch`].
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// One completion line per request.
async fn log_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let (parts, body) = response.into_parts();
    let body = observe_body(body, move |bytes| {
        info!(
            %method,
            %path,
            status,
            %user_agent,
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
    });
    Response::from_parts(parts, body)
}

/// Wrap `body` so `on_end` runs with the number of bytes sent once the body
/// is finished or abandoned by the client.
fn observe_body<F>(body: Body, on_end: F) -> Body
where
    F: FnOnce(u64) + Send + 'static,
{
    let mut end = BodyEnd {
        bytes: 0,
        on_end: Some(on_end),
    };
    Body::from_stream(body.into_data_stream().map(move |chunk| {
        if let Ok(data) = &chunk {
            end.bytes += data.len() as u64;
        }
        chunk
    }))
}

struct BodyEnd<F: FnOnce(u64)> {
    bytes: u64,
    on_end: Option<F>,
}

impl<F: FnOnce(u64)> Drop for BodyEnd<F> {
    fn drop(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            on_end(self.bytes);
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    InfoRefs,
    Rpc(RpcKind),
}

/// Split `path` into the repository part and the git endpoint it ends with.
fn match_route(path: &str) -> Option<(&str, Route)> {
    if let Some(repo) = path.strip_suffix(INFO_REFS_SUFFIX) {
        return Some((repo, Route::InfoRefs));
    }
    [RpcKind::UploadPack, RpcKind::ReceivePack]
        .into_iter()
        .find_map(|rpc| {
            path.strip_suffix(rpc.service_name())
                .and_then(|rest| rest.strip_suffix('/'))
                .map(|repo| (repo, Route::Rpc(rpc)))
        })
}

#[derive(Debug, Default, Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

#[instrument(skip_all, fields(%method, path = %uri.path()))]
async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let path = uri.path();
    let Some((repo_part, route)) = match_route(path) else {
        return Err(AppError::Forbidden(format!("unsupported path: {path}")));
    };

    match route {
        Route::InfoRefs => {
            if method != Method::GET {
                return Err(AppError::MethodNotAllowed);
            }
            let query = Query::<InfoRefsQuery>::try_from_uri(&uri)
                .map(|Query(q)| q)
                .unwrap_or_default();
            let service = query.service.unwrap_or_default();
            let rpc: RpcKind = service
                .parse()
                .map_err(|e: crate::protocol::service::UnsupportedService| {
                    AppError::NotFound(e.to_string())
                })?;

            let repo = resolve(&state, repo_part).await?;
            authorize(&state, &method, path, &headers, &repo).await?;
            Ok(state.bridge.advertise(rpc, &repo).await?)
        }
        Route::Rpc(rpc) => {
            if method != Method::POST {
                return Err(AppError::MethodNotAllowed);
            }
            let repo = resolve(&state, repo_part).await?;
            authorize(&state, &method, path, &headers, &repo).await?;
            Ok(state.bridge.execute_rpc(rpc, &repo, &headers, body).await?)
        }
    }
}

async fn resolve(state: &AppState, repo_part: &str) -> Result<RepoContext, AppError> {
    state.resolver.resolve(repo_part).await.map_err(|e| match e {
        ResolveError::MissingName | ResolveError::InvalidPath(_) => AppError::BadRequest(e.to_string()),
        ResolveError::NotFound(_) => AppError::NotFound(e.to_string()),
        ResolveError::Init { ref name, .. } => {
            error!(error = %e, "repository auto-create failed");
            AppError::NotFound(format!("repository not found: {name}"))
        }
    })
}

async fn authorize(
    state: &AppState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    repo: &RepoContext,
) -> Result<(), AppError> {
    let Some(gate) = &state.auth else {
        return Ok(());
    };
    let unauthorized = |message: &str| AppError::Unauthorized {
        realm: gate.realm.clone(),
        message: message.to_owned(),
    };

    let Some(backend) = &gate.backend else {
        return Err(unauthorized("authentication unavailable"));
    };
    let credential = extract_credential(headers).map_err(|e| unauthorized(&e.to_string()))?;
    let meta = RequestMeta {
        method: method.clone(),
        path: path.to_owned(),
        repo: repo.clone(),
    };

    match backend.authenticate(&credential, &meta).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!(user = %credential.username, repo = %repo.repo_name, "credentials rejected");
            Err(unauthorized("invalid credentials"))
        }
        Err(e) => {
            warn!(user = %credential.username, error = %e, "auth backend failed");
            Err(unauthorized("authentication failed"))
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    MethodNotAllowed,
    Forbidden(String),
    /// Missing or rejected credentials.
    Unauthorized { realm: String, message: String },
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response()
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            AppError::Unauthorized { realm, message } => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{realm}\""))],
                message,
            )
                .into_response(),
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
