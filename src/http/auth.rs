//! HTTP Basic credentials and the pluggable backend that checks them.

use std::collections::HashMap;

use axum::http::{header, HeaderMap, Method};
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::resolver::RepoContext;

/// Username/password pair taken from an `Authorization: Basic` header.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("missing Authorization header")]
    Missing,
    #[error("authorization scheme is not Basic")]
    Scheme,
    #[error("malformed Basic credentials")]
    Malformed,
}

/// Parse the value of an `Authorization` header.
pub fn parse_basic(value: &str) -> Result<Credential, CredentialError> {
    let (scheme, encoded) = value
        .trim()
        .split_once(' ')
        .ok_or(CredentialError::Scheme)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(CredentialError::Scheme);
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| CredentialError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| CredentialError::Malformed)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(CredentialError::Malformed)?;
    Ok(Credential {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

/// Pull Basic credentials out of request headers.
pub fn extract_credential(headers: &HeaderMap) -> Result<Credential, CredentialError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(CredentialError::Missing)?
        .to_str()
        .map_err(|_| CredentialError::Malformed)?;
    parse_basic(value)
}

/// What the backend gets to see about the request being authorised.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub repo: RepoContext,
}

/// Decides whether a credential may access a request.  `Ok(false)` is a
/// denial; `Err` is a backend failure and is also treated as a denial.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, credential: &Credential, meta: &RequestMeta) -> anyhow::Result<bool>;
}

/// Fixed user list from configuration: username -> hex SHA-256 of password.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: HashMap<String, String>,
}

impl StaticUsers {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[async_trait::async_trait]
impl AuthBackend for StaticUsers {
    async fn authenticate(&self, credential: &Credential, meta: &RequestMeta) -> anyhow::Result<bool> {
        let allowed = self
            .users
            .get(&credential.username)
            .is_some_and(|expected| expected.eq_ignore_ascii_case(&hash_password(&credential.password)));
        debug!(user = %credential.username, repo = %meta.repo.repo_name, allowed, "checked static credentials");
        Ok(allowed)
    }
}
