//! HTTP layer: suffix dispatch, repository resolution, Basic auth and the
//! bridge that runs `git --stateless-rpc` behind each request.

pub mod auth;
pub mod bridge;
pub mod handler;
pub mod resolver;

pub use handler::{create_router, AppState, AuthGate};
pub use resolver::{RepoContext, RepoResolver};
