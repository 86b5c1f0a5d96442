//! Git smart HTTP server with a push receiver pipeline.
//!
//! The [`http`] layer bridges smart-protocol requests to `git
//! --stateless-rpc`; the [`hook`] pipeline runs from the repositories' hooks
//! once a push arrives.

pub mod config;
pub mod git;
pub mod hook;
pub mod http;
pub mod protocol;
