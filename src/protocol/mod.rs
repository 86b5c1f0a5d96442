//! Smart-protocol primitives: packet-line framing and service names.

pub mod pktline;
pub mod service;

pub use service::RpcKind;
