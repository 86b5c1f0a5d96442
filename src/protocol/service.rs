//! The two smart-protocol services exposed over HTTP.

use std::fmt;
use std::str::FromStr;

/// Prefix stripped from a service name to obtain the `git` subcommand.
pub const SERVICE_PREFIX: &str = "git-";

/// One of the two stateless-rpc services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcKind {
    /// Fetch/clone side (`git-upload-pack`).
    UploadPack,
    /// Push side (`git-receive-pack`).
    ReceivePack,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported service: {0:?}")]
pub struct UnsupportedService(pub String);

impl RpcKind {
    /// The service name as it appears in URLs and content types.
    pub fn service_name(self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// The `git` subcommand, i.e. the service name without its `git-` prefix.
    pub fn subcommand(self) -> &'static str {
        subcommand(self.service_name())
    }

    /// `Content-Type` of the `info/refs` advertisement response.
    pub fn advertisement_content_type(self) -> String {
        format!("application/x-{}-advertisement", self.service_name())
    }

    /// `Content-Type` of the RPC result response.
    pub fn result_content_type(self) -> String {
        format!("application/x-{}-result", self.service_name())
    }
}

impl FromStr for RpcKind {
    type Err = UnsupportedService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(UnsupportedService(other.to_owned())),
        }
    }
}

impl fmt::Display for RpcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Strip the fixed `git-` prefix from a service name.
pub fn subcommand(service: &str) -> &str {
    service.strip_prefix(SERVICE_PREFIX).unwrap_or(service)
}
