//! Smart-HTTP to `git --stateless-rpc` bridge.
//!
//! Both operations spawn one git process per request and hand its stdout to
//! the response body through a bounded channel.  A pump task owns the
//! process from then on and releases it when output ends, when the client
//! goes away, or when the request deadline passes.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

use super::resolver::RepoContext;
use crate::git::{GitCommand, GitProcess};
use crate::protocol::{pktline, RpcKind};

const ADVERTISE_OP: &str = "get-info-refs";
const RPC_OP: &str = "post-rpc";

/// Chunks buffered between the pump task and the response body.
const CHANNEL_CAPACITY: usize = 16;

type Chunk = io::Result<Bytes>;

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Bridge {
    git_path: String,
    timeout: Option<Duration>,
}

impl Bridge {
    pub fn new(git_path: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            git_path: git_path.into(),
            timeout,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// `GET info/refs?service=<rpc>`: service preamble, then the output of
    /// `<rpc> --stateless-rpc --advertise-refs`.
    #[instrument(skip(self, repo), fields(repo = %repo.repo_name))]
    pub async fn advertise(&self, rpc: RpcKind, repo: &RepoContext) -> Result<Response> {
        let deadline = self.deadline();
        let mut process =
            GitCommand::stateless_rpc(&self.git_path, rpc, &repo.repo_path, true, ADVERTISE_OP)
                .spawn()?;
        let stderr = process.drain_stderr();
        let Some(stdout) = process.take_stdout() else {
            process.terminate().await;
            return Err(anyhow!("git {} stdout unavailable", rpc.subcommand()));
        };

        let preamble = pktline::service_preamble(rpc.service_name());
        let head = futures::stream::iter([Ok::<_, io::Error>(Bytes::from(preamble))]);

        let rx = spawn_pump(process, stdout, stderr, deadline);
        let body = Body::from_stream(head.chain(ReceiverStream::new(rx)));

        Ok(streaming_response(rpc.advertisement_content_type(), body))
    }

    /// `POST <rpc>`: feed the (decompressed) request body to
    /// `<rpc> --stateless-rpc`, close its stdin, then stream its stdout.
    #[instrument(skip(self, repo, headers, body), fields(repo = %repo.repo_name))]
    pub async fn execute_rpc(
        &self,
        rpc: RpcKind,
        repo: &RepoContext,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response> {
        let deadline = self.deadline();
        let decoder = BodyDecoder::from_headers(headers)?;

        let mut process =
            GitCommand::stateless_rpc(&self.git_path, rpc, &repo.repo_path, false, RPC_OP)
                .stdin_piped()
                .spawn()?;
        let stderr = process.drain_stderr();
        let (Some(mut stdin), Some(stdout)) = (process.take_stdin(), process.take_stdout()) else {
            process.terminate().await;
            return Err(anyhow!("git {} pipes unavailable", rpc.subcommand()));
        };

        let feeding = feed_body(body, &mut stdin, decoder);
        let fed = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, feeding)
                .await
                .unwrap_or_else(|_| Err(anyhow!("timed out reading request body"))),
            None => feeding.await,
        };
        // Closing stdin is what makes stateless-rpc start answering.
        drop(stdin);

        let written = match fed {
            Ok(written) => written,
            Err(e) => {
                warn!(op = RPC_OP, error = %format!("{e:#}"), "failed to forward request body");
                process.terminate().await;
                return Err(e);
            }
        };
        debug!(op = RPC_OP, bytes = written, "request body forwarded");

        let rx = spawn_pump(process, stdout, stderr, deadline);
        let body = Body::from_stream(ReceiverStream::new(rx));

        Ok(streaming_response(rpc.result_content_type(), body))
    }
}

fn streaming_response(content_type: String, body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.as_str()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Incremental decoder for the request body's `Content-Encoding`.
enum BodyDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
}

impl BodyDecoder {
    fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let encoding = headers
            .get(header::CONTENT_ENCODING)
            .map(|v| v.to_str().unwrap_or_default().trim().to_ascii_lowercase());
        match encoding.as_deref() {
            None | Some("") | Some("identity") => Ok(Self::Identity),
            Some("gzip") | Some("x-gzip") => Ok(Self::Gzip(GzDecoder::new(Vec::new()))),
            Some(other) => Err(anyhow!("unsupported Content-Encoding: {other}")),
        }
    }

    /// Decode one body chunk, returning whatever output it completes.
    fn push(&mut self, chunk: Bytes) -> io::Result<Bytes> {
        match self {
            Self::Identity => Ok(chunk),
            Self::Gzip(decoder) => {
                decoder.write_all(&chunk)?;
                decoder.flush()?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }

    /// Flush trailing output and check the stream ended cleanly.
    fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Identity => Ok(Bytes::new()),
            Self::Gzip(decoder) => decoder.finish().map(Bytes::from),
        }
    }
}

async fn feed_body(body: Body, stdin: &mut ChildStdin, mut decoder: BodyDecoder) -> Result<u64> {
    let mut stream = body.into_data_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("failed to read request body")?;
        let decoded = decoder.push(chunk).context("failed to decompress request body")?;
        stdin
            .write_all(&decoded)
            .await
            .context("failed to write request body to git")?;
        written += decoded.len() as u64;
    }
    let tail = decoder.finish().context("failed to decompress request body")?;
    stdin
        .write_all(&tail)
        .await
        .context("failed to write request body to git")?;
    stdin.flush().await.context("failed to flush git stdin")?;
    Ok(written + tail.len() as u64)
}

// ---------------------------------------------------------------------------
// Output pump
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpOutcome {
    Complete,
    ClientGone,
    ReadFailed,
    TimedOut,
}

fn spawn_pump(
    process: GitProcess,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    deadline: Option<Instant>,
) -> mpsc::Receiver<Chunk> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(pump(process, stdout, stderr, tx, deadline));
    rx
}

/// Forward stdout to the response until it ends, then release the process.
/// Returns how the stream ended and how many bytes reached the response.
async fn pump(
    process: GitProcess,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    tx: mpsc::Sender<Chunk>,
    deadline: Option<Instant>,
) -> (PumpOutcome, u64) {
    let op = process.op();
    let started = std::time::Instant::now();
    let mut chunks = ReaderStream::new(stdout);
    let mut bytes = 0u64;

    let forwarding = forward(&mut chunks, &tx, op, &mut bytes);
    let outcome = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, forwarding)
            .await
            .unwrap_or(PumpOutcome::TimedOut),
        None => forwarding.await,
    };

    match outcome {
        PumpOutcome::Complete => {
            drop(chunks);
            if let Err(e) = process.finish().await {
                warn!(op, error = %e, "failed to wait on git after streaming");
            }
        }
        PumpOutcome::TimedOut => {
            warn!(op, "deadline exceeded; terminating git");
            let _ = tx.try_send(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "git exchange timed out",
            )));
            process.terminate().await;
        }
        PumpOutcome::ClientGone => {
            info!(op, "client disconnected; terminating git");
            process.terminate().await;
        }
        PumpOutcome::ReadFailed => process.terminate().await,
    }

    let _ = stderr.await;
    debug!(
        op,
        ?outcome,
        bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "git output stream closed"
    );
    (outcome, bytes)
}

/// Send chunks until stdout ends.  `bytes` is kept current so the count
/// survives the future being cut off by a deadline.
async fn forward(
    chunks: &mut ReaderStream<ChildStdout>,
    tx: &mpsc::Sender<Chunk>,
    op: &'static str,
    bytes: &mut u64,
) -> PumpOutcome {
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                let len = chunk.len() as u64;
                if tx.send(Ok(chunk)).await.is_err() {
                    return PumpOutcome::ClientGone;
                }
                *bytes += len;
            }
            Err(e) => {
                warn!(op, error = %e, "failed to read git stdout");
                let _ = tx.send(Err(e)).await;
                return PumpOutcome::ReadFailed;
            }
        }
    }
    PumpOutcome::Complete
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
