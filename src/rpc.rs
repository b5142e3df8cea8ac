//! Line-oriented lookup transport.
//!
//! Each request is one line carrying the candidate IP, optionally prefixed
//! with the method name (`checkIP 1.2.3.4`). Each response is one line,
//! `benign` or `malicious`. Malformed, empty or unreadable requests are
//! answered `benign`; a request longer than [`MAX_REQUEST_BYTES`] is answered
//! `benign` and the connection is closed, as is a connection left idle for
//! [`IDLE_TIMEOUT`]. Open connections are dropped when the server stops.

use crate::lookup::{LookupService, Verdict};
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Longest accepted request line, excluding the newline.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// How long a connection may sit without sending a request.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Method name callers may prefix requests with.
const METHOD_NAME: &str = "checkIP";

/// Where the lookup server listens.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Uds { path: PathBuf },
    Tcp { address: SocketAddr },
    Both { tcp_address: SocketAddr, uds_path: PathBuf },
}

/// Serves [`LookupService::check`] to external callers.
pub struct RpcServer {
    lookup: Arc<LookupService>,
}

impl RpcServer {
    pub fn new(lookup: Arc<LookupService>) -> Self {
        Self { lookup }
    }

    /// Listen on `transport` until `shutdown` resolves.
    ///
    /// Fails only if a listener cannot be bound.
    pub async fn run<F>(self, transport: TransportConfig, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (tcp_address, uds_path) = match transport {
            TransportConfig::Uds { path } => (None, Some(path)),
            TransportConfig::Tcp { address } => (Some(address), None),
            TransportConfig::Both {
                tcp_address,
                uds_path,
            } => (Some(tcp_address), Some(uds_path)),
        };

        let mut listeners = JoinSet::new();

        if let Some(path) = &uds_path {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("removing stale socket {}", path.display()))?;
            }
            let listener = UnixListener::bind(path)
                .with_context(|| format!("binding unix socket {}", path.display()))?;
            info!(socket = %path.display(), "Lookup server listening on unix socket");
            listeners.spawn(serve_unix(listener, self.lookup.clone()));
        }

        if let Some(address) = tcp_address {
            let listener = TcpListener::bind(address)
                .await
                .with_context(|| format!("binding tcp address {}", address))?;
            info!(address = %address, "Lookup server listening on tcp");
            listeners.spawn(serve_tcp(listener, self.lookup.clone()));
        }

        shutdown.await;
        info!("Stopping lookup server");
        // Dropping a listener task drops its connection set with it.
        listeners.abort_all();
        while listeners.join_next().await.is_some() {}

        if let Some(path) = &uds_path {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(socket = %path.display(), error = %e, "Failed to remove socket file");
            }
        }

        Ok(())
    }
}

async fn serve_unix(listener: UnixListener, lookup: Arc<LookupService>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => spawn_connection(&mut connections, stream, lookup.clone()),
                Err(e) => accept_failed(e).await,
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_tcp(listener: TcpListener, lookup: Arc<LookupService>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Lookup connection accepted");
                    spawn_connection(&mut connections, stream, lookup.clone());
                }
                Err(e) => accept_failed(e).await,
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

fn spawn_connection<S>(connections: &mut JoinSet<()>, stream: S, lookup: Arc<LookupService>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    connections.spawn(async move {
        if let Err(e) = handle_connection(stream, &lookup).await {
            debug!(error = %e, "Lookup connection closed with error");
        }
    });
}

async fn accept_failed(error: std::io::Error) {
    warn!(error = %error, "Failed to accept lookup connection");
    // Back off so descriptor exhaustion does not spin the accept loop.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Answer requests on one connection until the peer closes it or it idles
/// for [`IDLE_TIMEOUT`].
pub async fn handle_connection<S>(stream: S, lookup: &LookupService) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_lines(stream, lookup, IDLE_TIMEOUT).await
}

async fn serve_lines<S>(stream: S, lookup: &LookupService, idle_timeout: Duration) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(64);

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_REQUEST_BYTES as u64 + 1);
        let request = limited.read_until(b'\n', &mut line);
        let read = match tokio::time::timeout(idle_timeout, request).await {
            Ok(read) => read?,
            Err(_) => {
                debug!("Idle lookup connection timed out");
                break;
            }
        };
        if read == 0 {
            break;
        }

        let terminated = line.last() == Some(&b'\n');
        if !terminated && line.len() > MAX_REQUEST_BYTES {
            debug!("Oversized lookup request, closing connection");
            write_verdict(&mut writer, Verdict::Benign).await?;
            break;
        }

        let verdict = match std::str::from_utf8(&line) {
            Ok(text) => lookup.check(request_argument(text)),
            Err(_) => Verdict::Benign,
        };
        write_verdict(&mut writer, verdict).await?;
    }

    writer.shutdown().await
}

async fn write_verdict<W>(writer: &mut W, verdict: Verdict) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(verdict.as_str().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Extract the single positional argument from a request line.
fn request_argument(line: &str) -> &str {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((method, argument)) if method.eq_ignore_ascii_case(METHOD_NAME) => argument.trim(),
        _ => line,
    }
}
