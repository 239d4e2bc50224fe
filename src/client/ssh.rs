//! Docker Engine API over `ssh … docker system dial-stdio`
//!
//! Every request spawns one ssh child and speaks HTTP/1.1 over its stdio with
//! hyper. The child's stderr is drained while the request runs and quoted when
//! the exchange fails.

use super::transport::SshTarget;
use super::{lower_version, DaemonClient, MAX_API_VERSION};
use crate::connection::ConnectionSpec;
use crate::error::{Result, SwarmError};
use async_trait::async_trait;
use bollard::models::{
    ErrorResponse, Node, SwarmInitRequest, SwarmJoinRequest, Swarm, SystemInfo, SystemVersion,
};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{ChildStderr, Command};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::debug;

/// Largest response body accepted from the tunnel
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// ssh diagnostics kept for error messages; the rest is read and discarded
const STDERR_KEEP_BYTES: usize = 8 * 1024;

/// Engine API client tunnelled through ssh
pub struct SshClient {
    host: String,
    target: SshTarget,
    pinned_version: Option<String>,
    negotiated_version: OnceCell<Option<String>>,
}

impl SshClient {
    pub fn new(spec: &ConnectionSpec, target: SshTarget) -> Self {
        if spec.wants_tls() {
            debug!("TLS material is ignored for ssh host {}", spec.host);
        }
        Self {
            host: spec.host.clone(),
            target,
            pinned_version: spec
                .api_version
                .as_deref()
                .map(|v| v.trim_start_matches('v').to_string()),
            negotiated_version: OnceCell::new(),
        }
    }

    async fn api_version(&self) -> Option<&str> {
        if let Some(pinned) = &self.pinned_version {
            return Some(pinned.as_str());
        }

        self.negotiated_version
            .get_or_init(|| async { self.negotiate().await })
            .await
            .as_deref()
    }

    async fn negotiate(&self) -> Option<String> {
        let cap = format!("{}.{}", MAX_API_VERSION.major_version, MAX_API_VERSION.minor_version);
        let version = match self.send(Method::GET, "/version".to_string(), None).await {
            Ok((status, body)) if status.is_success() => {
                serde_json::from_slice::<SystemVersion>(&body)
                    .ok()
                    .and_then(|v| v.api_version)
                    .map(|server| lower_version(&server, &cap).to_string())
            }
            Ok((status, _)) => {
                debug!("Version request to {} answered {}", self.host, status);
                None
            }
            Err(e) => {
                debug!("API version negotiation with {} failed: {}", self.host, e);
                None
            }
        };
        debug!("Negotiated API version {:?} with {}", version, self.host);
        version
    }

    async fn call(
        &self,
        name: &'static str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes> {
        let path = match self.api_version().await {
            Some(version) => format!("/v{}{}", version, path),
            None => path.to_string(),
        };
        debug!("{} {} {}", method, self.host, path);

        let (status, body) = self
            .send(method, path, body)
            .await
            .map_err(|e| self.failed(name, None, e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(self.failed(name, Some(status.as_u16()), error_message(&body)))
        }
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        name: &'static str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T> {
        let body = self.call(name, method, path, body).await?;
        serde_json::from_slice(&body)
            .map_err(|e| self.failed(name, None, format!("unexpected response body: {}", e)))
    }

    async fn send(
        &self,
        method: Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> io::Result<(StatusCode, Bytes)> {
        let mut builder = Request::builder().method(method).uri(path).header(HOST, "docker");
        let body = match body {
            Some(json) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(json))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        debug!("Opening ssh tunnel to {}", self.target.host);
        let mut child = Command::new("ssh")
            .args(self.target.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "ssh process has no stdio",
                    ))
                }
            };
        let diagnostics = drain(stderr);

        let result = exchange(tokio::io::join(stdout, stdin), request, MAX_BODY_BYTES).await;
        let _ = child.kill().await;

        match result {
            Ok(response) => {
                diagnostics.abort();
                Ok(response)
            }
            Err(e) => {
                let detail = match tokio::time::timeout(Duration::from_secs(1), diagnostics).await {
                    Ok(Ok(text)) => text,
                    _ => String::new(),
                };
                if detail.is_empty() {
                    Err(e)
                } else {
                    Err(io::Error::new(e.kind(), format!("{}: {}", e, detail)))
                }
            }
        }
    }

    fn failed(&self, call: &'static str, status: Option<u16>, message: String) -> SwarmError {
        SwarmError::DaemonOperationFailed {
            call,
            host: self.host.clone(),
            status,
            message,
        }
    }
}

#[async_trait]
impl DaemonClient for SshClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn info(&self) -> Result<SystemInfo> {
        self.call_json("daemon-info", Method::GET, "/info", None).await
    }

    async fn cluster_init(&self, request: &SwarmInitRequest) -> Result<String> {
        let body = serde_json::to_vec(request)?;
        self.call_json("cluster-init", Method::POST, "/swarm/init", Some(body))
            .await
    }

    async fn cluster_inspect(&self) -> Result<Swarm> {
        self.call_json("cluster-inspect", Method::GET, "/swarm", None)
            .await
    }

    async fn cluster_join(&self, request: &SwarmJoinRequest) -> Result<()> {
        let body = serde_json::to_vec(request)?;
        self.call("cluster-join", Method::POST, "/swarm/join", Some(body))
            .await
            .map(|_| ())
    }

    async fn cluster_leave(&self, force: bool) -> Result<()> {
        let path = format!("/swarm/leave?force={}", force);
        self.call("cluster-leave", Method::POST, &path, None)
            .await
            .map(|_| ())
    }

    async fn node_list(&self) -> Result<Vec<Node>> {
        self.call_json("node-list", Method::GET, "/nodes", None).await
    }
}

/// One HTTP/1.1 exchange over `io`, reading at most `limit` body bytes
pub async fn exchange<T>(
    io: T,
    request: Request<Full<Bytes>>,
    limit: usize,
) -> io::Result<(StatusCode, Bytes)>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(io::Error::other)?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Tunnel connection ended: {}", e);
        }
    });

    let result = async {
        let response = sender
            .send_request(request)
            .await
            .map_err(io::Error::other)?;
        let status = response.status();
        let body = Limited::new(response.into_body(), limit)
            .collect()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .to_bytes();
        Ok((status, body))
    }
    .await;

    driver.abort();
    result
}

/// Read `stderr` to the end so ssh never blocks on a full pipe
fn drain(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_KEEP_BYTES.saturating_sub(kept.len());
                    kept.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
        String::from_utf8_lossy(&kept).trim().to_string()
    })
}

/// Daemon error text, verbatim from `{"message": ...}` or the raw body
fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(err) => err.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}
