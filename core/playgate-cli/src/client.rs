//! Client for the playgate daemon socket.
//!
//! The daemon is the only writer of the unlock state. A failed request is
//! reported to the caller; the front-end never falls back to writing the
//! store itself.

use chrono::Utc;
use playgate_core::config::socket_path;
use playgate_core::GateError;
use playgate_protocol::{
    ErrorInfo, Method, Request, Response, StatusReply, UnlockReply, MAX_REQUEST_BYTES,
};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const ENABLE_ENV: &str = "PLAYGATE_DAEMON_ENABLED";
const IO_TIMEOUT_MS: u64 = 1500;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon client disabled via PLAYGATE_DAEMON_ENABLED")]
    Disabled,

    #[error("could not resolve daemon socket: {0}")]
    Socket(#[from] GateError),

    #[error("daemon unreachable at {path}: {source}")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out waiting for daemon response")]
    Timeout,

    #[error("daemon rejected request ({0})")]
    Daemon(ErrorInfo),

    #[error("invalid daemon response: {0}")]
    Protocol(String),
}

pub struct DaemonClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    /// Client for the default socket, or an error when disabled by env.
    pub fn from_env() -> Result<Self, ClientError> {
        if !enabled_from(env::var(ENABLE_ENV).ok().as_deref()) {
            return Err(ClientError::Disabled);
        }
        Ok(Self::new(socket_path()?))
    }

    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_millis(IO_TIMEOUT_MS),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn request_unlock(&self) -> Result<UnlockReply, ClientError> {
        self.call(Method::RequestUnlock)
    }

    pub fn status(&self) -> Result<StatusReply, ClientError> {
        self.call(Method::GetStatus)
    }

    pub fn health(&self) -> Result<Value, ClientError> {
        self.call(Method::GetHealth)
    }

    fn call<T: DeserializeOwned>(&self, method: Method) -> Result<T, ClientError> {
        let request = Request::new(method, make_request_id());
        let response = self.send_with_retry(&request)?;
        if !response.ok {
            let info = response
                .error
                .unwrap_or_else(|| ErrorInfo::new("unknown", "daemon returned no error detail"));
            return Err(ClientError::Daemon(info));
        }
        let data = response
            .data
            .ok_or_else(|| ClientError::Protocol("response had no data".to_string()))?;
        serde_json::from_value(data).map_err(|err| ClientError::Protocol(err.to_string()))
    }

    /// Retries once, and only when the connection itself failed. A request
    /// that reached the daemon is never resent.
    fn send_with_retry(&self, request: &Request) -> Result<Response, ClientError> {
        match self.send(request) {
            Err(ClientError::Unreachable { source, .. }) => {
                tracing::warn!(
                    error = %source,
                    method = request.method.as_str(),
                    "Failed to reach daemon; retrying"
                );
                thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                self.send(request).inspect_err(|err| {
                    tracing::warn!(error = %err, method = request.method.as_str(), "Retry failed");
                })
            }
            other => other,
        }
    }

    fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream =
            UnixStream::connect(&self.socket).map_err(|source| ClientError::Unreachable {
                path: self.socket.clone(),
                source,
            })?;
        let _ = stream.set_read_timeout(Some(self.timeout));
        let _ = stream.set_write_timeout(Some(self.timeout));

        let mut payload = serde_json::to_vec(request)
            .map_err(|err| ClientError::Protocol(format!("failed to encode request: {}", err)))?;
        payload.push(b'\n');
        stream.write_all(&payload).map_err(map_io)?;
        stream.flush().ok();

        read_response(&mut stream)
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let limit = MAX_REQUEST_BYTES as u64 + 1;
    let mut reader = BufReader::new(Read::take(&mut *stream, limit));
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).map_err(map_io)?;

    if line.len() > MAX_REQUEST_BYTES {
        return Err(ClientError::Protocol(
            "response exceeded maximum size".to_string(),
        ));
    }
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ClientError::Protocol("daemon response was empty".to_string()));
    }

    serde_json::from_slice(&line)
        .map_err(|err| ClientError::Protocol(format!("failed to parse response: {}", err)))
}

fn map_io(err: std::io::Error) -> ClientError {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ClientError::Timeout,
        _ => ClientError::Protocol(format!("socket error: {}", err)),
    }
}

/// Enabled unless explicitly switched off.
fn enabled_from(value: Option<&str>) -> bool {
    match value {
        Some(value) => !matches!(value.trim(), "0" | "false" | "FALSE" | "no" | "NO"),
        None => true,
    }
}

fn make_request_id() -> String {
    let random = rand::thread_rng().next_u64();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        random
    )
}
