//! playgate daemon entrypoint.
//!
//! The background controller: sole writer of `unlocked_until`, owner of the
//! expiry one-shot and the reconciliation sweep, and the socket front-ends
//! use to request an unlock.

use fs_err as fs;
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use playgate_core::config::{socket_path, store_path};
use playgate_core::{load_config, FileStore, GateConfig, SystemClock, UnlockMachine};
use playgate_protocol::{
    ErrorInfo, Method, Request, Response, ERROR_STORE_UNAVAILABLE, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

mod controller;
mod enforcer;

use controller::Controller;
use enforcer::GateEnforcer;

const DEBUG_LOG_ENV: &str = "PLAYGATE_DEBUG_LOG";
const READ_TIMEOUT_SECS: u64 = 2;

fn main() {
    init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            GateConfig::default()
        }
    };

    let store_path = match store_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve store path");
            std::process::exit(1);
        }
    };
    let store = Arc::new(FileStore::open(&store_path));

    let machine = UnlockMachine::new(store.clone(), Arc::new(SystemClock), config.grant_duration());
    let controller = Controller::new(machine, GateEnforcer::new(config.gate.clone()));
    controller.subscribe();

    let _watcher = match store.spawn_watcher(config.store_poll_interval()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "Failed to start store watcher; relying on sweep");
            None
        }
    };

    match controller.install() {
        Ok(status) => info!(?status, "Unlock state reconciled"),
        // The sweep retries on its next pass.
        Err(err) => warn!(error = %err, "Startup reconciliation failed"),
    }

    let _sweep = match controller.spawn_sweep(config.reconciliation_period()) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "Failed to start reconciliation sweep");
            std::process::exit(1);
        }
    };

    let socket_path = match socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to prepare daemon socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        store = %store.path().display(),
        grant_secs = config.grant.duration_secs,
        sweep_secs = config.reconciliation.period_secs,
        "playgate daemon started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let controller = Arc::clone(&controller);
                let config = config.clone();
                thread::spawn(move || handle_connection(stream, &controller, &config));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent)
        .map_err(|err| format!("Failed to create socket directory: {}", err))?;
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove stale socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, controller: &Controller, config: &GateConfig) {
    let response = match read_request(&mut stream) {
        Ok(request) => {
            debug!(method = request.method.as_str(), id = ?request.id, "Daemon request received");
            handle_request(request, controller, config)
        }
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            Response::error_with_info(None, err)
        }
    };
    if let Err(err) = write_response(&mut stream, &response) {
        debug!(error = %err, "Failed to write response");
    }
}

/// Reads one newline-terminated request, bounded by [`MAX_REQUEST_BYTES`].
fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let limit = MAX_REQUEST_BYTES as u64 + 1;
    let mut reader = BufReader::new(Read::take(&mut *stream, limit));
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line) {
        Ok(_) => {}
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            return Err(ErrorInfo::new("read_timeout", "request timed out"));
        }
        Err(err) => {
            return Err(ErrorInfo::new(
                "read_error",
                format!("failed to read request: {}", err),
            ));
        }
    }

    if line.len() > MAX_REQUEST_BYTES {
        return Err(ErrorInfo::new(
            "request_too_large",
            "request exceeded maximum size",
        ));
    }
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(&line).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, controller: &Controller, config: &GateConfig) -> Response {
    if let Err(err) = request.validate() {
        return Response::error_with_info(request.id, err);
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "grant_duration_secs": config.grant.duration_secs,
                "reconciliation_period_secs": config.reconciliation.period_secs,
                "armed_deadline": controller.armed_deadline(),
                "gate_active": controller.is_active(),
            }),
        ),
        Method::GetStatus => match controller.status_reply() {
            Ok(reply) => serialize_reply(request.id, &reply),
            Err(err) => Response::error(request.id, ERROR_STORE_UNAVAILABLE, err.to_string()),
        },
        Method::RequestUnlock => match controller.handle_unlock() {
            Ok(reply) => serialize_reply(request.id, &reply),
            Err(err) => {
                warn!(error = %err, "Unlock request failed");
                Response::error(request.id, ERROR_STORE_UNAVAILABLE, err.to_string())
            }
        },
    }
}

fn serialize_reply<T: serde::Serialize>(id: Option<String>, reply: &T) -> Response {
    match serde_json::to_value(reply) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("failed to serialize reply: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, response)?;
    stream.write_all(b"\n")?;
    stream.flush()
}
