//! navgraph daemon entrypoint.
//!
//! A small, single-writer service that owns the navigation graph: a Unix
//! socket listener with strict request validation, one worker thread that
//! feeds events through the engine, a periodic sweeper, and a SQLite store.

use chrono::Utc;
use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use navgraph_core::{load_engine_config, EngineConfig, NavGraphEngine, StorageError};
use navgraph_protocol::{
    parse_event, parse_session_params, ErrorInfo, Method, NavEvent, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod db;
mod worker;

use db::Db;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

struct DaemonState {
    engine: Arc<NavGraphEngine<Db>>,
    events: Sender<NavEvent>,
    session_id: String,
}

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let session_id = ulid::Ulid::new().to_string();
    if let Err(err) = db.start_session(&session_id, Utc::now()) {
        error!(error = %err, "Failed to start navigation session");
        std::process::exit(1);
    }
    // Newest first, so the session this one replaces is second.
    let previous_session = match db.list_sessions() {
        Ok(sessions) => {
            info!(sessions = sessions.len(), "Navigation sessions on disk");
            sessions.into_iter().nth(1).map(|session| session.id)
        }
        Err(err) => {
            warn!(error = %err, "Failed to list navigation sessions");
            None
        }
    };

    let config = match load_engine_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load engine config; using defaults");
            EngineConfig::default()
        }
    };
    info!(
        pending_ttl_ms = config.pending_ttl_ms,
        click_source_ttl_ms = config.click_source_ttl_ms,
        dedup_window_ms = config.dedup_window_ms,
        sweep_interval_secs = config.sweep_interval_secs,
        "Engine config loaded"
    );
    let sweep_interval = config.sweep_interval();

    let engine = Arc::new(NavGraphEngine::new(db, config));
    if let Some(previous) = previous_session.as_deref() {
        if let Err(err) = engine.reconcile_tab_history(previous) {
            warn!(error = %err, "Tab history reconciliation failed; starting empty");
        }
    }

    let (events, source) = worker::event_channel();
    worker::spawn_worker(Arc::clone(&engine), source);
    worker::spawn_sweeper(Arc::clone(&engine), sweep_interval);

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        session_id = %session_id,
        "navgraph daemon started"
    );

    let state = Arc::new(DaemonState {
        engine,
        events,
        session_id,
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("NAVGRAPH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".navgraph").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".navgraph").join("daemon").join("state.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
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
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &DaemonState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let config = state.engine.config();
            Response::ok(
                request.id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "session_id": state.session_id,
                    "sweep_interval_secs": config.sweep_interval_secs,
                    "pending_navigations": state.engine.pending_count(),
                    "click_sources": state.engine.click_source_count(),
                }),
            )
        }
        Method::Event => handle_event(request, state),
        Method::GetSession => {
            let params = match parse_session_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match state.engine.session_details(params.session_id.as_deref()) {
                Ok(details) => {
                    tracing::debug!(
                        records = details.records.len(),
                        edges = details.edges.len(),
                        "Session snapshot"
                    );
                    match serde_json::to_value(&details) {
                        Ok(value) => Response::ok(request.id, value),
                        Err(err) => Response::error(
                            request.id,
                            "serialization_error",
                            format!("Failed to serialize session: {}", err),
                        ),
                    }
                }
                Err(StorageError::SessionNotFound(id)) => Response::error(
                    request.id,
                    "session_not_found",
                    format!("No session with id {}", id),
                ),
                Err(err) => Response::error(
                    request.id,
                    "session_error",
                    format!("Failed to fetch session: {}", err),
                ),
            }
        }
    }
}

fn handle_event(request: Request, state: &DaemonState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };

    let event = match parse_event(params) {
        Ok(event) => event,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    tracing::debug!(
        kind = event.kind(),
        tab_id = ?event.tab_id(),
        timestamp = ?event.timestamp(),
        "Received event"
    );

    if state.events.send(event).is_err() {
        error!("Event worker is gone; rejecting event");
        return Response::error(
            request.id,
            "worker_unavailable",
            "event worker is not running",
        );
    }

    Response::ok(request.id, serde_json::json!({"accepted": true}))
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
