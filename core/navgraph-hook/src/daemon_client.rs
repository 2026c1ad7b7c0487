//! Client helper for talking to the navgraph daemon.
//!
//! The daemon is the only writer. Failures are surfaced to the caller; there
//! is no local fallback.

use navgraph_core::SessionDetails;
use navgraph_protocol::{
    Method, NavEvent, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "NAVGRAPH_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 2_000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

/// Forwards one event. Retried once with the same request id.
pub fn send_event(event: &NavEvent) -> Result<(), String> {
    let params =
        serde_json::to_value(event).map_err(|err| format!("Failed to serialize event: {}", err))?;
    let request_id = make_request_id();
    let build = || Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::Event,
        id: Some(request_id.clone()),
        params: Some(params.clone()),
    };
    send_with_retry(build, event.kind()).map(|_| ())
}

pub fn fetch_session(session_id: Option<&str>) -> Result<SessionDetails, String> {
    let params = session_id.map(|id| serde_json::json!({ "session_id": id }));
    let data = expect_data(send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::GetSession,
        id: Some(make_request_id()),
        params,
    })?)?;
    serde_json::from_value(data).map_err(|err| format!("Failed to parse session payload: {}", err))
}

pub fn daemon_health() -> Result<Value, String> {
    expect_data(send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::GetHealth,
        id: Some("health-check".to_string()),
        params: None,
    })?)
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".navgraph").join(SOCKET_NAME))
}

fn expect_data(response: Response) -> Result<Value, String> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string()))
    }
}

fn send_with_retry<F>(mut build: F, label: &str) -> Result<Value, String>
where
    F: FnMut() -> Request,
{
    match send_request(build()).and_then(expect_data) {
        Ok(data) => Ok(data),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(build())
                .and_then(expect_data)
                .map_err(|retry_err| {
                    tracing::warn!(
                        error = %retry_err,
                        "Retry failed sending {} to daemon",
                        label
                    );
                    retry_err
                })
        }
    }
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                // Session graphs can be large; allow a generous multiple of
                // the request limit.
                if buffer.len() > MAX_REQUEST_BYTES * 64 {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_request_id() -> String {
    format!("req-{}", ulid::Ulid::new())
}
