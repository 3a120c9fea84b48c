//! Minimal HTTP/1.1 surface over the occupancy service.
//!
//! One request per connection. The accept loop hands every connection to its
//! own short-lived thread, so a request parked on a busy room's cycle lock
//! (`/frame`, on-demand detect) never delays requests for other rooms or the
//! snapshot routes. Those waits are bounded by the scheduler's `lock_wait` and
//! answer 503 when it runs out.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::PipelineError;
use crate::service::OccupancyService;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 4096;
const MAX_CONNECTIONS: usize = 64;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: OccupancyService,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: OccupancyService) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = self.service;
        let join = std::thread::Builder::new()
            .name("occupancy-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, service, shutdown_thread) {
                    log::error!("occupancy api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// Decrements the open-connection count when a connection thread finishes.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_api(listener: TcpListener, service: OccupancyService, shutdown: Arc<AtomicBool>) -> Result<()> {
    let open = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if open.fetch_add(1, Ordering::SeqCst) >= MAX_CONNECTIONS {
                    open.fetch_sub(1, Ordering::SeqCst);
                    log::warn!("occupancy api at {} connections, rejecting {}", MAX_CONNECTIONS, peer);
                    if stream.set_nonblocking(false).is_ok() {
                        let _ = write_error(&mut stream, 503, "server_busy");
                    }
                    continue;
                }
                let slot = ConnectionSlot(open.clone());
                let service = service.clone();
                let spawned = std::thread::Builder::new()
                    .name("occupancy-api-conn".to_string())
                    .spawn(move || {
                        let _slot = slot;
                        if let Err(err) = handle_connection(stream, &service) {
                            log::warn!("occupancy api request rejected: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("occupancy api could not serve {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, service: &OccupancyService) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_error(&mut stream, 403, "forbidden")?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_error(&mut stream, 413, "request_too_large")?;
            return Err(anyhow!("request too large"));
        }
        Err(RequestError::Malformed(reason)) => {
            write_error(&mut stream, 400, "bad_request")?;
            return Err(anyhow!(reason));
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };
    let response = route(&request, service);
    log::debug!(
        "{} {} -> {}",
        request.method,
        request.path,
        response.status
    );
    write_response(
        &mut stream,
        response.status,
        response.content_type,
        &response.body,
    )
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => {
                log::error!("failed to serialize response: {}", err);
                Self::error(500, "serialization_failed")
            }
        }
    }

    fn error(status: u16, code: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: format!(r#"{{"error":"{}"}}"#, code).into_bytes(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest {
    room_id: Option<String>,
}

fn route(request: &HttpRequest, service: &OccupancyService) -> Response {
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        ["health"] => only(request, "GET", || Response::json(200, &service.health())),
        ["api", "rooms"] => only(request, "GET", || Response::json(200, &service.list_rooms())),
        ["api", "detect"] => only(request, "POST", || detect(request, service)),
        ["api", "setup-videos"] => {
            only(request, "POST", || Response::json(200, &service.setup_sources()))
        }
        ["api", "video", room_id, "frame"] => only(request, "GET", || frame(room_id, service)),
        ["api", "video", room_id, "stream"] => {
            only(request, "GET", || match service.stream_info(room_id) {
                Ok(info) => Response::json(200, &info),
                Err(_) => Response::error(400, "invalid_room_id"),
            })
        }
        _ => Response::error(404, "not_found"),
    }
}

fn only(request: &HttpRequest, method: &str, handler: impl FnOnce() -> Response) -> Response {
    if request.method != method {
        return Response::error(405, "method_not_allowed");
    }
    handler()
}

fn detect(request: &HttpRequest, service: &OccupancyService) -> Response {
    let room_id = match serde_json::from_slice::<DetectRequest>(&request.body) {
        Ok(DetectRequest {
            room_id: Some(room_id),
        }) if !room_id.is_empty() => room_id,
        _ => return Response::error(400, "invalid_room_id"),
    };
    match service.detect(&room_id) {
        Ok(result) => Response::json(200, &*result),
        Err(PipelineError::UnknownRoom(_)) => Response::error(400, "invalid_room_id"),
        Err(PipelineError::Busy(_)) => Response::error(503, "room_busy"),
        Err(err) => {
            log::warn!("on-demand detection failed: {}", err);
            Response::error(500, "processing_failed")
        }
    }
}

fn frame(room_id: &str, service: &OccupancyService) -> Response {
    if !service.scheduler().registry().contains(room_id) {
        return Response::error(400, "invalid_room_id");
    }
    match service.frame_jpeg(room_id) {
        Ok(jpeg) => Response {
            status: 200,
            content_type: "image/jpeg",
            body: jpeg,
        },
        Err(err) if matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Busy(_))) => {
            Response::error(503, "room_busy")
        }
        Err(err) => {
            log::warn!("room {}: frame unavailable: {:#}", room_id, err);
            Response::error(500, "frame_processing_failed")
        }
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

fn read_request(stream: &mut TcpStream) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before headers".into()));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".into()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length".into()))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("truncated body".into()));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, code: &str) -> Result<()> {
    let response = Response::error(status, code);
    write_response(stream, status, response.content_type, &response.body)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            body: Vec::new(),
        }
    }

    #[test]
    fn error_body_is_json() {
        let response = Response::error(404, "not_found");
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["error"], "not_found");
    }

    #[test]
    fn only_rejects_other_methods() {
        let response = only(&request("DELETE", "/health"), "GET", || {
            Response::error(200, "unreachable")
        });
        assert_eq!(response.status, 405);
    }

    #[test]
    fn detect_body_requires_room_id() {
        for body in [&b""[..], b"{}", b"{\"roomId\":\"\"}", b"not json"] {
            let parsed = serde_json::from_slice::<DetectRequest>(body);
            let accepted = matches!(parsed, Ok(DetectRequest { room_id: Some(ref id) }) if !id.is_empty());
            assert!(!accepted, "{:?}", String::from_utf8_lossy(body));
        }
    }
}
