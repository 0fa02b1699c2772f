// Connection handling module
// Accepts a single TCP connection and serves HTTP/1.x requests on it

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, CONNECTION, DATE, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::AppState;
use crate::handler;
use crate::http::{self, cache};
use crate::logger::{self, AccessLogEntry};

/// Bytes of the first request head inspected before hyper takes over
const HEAD_PEEK_LIMIT: usize = 8192;
/// Header slots for the pre-check, matching hyper's default limit
const MAX_HEADERS: usize = 100;
const HEAD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Accept a connection, enforcing the connection limit.
///
/// # Arguments
///
/// * `stream` - The TCP stream to handle
/// * `peer_addr` - The peer's socket address
/// * `state` - Shared application state
/// * `conn_counter` - Active connection counter
pub fn accept_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
) {
    // Increment counter first, then check limit (prevents race condition)
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection from {peer_addr} rejected."
            ));
            drop(stream);
            return;
        }
    }

    handle_connection(stream, peer_addr, Arc::clone(state), Arc::clone(conn_counter));
}

/// Serve one connection in its own task.
///
/// The first request head is checked before hyper takes the stream, so a
/// malformed request still gets a 400 carrying the injected headers. After
/// that every response passes through [`respond`].
fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        let performance = &state.config.performance;
        let read_timeout = Duration::from_secs(std::cmp::max(
            performance.read_timeout,
            performance.write_timeout,
        ));

        match tokio::time::timeout(read_timeout, first_head_is_malformed(&stream)).await {
            Ok(Ok(false)) => serve_connection(stream, peer_addr, &state, read_timeout).await,
            Ok(Ok(true)) => reject_malformed(stream, peer_addr, &state).await,
            Ok(Err(err)) => logger::log_connection_error(&err),
            Err(_) => logger::log_warning(&format!(
                "Connection from {peer_addr} sent no complete request within {} seconds",
                read_timeout.as_secs()
            )),
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Hand the connection to hyper until the client or keep-alive ends it.
///
/// `header_read_timeout` bounds how long an idle or stalled connection may
/// wait for its next request head; a busy connection is never cut off.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    read_timeout: Duration,
) {
    let io = TokioIo::new(stream);

    let mut builder = http1::Builder::new();
    builder
        .keep_alive(state.config.performance.keep_alive)
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout);

    let service_state = Arc::clone(state);
    let conn = builder.serve_connection(
        io,
        service_fn(move |req| respond(req, peer_addr, Arc::clone(&service_state))),
    );

    if let Err(err) = conn.await {
        // Clients hanging up mid-response and idle timeouts are routine
        if !err.is_incomplete_message() && !err.is_canceled() && !err.is_timeout() {
            logger::log_connection_error(&err);
        }
    }
}

/// Peek at the first request head and report whether it fails to parse.
///
/// Nothing is consumed from the socket. A head that is still arriving is
/// polled again; one larger than the peek window is left to hyper.
async fn first_head_is_malformed(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = vec![0u8; HEAD_PEEK_LIMIT];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let parsed = httparse::Request::new(&mut headers).parse(&buf[..n]);
        match parsed {
            Ok(httparse::Status::Complete(_)) | Err(httparse::Error::TooManyHeaders) => {
                return Ok(false);
            }
            Ok(httparse::Status::Partial) if n == buf.len() => return Ok(false),
            Ok(httparse::Status::Partial) => tokio::time::sleep(HEAD_POLL_INTERVAL).await,
            Err(_) => return Ok(true),
        }
    }
}

/// Answer an unparseable request with a 400 and close the connection
async fn reject_malformed(mut stream: TcpStream, peer_addr: SocketAddr, state: &AppState) {
    logger::log_warning(&format!("Malformed request from {peer_addr}"));

    // Unread input at close would turn the FIN into a reset
    let mut discard = [0u8; 1024];
    while matches!(stream.try_read(&mut discard), Ok(n) if n > 0) {}

    let mut response = decorate(http::build_error_response(StatusCode::BAD_REQUEST, false), state);
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    if let Ok(date) = HeaderValue::from_str(&cache::format_http_date(SystemTime::now())) {
        response.headers_mut().insert(DATE, date);
    }

    let (parts, body) = response.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    let mut raw = format!(
        "HTTP/1.1 {} {}\r\n",
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in &parts.headers {
        raw.extend_from_slice(name.as_str().as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"\r\n");
    raw.extend_from_slice(&body);

    if let Err(err) = stream.write_all(&raw).await {
        logger::log_connection_error(&err);
        return;
    }
    let _ = stream.shutdown().await;
}

/// Add the `Server` header and the injected profile headers
fn decorate<B>(mut response: Response<B>, state: &AppState) -> Response<B> {
    if let Some(server) = &state.server_header {
        response.headers_mut().insert(SERVER, server.clone());
    }
    state.injector.apply(response)
}

/// Run the file handler, then decorate its response
async fn respond(
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let pending = state.access_log().then(|| PendingAccess::from_request(&req, peer_addr));

    let response = decorate(handler::handle_request(req, Arc::clone(&state)).await, &state);

    if let Some(pending) = pending {
        let entry = pending.finish(&response, started.elapsed());
        logger::log_access(&entry, &state.access_log_format);
    }

    Ok(response)
}

/// Request fields captured before the request is consumed by the handler
struct PendingAccess {
    remote_addr: String,
    method: String,
    target: String,
    http_version: String,
    referer: Option<String>,
    user_agent: Option<String>,
}

impl PendingAccess {
    fn from_request<B>(req: &Request<B>, peer_addr: SocketAddr) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };
        let version = format!("{:?}", req.version());
        Self {
            remote_addr: peer_addr.ip().to_string(),
            method: req.method().to_string(),
            target: req
                .uri()
                .path_and_query()
                .map_or_else(|| req.uri().to_string(), ToString::to_string),
            http_version: version.trim_start_matches("HTTP/").to_string(),
            referer: header("referer"),
            user_agent: header("user-agent"),
        }
    }

    fn finish(self, response: &Response<Full<Bytes>>, elapsed: Duration) -> AccessLogEntry {
        AccessLogEntry {
            remote_addr: self.remote_addr,
            time: chrono::Local::now(),
            method: self.method,
            target: self.target,
            http_version: self.http_version,
            status: response.status().as_u16(),
            body_bytes: response.body().size_hint().exact(),
            referer: self.referer,
            user_agent: self.user_agent,
            elapsed,
        }
    }
}
