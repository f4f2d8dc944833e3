//! Per-connection dispatcher: authentication gate, then either the plain-HTTP
//! relay or a CONNECT tunnel.

use crate::auth::{Authenticator, PROXY_CHALLENGE};
use crate::connection::ConnectionTracker;
use crate::relay::{drain, HttpRelay, RelayError};
use crate::socks::SocksConnector;
use crate::tunnel::{tunnel, CONNECT_ESTABLISHED};

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderValue, CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use http::StatusCode;
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_CONNECT_PORT: u16 = 443;

/// Everything a connection handler needs, shared by all connections
#[derive(Clone, Debug)]
pub struct ProxyContext {
    pub connector: Arc<SocksConnector>,
    pub authenticator: Arc<Authenticator>,
    pub tracker: ConnectionTracker,
}

/// Serve one accepted client connection until it closes
pub async fn serve_client(stream: TcpStream, peer: SocketAddr, ctx: ProxyContext) {
    debug!("Accepted connection from {}", peer);

    let relay = Arc::new(Mutex::new(HttpRelay::new(ctx.connector.clone(), peer)));
    let service = service_fn(move |req| proxy(req, peer, ctx.clone(), Arc::clone(&relay)));

    if let Err(err) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        // Relay failures were already reported by the service
        if err.is_incomplete_message() || err.is_closed() || err.is_user() {
            debug!("Connection from {} closed: {}", peer, err);
        } else {
            warn!("Connection from {} error: {}", peer, err);
        }
    }

    debug!("Connection from {} finished", peer);
}

async fn proxy(
    mut req: Request<hyper::body::Incoming>,
    peer: SocketAddr,
    ctx: ProxyContext,
    relay: Arc<Mutex<HttpRelay>>,
) -> Result<Response<ProxyBody>, RelayError> {
    if !ctx
        .authenticator
        .authorize(req.headers().get(PROXY_AUTHORIZATION))
    {
        warn!("Failed to authenticate {} request from {}", req.method(), peer);
        drain(req.body_mut()).await;
        return Ok(proxy_auth_required_response());
    }

    if Method::CONNECT == req.method() {
        let Some(target) = connect_target(req.uri()) else {
            warn!("CONNECT target is not host:port: {:?}", req.uri());
            drain(req.body_mut()).await;
            return Ok(bad_request("CONNECT must be to host:port"));
        };
        info!("[CONNECT] {} - from {}", target, peer);
        return Ok(connect(req, target, peer, &ctx).await);
    }

    let Some(target) = request_target(&req) else {
        warn!("HTTP request missing host: {:?}", req.uri());
        drain(req.body_mut()).await;
        return Ok(bad_request("HTTP request missing host"));
    };
    info!("[{}] {} - from {}", req.method(), target, peer);

    relay.lock().await.forward(req, target).await.map_err(|e| {
        warn!("Relay for {} stopped: {}", peer, e);
        e
    })
}

/// Dial the CONNECT target, then hand the upgraded client connection to the
/// tunnel once the success response is on the wire
async fn connect(
    mut req: Request<hyper::body::Incoming>,
    target: String,
    peer: SocketAddr,
    ctx: &ProxyContext,
) -> Response<ProxyBody> {
    drain(req.body_mut()).await;

    let backend = match ctx.connector.connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Upstream SOCKS5 connection for {} failed: {}", peer, e);
            return service_unavailable(e.to_string());
        }
    };

    // The tunnel outlives the HTTP connection task, so it is counted on its own
    let guard = ctx.tracker.track();
    tokio::spawn(async move {
        let _guard = guard;
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let end = tunnel(TokioIo::new(upgraded), backend).await;
                if let Err(e) = end.result {
                    warn!("Tunnel {} -> {}: could not copy from {}: {}", peer, target, end.direction, e);
                }
            }
            Err(e) => warn!("upgrade error: {}", e),
        }
    });

    connect_established()
}

/// Target of a plain request as `host:port`, from the absolute-form URI or,
/// failing that, the Host header
pub fn request_target<B>(req: &Request<B>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        let host = match authority.port() {
            Some(port) => join_host_port(authority.host(), port.as_str()),
            None => authority.host().to_owned(),
        };
        return Some(normalize_target(&host, DEFAULT_HTTP_PORT));
    }

    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(|h| normalize_target(h, DEFAULT_HTTP_PORT))
}

fn connect_target(uri: &Uri) -> Option<String> {
    uri.authority()
        .map(|authority| normalize_target(authority.as_str(), DEFAULT_CONNECT_PORT))
}

/// Append `default_port` unless `host` already names a port.
///
/// SOCKS5 dialing needs an explicit port. Bare IPv6 literals get bracketed.
pub fn normalize_target(host: &str, default_port: u16) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((_, after)) if after.starts_with(':') => host.to_owned(),
            _ => format!("{host}:{default_port}"),
        };
    }

    match host.matches(':').count() {
        0 => format!("{host}:{default_port}"),
        1 => host.to_owned(),
        _ => format!("[{host}]:{default_port}"),
    }
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn proxy_auth_required_response() -> Response<ProxyBody> {
    let mut response = Response::new(full("Proxy Authentication Required"));
    *response.status_mut() = StatusCode::PROXY_AUTHENTICATION_REQUIRED;
    response
        .headers_mut()
        .insert(PROXY_AUTHENTICATE, HeaderValue::from_static(PROXY_CHALLENGE));
    response
}

/// 503 carrying the failure message; the client connection is closed after it
pub fn service_unavailable(msg: String) -> Response<ProxyBody> {
    let mut response = Response::new(full(msg));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn bad_request(msg: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full(msg));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// `HTTP/1.1 200 Connection established` with no body framing; hyper sends
/// no length or chunking headers for a successful CONNECT
fn connect_established() -> Response<ProxyBody> {
    let mut response = Response::new(empty());
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(CONNECT_ESTABLISHED));
    response
}
