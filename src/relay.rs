//! Plain-HTTP relay loop.
//!
//! The first request of a client connection dials the target through SOCKS5
//! and binds the resulting backend connection to the client connection. Every
//! following request on that client connection is forwarded over the same
//! backend connection. Failures before the binding become a 503; failures
//! after it are returned as errors, which makes hyper drop the client
//! connection (and with it the backend connection).

use crate::proxy::{service_unavailable, ProxyBody};
use crate::socks::SocksConnector;
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1::{Builder, SendRequest};
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failures once a backend connection is bound to the client connection
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("backend {target} is gone: {source}")]
    BackendClosed {
        target: String,
        #[source]
        source: hyper::Error,
    },

    #[error("relaying request to {target} failed: {source}")]
    Exchange {
        target: String,
        #[source]
        source: hyper::Error,
    },
}

struct Backend {
    target: String,
    sender: SendRequest<Incoming>,
}

/// Relay state of one client connection
pub struct HttpRelay {
    connector: Arc<SocksConnector>,
    peer: SocketAddr,
    backend: Option<Backend>,
}

impl HttpRelay {
    pub fn new(connector: Arc<SocksConnector>, peer: SocketAddr) -> Self {
        Self {
            connector,
            peer,
            backend: None,
        }
    }

    /// Forward one request to `target` (normalized `host:port`) and return the
    /// backend's response untouched
    pub async fn forward(
        &mut self,
        req: Request<Incoming>,
        target: String,
    ) -> Result<Response<ProxyBody>, RelayError> {
        let req = into_origin_form(req);

        if let Some(backend) = self.backend.as_mut().filter(|b| b.target == target) {
            debug!("Relaying request from {} over bound backend {}", self.peer, target);

            backend
                .sender
                .ready()
                .await
                .map_err(|source| RelayError::BackendClosed {
                    target: target.clone(),
                    source,
                })?;
            let resp = backend
                .sender
                .send_request(req)
                .await
                .map_err(|source| RelayError::Exchange { target, source })?;
            return Ok(resp.map(|b| b.boxed()));
        }

        Ok(self.establish(req, target).await)
    }

    async fn establish(&mut self, mut req: Request<Incoming>, target: String) -> Response<ProxyBody> {
        // A previous backend for another host is closed before dialing the new one
        if let Some(previous) = self.backend.take() {
            debug!("Client {} switched from {} to {}", self.peer, previous.target, target);
        }

        let stream = match self.connector.connect(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Upstream SOCKS5 connection for {} failed: {}", self.peer, e);
                drain(req.body_mut()).await;
                return service_unavailable(e.to_string());
            }
        };

        let (mut sender, conn) = match Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .handshake(TokioIo::new(stream))
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                warn!("HTTP handshake with {} failed: {}", target, e);
                return service_unavailable(e.to_string());
            }
        };

        // Finishes once the sender is dropped or the backend closes
        let conn_target = target.clone();
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("Backend connection to {} ended: {}", conn_target, err);
            }
        });

        let resp = match sender.send_request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Forwarding to {} failed: {}", target, e);
                return service_unavailable(e.to_string());
            }
        };

        self.backend = Some(Backend { target, sender });
        resp.map(|b| b.boxed())
    }
}

/// Rewrite an absolute-form request into origin-form for the backend,
/// filling in `Host` from the authority when the client left it out
pub fn into_origin_form<B>(mut req: Request<B>) -> Request<B> {
    let Some(authority) = req.uri().authority().cloned() else {
        return req;
    };

    if !req.headers().contains_key(HOST) {
        let host = match authority.port() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_owned(),
        };
        if let Ok(value) = HeaderValue::from_str(&host) {
            req.headers_mut().insert(HOST, value);
        }
    }

    let path = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_owned();
    if let Ok(uri) = Uri::try_from(path) {
        *req.uri_mut() = uri;
    }
    req
}

/// Read and discard whatever is left of a request body
pub async fn drain<B>(body: &mut B)
where
    B: Body + Unpin,
{
    while let Some(frame) = body.frame().await {
        if frame.is_err() {
            break;
        }
    }
}
