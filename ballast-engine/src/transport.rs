//! The outbound transport seam.
//!
//! Everything that touches the network sits behind [`Transport`], so the
//! orchestrator never sees connection errors or timeouts as anything other
//! than a failed outcome, and tests can script backends without sockets.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

use ballast_core::domain::request::Request;
use ballast_core::domain::server::Server;

use crate::connection_pool::ConnectionPool;

/// Result of dispatching one request.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOutcome {
    /// Whether the backend answered successfully.
    pub success: bool,
    /// Wall time of the exchange in milliseconds; zero when no response
    /// arrived at all.
    pub elapsed_ms: f64,
}

/// Issues the actual network calls on behalf of the balancer.
///
/// Both operations are bounded by the server's adaptive timeout and report
/// every failure, timeouts included, as a plain negative outcome.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `server` and report how it went.
    async fn dispatch(&self, server: &Server, request: &Request) -> DispatchOutcome;

    /// Ask `server` whether it is healthy.
    async fn probe(&self, server: &Server) -> bool;

    /// Hint that a server left the pool and cached resources for it can go.
    fn forget_server(&self, _addr: SocketAddr) {}
}

/// HTTP/1.1 transport over pooled connections.
///
/// Dispatch issues a GET for the request path; probes GET `/health`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    pool: ConnectionPool,
}

impl HttpTransport {
    /// Create a transport with an empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self, addr: SocketAddr) -> Option<SendRequest<Empty<Bytes>>> {
        if let Some(mut sender) = self.pool.try_pop(&addr) {
            if sender.ready().await.is_ok() {
                return Some(sender);
            }
        }

        let stream = TcpStream::connect(addr).await.ok()?;
        let io = TokioIo::new(stream);
        let (sender, connection) = http1::handshake(io).await.ok()?;
        tokio::spawn(async move {
            let _ = connection.await;
        });
        Some(sender)
    }

    /// One bounded GET exchange; `None` when no response arrived in time.
    async fn exchange(
        &self,
        addr: SocketAddr,
        path: &str,
        timeout: Duration,
    ) -> Option<(StatusCode, f64)> {
        let started = Instant::now();
        let attempt = async {
            let mut sender = self.connection(addr).await?;
            let request = hyper::Request::builder()
                .method(Method::GET)
                .uri(format!("http://{addr}{path}"))
                .header(hyper::header::HOST, addr.to_string())
                .body(Empty::<Bytes>::new())
                .ok()?;

            let response = sender.send_request(request).await.ok()?;
            let status = response.status();
            // Drain the body so the sender is reusable.
            response.into_body().collect().await.ok()?;
            self.pool.push(addr, sender);
            Some(status)
        };

        match time::timeout(timeout, attempt).await {
            Ok(Some(status)) => {
                Some((status, started.elapsed().as_secs_f64() * 1000.0))
            }
            _ => {
                debug!(backend = %addr, path, "exchange failed or timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, server: &Server, request: &Request) -> DispatchOutcome {
        match self
            .exchange(server.addr, &request.path, server.adaptive_timeout())
            .await
        {
            Some((status, elapsed_ms)) => DispatchOutcome {
                success: status.is_success(),
                elapsed_ms,
            },
            None => DispatchOutcome {
                success: false,
                elapsed_ms: 0.0,
            },
        }
    }

    async fn probe(&self, server: &Server) -> bool {
        match self
            .exchange(server.addr, "/health", server.adaptive_timeout())
            .await
        {
            Some((status, _)) => status.is_success(),
            None => false,
        }
    }

    fn forget_server(&self, addr: SocketAddr) {
        self.pool.evict(&addr);
    }
}
