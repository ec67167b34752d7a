//! Lock-free hot pool for idle backend connections.

use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::client::conn::http1::SendRequest;

/// A lock-free two-stage hot pool for caching backend HTTP/1.1 senders.
///
/// Stage one maps a backend address to its queue, stage two pops idle
/// senders off that queue. Both stages are lock-free, so the request hot
/// path never serializes on connection reuse.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPool {
    idle: Arc<DashMap<SocketAddr, Arc<SegQueue<SendRequest<Empty<Bytes>>>>>>,
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to pop an existing sender for the given backend.
    ///
    /// Closed senders are discarded on the way; the caller must still
    /// verify `ready().await` before use.
    pub fn try_pop(&self, addr: &SocketAddr) -> Option<SendRequest<Empty<Bytes>>> {
        if let Some(queue_ref) = self.idle.get(addr) {
            let queue = queue_ref.value();
            while let Some(sender) = queue.pop() {
                if !sender.is_closed() {
                    return Some(sender);
                }
            }
        }
        None
    }

    /// Pushes an active sender back into the pool for reuse.
    pub fn push(&self, addr: SocketAddr, sender: SendRequest<Empty<Bytes>>) {
        if sender.is_closed() {
            return;
        }

        let queue = self
            .idle
            .entry(addr)
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .value()
            .clone();

        queue.push(sender);
    }

    /// Drops every idle sender for a backend that left the pool.
    pub fn evict(&self, addr: &SocketAddr) {
        self.idle.remove(addr);
    }
}
