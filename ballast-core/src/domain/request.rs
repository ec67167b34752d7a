//! The unit of work the balancer dispatches.

/// A client request routed to one backend.
///
/// The balancer only needs the path; issuing the actual network call is the
/// transport's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Path sent to whichever backend is selected.
    pub path: String,
}

impl Request {
    /// Build a request for the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new("/api")
    }
}
