//! Ballast core functionality.
//!
//! This crate contains the domain models and balancing policies that power
//! the Ballast load balancer: the per-server circuit breaker, the server
//! capacity/health model, the atomically-published server pool, pluggable
//! selection strategies, and the failed-request retry cache. Everything here
//! is runtime-agnostic; the async engine lives in `ballast-engine`.

pub mod breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod retry;
pub mod strategy;
