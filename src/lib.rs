//! Composable HTTP middleware for [`hyper`] services: global and
//! per-client-IP token-bucket rate limiting, response compression
//! (gzip / deflate) with pooled codec writers, and path rewriting.
//!
//! Middleware are assembled into a [`chain::Chain`] around an endpoint
//! handler; the resulting [`chain::Handler`] slots into a hyper
//! `service_fn` with the peer address of the connection:
//!
//! ```no_run
//! use std::sync::Arc;
//! use palisade::chain::{full_body, Chain};
//! use palisade::compress::{CompressConfig, Compressor};
//! use palisade::limiter::{IpRateLimiter, RateLimitConfig};
//!
//! # async fn run() {
//! let limiter = IpRateLimiter::new(RateLimitConfig::new().with_rate(50.0).with_burst(100));
//! let compressor = Compressor::new(CompressConfig::new());
//!
//! let handler = Chain::new()
//!     .with(limiter.handler())
//!     .with(compressor.handler())
//!     .handler(Arc::new(
//!         |_req: palisade::HttpRequest, _peer: std::net::SocketAddr| async move {
//!             hyper::Response::new(full_body("hello"))
//!         },
//!     ));
//! # let _ = handler;
//! # limiter.stop().await;
//! # }
//! ```

pub mod cache;
pub mod chain;
pub mod compress;
pub mod limiter;
pub mod rewrite;

pub use chain::{Chain, Handler, HttpRequest, HttpResponse, Middleware};
pub use compress::Compressor;
pub use limiter::{IpRateLimiter, RateLimiter};
pub use rewrite::PathRewriter;
