//! # WHOIS Lookup Gateway
//!
//! A small HTTP gateway that normalizes free-form IP/domain input, queries
//! the upstream WHOIS infrastructure over port 43, and returns a merged
//! record built from every segment of the referral chain.
//!
//! ## Features
//!
//! - Lenient input normalization (URLs, bare hostnames, IPv4 literals)
//! - Referral-following aggregation with list-accumulation merging
//! - Differentiated per-route response cache with lazy TTL expiry
//! - Session-bound double-submit CSRF protection with constant-time checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use whois_gateway::{build_router, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::load()?);
//!     let app = build_router(AppState::new(config));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod csrf;
pub mod errors;
pub mod gateway;
pub mod normalize;
pub mod record;
pub mod session;
pub mod whois;

pub use cache::ResponseCache;
pub use config::Config;
pub use csrf::CsrfGuard;
pub use errors::GatewayError;
pub use gateway::{build_router, AppState};
pub use normalize::{classify, LookupTarget};
pub use record::{FieldValue, WhoisRecord};
pub use whois::WhoisAggregator;
