//! Logging prelude module for convenient access to tracing macros.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Fetched {} packfiles", n);
//! debug!("Providers for {}: {:?}", key, providers);
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (normally the
/// configured `logLevel`) is used:
///
/// ```bash
/// RUST_LOG=debug objsync serve
/// RUST_LOG=objsync::resolver=debug,objsync::streamer=trace objsync fetch ...
/// ```
pub fn init_tracing(default_filter: &str) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

// vim: ts=4
