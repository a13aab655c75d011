//! # Course Runner
//!
//! Runs untrusted, student-submitted Python over HTTP and streams the output
//! back while the program is still running.
//!
//! ## Features
//!
//! - **One child per request:** every submission gets a fresh interpreter; nothing
//!   is evaluated in-process and nothing is shared between requests
//! - **Progressive output:** stdout lines reach the client as they are printed,
//!   followed by stderr
//! - **Guaranteed reaping:** the child is waited on whether the program finishes,
//!   times out, floods its output or the client hangs up
//! - **Bounded:** wall-clock timeout, output ceiling and a cap on concurrent children

pub mod config;
pub mod error;
pub mod gateway;
pub mod sandbox;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
