//! srs-forward library crate.
//!
//! Re-forwards a live stream published on an SRS media server to third-party
//! platforms, one supervised ffmpeg process per destination.

pub mod config;
pub mod domain;
pub mod error;
pub mod forward;
pub mod logging;
pub mod store;

pub use error::{Error, Result};
