//! Forwarding of a live stream to third-party platforms.
//!
//! - [`TaskRegistry`] tracks one task per platform and owns stop/shutdown.
//! - [`ProcessSupervisor`] runs and cleans up one ffmpeg process.
//! - [`ForwardService`] maps publish/unpublish events onto the registry.

pub mod ffmpeg;
mod registry;
mod service;
mod supervisor;

pub use registry::{StartOutcome, StartReport, TaskRegistry};
pub use service::{ForwardEvent, ForwardReply, ForwardService};
pub use supervisor::{ProcessSupervisor, RunningProcess};
