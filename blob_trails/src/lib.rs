// THEORY:
// This file is the main entry point for the `blob_trails` library crate.
// It exposes the `TrackerRegistry` and the `TickLoop` that drives it as the
// high-level interface, together with the configuration and result types a host
// needs to feed updates in and read detections out.
//
// The per-blob machinery (history buffers, shape trackers, path matchers) lives
// in `core_modules`. It is public so hosts can inspect tracker state, but a host
// only ever needs `on_event` and `tick`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod registry;
pub mod tick_loop;

pub use config::{PathConfig, ProjectionConfig, TrackerConfig};
pub use core_modules::timed_sample::{BlobId, BlobUpdate};
pub use error::{Result, TrackingError};
pub use registry::{BlobTrackers, TickReport, TrackerRegistry, TrackingResult};
pub use tick_loop::TickLoop;
