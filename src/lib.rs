// Public API - configuration and the runner
pub mod config;
pub mod runner;

// Pipeline stages - organized by subsystem
pub mod cvat;
pub mod delta;
pub mod report;
pub mod snapshot;
pub mod stats;
