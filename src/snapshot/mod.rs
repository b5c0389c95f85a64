//! Dated CSV snapshots of the statistics table

pub mod store;

pub use store::{LocalSnapshotStore, Snapshot, SnapshotStore};
