//! CVAT API access - wire types, the HTTP client and project data collection

pub mod client;
pub mod source;
pub mod types;

pub use client::{CvatClient, CvatClientArgsBuilder, format_slug};
pub use source::{AnnotationSource, FrameLabels, ProjectData, TaskRecord, fetch_project_data};
