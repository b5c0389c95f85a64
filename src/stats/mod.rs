//! Per-task annotation statistics

pub mod calculator;
pub mod task_stats;

pub use calculator::{LabelCounts, compute_task_stats, label_counts};
pub use task_stats::TaskStats;
