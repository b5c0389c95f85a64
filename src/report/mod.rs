//! Report dispatch - annotation archive downloads and the summary email

pub mod download;
pub mod email;

pub use download::{day_annotations_dir, download_delta_annotations};
pub use email::{Mailer, ReportContext, ReportEmail, SmtpMailer, render_report};
