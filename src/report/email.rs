use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::EmailParams;
use crate::delta::{Delta, TaskUpdate};
use crate::stats::{LabelCounts, TaskStats};

/// A rendered report ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEmail {
    pub subject: String,
    pub html: String,
}

/// Everything the report body mentions
pub struct ReportContext<'a> {
    pub project_name: &'a str,
    pub date: NaiveDate,
    pub delta: &'a Delta,
    pub downloaded_files: &'a [String],
    pub download_dir: &'a Path,
    pub csv_path: &'a Path,
    pub label_counts: &'a LabelCounts,
}

/// Trait for delivering the report email
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &ReportEmail) -> Result<()>;
}

/// SMTP delivery with STARTTLS and password authentication
pub struct SmtpMailer {
    params: EmailParams,
}

impl SmtpMailer {
    pub fn new(params: EmailParams) -> Self {
        Self { params }
    }

    fn build_message(&self, email: &ReportEmail) -> Result<Message> {
        let parse = |address: &str| {
            address
                .parse::<Mailbox>()
                .with_context(|| format!("Invalid email address '{}'", address))
        };

        let mut builder = Message::builder()
            .from(parse(self.params.sender.as_str())?)
            .to(parse(self.params.destination.as_str())?)
            .subject(email.subject.as_str());
        for cc in &self.params.cc {
            builder = builder.cc(parse(cc.as_str())?);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .context("Failed to build email message")
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &ReportEmail) -> Result<()> {
        let message = self.build_message(email)?;

        let server = &self.params.smtp_server;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
            .with_context(|| format!("Invalid SMTP server '{}'", server))?
            .port(self.params.port)
            .credentials(Credentials::new(
                self.params.username.clone(),
                self.params.password.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .with_context(|| format!("Failed to send report '{}'", email.subject))?;

        info!("Email sent to {:?}", self.params.recipients());
        Ok(())
    }
}

/// Minimal escaping for text placed inside HTML elements
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut html = String::from("<table>\n<tr>");
    for header in headers {
        let _ = write!(html, "<th>{}</th>", header);
    }
    html.push_str("</tr>\n");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", escape_html(&cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>");
    html
}

fn assignee_cell(stats: &TaskStats) -> String {
    stats.assignee.clone().unwrap_or_else(|| "Unassigned".to_string())
}

fn new_tasks_table(tasks: &[TaskStats]) -> String {
    if tasks.is_empty() {
        return "<p>No new tasks were added today.</p>".to_string();
    }
    let rows = tasks
        .iter()
        .map(|t| {
            vec![
                t.task_id.to_string(),
                t.task_name.clone(),
                assignee_cell(t),
                t.frame_count.to_string(),
                t.annotated_frame_count.to_string(),
                t.unique_object_count.to_string(),
                t.total_object_count.to_string(),
                t.last_modified_timestamp.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    table(
        &[
            "task_id",
            "task_name",
            "assignee",
            "frames",
            "frames_annotated",
            "unique_obj_annotated",
            "total_obj_annotated",
            "last_modified",
        ],
        rows,
    )
}

fn updated_tasks_table(updates: &[TaskUpdate]) -> String {
    if updates.is_empty() {
        return "<p>No changes were detected in existing tasks.</p>".to_string();
    }
    let rows = updates
        .iter()
        .map(|u| {
            let (old, new) = (&u.previous, &u.current);
            vec![
                new.task_id.to_string(),
                new.task_name.clone(),
                assignee_cell(new),
                format!("{} → {}", old.annotated_frame_count, new.annotated_frame_count),
                format!("{} → {}", old.unique_object_count, new.unique_object_count),
                format!("{} → {}", old.total_object_count, new.total_object_count),
                format!("{:+}", u.frames_added()),
                format!("{:+}", u.objects_added()),
                new.last_modified_timestamp.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    table(
        &[
            "task_id",
            "task_name",
            "assignee",
            "frames_annotated",
            "unique_obj_annotated",
            "total_obj_annotated",
            "frames_added",
            "obj_added",
            "last_modified",
        ],
        rows,
    )
}

fn downloads_section(files: &[String], download_dir: &Path) -> String {
    if files.is_empty() {
        return "<p>No new annotation files were downloaded today.</p>".to_string();
    }
    let mut html = format!(
        "<h3>{} new annotation files downloaded</h3>\n<p>at: {}</p>\n<ul>\n",
        files.len(),
        escape_html(&download_dir.display().to_string())
    );
    for file in files {
        let _ = writeln!(html, "<li>{}</li>", escape_html(file));
    }
    html.push_str("</ul>");
    html
}

fn label_counts_section(counts: &LabelCounts) -> String {
    if counts.is_empty() {
        return String::new();
    }
    let rows = counts
        .iter()
        .map(|(label, count)| vec![label.clone(), count.to_string()])
        .collect();
    format!("<h3>Label totals</h3>\n{}", table(&["label", "objects"], rows))
}

/// Render the subject and HTML body of the daily report
pub fn render_report(ctx: &ReportContext<'_>) -> ReportEmail {
    let date = ctx.date.format("%Y%m%d");
    let project = escape_html(ctx.project_name);
    let subject = format!("{} annotation report for {}", ctx.project_name, date);

    let html = format!(
        r#"<html>
  <head>
    <style>
      body {{ font-family: sans-serif; }}
      table {{ border-collapse: collapse; width: 80%; }}
      th, td {{ border: 1px solid #dddddd; text-align: left; padding: 8px; }}
      th {{ background-color: #f2f2f2; }}
      ul {{ margin-top: 5px; }}
    </style>
  </head>
  <body>
    <h2>Daily {project} Annotation Report</h2>
    <h3>New Tasks Done Today</h3>
    {new_tasks}
    <br>
    <h3>Updates to Existing Tasks</h3>
    {updated_tasks}
    <hr>
    {downloads}
    <br>
    {labels}
    <p>Today's full CSV report is saved at: {csv_path}</p>
  </body>
</html>
"#,
        project = project,
        new_tasks = new_tasks_table(&ctx.delta.new_tasks),
        updated_tasks = updated_tasks_table(&ctx.delta.updated_tasks),
        downloads = downloads_section(ctx.downloaded_files, ctx.download_dir),
        labels = label_counts_section(ctx.label_counts),
        csv_path = escape_html(&ctx.csv_path.display().to_string()),
    );

    ReportEmail { subject, html }
}
