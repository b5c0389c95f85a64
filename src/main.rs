use annotation_report::config::{DEFAULT_CONFIG_PATH, ReportConfig};
use annotation_report::runner::{ReportArgs, run_report};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Fetch statistics, compare with the last snapshot, download changes and email the report
    Run {
        /// Path to the YAML configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Compute and compare only; write nothing, download nothing, send no email
        #[arg(long)]
        dry_run: bool,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            dry_run,
            quiet,
        } => run(config, dry_run, quiet).await?,
    }
    Ok(())
}

async fn run(config_path: PathBuf, dry_run: bool, quiet: bool) -> anyhow::Result<()> {
    // Initialize tracing based on quiet mode; RUST_LOG overrides
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let default_filter = if quiet {
        "annotation_report=warn"
    } else {
        "annotation_report=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = ReportConfig::load(&config_path)?;

    if !quiet {
        println!("Annotation Report");
        println!("=================");
        println!("Project: {} (id {})", config.cvat.project_name, config.cvat.project_id);
        println!("Server: {}:{}", config.cvat.host, config.cvat.port);
        println!("Snapshots: {}", config.proj_dir.display());
        if dry_run {
            println!("DRY RUN MODE - nothing will be written or sent");
        }
        println!();
    }

    let result = run_report(ReportArgs {
        config,
        run_at: chrono::Local::now().naive_local(),
        dry_run,
        quiet,
    })
    .await?;

    println!();
    println!("Report Summary");
    println!("==============");
    println!("Run date: {}", result.run_date);
    println!("Tasks with annotations: {}", result.tasks_reported);
    match result.previous_snapshot {
        Some(date) => println!("Compared with: {}", date),
        None => println!("Compared with: (no previous snapshot)"),
    }
    println!("New tasks: {}", result.delta.new_tasks.len());
    println!("Updated tasks: {}", result.delta.updated_tasks.len());
    if let Some(ref path) = result.snapshot_path {
        println!("Snapshot: {}", path.display());
    }
    println!("Annotation files downloaded: {}", result.downloaded_files.len());
    println!("Email sent: {}", if result.email_sent { "yes" } else { "no" });
    println!("Duration: {:.2}s", result.duration.as_secs_f64());

    Ok(())
}
