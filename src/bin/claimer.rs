//! claimer CLI: operator interface to the case claimer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use case_claimer::activity::{self, ActivityLog, LeaderboardRow};
use case_claimer::config::Config;
use case_claimer::engine::{Engine, Severity};
use case_claimer::event::EventKind;
use case_claimer::extract::{
    AdapterRegistry, ExtractionPipeline, HttpFetcher, ImageNormalizer, JsonLdMenuAdapter,
};
use case_claimer::model::{Artifact, Category};
use case_claimer::session::WebDriverFactory;
use case_claimer::telemetry::{TelemetryConfig, init_telemetry};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(name = "claimer", about = "Claims cases from a task board and packages their menus")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the board and claim cases until stopped
    Monitor {
        /// Seconds between status refreshes
        #[arg(long, default_value_t = 1)]
        poll_secs: u64,
        /// Claim without running the extraction pipeline
        #[arg(long)]
        no_extract: bool,
    },
    /// Activity log reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
    /// Extract one menu page into export files
    Scrape {
        /// Menu page URL
        url: String,
        /// Category whose export schema to use
        #[arg(long, default_value = "portugal")]
        category: Category,
        /// Directory to write the files to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Normalize local images into a single bundle
    Images {
        /// Image files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Directory to write the bundle to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Engine activity and leaderboard for one day
    Daily {
        /// Day to report, YYYY-MM-DD (default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Leaderboard for one month
    Monthly {
        /// Month number, 1-12 (default current month)
        #[arg(long)]
        month: Option<u32>,
        /// Year (default current year)
        #[arg(long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    match cli.command {
        Command::Monitor {
            poll_secs,
            no_extract,
        } => cmd_monitor(&config, poll_secs, no_extract).await,
        Command::Report { action } => {
            let log = ActivityLog::new(&config.activity_log_path);
            match action {
                ReportAction::Daily { date } => cmd_report_daily(&config, &log, date),
                ReportAction::Monthly { month, year } => {
                    cmd_report_monthly(&config, &log, month, year)
                }
            }
        }
        Command::Scrape { url, category, out } => cmd_scrape(&config, &url, category, &out).await,
        Command::Images { files, out } => cmd_images(&config, files, &out).await,
    }
}

fn build_pipeline(config: &Config) -> anyhow::Result<ExtractionPipeline> {
    let registry = AdapterRegistry::new().with(Arc::new(JsonLdMenuAdapter::with_default_domains()?));
    let fetcher = HttpFetcher::new(FETCH_TIMEOUT)?;
    let normalizer = ImageNormalizer::discover(config.ffmpeg_path.clone());
    if normalizer.ffmpeg().is_none() {
        tracing::warn!("ffmpeg not found; images the decoder cannot read will be skipped");
    }
    Ok(ExtractionPipeline::new(
        registry,
        Arc::new(fetcher),
        Arc::new(normalizer),
    ))
}

async fn cmd_monitor(config: &Config, poll_secs: u64, no_extract: bool) -> anyhow::Result<()> {
    let factory = WebDriverFactory::new(config, config.selectors()?)?;
    let log = Arc::new(ActivityLog::new(&config.activity_log_path));

    let mut engine = Engine::new(Arc::new(factory), log, config.coordinator());
    if !no_extract {
        engine = engine.with_pipeline(Arc::new(build_pipeline(config)?));
    }
    let engine = Arc::new(engine);

    let run_id = engine.start()?;
    println!("Monitoring started (run {run_id}). Commands: stop, refresh, finish <category>, save <category> <dir>, status");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
    let mut last_status = String::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                render_events(&engine);
                let snap = engine.snapshot();
                if snap.status != last_status {
                    let marker = match snap.severity {
                        Severity::Info => "",
                        Severity::Warning => "[warn] ",
                        Severity::Fatal => "[FATAL] ",
                    };
                    println!("{marker}{}", snap.status);
                    last_status = snap.status;
                }
                if !engine.is_running() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(&engine, line.trim()).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping...");
                engine.stop();
            }
        }
    }

    let state = engine.join().await;
    render_events(&engine);
    if let Some(state) = state {
        println!("Engine {state}");
    }
    Ok(())
}

async fn handle_command(engine: &Engine, line: &str) {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => {}
        (Some("stop"), _, _) => engine.stop(),
        (Some("refresh"), _, _) => engine.refresh(),
        (Some("status"), _, _) => print_slots(engine),
        (Some("finish"), Some(cat), _) => match cat.parse::<Category>() {
            Ok(category) => match engine.finish(category).await {
                Some(item) => println!("Finished {} ({category})", item.display_id),
                None => println!("No active claim for {category}"),
            },
            Err(e) => println!("{e}"),
        },
        (Some("save"), Some(cat), Some(dir)) => match cat.parse::<Category>() {
            Ok(category) => {
                let artifacts = engine.artifacts(category);
                if artifacts.is_empty() {
                    println!("No files for {category}");
                } else if let Err(e) = write_artifacts(Path::new(dir), &artifacts).await {
                    println!("Save failed: {e:#}");
                }
            }
            Err(e) => println!("{e}"),
        },
        _ => println!("Unknown command: {line}"),
    }
}

fn render_events(engine: &Engine) {
    for event in engine.poll_events() {
        let at = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
        match event.kind {
            EventKind::ClaimSuccess { category, item } => {
                println!("{at} claimed {} [{category}] {}", item.display_id, item.title);
            }
            EventKind::FatalError { reason } => println!("{at} fatal: {reason}"),
            EventKind::RecoverableError { reason } => println!("{at} error: {reason}"),
            EventKind::Stopped => println!("{at} stopped"),
            EventKind::NoClaimable | EventKind::AllSlotsFull => {}
        }
    }
}

fn print_slots(engine: &Engine) {
    let snap = engine.snapshot();
    println!("State: {}", snap.state);
    println!("{:<10} {:<16} {:<30} FILES", "CATEGORY", "CASE", "ACCOUNT");
    println!("{}", "-".repeat(70));
    for (category, slot) in &snap.slots {
        match slot {
            Some(claim) => println!(
                "{:<10} {:<16} {:<30} {}",
                category.label(),
                truncate(&claim.item.display_id, 16),
                truncate(&claim.item.account, 30),
                claim.artifacts.len(),
            ),
            None => println!("{:<10} {:<16}", category.label(), "-"),
        }
    }
}

fn cmd_report_daily(config: &Config, log: &ActivityLog, date: Option<NaiveDate>) -> anyhow::Result<()> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let entries = log.get_all()?;
    let report = activity::daily_report(&entries, date, &config.identity);

    println!("Engine activity for {date}");
    if report.bot_activity.is_empty() {
        println!("  (none)");
    } else {
        println!("{:<16} {:<10} {:<12} {:<10} ACCOUNT", "CASE", "COUNTRY", "STATUS", "DURATION");
        println!("{}", "-".repeat(70));
        for entry in &report.bot_activity {
            println!(
                "{:<16} {:<10} {:<12} {:<10} {}",
                truncate(&entry.case_id, 16),
                entry.country,
                truncate(&entry.status, 12),
                entry.duration_hms,
                entry.account,
            );
        }
    }
    println!();
    print_leaderboard(&format!("Leaderboard for {date}"), &report.leaderboard);
    Ok(())
}

fn cmd_report_monthly(
    config: &Config,
    log: &ActivityLog,
    month: Option<u32>,
    year: Option<i32>,
) -> anyhow::Result<()> {
    let today = Local::now().date_naive();
    let month = month.unwrap_or_else(|| today.month());
    let year = year.unwrap_or_else(|| today.year());
    anyhow::ensure!((1..=12).contains(&month), "month out of range: {month}");

    let entries = log.get_all()?;
    let rows = activity::leaderboard(&activity::in_month(&entries, month, year), &config.identity);
    print_leaderboard(&format!("Leaderboard for {year}-{month:02}"), &rows);
    Ok(())
}

fn print_leaderboard(title: &str, rows: &[LeaderboardRow]) {
    println!("{title}");
    if rows.is_empty() {
        println!("  (no data)");
        return;
    }
    println!("{:<32} {:>5}  CASES", "OWNER", "COUNT");
    println!("{}", "-".repeat(70));
    for row in rows {
        println!(
            "{:<32} {:>5}  {}",
            truncate(&row.owner, 32),
            row.count(),
            row.cases.join(", ")
        );
    }
}

async fn cmd_scrape(config: &Config, url: &str, category: Category, out: &Path) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;
    let output = pipeline.run_url(url, category).await?;

    println!("{:<24} {:<40} IMAGE", "ID", "NAME");
    println!("{}", "-".repeat(90));
    for processed in &output.items {
        println!(
            "{:<24} {:<40} {}",
            truncate(&processed.item.id, 24),
            truncate(processed.item.name.as_deref().unwrap_or(""), 40),
            processed.image_status,
        );
    }

    write_artifacts(out, &output.artifacts()).await
}

async fn cmd_images(config: &Config, files: Vec<PathBuf>, out: &Path) -> anyhow::Result<()> {
    let mut inputs = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        inputs.push((name, bytes));
    }

    let pipeline = build_pipeline(config)?;
    let bundle_name = format!(
        "processed_local_images_{}.zip",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let (bundle, statuses) = pipeline.bundle_images(inputs, bundle_name).await?;

    for (name, status) in &statuses {
        println!("{:<40} {status}", truncate(name, 40));
    }
    match bundle {
        Some(bundle) => write_artifacts(out, std::slice::from_ref(&bundle)).await,
        None => {
            println!("No image could be processed");
            Ok(())
        }
    }
}

async fn write_artifacts(dir: &Path, artifacts: &[Artifact]) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    for artifact in artifacts {
        let path = dir.join(&artifact.filename);
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {} ({} bytes)", path.display(), artifact.bytes.len());
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
