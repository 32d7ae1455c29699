mod browser;
mod capture;
mod control;
mod db;
mod export;
mod extract;
mod merge;
mod model;
mod scheduler;
mod score;
mod scroll;
mod view;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncBufReadExt;
use tracing::info;

use crate::capture::{CaptureConfig, CaptureSession};
use crate::export::Sink;
use crate::extract::{DiscourseProfile, Profile, WhatsAppProfile, XProfile};
use crate::model::Record;
use crate::score::ScoreOptions;
use crate::view::View;

#[derive(Parser)]
#[command(name = "feed_capture", about = "Incremental feed capture with buzz/keep scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileKind {
    /// X / Twitter timelines and threads
    X,
    /// Discourse topics
    Discourse,
    /// WhatsApp Web chats, timestamps in the local offset
    Whatsapp,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a live feed until Enter, Ctrl-C or --duration, then export
    Capture {
        /// DevTools endpoint of a Chrome started with --remote-debugging-port
        #[arg(long, env = "FEED_CAPTURE_CDP", default_value = browser::DEFAULT_CDP)]
        cdp: String,
        /// Attach to the first tab whose URL contains this
        #[arg(long, env = "FEED_CAPTURE_TAB")]
        tab: Option<String>,
        /// Read a saved page instead of a browser (re-read every tick)
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value = "x")]
        profile: ProfileKind,
        /// Site origin for relative links
        #[arg(long)]
        origin: Option<String>,
        #[arg(long, default_value = "600", value_parser = clap::value_parser!(u64).range(1..))]
        capture_ms: u64,
        #[arg(long, default_value = "900", value_parser = clap::value_parser!(u64).range(1..))]
        scroll_ms: u64,
        /// Stop automatically after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Export canonical items without scores
        #[arg(long)]
        no_score: bool,
        /// Keep intermediate scoring statistics
        #[arg(long)]
        debug_scores: bool,
        /// TOML file overriding scoring weights and half-lives
        #[arg(long)]
        score_config: Option<PathBuf>,
        /// Write the export to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Upsert the export into this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,
        /// POST the export to this URL
        #[arg(long)]
        post: Option<String>,
        /// Copy the export to the system clipboard
        #[arg(long)]
        clipboard: bool,
    },
    /// Run one extraction pass over a saved page and print the records
    Extract {
        file: PathBuf,
        #[arg(short, long, value_enum, default_value = "x")]
        profile: ProfileKind,
        #[arg(long)]
        origin: Option<String>,
        /// Page URL, used when the page has no canonical link
        #[arg(long)]
        url: Option<String>,
    },
    /// Re-score an exported JSON file
    Score {
        file: PathBuf,
        /// Score as of this RFC 3339 time (default: now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        score_config: Option<PathBuf>,
    },
    /// Highest-scoring items in a SQLite export
    Top {
        #[arg(long, default_value = db::DEFAULT_DB_PATH)]
        db: PathBuf,
        #[arg(long, value_enum, default_value = "buzz")]
        by: db::Axis,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Capture {
            cdp,
            tab,
            file,
            profile,
            origin,
            capture_ms,
            scroll_ms,
            duration,
            no_score,
            debug_scores,
            score_config,
            out,
            db,
            post,
            clipboard,
        } => {
            let mut score_options = load_score_options(score_config.as_deref())?;
            score_options.debug |= debug_scores;
            let config = CaptureConfig {
                capture_interval: Duration::from_millis(capture_ms),
                scroll_interval: Duration::from_millis(scroll_ms),
                score: !no_score,
                score_options,
            };

            let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
            if let Some(path) = out {
                sinks.push(Box::new(export::FileSink::new(path)));
            }
            if let Some(path) = db {
                sinks.push(Box::new(db::SqliteSink::new(path)));
            }
            if let Some(url) = post {
                sinks.push(Box::new(export::HttpSink::new(url)));
            }
            if clipboard {
                sinks.push(Box::new(export::ClipboardSink::system()));
            }
            if sinks.is_empty() {
                sinks.push(Box::new(export::StdoutSink));
            }

            let (view, page_url): (Arc<dyn View>, Option<String>) = match file {
                Some(path) => (Arc::new(view::SnapshotView::from_file(path)), None),
                None => {
                    let browser = browser::BrowserView::connect(&cdp, tab.as_deref()).await?;
                    let url = browser.url().await;
                    (Arc::new(browser), url)
                }
            };
            let profile = build_profile(profile, origin.as_deref(), page_url.as_deref())?;

            let mut session = CaptureSession::start(
                view,
                profile,
                &scheduler::TokioScheduler,
                Arc::new(control::SpinnerControl::new()),
                config,
            )
            .await?;

            wait_for_stop(duration).await;
            info!("Stopping with {} items", session.count().await);
            let fallbacks = fallback_sinks(&std::env::temp_dir(), Utc::now());
            match session.finish_with_fallback(&sinks, &fallbacks).await? {
                Some(n) => eprintln!("Exported {} items.", n),
                None => eprintln!("Already exported."),
            }
            Ok(())
        }
        Commands::Extract {
            file,
            profile,
            origin,
            url,
        } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let profile = build_profile(profile, origin.as_deref(), url.as_deref())?;
            let pass = extract::run_pass(&html, profile.as_ref(), true);
            println!("{}", export::to_payload(&pass.records)?);
            for a in &pass.affordances {
                eprintln!("expand: [{}] {}", a.index, a.label);
            }
            eprintln!("{} records", pass.records.len());
            Ok(())
        }
        Commands::Score {
            file,
            now,
            debug,
            score_config,
        } => {
            let mut opts = load_score_options(score_config.as_deref())?;
            opts.debug |= debug;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let items: Vec<Record> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not an exported item array", file.display()))?;
            let scored = score::score(&items, now.unwrap_or_else(Utc::now), &opts);
            println!("{}", export::to_payload(&scored)?);
            Ok(())
        }
        Commands::Top { db, by, limit } => {
            if !db.exists() {
                bail!("No database at {}. Export with --db first.", db.display());
            }
            let conn = db::connect(&db)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_top(&conn, by, limit)?;
            if rows.is_empty() {
                println!("No scored items.");
                return Ok(());
            }

            println!(
                "{:>3} | {:>6} | {:>6} | {:<16} | {:<10} | {:>7} | {:>8} | {:<40}",
                "#", "Buzz", "Keep", "Handle", "Date", "Likes", "Views", "Message"
            );
            println!("{}", "-".repeat(115));
            for (i, r) in rows.iter().enumerate() {
                let score = |s: Option<f64>| s.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
                let message = r.message.replace('\n', " ");
                println!(
                    "{:>3} | {:>6} | {:>6} | {:<16} | {:<10} | {:>7} | {:>8} | {:<40}",
                    i + 1,
                    score(r.buzz),
                    score(r.keep),
                    truncate(&r.handle, 16),
                    truncate(&r.date, 10),
                    r.likes,
                    r.views,
                    truncate(&message, 40)
                );
            }

            println!("\n{} of {} items | link: {}", rows.len(), db::count_items(&conn)?, rows[0].link);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_profile(
    kind: ProfileKind,
    origin: Option<&str>,
    page_url: Option<&str>,
) -> anyhow::Result<Arc<dyn Profile>> {
    Ok(match kind {
        ProfileKind::X => match origin {
            Some(o) => Arc::new(XProfile::new(o).with_context(|| format!("Bad origin {}", o))?),
            None => Arc::new(XProfile::default()),
        },
        ProfileKind::Discourse => Arc::new(DiscourseProfile::new(page_url.or(origin))),
        ProfileKind::Whatsapp => Arc::new(WhatsAppProfile::default()),
    })
}

/// Where an export goes when every chosen sink failed: a timestamped file
/// in `dir`, then stdout.
fn fallback_sinks(dir: &Path, now: DateTime<Utc>) -> Vec<Box<dyn Sink>> {
    let name = format!("feed_capture-{}.json", now.format("%Y%m%d-%H%M%S"));
    vec![
        Box::new(export::FileSink::new(dir.join(name))),
        Box::new(export::StdoutSink),
    ]
}

fn load_score_options(path: Option<&Path>) -> anyhow::Result<ScoreOptions> {
    match path {
        Some(p) => ScoreOptions::load(p),
        None => Ok(ScoreOptions::default()),
    }
}

/// Resolves on Ctrl-C, on Enter, or after `duration` seconds.
async fn wait_for_stop(duration: Option<u64>) {
    let timeout = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    let enter = async {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(_)) => {}
            // stdin closed or unreadable: only the other triggers apply
            _ => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = enter => {}
        _ = timeout => info!("Duration elapsed"),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
