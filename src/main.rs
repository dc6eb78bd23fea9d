use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use vidqueue::upload::BatchProgress;
use vidqueue::{ClientError, Config, Dashboard, EstimateSource, PollOutcome, PollReport};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");

    // Load configuration
    let mut load_warning = None;
    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(std::path::Path::new(path))
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::load().unwrap_or_else(|e| {
            load_warning = Some(e);
            Config::default().with_env_overrides()
        }),
    };

    // Initialize logging
    let level = if verbose { "debug" } else { config.output.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("vidqueue={},warn", level))),
        )
        .init();

    if let Some(e) = load_warning {
        warn!("Failed to load config, using defaults: {}", e);
    }
    if verbose {
        info!("Verbose logging enabled");
    }

    config.validate()?;
    tracing::debug!("{}", config.summary());

    let json = matches.get_flag("json");
    let dashboard = Dashboard::new(config)?;

    let result = match matches.subcommand() {
        Some(("upload", sub)) => upload(&dashboard, sub).await,
        Some(("watch", sub)) => watch(&dashboard, sub).await,
        Some(("list", _)) => list(&dashboard, json).await,
        Some(("stats", _)) => stats(&dashboard, json).await,
        Some(("queue", _)) => queue(&dashboard, json).await,
        Some(("position", sub)) => position(&dashboard, required(sub, "id")?, json).await,
        Some(("download", sub)) => download(&dashboard, required(sub, "id")?).await,
        Some(("delete", sub)) => delete(&dashboard, required(sub, "id")?).await,
        Some(("health", _)) => health(&dashboard, json).await,
        _ => unreachable!("subcommand is required"),
    };

    if let Err(e) = &result {
        if e.downcast_ref::<ClientError>().is_some_and(ClientError::is_auth) {
            error!("🔒 Credentials rejected; set a fresh token (VIDQUEUE_TOKEN) and retry");
        }
    }

    result
}

fn cli() -> Command {
    let id = || Arg::new("id").value_name("VIDEO_ID").help("Video identifier").required(true);

    Command::new("vidqueue")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Upload videos to the processing service and track them through its queue")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to the usual search locations)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print results as JSON")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload video files or directories")
                .arg(
                    Arg::new("paths")
                        .value_name("PATH")
                        .help("Video files or directories containing videos")
                        .num_args(1..)
                        .required(true),
                )
                .arg(
                    Arg::new("no-watch")
                        .long("no-watch")
                        .help("Do not wait for processing to finish")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Poll videos until they finish processing")
                .arg(
                    Arg::new("ids")
                        .value_name("VIDEO_ID")
                        .help("Video identifiers")
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(Command::new("list").about("List your videos"))
        .subcommand(Command::new("stats").about("Show library statistics"))
        .subcommand(Command::new("queue").about("Show processing queue load"))
        .subcommand(Command::new("position").about("Show a video's place in the queue").arg(id()))
        .subcommand(Command::new("download").about("Download a processed archive").arg(id()))
        .subcommand(Command::new("delete").about("Delete a video").arg(id()))
        .subcommand(Command::new("health").about("Check backend service reachability"))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing argument: {}", name))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn upload(dashboard: &Dashboard, matches: &ArgMatches) -> Result<()> {
    let paths: Vec<PathBuf> = matches
        .get_many::<String>("paths")
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();

    // Log each file at 25% steps
    let logged: Arc<Mutex<HashMap<usize, u8>>> = Arc::new(Mutex::new(HashMap::new()));
    let progress: BatchProgress = Arc::new(move |index, name, update| {
        let step = update.percent() / 25;
        let mut logged = logged.lock().unwrap_or_else(|p| p.into_inner());
        if logged.get(&index).map_or(true, |last| *last < step) {
            logged.insert(index, step);
            info!("📤 {}: {}%", name, update.percent());
        }
    });

    let watch = dashboard.config().upload.poll_after_upload && !matches.get_flag("no-watch");
    let start_time = std::time::Instant::now();
    let (report, sessions) = dashboard.upload_and_watch(&paths, Some(progress), watch).await;

    for outcome in &report.outcomes {
        match (&outcome.status, outcome.video_id()) {
            (vidqueue::UploadStatus::Accepted { .. }, Some(id)) => {
                info!("✅ {} accepted as {}", outcome.filename, id)
            }
            (vidqueue::UploadStatus::Accepted { .. }, None) => {
                info!("✅ {} accepted", outcome.filename)
            }
            (vidqueue::UploadStatus::Rejected { error }, _) => {
                error!("❌ {}: {}", outcome.filename, error)
            }
        }
    }

    info!("🎉 Uploads completed in {:.2}s", start_time.elapsed().as_secs_f64());
    info!("✅ Successful: {}", report.successful);
    info!("❌ Failed: {}", report.failed);

    if report.unauthorized {
        return Err(ClientError::Unauthorized("upload rejected".to_string()).into());
    }

    let reports = wait_for(dashboard, sessions).await;
    finish_watch(dashboard, &reports).await
}

async fn watch(dashboard: &Dashboard, matches: &ArgMatches) -> Result<()> {
    let sessions = matches
        .get_many::<String>("ids")
        .into_iter()
        .flatten()
        .map(|id| dashboard.watch(id))
        .collect();

    let reports = wait_for(dashboard, sessions).await;
    finish_watch(dashboard, &reports).await
}

/// Wait for every session, stopping them all on Ctrl-C
async fn wait_for(dashboard: &Dashboard, sessions: Vec<vidqueue::PollSession>) -> Vec<PollReport> {
    if sessions.is_empty() {
        return Vec::new();
    }

    info!("⏳ Watching {} videos (Ctrl-C to stop)", sessions.len());
    let all = futures::future::join_all(sessions.into_iter().map(|s| s.finished()));
    tokio::pin!(all);

    tokio::select! {
        reports = &mut all => reports,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping all poll sessions");
            dashboard.poller().cancel_all();
            all.await
        }
    }
}

async fn finish_watch(dashboard: &Dashboard, reports: &[PollReport]) -> Result<()> {
    let mut unauthorized = false;

    for report in reports {
        match &report.outcome {
            PollOutcome::Succeeded { status } => {
                info!("✅ {} finished ({}) after {} checks", report.video_id, status.status, report.attempts_used)
            }
            PollOutcome::Failed { .. } => error!("❌ {} failed processing", report.video_id),
            PollOutcome::TimedOut => warn!(
                "⏰ Stopped watching {} after {} checks; it may still finish",
                report.video_id, report.attempts_used
            ),
            PollOutcome::Cancelled => info!("⏹️ Stopped watching {}", report.video_id),
            PollOutcome::Unauthorized { message } => {
                error!("🔒 {}: {}", report.video_id, message);
                unauthorized = true;
            }
        }
    }

    if unauthorized {
        return Err(ClientError::Unauthorized("status checks rejected".to_string()).into());
    }

    if reports.iter().any(|r| r.outcome.is_resolution()) {
        if let Err(e) = dashboard.refresh().await {
            warn!("Failed to refresh video list: {}", e);
        }
    }

    Ok(())
}

async fn list(dashboard: &Dashboard, json: bool) -> Result<()> {
    dashboard.refresh().await?;
    let rows = dashboard.video_rows();

    if json {
        return print_json(&rows);
    }

    if rows.is_empty() {
        println!("No videos yet");
        return Ok(());
    }

    println!("{:<38} {:<28} {:<12} {:>10} {:<17} {:>5}", "ID", "NAME", "STATUS", "SIZE", "SUBMITTED", "QUEUE");
    for row in rows {
        println!(
            "{:<38} {:<28} {:<12} {:>10} {:<17} {:>5}",
            row.id,
            row.name,
            row.status,
            row.size,
            row.submitted.as_deref().unwrap_or("-"),
            row.queue_position.map_or_else(|| "-".to_string(), |p| format!("#{}", p)),
        );
    }
    Ok(())
}

async fn stats(dashboard: &Dashboard, json: bool) -> Result<()> {
    let stats = dashboard.stats().await?;
    if json {
        return print_json(&stats);
    }

    println!("📊 Videos:     {}", stats.total_videos);
    println!("⚙️ Processing: {}", stats.processing);
    println!("✅ Completed:  {}", stats.completed);
    println!("💾 Total size: {}", vidqueue::format_file_size(stats.total_size));
    println!("🎞️ Frames:     {}", stats.total_frames);
    Ok(())
}

async fn queue(dashboard: &Dashboard, json: bool) -> Result<()> {
    let estimate = dashboard.queue().await?;
    if json {
        return print_json(&estimate);
    }

    let snapshot = estimate.snapshot;
    println!("⏳ Queued:      {}", snapshot.queue_length);
    println!("⚙️ Processing:  {}", snapshot.processing_count);
    println!("📦 In queue:    {}", snapshot.videos_in_queue);
    println!("⏱️ Est. wait:   {}", format_wait(snapshot.estimated_wait_time));
    match estimate.source {
        EstimateSource::Authoritative => {}
        EstimateSource::Derived => println!("(estimated from your videos)"),
        EstimateSource::Synthetic => println!("(no queue data available, showing sample numbers)"),
        EstimateSource::Empty => println!("(no queue data available)"),
    }
    Ok(())
}

async fn position(dashboard: &Dashboard, id: &str, json: bool) -> Result<()> {
    let position = dashboard.position(id).await?;
    if json {
        return print_json(&position);
    }

    if position.is_known() {
        println!("#{} in queue, about {}", position.position, format_wait(position.estimated_wait_time));
    } else {
        println!("{} is not waiting in the queue", id);
    }
    Ok(())
}

async fn download(dashboard: &Dashboard, id: &str) -> Result<()> {
    let (path, bytes) = dashboard.download(id).await?;
    println!("{} ({})", path.display(), vidqueue::format_file_size(bytes));
    Ok(())
}

async fn delete(dashboard: &Dashboard, id: &str) -> Result<()> {
    dashboard.delete(id).await?;
    println!("Deleted {}", id);
    Ok(())
}

async fn health(dashboard: &Dashboard, json: bool) -> Result<()> {
    let services = dashboard.health().await;
    if json {
        return print_json(&services);
    }

    for service in &services {
        match (service.online, service.response_time_ms) {
            (true, Some(ms)) => println!("🟢 {:<12} {}ms", service.name, ms),
            (true, None) => println!("🟢 {}", service.name),
            (false, _) => println!(
                "🔴 {:<12} {}",
                service.name,
                service.error.as_deref().unwrap_or("unreachable")
            ),
        }
    }
    Ok(())
}

fn format_wait(seconds: u64) -> String {
    match seconds {
        0 => "no wait".to_string(),
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
