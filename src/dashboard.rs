use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ProcessingBackend};
use crate::config::Config;
use crate::error::Result;
use crate::estimator::{pending_order, PositionEstimator, QueueEstimator};
use crate::models::{QueueEstimate, QueuePosition, ServiceHealth, UserStats, Video};
use crate::poller::{PollReport, PollSession, StatusPoller};
use crate::upload::{BatchProgress, UploadReport, Uploader};

/// One line of the video list view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size: String,
    pub submitted: Option<String>,
    /// Place in the pending queue, when pending
    pub queue_position: Option<u32>,
    pub can_download: bool,
}

/// Composition root: one backend handle shared by the poller, both
/// estimators and the uploader, plus the locally cached video list.
pub struct Dashboard {
    config: Config,
    backend: Arc<dyn ProcessingBackend>,
    poller: StatusPoller,
    queue: QueueEstimator,
    positions: PositionEstimator,
    uploader: Uploader,
    videos: Mutex<Vec<Video>>,
}

impl Dashboard {
    /// Dashboard talking to the configured HTTP services
    pub fn new(config: Config) -> Result<Self> {
        let client = ApiClient::new(&config)?;
        Ok(Self::with_backend(config, Arc::new(client)))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn ProcessingBackend>) -> Self {
        let poller = StatusPoller::new(Arc::clone(&backend));
        Self::assemble(config, backend, poller)
    }

    /// Like [`with_backend`](Self::with_backend), also returning every
    /// terminal poll report as it happens
    pub fn with_events(
        config: Config,
        backend: Arc<dyn ProcessingBackend>,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<PollReport>) {
        let (poller, events) = StatusPoller::with_events(Arc::clone(&backend));
        (Self::assemble(config, backend, poller), events)
    }

    fn assemble(config: Config, backend: Arc<dyn ProcessingBackend>, poller: StatusPoller) -> Self {
        Self {
            queue: QueueEstimator::new(Arc::clone(&backend), &config.queue),
            positions: PositionEstimator::new(Arc::clone(&backend), config.queue.seconds_per_video),
            uploader: Uploader::new(Arc::clone(&backend), config.upload.clone()),
            poller,
            backend,
            config,
            videos: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Upload files and directories. Accepted uploads get a placeholder in
    /// the cached list and, when `watch` is set, a poll session each.
    pub async fn upload_and_watch(
        &self,
        inputs: &[PathBuf],
        progress: Option<BatchProgress>,
        watch: bool,
    ) -> (UploadReport, Vec<PollSession>) {
        let files = self.uploader.discover(inputs);
        let report = self.uploader.upload_all(files, progress).await;

        for outcome in &report.outcomes {
            if let Some(id) = outcome.video_id() {
                let placeholder = Video::placeholder(id, Some(outcome.filename.clone()), outcome.size);
                let mut videos = self.cache();
                videos.retain(|v| v.id != id);
                videos.push(placeholder);
            }
        }

        let sessions = if watch {
            report.accepted_ids().iter().map(|id| self.watch(id)).collect()
        } else {
            Vec::new()
        };

        (report, sessions)
    }

    /// Poll one video with the configured interval and budget
    pub fn watch(&self, video_id: &str) -> PollSession {
        self.poller.start(
            video_id,
            self.config.polling.interval(),
            self.config.polling.max_attempts,
        )
    }

    /// Replace the cached list with the backend's
    pub async fn refresh(&self) -> Result<Vec<Video>> {
        let videos = self.backend.list_videos().await?;
        debug!("Refreshed video list: {} videos", videos.len());
        *self.cache() = videos.clone();
        Ok(videos)
    }

    /// Cached videos, as last refreshed
    pub fn videos(&self) -> Vec<Video> {
        self.cache().clone()
    }

    /// Rows for the list view, in cache order
    pub fn video_rows(&self) -> Vec<VideoRow> {
        let videos = self.cache();
        let pending: Vec<&str> = pending_order(&videos).iter().map(|v| v.id.as_str()).collect();

        videos
            .iter()
            .map(|video| VideoRow {
                id: video.id.clone(),
                name: video.display_name().to_string(),
                status: video.status.label().to_string(),
                size: format_file_size(video.size_bytes),
                submitted: video
                    .submitted_at()
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string()),
                queue_position: pending
                    .iter()
                    .position(|id| *id == video.id)
                    .map(|index| index as u32 + 1),
                can_download: video.status.is_success(),
            })
            .collect()
    }

    /// Library stats, computed locally when the stats endpoint is down
    pub async fn stats(&self) -> Result<UserStats> {
        match self.backend.user_stats().await {
            Ok(stats) => Ok(stats),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!("Stats endpoint unavailable, computing locally: {}", e);
                let videos = match self.refresh().await {
                    Ok(videos) => videos,
                    Err(e) if e.is_auth() => return Err(e),
                    Err(_) => self.videos(),
                };
                Ok(UserStats::from_videos(&videos))
            }
        }
    }

    pub async fn queue(&self) -> Result<QueueEstimate> {
        self.queue.estimate().await
    }

    pub async fn position(&self, video_id: &str) -> Result<QueuePosition> {
        self.positions.position(video_id).await
    }

    /// Download the processed archive into the configured directory
    pub async fn download(&self, video_id: &str) -> Result<(PathBuf, u64)> {
        let dir = &self.config.output.download_dir;
        tokio::fs::create_dir_all(dir).await?;
        let destination = dir.join(archive_name(video_id));

        let bytes = self.backend.download_video(video_id, &destination).await?;
        info!("📥 Downloaded {} ({}) to {}", video_id, format_file_size(bytes), destination.display());
        Ok((destination, bytes))
    }

    /// Delete a video and stop watching it
    pub async fn delete(&self, video_id: &str) -> Result<serde_json::Value> {
        let response = self.backend.delete_video(video_id).await?;
        self.poller.cancel(video_id);
        self.cache().retain(|v| v.id != video_id);
        info!("🗑️ Deleted {}", video_id);
        Ok(response)
    }

    pub async fn health(&self) -> Vec<ServiceHealth> {
        self.backend.check_services().await
    }

    fn cache(&self) -> MutexGuard<'_, Vec<Video>> {
        self.videos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn archive_name(video_id: &str) -> String {
    let safe: String = video_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("video-{}.zip", safe)
}

/// Human readable size: `0 Bytes`, `1.5 KB`, `10 MB`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
