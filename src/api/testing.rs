//! In-memory backend with scripted replies for unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ProcessingBackend, UploadRequest};
use crate::error::{ClientError, Result};
use crate::models::{
    QueuePosition, QueueSnapshot, ServiceHealth, StatusResponse, UploadResponse, UserStats, Video,
    VideoStatus,
};

/// Cloneable stand-in for a backend result
#[derive(Debug, Clone)]
pub(crate) enum Reply<T> {
    Ok(T),
    Unauthorized,
    NotFound,
    Unavailable,
}

impl<T> Reply<T> {
    fn into_result(self, what: &str) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Unauthorized => Err(ClientError::Unauthorized(format!("{} rejected", what))),
            Reply::NotFound => Err(ClientError::NotFound(what.to_string())),
            Reply::Unavailable => Err(ClientError::Server {
                status: 503,
                message: format!("{} unavailable", what),
            }),
        }
    }
}

pub(crate) fn status(raw: &str) -> Reply<StatusResponse> {
    Reply::Ok(StatusResponse {
        status: VideoStatus::from(raw),
        details: serde_json::Map::new(),
    })
}

pub(crate) struct ScriptedBackend {
    /// Consumed front to back; the last reply repeats forever
    status_script: Mutex<VecDeque<Reply<StatusResponse>>>,
    status_delay: Mutex<Duration>,
    queue: Mutex<Reply<QueueSnapshot>>,
    position: Mutex<Reply<QueuePosition>>,
    videos: Mutex<Reply<Vec<Video>>>,
    stats: Mutex<Reply<UserStats>>,
    upload_delay: Mutex<Duration>,
    pub status_calls: AtomicUsize,
    pub status_completed: AtomicUsize,
    pub uploads_in_flight: AtomicUsize,
    pub max_uploads_in_flight: AtomicUsize,
    pub uploaded: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            status_script: Mutex::new(VecDeque::from([status("processing")])),
            status_delay: Mutex::new(Duration::ZERO),
            queue: Mutex::new(Reply::Unavailable),
            position: Mutex::new(Reply::Unavailable),
            videos: Mutex::new(Reply::Ok(Vec::new())),
            stats: Mutex::new(Reply::Unavailable),
            upload_delay: Mutex::new(Duration::ZERO),
            status_calls: AtomicUsize::new(0),
            status_completed: AtomicUsize::new(0),
            uploads_in_flight: AtomicUsize::new(0),
            max_uploads_in_flight: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_statuses(self, replies: Vec<Reply<StatusResponse>>) -> Self {
        *self.status_script.lock().unwrap() = replies.into();
        self
    }

    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.status_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_queue(self, reply: Reply<QueueSnapshot>) -> Self {
        *self.queue.lock().unwrap() = reply;
        self
    }

    pub fn with_position(self, reply: Reply<QueuePosition>) -> Self {
        *self.position.lock().unwrap() = reply;
        self
    }

    pub fn with_videos(self, reply: Reply<Vec<Video>>) -> Self {
        *self.videos.lock().unwrap() = reply;
        self
    }

    pub fn with_stats(self, reply: Reply<UserStats>) -> Self {
        *self.stats.lock().unwrap() = reply;
        self
    }

    pub fn with_upload_delay(self, delay: Duration) -> Self {
        *self.upload_delay.lock().unwrap() = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> Reply<StatusResponse> {
        let mut script = self.status_script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(Reply::Unavailable)
        }
    }
}

/// A pending-queue record submitted `minute` minutes after 10:00
pub(crate) fn video_at(id: &str, status: &str, minute: u32) -> Video {
    let mut video = Video::placeholder(id, Some(format!("{}.mp4", id)), 1024);
    video.status = VideoStatus::from(status);
    video.created_at = Some(
        chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap()
            .and_utc(),
    );
    video
}

#[async_trait]
impl ProcessingBackend for ScriptedBackend {
    async fn processing_status(&self, video_id: &str) -> Result<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_status();
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.status_completed.fetch_add(1, Ordering::SeqCst);
        reply.into_result(video_id)
    }

    async fn queue_status(&self) -> Result<QueueSnapshot> {
        self.queue.lock().unwrap().clone().into_result("queue status")
    }

    async fn queue_position(&self, video_id: &str) -> Result<QueuePosition> {
        self.position.lock().unwrap().clone().into_result(video_id)
    }

    async fn list_videos(&self) -> Result<Vec<Video>> {
        self.videos.lock().unwrap().clone().into_result("video list")
    }

    async fn user_stats(&self) -> Result<UserStats> {
        self.stats.lock().unwrap().clone().into_result("stats")
    }

    async fn upload_video(&self, upload: UploadRequest) -> Result<UploadResponse> {
        let now = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.upload_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(callback) = &upload.progress {
            callback(super::UploadProgress {
                bytes_sent: upload.size,
                total_bytes: upload.size,
            });
        }

        if upload.filename.contains("reject") {
            return Err(ClientError::Server {
                status: 422,
                message: "unsupported codec".to_string(),
            });
        }

        self.uploaded.lock().unwrap().push(upload.filename.clone());
        Ok(UploadResponse {
            video_id: Some(format!("id-{}", upload.filename)),
            message: None,
            details: serde_json::Map::new(),
        })
    }

    async fn download_video(&self, video_id: &str, destination: &Path) -> Result<u64> {
        let content = format!("archive of {}", video_id);
        tokio::fs::write(destination, &content).await?;
        Ok(content.len() as u64)
    }

    async fn delete_video(&self, video_id: &str) -> Result<serde_json::Value> {
        self.deleted.lock().unwrap().push(video_id.to_string());
        Ok(serde_json::json!({ "deleted": video_id }))
    }

    async fn check_services(&self) -> Vec<ServiceHealth> {
        vec![ServiceHealth {
            name: "scripted".to_string(),
            online: true,
            response_time_ms: Some(0),
            error: None,
        }]
    }
}
