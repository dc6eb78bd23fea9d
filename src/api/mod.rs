//! Remote API of the processing platform
//!
//! Every call the client makes goes through [`ProcessingBackend`]. The
//! production implementation is [`ApiClient`]; tests substitute scripted
//! backends.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{
    QueuePosition, QueueSnapshot, ServiceHealth, StatusResponse, UploadResponse, UserStats, Video,
};

pub mod client;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;

/// Byte-level progress of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Rounded percentage, 100 for empty files
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        ((self.bytes_sent.min(self.total_bytes) * 100 + self.total_bytes / 2) / self.total_bytes) as u8
    }
}

/// Receives progress updates while an upload body is streamed
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// A validated local file ready to be sent
#[derive(Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("path", &self.path)
            .field("filename", &self.filename)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Remote operations consumed by the poller, the estimators and the uploader
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// `GET /status/{id}`
    async fn processing_status(&self, video_id: &str) -> Result<StatusResponse>;

    /// `GET /queue/status`, optional on the backend side
    async fn queue_status(&self) -> Result<QueueSnapshot>;

    /// `GET /queue/position/{id}`, optional on the backend side
    async fn queue_position(&self, video_id: &str) -> Result<QueuePosition>;

    /// `GET /videos`
    async fn list_videos(&self) -> Result<Vec<Video>>;

    /// `GET /stats`
    async fn user_stats(&self) -> Result<UserStats>;

    /// `POST /upload`
    async fn upload_video(&self, upload: UploadRequest) -> Result<UploadResponse>;

    /// `GET /download/{id}`, streamed into `destination`. Returns bytes written.
    async fn download_video(&self, video_id: &str, destination: &Path) -> Result<u64>;

    /// `DELETE /videos/{id}`
    async fn delete_video(&self, video_id: &str) -> Result<serde_json::Value>;

    /// Probe `/health` of every service
    async fn check_services(&self) -> Vec<ServiceHealth>;
}
