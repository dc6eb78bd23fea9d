use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::Result;

/// Processing state of a video as reported by the backend.
///
/// Unknown strings are kept verbatim in [`VideoStatus::Other`] and treated as
/// still running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VideoStatus {
    Pending,
    Uploaded,
    Processing,
    Completed,
    Ready,
    Failed,
    Other(String),
}

impl VideoStatus {
    pub fn as_str(&self) -> &str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
            VideoStatus::Other(raw) => raw,
        }
    }

    /// `completed` and `ready` are synonyms for a successful result
    pub fn is_success(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Ready)
    }

    /// No further processing-state transition is expected
    pub fn is_terminal(&self) -> bool {
        self.is_success() || matches!(self, VideoStatus::Failed)
    }

    /// Not yet started by the pipeline
    pub fn is_pending_like(&self) -> bool {
        matches!(self, VideoStatus::Pending | VideoStatus::Uploaded)
    }

    pub fn is_processing_like(&self) -> bool {
        matches!(self, VideoStatus::Processing)
    }

    /// Human readable label for listings
    pub fn label(&self) -> &str {
        match self {
            VideoStatus::Pending => "Pending",
            VideoStatus::Uploaded => "Uploaded",
            VideoStatus::Processing => "Processing",
            VideoStatus::Completed => "Completed",
            VideoStatus::Ready => "Ready",
            VideoStatus::Failed => "Failed",
            VideoStatus::Other(raw) => raw,
        }
    }
}

impl Default for VideoStatus {
    fn default() -> Self {
        VideoStatus::Other("unknown".to_string())
    }
}

impl From<String> for VideoStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => VideoStatus::Pending,
            "uploaded" => VideoStatus::Uploaded,
            "processing" => VideoStatus::Processing,
            "completed" => VideoStatus::Completed,
            "ready" => VideoStatus::Ready,
            "failed" => VideoStatus::Failed,
            _ => VideoStatus::Other(raw),
        }
    }
}

impl From<&str> for VideoStatus {
    fn from(raw: &str) -> Self {
        VideoStatus::from(raw.to_string())
    }
}

impl From<VideoStatus> for String {
    fn from(status: VideoStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-submitted media item, as listed by the storage service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// Opaque identifier assigned at upload time
    #[serde(rename = "video_id", alias = "id", deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(default, deserialize_with = "lenient_status")]
    pub status: VideoStatus,

    /// Original file name
    #[serde(default, alias = "name", alias = "original_name")]
    pub filename: Option<String>,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,

    /// Older backends only send this one
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub upload_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Processing duration in seconds
    #[serde(default)]
    pub processing_time: Option<f64>,

    #[serde(rename = "file_size", default, deserialize_with = "non_negative")]
    pub size_bytes: u64,

    #[serde(default, deserialize_with = "non_negative")]
    pub frame_count: u64,

    /// Size of the downloadable archive
    #[serde(default)]
    pub zip_size: Option<u64>,
}

impl Video {
    /// Client-side placeholder created when an upload is accepted, replaced
    /// by the backend's record on the next refresh
    pub fn placeholder(id: impl Into<String>, filename: Option<String>, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            status: VideoStatus::Pending,
            filename,
            created_at: Some(Utc::now()),
            upload_time: None,
            processed_at: None,
            processing_time: None,
            size_bytes,
            frame_count: 0,
            zip_size: None,
        }
    }

    /// Submission time used for ordering the pending queue
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.upload_time)
    }

    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.id)
    }
}

/// Response of the per-video status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: VideoStatus,

    /// Everything else the backend chose to send
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Point-in-time estimate of backend load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Videos not yet started
    #[serde(default, deserialize_with = "non_negative_u32")]
    pub queue_length: u32,

    /// Videos currently being processed
    #[serde(default, deserialize_with = "non_negative_u32")]
    pub processing_count: u32,

    #[serde(default, deserialize_with = "non_negative_u32")]
    pub videos_in_queue: u32,

    /// Seconds
    #[serde(default, deserialize_with = "non_negative")]
    pub estimated_wait_time: u64,
}

/// Which fallback tier produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    /// Returned by the queue-status endpoint
    Authoritative,
    /// Aggregated from the user's videos and stats
    Derived,
    /// Demonstration numbers derived from the clock
    Synthetic,
    /// Nothing available
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEstimate {
    pub snapshot: QueueSnapshot,
    pub source: EstimateSource,
}

/// Approximate place of one video in the pending queue.
///
/// A position of `0` means "no queue information", never "front of queue".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    #[serde(default, deserialize_with = "non_negative_u32")]
    pub position: u32,

    #[serde(default, deserialize_with = "non_negative")]
    pub estimated_wait_time: u64,
}

impl QueuePosition {
    pub fn is_known(&self) -> bool {
        self.position > 0
    }
}

/// Aggregate counters for the user's library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(default, deserialize_with = "non_negative")]
    pub total_videos: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub processing: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub completed: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub total_size: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub total_frames: u64,
}

impl UserStats {
    /// Compute stats locally when the stats endpoint is unavailable
    pub fn from_videos(videos: &[Video]) -> Self {
        Self {
            total_videos: videos.len() as u64,
            processing: videos.iter().filter(|v| v.status.is_processing_like()).count() as u64,
            completed: videos.iter().filter(|v| v.status.is_success()).count() as u64,
            total_size: videos.iter().map(|v| v.size_bytes).sum(),
            total_frames: videos.iter().map(|v| v.frame_count).sum(),
        }
    }
}

/// Response of the upload endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default, alias = "id", deserialize_with = "optional_string_or_number")]
    pub video_id: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Reachability of one backend service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub online: bool,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// Accept the list shapes the storage service has used over time:
/// `{"videos": [...]}`, a bare array, or `{"data": [...]}`.
pub fn parse_video_list(value: serde_json::Value) -> Result<Vec<Video>> {
    let records = match value {
        serde_json::Value::Array(records) => records,
        serde_json::Value::Object(mut map) => {
            match map.remove("videos").or_else(|| map.remove("data")) {
                Some(serde_json::Value::Array(records)) => records,
                _ => return Ok(Vec::new()),
            }
        }
        _ => return Ok(Vec::new()),
    };

    // Unreadable records are skipped one by one
    let mut videos = Vec::with_capacity(records.len());
    for record in records {
        match serde_json::from_value::<Video>(record) {
            Ok(video) => videos.push(video),
            Err(e) => warn!("Skipping unreadable video record: {}", e),
        }
    }
    Ok(videos)
}

/// Parse RFC 3339, naive ISO-8601 (assumed UTC) or epoch seconds. Anything
/// unparseable becomes `None` instead of failing the whole record.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| parse_timestamp(&v)))
}

pub(crate) fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(naive.and_utc());
                }
            }
            None
        }
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Ids arrive as strings from most backends and as integers from some
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid video id: {}", other))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `null`, missing or non-string statuses read as the default
fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<VideoStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(text)) => VideoStatus::from(text),
        _ => VideoStatus::default(),
    })
}

/// Counters must never go negative; nulls and negatives read as zero
fn non_negative<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    })
}

fn non_negative_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    non_negative(deserializer).map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}
