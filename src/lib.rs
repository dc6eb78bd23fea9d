//! vidqueue - client for an asynchronous video processing service
//!
//! Uploads videos in bounded batches, polls each one until the backend
//! resolves it, and estimates queue load and per-video queue position
//! even when the backend's queue endpoints are unavailable.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod estimator;
pub mod models;
pub mod poller;
pub mod upload;

// Re-export main types for easy access
pub use crate::api::{ApiClient, ProcessingBackend, UploadProgress, UploadRequest};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::dashboard::{format_file_size, Dashboard, VideoRow};
pub use crate::error::{ClientError, Result};
pub use crate::estimator::{PositionEstimator, QueueEstimator};
pub use crate::models::{
    EstimateSource, QueueEstimate, QueuePosition, QueueSnapshot, ServiceHealth, StatusResponse,
    UserStats, Video, VideoStatus,
};
pub use crate::poller::{PollOutcome, PollReport, PollSession, StatusPoller};
pub use crate::upload::{UploadOutcome, UploadReport, UploadStatus, Uploader};
