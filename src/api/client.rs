use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use super::{ProcessingBackend, UploadProgress, UploadRequest};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::models::{
    parse_video_list, QueuePosition, QueueSnapshot, ServiceHealth, StatusResponse, UploadResponse,
    UserStats, Video,
};

/// HTTP client for the upload, processing and storage services
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    auth_url: String,
    upload_url: String,
    processing_url: String,
    storage_url: String,
    token: Option<String>,
    upload_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.services.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            auth_url: base_url(&config.services.auth_url)?,
            upload_url: base_url(&config.services.upload_url)?,
            processing_url: base_url(&config.services.processing_url)?,
            storage_url: base_url(&config.services.storage_url)?,
            token: config.auth.token.clone(),
            upload_timeout: Duration::from_secs(config.services.upload_timeout_seconds),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let response = self.authorized(self.client.get(url)).send().await?;
        let response = ensure_success(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Validate a configured base URL and strip its trailing slash
fn base_url(raw: &str) -> Result<String> {
    Url::parse(raw).map_err(|e| ClientError::Configuration(format!("invalid URL {}: {}", raw, e)))?;
    Ok(raw.trim_end_matches('/').to_string())
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::from_status(status, &body))
}

#[async_trait]
impl ProcessingBackend for ApiClient {
    async fn processing_status(&self, video_id: &str) -> Result<StatusResponse> {
        let url = format!("{}/status/{}", self.processing_url, segment(video_id));
        let status: StatusResponse = self.get_json(&url).await?;
        debug!("Status for {}: {}", video_id, status.status);
        Ok(status)
    }

    async fn queue_status(&self) -> Result<QueueSnapshot> {
        let url = format!("{}/queue/status", self.processing_url);
        self.get_json(&url).await
    }

    async fn queue_position(&self, video_id: &str) -> Result<QueuePosition> {
        let url = format!("{}/queue/position/{}", self.processing_url, segment(video_id));
        self.get_json(&url).await
    }

    async fn list_videos(&self) -> Result<Vec<Video>> {
        let url = format!("{}/videos", self.storage_url);
        let value: serde_json::Value = self.get_json(&url).await?;
        let videos = parse_video_list(value)?;
        debug!("Fetched {} videos", videos.len());
        Ok(videos)
    }

    async fn user_stats(&self) -> Result<UserStats> {
        let url = format!("{}/stats", self.storage_url);
        self.get_json(&url).await
    }

    async fn upload_video(&self, upload: UploadRequest) -> Result<UploadResponse> {
        let url = format!("{}/upload", self.upload_url);
        info!("📤 Uploading {} ({} bytes)", upload.filename, upload.size);

        let file = tokio::fs::File::open(&upload.path).await?;
        let total_bytes = upload.size;
        let progress = upload.progress.clone();
        let mut bytes_sent = 0u64;

        let stream = ReaderStream::new(file).map(move |chunk| {
            if let (Ok(bytes), Some(callback)) = (&chunk, &progress) {
                bytes_sent += bytes.len() as u64;
                callback(UploadProgress { bytes_sent, total_bytes });
            }
            chunk
        });

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            total_bytes,
        )
        .file_name(upload.filename.clone())
        .mime_str(&upload.content_type)?;

        let form = reqwest::multipart::Form::new().part("video", part);

        let response = self
            .authorized(self.client.post(&url))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.bytes().await?;
        let accepted: UploadResponse = serde_json::from_slice(&body)?;

        info!(
            "✅ Upload accepted: {} -> {}",
            upload.filename,
            accepted.video_id.as_deref().unwrap_or("<no id>")
        );
        Ok(accepted)
    }

    async fn download_video(&self, video_id: &str, destination: &Path) -> Result<u64> {
        let url = format!("{}/download/{}", self.storage_url, segment(video_id));
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = ensure_success(response).await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!("💾 Downloaded {} ({} bytes) to {}", video_id, written, destination.display());
        Ok(written)
    }

    async fn delete_video(&self, video_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/videos/{}", self.storage_url, segment(video_id));
        debug!("DELETE {}", url);

        let response = self.authorized(self.client.delete(&url)).send().await?;
        let response = ensure_success(response).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn check_services(&self) -> Vec<ServiceHealth> {
        let services = [
            ("auth", &self.auth_url),
            ("upload", &self.upload_url),
            ("processing", &self.processing_url),
            ("storage", &self.storage_url),
        ];

        let probes = services.into_iter().map(|(name, base)| async move {
            let started = Instant::now();
            match self.client.get(format!("{}/health", base)).send().await {
                Ok(response) => ServiceHealth {
                    name: name.to_string(),
                    online: response.status().is_success(),
                    response_time_ms: Some(started.elapsed().as_millis() as u64),
                    error: None,
                },
                Err(e) => {
                    warn!("Health check failed for {}: {}", name, e);
                    ServiceHealth {
                        name: name.to_string(),
                        online: false,
                        response_time_ms: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        futures::future::join_all(probes).await
    }
}
