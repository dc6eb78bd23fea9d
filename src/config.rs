use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration for the vidqueue client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend service locations
    pub services: ServicesConfig,

    /// Credentials
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upload validation and batching
    pub upload: UploadConfig,

    /// Status polling
    pub polling: PollingConfig,

    /// Queue estimation
    pub queue: QueueConfig,

    /// Output and logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Authentication service base URL (only probed by health checks)
    pub auth_url: String,

    /// Upload service base URL
    pub upload_url: String,

    /// Processing service base URL (status and queue endpoints)
    pub processing_url: String,

    /// Storage service base URL (listing, stats, download, delete)
    pub storage_url: String,

    /// Timeout for a single request (seconds)
    pub request_timeout_seconds: u64,

    /// Timeout for a single upload request (seconds)
    pub upload_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token sent with every request
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Accepted video file extensions
    pub supported_extensions: Vec<String>,

    /// Maximum file size in bytes (0 = no limit)
    pub max_file_size: u64,

    /// Uploads in flight at once; also the batch size
    pub max_concurrent: usize,

    /// Files accepted per upload run (0 = no limit)
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Start a poll session for every accepted upload
    pub poll_after_upload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between status checks (milliseconds)
    pub interval_ms: u64,

    /// Checks before a session reports a timeout
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Assumed average processing time per video (seconds)
    pub seconds_per_video: u64,

    /// Show clock-derived demonstration numbers when there is no signal at all
    pub synthesize_when_idle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Log level
    pub log_level: String,

    /// Where downloaded archives are written
    pub download_dir: PathBuf,
}

fn default_max_files() -> usize {
    30
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let mut config_paths = vec![
            PathBuf::from("vidqueue.toml"),
            PathBuf::from("config/vidqueue.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            config_paths.push(PathBuf::from(home).join(".config/vidqueue/config.toml"));
        }
        config_paths.push(PathBuf::from("/etc/vidqueue/config.toml"));

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        // Try environment variables
        if let Ok(config) = Self::from_env() {
            return Ok(config);
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    /// Apply `VIDQUEUE_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base) = std::env::var("VIDQUEUE_API_BASE_URL") {
            let base = base.trim_end_matches('/');
            self.services.auth_url = format!("{}/auth", base);
            self.services.upload_url = format!("{}/upload", base);
            self.services.processing_url = format!("{}/processing", base);
            self.services.storage_url = format!("{}/storage", base);
        }

        if let Ok(token) = std::env::var("VIDQUEUE_TOKEN") {
            if !token.trim().is_empty() {
                self.auth.token = Some(token.trim().to_string());
            }
        }

        if let Ok(interval) = std::env::var("VIDQUEUE_POLL_INTERVAL_MS") {
            self.polling.interval_ms = interval.parse().unwrap_or(self.polling.interval_ms);
        }

        if let Ok(attempts) = std::env::var("VIDQUEUE_POLL_MAX_ATTEMPTS") {
            self.polling.max_attempts = attempts.parse().unwrap_or(self.polling.max_attempts);
        }

        if let Ok(concurrent) = std::env::var("VIDQUEUE_MAX_CONCURRENT_UPLOADS") {
            self.upload.max_concurrent = concurrent.parse().unwrap_or(self.upload.max_concurrent);
        }

        if let Ok(log_level) = std::env::var("VIDQUEUE_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("auth_url", &self.services.auth_url),
            ("upload_url", &self.services.upload_url),
            ("processing_url", &self.services.processing_url),
            ("storage_url", &self.services.storage_url),
        ] {
            Url::parse(url).map_err(|e| anyhow!("{} is not a valid URL ({}): {}", name, url, e))?;
        }

        if self.services.request_timeout_seconds == 0 {
            return Err(anyhow!("request_timeout_seconds must be greater than 0"));
        }

        if self.upload.max_concurrent == 0 {
            return Err(anyhow!("max_concurrent must be greater than 0"));
        }

        if self.upload.supported_extensions.is_empty() {
            return Err(anyhow!("supported_extensions must not be empty"));
        }

        if self.polling.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be greater than 0"));
        }

        if self.polling.interval_ms == 0 {
            return Err(anyhow!("interval_ms must be greater than 0"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "vidqueue configuration:\n\
            - Upload service: {}\n\
            - Processing service: {}\n\
            - Storage service: {}\n\
            - Authenticated: {}\n\
            - Max file size: {} bytes\n\
            - Concurrent uploads: {}\n\
            - Files per run: {}\n\
            - Polling: every {}ms, {} attempts\n\
            - Seconds per video: {}",
            self.services.upload_url,
            self.services.processing_url,
            self.services.storage_url,
            self.auth.token.is_some(),
            self.upload.max_file_size,
            self.upload.max_concurrent,
            self.upload.max_files,
            self.polling.interval_ms,
            self.polling.max_attempts,
            self.queue.seconds_per_video
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: ServicesConfig {
                auth_url: "http://localhost:8080/auth".to_string(),
                upload_url: "http://localhost:8080/upload".to_string(),
                processing_url: "http://localhost:8080/processing".to_string(),
                storage_url: "http://localhost:8080/storage".to_string(),
                request_timeout_seconds: 30,
                upload_timeout_seconds: 600,
            },
            auth: AuthConfig::default(),
            upload: UploadConfig {
                supported_extensions: vec![
                    "mp4".to_string(),
                    "avi".to_string(),
                    "mov".to_string(),
                    "mkv".to_string(),
                    "webm".to_string(),
                    "wmv".to_string(),
                    "3gp".to_string(),
                    "flv".to_string(),
                ],
                max_file_size: 10 * 1024 * 1024, // 10MB
                max_concurrent: 3,
                max_files: default_max_files(),
                poll_after_upload: true,
            },
            polling: PollingConfig {
                interval_ms: 5000,
                max_attempts: 120, // 10 minutes
            },
            queue: QueueConfig {
                seconds_per_video: crate::estimator::DEFAULT_SECONDS_PER_VIDEO,
                synthesize_when_idle: true,
            },
            output: OutputConfig {
                log_level: "info".to_string(),
                download_dir: PathBuf::from("./downloads"),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Point every service at `{base}/{auth,upload,processing,storage}`
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.config.services.auth_url = format!("{}/auth", base);
        self.config.services.upload_url = format!("{}/upload", base);
        self.config.services.processing_url = format!("{}/processing", base);
        self.config.services.storage_url = format!("{}/storage", base);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth.token = Some(token.into());
        self
    }

    pub fn with_polling(mut self, interval_ms: u64, max_attempts: u32) -> Self {
        self.config.polling.interval_ms = interval_ms;
        self.config.polling.max_attempts = max_attempts;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, max_concurrent: usize) -> Self {
        self.config.upload.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.config.upload.max_files = max_files;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.config.upload.max_file_size = bytes;
        self
    }

    pub fn synthesize_when_idle(mut self, enable: bool) -> Self {
        self.config.queue.synthesize_when_idle = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
