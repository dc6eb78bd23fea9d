use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::api::{ProcessingBackend, ProgressCallback, UploadProgress, UploadRequest};
use crate::config::UploadConfig;
use crate::error::{ClientError, Result};

/// Progress of one file within a batch run: input index, file name, bytes
pub type BatchProgress = Arc<dyn Fn(usize, &str, UploadProgress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadStatus {
    Accepted { video_id: Option<String> },
    Rejected { error: String },
}

/// Result for one input file
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    #[serde(flatten)]
    pub status: UploadStatus,
}

impl UploadOutcome {
    pub fn video_id(&self) -> Option<&str> {
        match &self.status {
            UploadStatus::Accepted { video_id } => video_id.as_deref(),
            UploadStatus::Rejected { .. } => None,
        }
    }
}

/// Outcomes of a whole run, in input order
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// At least one upload was refused for bad credentials
    pub unauthorized: bool,
    pub outcomes: Vec<UploadOutcome>,
}

impl UploadReport {
    /// Ids the backend assigned to accepted uploads
    pub fn accepted_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| o.video_id().map(str::to_string))
            .collect()
    }
}

/// Validates local files and sends them in fixed-size batches.
///
/// Batches run strictly one after another. Inside a batch all uploads run
/// concurrently and the batch ends only when every member has settled.
pub struct Uploader {
    backend: Arc<dyn ProcessingBackend>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(backend: Arc<dyn ProcessingBackend>, config: UploadConfig) -> Self {
        Self { backend, config }
    }

    pub fn batch_size(&self) -> usize {
        self.config.max_concurrent.max(1)
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.config.supported_extensions.iter().any(|s| s.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }

    /// Expand directories into the video files they contain (recursively).
    /// Plain file arguments are kept as given and validated at upload time.
    /// A file reachable through several inputs is listed once, at its first
    /// position.
    pub fn discover(&self, inputs: &[PathBuf]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |path: PathBuf, files: &mut Vec<PathBuf>| {
            let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if seen.insert(key) {
                files.push(path);
            } else {
                debug!("Skipping duplicate selection {}", path.display());
            }
        };

        for input in inputs {
            if input.is_dir() {
                let mut found: Vec<PathBuf> = WalkDir::new(input)
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            warn!("Skipping unreadable entry under {}: {}", input.display(), e);
                            None
                        }
                    })
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .filter(|path| self.is_supported(path))
                    .collect();
                found.sort();
                debug!("📁 {} videos under {}", found.len(), input.display());
                for path in found {
                    push(path, &mut files);
                }
            } else {
                push(input.clone(), &mut files);
            }
        }

        files
    }

    /// Check type and size and build the request. Empty files are rejected.
    pub async fn prepare(&self, path: &Path) -> Result<UploadRequest> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ClientError::InvalidFile(format!("{} has no file name", path.display())))?;

        if !self.is_supported(path) {
            return Err(ClientError::InvalidFile(format!(
                "{}: unsupported type (expected one of {})",
                filename,
                self.config.supported_extensions.join(", ")
            )));
        }

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(ClientError::InvalidFile(format!("{} is not a regular file", path.display())));
        }

        let size = metadata.len();
        if size == 0 {
            return Err(ClientError::InvalidFile(format!("{} is empty", filename)));
        }
        if self.config.max_file_size > 0 && size > self.config.max_file_size {
            return Err(ClientError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        Ok(UploadRequest {
            path: path.to_path_buf(),
            content_type: content_type_for(path).to_string(),
            filename,
            size,
            progress: None,
        })
    }

    /// Upload every file, `batch_size()` at a time
    pub async fn upload_all(&self, files: Vec<PathBuf>, progress: Option<BatchProgress>) -> UploadReport {
        let start_time = Instant::now();
        let total = files.len();
        let batch_size = self.batch_size();
        info!("🚀 Uploading {} files in batches of {}", total, batch_size);

        let mut outcomes = Vec::with_capacity(total);
        let mut unauthorized = false;

        let limit = match self.config.max_files {
            0 => total,
            max => max.min(total),
        };
        let (files, over_limit) = files.split_at(limit);
        if !over_limit.is_empty() {
            warn!("Only the first {} files are uploaded, {} skipped", limit, over_limit.len());
        }

        for (batch_index, batch) in files.chunks(batch_size).enumerate() {
            debug!("Starting upload batch {} ({} files)", batch_index + 1, batch.len());

            let uploads = batch.iter().enumerate().map(|(offset, path)| {
                let index = batch_index * batch_size + offset;
                self.upload_one(index, path, progress.clone())
            });

            for (outcome, was_auth) in futures::future::join_all(uploads).await {
                unauthorized |= was_auth;
                outcomes.push(outcome);
            }
        }

        for path in over_limit {
            outcomes.push(UploadOutcome {
                path: path.clone(),
                filename: display_file_name(path),
                size: 0,
                status: UploadStatus::Rejected {
                    error: format!("limit of {} files per upload reached", limit),
                },
            });
        }

        let successful = outcomes
            .iter()
            .filter(|o| matches!(o.status, UploadStatus::Accepted { .. }))
            .count();
        let failed = total - successful;

        info!(
            "📊 Uploads finished in {:.2}s: {} accepted, {} failed",
            start_time.elapsed().as_secs_f64(),
            successful,
            failed
        );

        UploadReport {
            total,
            successful,
            failed,
            unauthorized,
            outcomes,
        }
    }

    async fn upload_one(
        &self,
        index: usize,
        path: &Path,
        progress: Option<BatchProgress>,
    ) -> (UploadOutcome, bool) {
        let filename = display_file_name(path);

        let result = match self.prepare(path).await {
            Ok(mut request) => {
                if let Some(progress) = progress {
                    let name = request.filename.clone();
                    let callback: ProgressCallback =
                        Arc::new(move |update| progress(index, &name, update));
                    request.progress = Some(callback);
                }
                let size = request.size;
                self.backend.upload_video(request).await.map(|response| (response, size))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((response, size)) => (
                UploadOutcome {
                    path: path.to_path_buf(),
                    filename,
                    size,
                    status: UploadStatus::Accepted {
                        video_id: response.video_id,
                    },
                },
                false,
            ),
            Err(e) => {
                warn!("❌ Upload of {} failed: {}", filename, e);
                let was_auth = e.is_auth();
                (
                    UploadOutcome {
                        path: path.to_path_buf(),
                        filename,
                        size: 0,
                        status: UploadStatus::Rejected { error: e.to_string() },
                    },
                    was_auth,
                )
            }
        }
    }
}

fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// MIME type sent with the multipart part
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "wmv" => "video/x-ms-wmv",
        "3gp" => "video/3gpp",
        "flv" => "video/x-flv",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedBackend;
    use crate::config::Config;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn uploader(backend: &Arc<ScriptedBackend>, config: UploadConfig) -> Uploader {
        Uploader::new(Arc::clone(backend) as Arc<dyn ProcessingBackend>, config)
    }

    fn write_files(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"mock video content").unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_prepare_validates_type_and_size() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let mut config = Config::default().upload;
        config.max_file_size = 10;
        let uploader = uploader(&backend, config);

        let files = write_files(&dir, &["clip.MP4", "notes.txt"]);

        let err = uploader.prepare(&files[0]).await.unwrap_err();
        assert!(matches!(err, ClientError::FileTooLarge { size: 18, max: 10 }));

        let err = uploader.prepare(&files[1]).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidFile(_)));
    }

    #[tokio::test]
    async fn test_prepare_sets_content_type() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let uploader = uploader(&backend, Config::default().upload);
        let files = write_files(&dir, &["a.mkv"]);

        let request = uploader.prepare(&files[0]).await.unwrap();
        assert_eq!(request.filename, "a.mkv");
        assert_eq!(request.size, 18);
        assert_eq!(request.content_type, "video/x-matroska");
    }

    #[tokio::test]
    async fn test_batches_are_bounded_and_all_settled() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new().with_upload_delay(Duration::from_millis(50)));
        let uploader = uploader(&backend, Config::default().upload);

        let files = write_files(
            &dir,
            &["1.mp4", "2.mp4", "reject-3.mp4", "4.mp4", "5.txt", "6.mp4", "7.mp4"],
        );
        let report = uploader.upload_all(files, None).await;

        assert_eq!(report.total, 7);
        assert_eq!(report.successful, 5);
        assert_eq!(report.failed, 2);
        assert!(!report.unauthorized);
        assert_eq!(backend.max_uploads_in_flight.load(Ordering::SeqCst), 3);

        let names: Vec<&str> = report.outcomes.iter().map(|o| o.filename.as_str()).collect();
        assert_eq!(names, vec!["1.mp4", "2.mp4", "reject-3.mp4", "4.mp4", "5.txt", "6.mp4", "7.mp4"]);
        assert!(matches!(report.outcomes[2].status, UploadStatus::Rejected { .. }));
        assert!(matches!(report.outcomes[4].status, UploadStatus::Rejected { .. }));
        assert_eq!(report.accepted_ids().len(), 5);
        assert_eq!(report.accepted_ids()[0], "id-1.mp4");
    }

    #[tokio::test]
    async fn test_progress_reports_global_index() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let mut config = Config::default().upload;
        config.max_concurrent = 2;
        let uploader = uploader(&backend, config);

        let seen: Arc<Mutex<Vec<(usize, String, u8)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: BatchProgress = Arc::new(move |index, name, update| {
            sink.lock().unwrap().push((index, name.to_string(), update.percent()));
        });

        let files = write_files(&dir, &["a.mp4", "b.mp4", "c.mp4"]);
        uploader.upload_all(files, Some(progress)).await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (0, "a.mp4".to_string(), 100),
                (1, "b.mp4".to_string(), 100),
                (2, "c.mp4".to_string(), 100)
            ]
        );
    }

    #[test]
    fn test_discover_walks_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("season1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("b.mov"), b"x").unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        let uploader = uploader(&backend, Config::default().upload);
        let explicit = PathBuf::from("explicit.avi");

        let found = uploader.discover(&[dir.path().to_path_buf(), explicit.clone()]);
        assert_eq!(found, vec![dir.path().join("a.mp4"), nested.join("b.mov"), explicit]);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("x.MOV")), "video/quicktime");
        assert_eq!(content_type_for(Path::new("x.3gp")), "video/3gpp");
        assert_eq!(content_type_for(Path::new("x")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("blank.mp4");
        std::fs::write(&empty, b"").unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        let uploader = uploader(&backend, Config::default().upload);

        let err = uploader.prepare(&empty).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidFile(ref msg) if msg.contains("empty")));

        let report = uploader.upload_all(vec![empty], None).await;
        assert_eq!(report.failed, 1);
        assert_eq!(backend.max_uploads_in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discover_lists_each_file_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        let uploader = uploader(&backend, Config::default().upload);
        let b = dir.path().join("b.mp4");
        let b_again = dir.path().join(".").join("b.mp4");

        let found = uploader.discover(&[b.clone(), dir.path().to_path_buf(), b_again]);
        assert_eq!(found, vec![b, dir.path().join("a.mp4")]);
    }

    #[tokio::test]
    async fn test_files_over_limit_are_reported_not_uploaded() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let mut config = Config::default().upload;
        config.max_files = 2;
        let uploader = uploader(&backend, config);

        let files = write_files(&dir, &["1.mp4", "2.mp4", "3.mp4", "4.mp4"]);
        let report = uploader.upload_all(files, None).await;

        assert_eq!(report.total, 4);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.outcomes[3].filename, "4.mp4");
        assert!(matches!(
            &report.outcomes[2].status,
            UploadStatus::Rejected { error } if error.contains("limit of 2 files")
        ));
        assert_eq!(backend.uploaded.lock().unwrap().len(), 2);
    }
}
