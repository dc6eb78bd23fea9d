use std::sync::Arc;
use tracing::debug;

use crate::api::ProcessingBackend;
use crate::error::Result;
use crate::models::{QueuePosition, Video};

/// Estimates where one video sits in the pending queue
pub struct PositionEstimator {
    backend: Arc<dyn ProcessingBackend>,
    seconds_per_video: u64,
}

impl PositionEstimator {
    pub fn new(backend: Arc<dyn ProcessingBackend>, seconds_per_video: u64) -> Self {
        Self {
            backend,
            seconds_per_video,
        }
    }

    /// Position of `video_id`, `0` when nothing is known. Only
    /// authentication failures are returned as errors.
    pub async fn position(&self, video_id: &str) -> Result<QueuePosition> {
        match self.backend.queue_position(video_id).await {
            Ok(position) => return Ok(position),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => debug!("Queue position endpoint unavailable for {}: {}", video_id, e),
        }

        match self.backend.list_videos().await {
            Ok(videos) => Ok(pending_position(&videos, video_id, self.seconds_per_video)),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                debug!("Cannot derive queue position for {}: {}", video_id, e);
                Ok(QueuePosition::default())
            }
        }
    }
}

/// Pending videos (`pending`/`uploaded`) oldest first. The sort is stable so
/// equal timestamps keep backend order; undated videos go last.
pub fn pending_order(videos: &[Video]) -> Vec<&Video> {
    let mut pending: Vec<&Video> = videos.iter().filter(|v| v.status.is_pending_like()).collect();
    pending.sort_by_key(|v| {
        let submitted = v.submitted_at();
        (submitted.is_none(), submitted)
    });
    pending
}

/// 1-based position of `video_id` among pending videos, `0` if absent
pub fn pending_position(videos: &[Video], video_id: &str, seconds_per_video: u64) -> QueuePosition {
    let position = pending_order(videos)
        .iter()
        .position(|v| v.id == video_id)
        .map_or(0, |index| index as u32 + 1);

    QueuePosition {
        position,
        estimated_wait_time: u64::from(position) * seconds_per_video,
    }
}
