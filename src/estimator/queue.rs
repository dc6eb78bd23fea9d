use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::api::ProcessingBackend;
use crate::config::QueueConfig;
use crate::error::Result;
use crate::models::{EstimateSource, QueueEstimate, QueueSnapshot, UserStats, Video};

/// Estimates global queue load with a three tier fallback chain:
/// the queue-status endpoint, then an aggregate of the user's videos and
/// stats, then (when nothing at all is known) clock-derived demo numbers.
pub struct QueueEstimator {
    backend: Arc<dyn ProcessingBackend>,
    seconds_per_video: u64,
    synthesize_when_idle: bool,
}

impl QueueEstimator {
    pub fn new(backend: Arc<dyn ProcessingBackend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            seconds_per_video: config.seconds_per_video,
            synthesize_when_idle: config.synthesize_when_idle,
        }
    }

    pub async fn estimate(&self) -> Result<QueueEstimate> {
        self.estimate_at(Utc::now()).await
    }

    /// Same as [`estimate`](Self::estimate) with an explicit clock, so the
    /// synthetic tier is reproducible.
    pub async fn estimate_at(&self, now: DateTime<Utc>) -> Result<QueueEstimate> {
        match self.backend.queue_status().await {
            Ok(snapshot) => {
                debug!("Queue status from backend: {:?}", snapshot);
                return Ok(QueueEstimate {
                    snapshot,
                    source: EstimateSource::Authoritative,
                });
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => debug!("Queue status endpoint unavailable, deriving estimate: {}", e),
        }

        let videos = match self.backend.list_videos().await {
            Ok(videos) => videos,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                debug!("Video list unavailable for queue estimate: {}", e);
                Vec::new()
            }
        };

        let stats = match self.backend.user_stats().await {
            Ok(stats) => stats,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                debug!("Stats endpoint unavailable, computing from videos: {}", e);
                UserStats::from_videos(&videos)
            }
        };

        let snapshot = derive_snapshot(&videos, &stats, self.seconds_per_video);
        let no_signal =
            snapshot.queue_length == 0 && snapshot.processing_count == 0 && videos.is_empty();

        if !no_signal {
            return Ok(QueueEstimate {
                snapshot,
                source: EstimateSource::Derived,
            });
        }

        if self.synthesize_when_idle {
            let snapshot = synthetic_snapshot(now, self.seconds_per_video);
            debug!("No queue signal, using demonstration snapshot {:?}", snapshot);
            return Ok(QueueEstimate {
                snapshot,
                source: EstimateSource::Synthetic,
            });
        }

        Ok(QueueEstimate {
            snapshot: QueueSnapshot::default(),
            source: EstimateSource::Empty,
        })
    }
}

/// Aggregate a snapshot from the user's own videos and stats
pub fn derive_snapshot(videos: &[Video], stats: &UserStats, seconds_per_video: u64) -> QueueSnapshot {
    let pending = videos.iter().filter(|v| v.status.is_pending_like()).count() as u32;
    let processing = videos.iter().filter(|v| v.status.is_processing_like()).count() as u32;
    let reported_processing = u32::try_from(stats.processing).unwrap_or(u32::MAX);

    QueueSnapshot {
        queue_length: pending,
        processing_count: processing.max(reported_processing),
        videos_in_queue: pending + processing,
        estimated_wait_time: u64::from(pending) * seconds_per_video,
    }
}

/// Bounded demonstration numbers that change slowly with the clock:
/// 1-3 processing (10 s steps) and 2-6 queued (20 s steps).
pub fn synthetic_snapshot(now: DateTime<Utc>, seconds_per_video: u64) -> QueueSnapshot {
    let millis = now.timestamp_millis();
    let processing = (millis.div_euclid(10_000).rem_euclid(3) + 1) as u32;
    let queued = (millis.div_euclid(20_000).rem_euclid(5) + 2) as u32;

    QueueSnapshot {
        queue_length: queued,
        processing_count: processing,
        videos_in_queue: queued + processing,
        estimated_wait_time: u64::from(queued) * seconds_per_video,
    }
}
