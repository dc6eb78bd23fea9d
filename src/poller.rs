//! Per-video status polling
//!
//! Each poll session is a small state machine ([`PollState`]) driven by its
//! own task. The [`StatusPoller`] keeps the registry of active sessions and
//! guarantees at most one session per video id: starting a second one
//! cancels the first.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ProcessingBackend;
use crate::error::Result;
use crate::models::{StatusResponse, VideoStatus};

/// Classification of a single status check
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    StillRunning(VideoStatus),
    Succeeded(StatusResponse),
    Failed(StatusResponse),
    TransientError(String),
    AuthRejected(String),
}

impl CheckResult {
    pub fn classify(result: Result<StatusResponse>) -> Self {
        match result {
            Ok(response) if response.status.is_success() => CheckResult::Succeeded(response),
            Ok(response) if response.status == VideoStatus::Failed => CheckResult::Failed(response),
            Ok(response) => CheckResult::StillRunning(response.status),
            Err(e) if e.is_transient() => CheckResult::TransientError(e.to_string()),
            Err(e) => CheckResult::AuthRejected(e.to_string()),
        }
    }
}

/// How a poll session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Succeeded { status: StatusResponse },
    Failed { status: StatusResponse },
    /// Attempt budget exhausted. Informational: the video may still finish.
    TimedOut,
    Cancelled,
    /// Credentials were rejected; the caller must re-authenticate
    Unauthorized { message: String },
}

impl PollOutcome {
    /// Outcomes that should trigger a refresh of the video list
    pub fn is_resolution(&self) -> bool {
        matches!(self, PollOutcome::Succeeded { .. } | PollOutcome::Failed { .. })
    }
}

/// Terminal event surfaced to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReport {
    pub video_id: String,
    pub attempts_used: u32,
    #[serde(flatten)]
    pub outcome: PollOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    Unauthorized,
}

/// Bookkeeping for one session. All phases other than `Running` are
/// terminal and ignore further input.
#[derive(Debug, Clone)]
pub struct PollState {
    pub video_id: String,
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub interval: Duration,
    phase: PollPhase,
}

impl PollState {
    pub fn new(video_id: impl Into<String>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            video_id: video_id.into(),
            attempts_used: 0,
            max_attempts: max_attempts.max(1),
            interval: interval.max(Duration::from_millis(1)),
            phase: PollPhase::Running,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == PollPhase::Running
    }

    /// Record one check. Every check consumes an attempt; returns the
    /// outcome once the session reaches a terminal phase.
    pub fn record(&mut self, check: CheckResult) -> Option<PollOutcome> {
        if !self.is_running() {
            return None;
        }
        self.attempts_used += 1;

        match check {
            CheckResult::Succeeded(status) => {
                self.phase = PollPhase::Succeeded;
                Some(PollOutcome::Succeeded { status })
            }
            CheckResult::Failed(status) => {
                self.phase = PollPhase::Failed;
                Some(PollOutcome::Failed { status })
            }
            CheckResult::AuthRejected(message) => {
                self.phase = PollPhase::Unauthorized;
                Some(PollOutcome::Unauthorized { message })
            }
            CheckResult::StillRunning(_) | CheckResult::TransientError(_) => {
                if self.attempts_used >= self.max_attempts {
                    self.phase = PollPhase::TimedOut;
                    Some(PollOutcome::TimedOut)
                } else {
                    None
                }
            }
        }
    }

    pub fn cancel(&mut self) -> Option<PollOutcome> {
        if !self.is_running() {
            return None;
        }
        self.phase = PollPhase::Cancelled;
        Some(PollOutcome::Cancelled)
    }
}

struct ActiveSession {
    generation: u64,
    token: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, ActiveSession>>>;

/// Caller-side handle of a running poll session
#[derive(Debug)]
pub struct PollSession {
    video_id: String,
    interval: Duration,
    max_attempts: u32,
    attempts: Arc<AtomicU32>,
    token: CancellationToken,
    report: oneshot::Receiver<PollReport>,
}

impl PollSession {
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Stop future ticks. A check already in flight completes and is discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the terminal event
    pub async fn finished(self) -> PollReport {
        let attempts = Arc::clone(&self.attempts);
        let video_id = self.video_id.clone();
        self.report.await.unwrap_or_else(|_| PollReport {
            video_id,
            attempts_used: attempts.load(Ordering::SeqCst),
            outcome: PollOutcome::Cancelled,
        })
    }
}

/// Owns the registry of active poll sessions
pub struct StatusPoller {
    backend: Arc<dyn ProcessingBackend>,
    sessions: Registry,
    next_generation: AtomicU64,
    events: Option<mpsc::UnboundedSender<PollReport>>,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn ProcessingBackend>) -> Self {
        Self {
            backend,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            events: None,
        }
    }

    /// Poller that also publishes every terminal report on a channel
    pub fn with_events(
        backend: Arc<dyn ProcessingBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<PollReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut poller = Self::new(backend);
        poller.events = Some(tx);
        (poller, rx)
    }

    /// Begin polling `video_id`. The first check fires immediately, then
    /// every `interval`. An existing session for the same id is cancelled
    /// first.
    pub fn start(&self, video_id: &str, interval: Duration, max_attempts: u32) -> PollSession {
        let token = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        if let Some(previous) = self.registry().insert(
            video_id.to_string(),
            ActiveSession {
                generation,
                token: token.clone(),
            },
        ) {
            debug!("Replacing poll session for {}", video_id);
            previous.token.cancel();
        }

        let state = PollState::new(video_id, interval, max_attempts);
        let attempts = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel();

        info!(
            "🔄 Polling {} every {:?} (max {} attempts)",
            video_id, interval, state.max_attempts
        );

        tokio::spawn(run_session(
            Arc::clone(&self.backend),
            Arc::clone(&self.sessions),
            self.events.clone(),
            state.clone(),
            generation,
            token.clone(),
            Arc::clone(&attempts),
            tx,
        ));

        PollSession {
            video_id: video_id.to_string(),
            interval: state.interval,
            max_attempts: state.max_attempts,
            attempts,
            token,
            report: rx,
        }
    }

    /// Stop polling `video_id`. Unknown or finished ids are a no-op.
    pub fn cancel(&self, video_id: &str) -> bool {
        match self.registry().remove(video_id) {
            Some(session) => {
                session.token.cancel();
                debug!("Cancelled poll session for {}", video_id);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, session) in self.registry().drain() {
            session.token.cancel();
        }
    }

    pub fn is_active(&self, video_id: &str) -> bool {
        self.registry().contains_key(video_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveSession>> {
        lock(&self.sessions)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// The registry holds plain bookkeeping, so a poisoned lock is still usable
fn lock(sessions: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, ActiveSession>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    backend: Arc<dyn ProcessingBackend>,
    sessions: Registry,
    events: Option<mpsc::UnboundedSender<PollReport>>,
    mut state: PollState,
    generation: u64,
    token: CancellationToken,
    attempts: Arc<AtomicU32>,
    report_tx: oneshot::Sender<PollReport>,
) {
    let mut ticker = tokio::time::interval(state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                state.cancel();
                break PollOutcome::Cancelled;
            }
            _ = ticker.tick() => {}
        }

        let result = backend.processing_status(&state.video_id).await;

        // The session may have been cancelled or replaced while the request was in flight
        if token.is_cancelled() {
            debug!("Discarding status response for cancelled session {}", state.video_id);
            state.cancel();
            break PollOutcome::Cancelled;
        }

        let check = CheckResult::classify(result);
        match &check {
            CheckResult::StillRunning(status) => {
                debug!("{} still {} (attempt {})", state.video_id, status, state.attempts_used + 1)
            }
            CheckResult::TransientError(e) => {
                debug!("Status check for {} failed: {}", state.video_id, e)
            }
            _ => {}
        }

        let finished = state.record(check);
        attempts.store(state.attempts_used, Ordering::SeqCst);
        if let Some(outcome) = finished {
            break outcome;
        }
    };

    {
        let mut registry = lock(&sessions);
        if registry
            .get(&state.video_id)
            .map_or(false, |active| active.generation == generation)
        {
            registry.remove(&state.video_id);
        }
    }

    match &outcome {
        PollOutcome::Succeeded { .. } => info!("✅ Processing completed: {}", state.video_id),
        PollOutcome::Failed { .. } => warn!("❌ Processing failed: {}", state.video_id),
        PollOutcome::TimedOut => info!(
            "⏱️ Stopped polling {} after {} attempts, refresh the list later",
            state.video_id, state.attempts_used
        ),
        PollOutcome::Unauthorized { message } => {
            warn!("🔒 Polling {} rejected: {}", state.video_id, message)
        }
        PollOutcome::Cancelled => debug!("Poll session for {} cancelled", state.video_id),
    }

    let report = PollReport {
        video_id: state.video_id.clone(),
        attempts_used: state.attempts_used,
        outcome,
    };

    if let Some(events) = &events {
        let _ = events.send(report.clone());
    }
    let _ = report_tx.send(report);
}
