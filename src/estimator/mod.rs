//! Queue load and queue position estimates
//!
//! Both estimators prefer an authoritative backend endpoint and fall back to
//! deriving numbers from the user's own video list. Only authentication
//! failures escape; everything else degrades to a lower tier.

pub mod position;
pub mod queue;

pub use position::{pending_order, pending_position, PositionEstimator};
pub use queue::{derive_snapshot, synthetic_snapshot, QueueEstimator};

/// Assumed processing time per video when nothing better is known
pub const DEFAULT_SECONDS_PER_VIDEO: u64 = 90;
