// Shared survey constants
// Defaults for SurveyConfig and the CLI; all of them can be overridden at runtime

/// Seconds to wait for a ranging result before giving up on the pair for this sweep.
pub const RANGING_TIMEOUT_SECS: f64 = 5.0;

/// Ranging exchanges the anchor averages over per request.
pub const RANGE_REPETITIONS: u32 = 10;

/// Delay between ranging exchanges (ms).
pub const RANGE_DELAY_MS: u32 = 10;

/// Attempts per anchor pair before it is given up for the session. 0 = unlimited.
pub const MAX_ATTEMPTS_PER_PAIR: u32 = 5;

/// Max disagreement (length units) between a candidate and the fourth reference range
/// before the mirror candidate is taken.
pub const AMBIGUITY_TOLERANCE: f64 = 1.0;

/// All surveyed anchors are placed in the horizontal plane at this height.
pub const PLANE_HEIGHT: f64 = 1.0;

/// Height of the placeholder position given to a newly registered anchor.
pub const PLACEHOLDER_HEIGHT: f64 = 0.5;

/// Presentation yaw applied to the marker frame after the bootstrap triangle (degrees).
pub const DEFAULT_MARKER_YAW_DEG: f64 = 90.0;

/// Anchors needed before the ranging sweep starts.
pub const MIN_ANCHORS: usize = 2;

/// Orchestrator tick period (ms).
pub const TICK_INTERVAL_MS: u64 = 20;

/// Seconds between reconnect attempts on the anchor network link.
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Seconds between heartbeats written to the anchor network link.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Seconds between survey status log lines.
pub const STATUS_INTERVAL_SECS: u64 = 15;
