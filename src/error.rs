// Survey error taxonomy
// Every fallible operation in the crate reports one of these

use std::time::Duration;

/// Errors raised while ranging, placing anchors, or talking to the anchor network
#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    /// Non-positive or non-finite distance, or an edge from an anchor to itself
    #[error("invalid measurement {anchor} -> {target}: {distance}")]
    InvalidMeasurement {
        anchor: String,
        target: String,
        distance: f64,
    },

    /// No result arrived for the pending pair before the timeout
    #[error("ranging {anchor} -> {target} timed out after {elapsed:?}")]
    RangingTimeout {
        anchor: String,
        target: String,
        elapsed: Duration,
    },

    /// Law of cosines produced no real angle (zero side or inconsistent triangle)
    #[error("degenerate triangle ab={ab:.3} ac={ac:.3} bc={bc:.3}")]
    DegenerateTriangle { ab: f64, ac: f64, bc: f64 },

    /// No fourth surveyed anchor with a measured range to pick between mirror candidates
    #[error("no disambiguation point available for {anchor}")]
    MissingDisambiguationPoint { anchor: String },

    /// A range the geometry needs has not been measured
    #[error("no range between {from} and {to}")]
    MissingRange { from: String, to: String },

    /// Bootstrap needs two neighbors of the origin at different ranges
    #[error("anchor {anchor} has {have} usable ranges, bootstrap needs 2")]
    NotEnoughRanges { anchor: String, have: usize },

    #[error("no anchors registered")]
    NoAnchors,

    #[error("unknown anchor {0}")]
    UnknownAnchor(String),

    #[error("anchor {0} is already surveyed")]
    AlreadySurveyed(String),

    /// Inbound line that is neither a tag position nor a link message
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("ranging link is down")]
    LinkDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SurveyError {
    /// Only an inconsistent distance graph needs an operator; everything else clears on retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SurveyError::DegenerateTriangle { .. })
    }
}

/// Result type for survey operations
pub type SurveyResult<T> = Result<T, SurveyError>;
