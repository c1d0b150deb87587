use std::time::Duration;

use clap::Parser;

use crate::constants;

/// Anchor Survey Configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Connect to the anchor network gateway at host:port.
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "simulate")]
    pub link: Option<String>,

    /// Survey a simulated network read from a JSON file of true anchor positions.
    #[arg(long, value_name = "FILE")]
    pub simulate: Option<String>,

    /// Survey exactly these anchors (repeatable). Discovered anchors are then ignored.
    #[arg(long = "anchor", value_name = "ID")]
    pub anchors: Vec<String>,

    /// Anchors needed before ranging starts.
    #[arg(long, default_value_t = constants::MIN_ANCHORS)]
    pub min_anchors: usize,

    /// Seconds to wait for each ranging result.
    #[arg(long, value_name = "SECS", default_value_t = constants::RANGING_TIMEOUT_SECS)]
    pub ranging_timeout: f64,

    /// Attempts per anchor pair before giving up on it, 0 for unlimited.
    #[arg(long, default_value_t = constants::MAX_ATTEMPTS_PER_PAIR)]
    pub max_attempts: u32,

    /// Ranging exchanges averaged per request.
    #[arg(long, default_value_t = constants::RANGE_REPETITIONS)]
    pub repetitions: u32,

    /// Delay between ranging exchanges in milliseconds.
    #[arg(long, default_value_t = constants::RANGE_DELAY_MS)]
    pub delay_ms: u32,

    /// Max miss against the check anchor before the mirror candidate is taken.
    #[arg(long, default_value_t = constants::AMBIGUITY_TOLERANCE)]
    pub tolerance: f64,

    /// Height of the survey plane.
    #[arg(long, default_value_t = constants::PLANE_HEIGHT)]
    pub plane_height: f64,

    /// Presentation yaw of the marker frame in degrees.
    #[arg(long, default_value_t = constants::DEFAULT_MARKER_YAW_DEG)]
    pub marker_yaw: f64,

    /// Orchestrator tick period in milliseconds.
    #[arg(long, default_value_t = constants::TICK_INTERVAL_MS)]
    pub tick_ms: u64,

    /// Only range; do not place anchors automatically.
    #[arg(long, default_value_t = false)]
    pub no_auto_survey: bool,

    /// Send surveyed positions back to the anchor network.
    #[arg(long, default_value_t = false)]
    pub publish_positions: bool,

    /// Write survey results in CSV format to a local file.
    #[arg(long, value_name = "FILE")]
    pub write_csv: Vec<String>,

    /// Write survey results as JSON lines to a local file.
    #[arg(long, value_name = "FILE")]
    pub write_json: Vec<String>,

    /// Simulated ranging jitter (length units).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Seed for the simulated ranging jitter.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    pub fn survey_config(&self) -> SurveyConfig {
        SurveyConfig {
            min_anchors: self.min_anchors,
            ranging_timeout: Duration::from_secs_f64(self.ranging_timeout.max(0.0)),
            max_attempts_per_pair: self.max_attempts,
            repetitions: self.repetitions,
            delay_ms: self.delay_ms,
            ambiguity_tolerance: self.tolerance,
            plane_height: self.plane_height,
            marker_yaw_deg: self.marker_yaw,
            auto_survey: !self.no_auto_survey,
            publish_positions: self.publish_positions,
            fixed_anchors: self.anchors.clone(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Survey engine settings, independent of the command line
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyConfig {
    pub min_anchors: usize,
    pub ranging_timeout: Duration,
    /// 0 = unlimited
    pub max_attempts_per_pair: u32,
    pub repetitions: u32,
    pub delay_ms: u32,
    pub ambiguity_tolerance: f64,
    pub plane_height: f64,
    pub marker_yaw_deg: f64,
    /// Bootstrap and place anchors on the tick once ranging converges
    pub auto_survey: bool,
    pub publish_positions: bool,
    /// When non-empty, the only anchors surveyed
    pub fixed_anchors: Vec<String>,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        SurveyConfig {
            min_anchors: constants::MIN_ANCHORS,
            ranging_timeout: Duration::from_secs_f64(constants::RANGING_TIMEOUT_SECS),
            max_attempts_per_pair: constants::MAX_ATTEMPTS_PER_PAIR,
            repetitions: constants::RANGE_REPETITIONS,
            delay_ms: constants::RANGE_DELAY_MS,
            ambiguity_tolerance: constants::AMBIGUITY_TOLERANCE,
            plane_height: constants::PLANE_HEIGHT,
            marker_yaw_deg: constants::DEFAULT_MARKER_YAW_DEG,
            auto_survey: true,
            publish_positions: false,
            fixed_anchors: Vec::new(),
        }
    }
}
