// Ranging link abstraction
// The anchor network side of the survey: range commands out, results back through the command queue

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::debug;

use crate::error::SurveyResult;
use crate::geometry::{self, Point};
use crate::graph::pair_key;
use crate::orchestrator::SurveyHandle;

/// Transport to the anchor network.
///
/// Requests are fire-and-forget: the result (or nothing, on loss) arrives
/// later through `SurveyHandle::submit_survey_result`.
pub trait RangingLink: Send {
    /// Ask `anchor_a` to range against `anchor_b`
    fn send_range_request(
        &mut self,
        anchor_a: &str,
        anchor_b: &str,
        repetitions: u32,
        delay_ms: u32,
    ) -> SurveyResult<()>;

    /// Push a surveyed position back to the anchor network
    fn publish_position(&mut self, _anchor_id: &str, _position: &Point) -> SurveyResult<()> {
        Ok(())
    }
}

/// One anchor of a simulation file: `{"anchorid": "E937", "position": [x, y, z]}`
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedAnchor {
    pub anchorid: String,
    pub position: [f64; 3],
}

impl SimulatedAnchor {
    pub fn point(&self) -> Point {
        Point::new(self.position[0], self.position[1], self.position[2])
    }
}

/// Read a JSON array of anchors with their true positions. File order is registration order.
pub fn load_simulation(path: impl AsRef<Path>) -> SurveyResult<Vec<SimulatedAnchor>> {
    let text = std::fs::read_to_string(path)?;
    let anchors: Vec<SimulatedAnchor> = serde_json::from_str(&text)?;
    Ok(anchors)
}

/// Anchor network stand-in that answers from known true positions.
///
/// Answers go through the command queue exactly like results parsed off the
/// wire. Losses are deterministic: every `drop_every`-th request and every
/// request for a silent pair goes unanswered. Unknown anchors get a failed
/// (zero distance) result.
pub struct SimulatedLink {
    positions: HashMap<String, Point>,
    handle: SurveyHandle,
    noise: f64,
    rng: StdRng,
    drop_every: Option<u32>,
    silent_pairs: HashSet<(String, String)>,
    requests: Vec<(String, String)>,
    published: Vec<(String, Point)>,
}

impl SimulatedLink {
    pub fn new(anchors: &[SimulatedAnchor], handle: SurveyHandle) -> Self {
        SimulatedLink {
            positions: anchors
                .iter()
                .map(|a| (a.anchorid.clone(), a.point()))
                .collect(),
            handle,
            noise: 0.0,
            rng: StdRng::seed_from_u64(0),
            drop_every: None,
            silent_pairs: HashSet::new(),
            requests: Vec::new(),
            published: Vec::new(),
        }
    }

    /// Add uniform jitter of up to `noise` length units to every range
    pub fn with_noise(mut self, noise: f64, seed: u64) -> Self {
        self.noise = noise.abs();
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Leave every `k`-th request unanswered (k >= 2; smaller values are ignored)
    pub fn with_drop_every(mut self, k: u32) -> Self {
        self.drop_every = (k >= 2).then_some(k);
        self
    }

    /// Never answer requests between these two anchors
    pub fn with_silent_pair(mut self, a: &str, b: &str) -> Self {
        self.silent_pairs.insert(pair_key(a, b));
        self
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> &[(String, String)] {
        &self.requests
    }

    pub fn published(&self) -> &[(String, Point)] {
        &self.published
    }

    fn measure(&mut self, a: &str, b: &str) -> f64 {
        match (self.positions.get(a), self.positions.get(b)) {
            (Some(pa), Some(pb)) => {
                let d = geometry::distance(pa, pb);
                if self.noise > 0.0 {
                    let jitter = self.rng.gen_range(-self.noise..=self.noise);
                    (d + jitter).max(0.0)
                } else {
                    d
                }
            }
            _ => 0.0,
        }
    }
}

impl RangingLink for SimulatedLink {
    fn send_range_request(
        &mut self,
        anchor_a: &str,
        anchor_b: &str,
        repetitions: u32,
        delay_ms: u32,
    ) -> SurveyResult<()> {
        self.requests.push((anchor_a.to_string(), anchor_b.to_string()));
        let n = self.requests.len() as u32;
        debug!(anchor_a, anchor_b, repetitions, delay_ms, n, "Simulated range request");

        if self.drop_every.is_some_and(|k| n % k == 0) {
            return Ok(());
        }
        if self.silent_pairs.contains(&pair_key(anchor_a, anchor_b)) {
            return Ok(());
        }

        let distance = self.measure(anchor_a, anchor_b);
        let errors = if distance == 0.0 { repetitions } else { 0 };
        self.handle
            .submit_survey_result(anchor_a, anchor_b, distance, errors);
        Ok(())
    }

    fn publish_position(&mut self, anchor_id: &str, position: &Point) -> SurveyResult<()> {
        self.published.push((anchor_id.to_string(), *position));
        Ok(())
    }
}
