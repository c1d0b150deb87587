// Distance graph of anchors
// Undirected weighted graph keyed by anchor id, iterated in registration order

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::constants::PLACEHOLDER_HEIGHT;
use crate::error::{SurveyError, SurveyResult};
use crate::geometry::{self, Point};
use crate::output::SurveyMarker;

/// Order-independent key for an anchor pair
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Measured range from one anchor to a neighbor
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub neighbor: String,
    pub distance: f64,
}

/// A fixed node of the localization network
#[derive(Debug, Clone)]
pub struct Anchor {
    pub id: String,
    /// Display position until surveyed
    pub placeholder: Point,
    /// Survey result, set exactly once
    pub position: Option<Point>,
    pub surveyed: bool,
    /// Ranges in the order they were measured
    pub edges: Vec<Edge>,
    /// Handle returned by the output layer when the position was finalized
    pub marker: Option<SurveyMarker>,
}

impl Anchor {
    fn new(id: String, index: usize) -> Self {
        Anchor {
            id,
            placeholder: Point::new(index as f64, PLACEHOLDER_HEIGHT, 0.0),
            position: None,
            surveyed: false,
            edges: Vec::new(),
            marker: None,
        }
    }

    /// Measured range to `neighbor`, if any
    pub fn edge(&self, neighbor: &str) -> Option<f64> {
        self.edges
            .iter()
            .find(|e| e.neighbor == neighbor)
            .map(|e| e.distance)
    }
}

/// All anchors of the survey session and the ranges between them.
///
/// The first registered anchor is the origin of the survey frame. Iteration
/// always follows registration order so that tie-breaks are reproducible.
#[derive(Debug, Clone, Default)]
pub struct DistanceGraph {
    anchors: Vec<Anchor>,
    index: HashMap<String, usize>,
}

impl DistanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the anchor with this id, registering it at a placeholder position if new.
    pub fn get_or_create(&mut self, id: &str) -> &mut Anchor {
        let idx = match self.index.get(id) {
            Some(&idx) => idx,
            None => {
                let idx = self.anchors.len();
                self.anchors.push(Anchor::new(id.to_string(), idx));
                self.index.insert(id.to_string(), idx);
                debug!(anchor = id, index = idx, "Registered anchor");
                idx
            }
        };
        &mut self.anchors[idx]
    }

    pub fn get(&self, id: &str) -> Option<&Anchor> {
        self.index.get(id).map(|&idx| &self.anchors[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The first registered anchor
    pub fn origin(&self) -> Option<&Anchor> {
        self.anchors.first()
    }

    pub fn is_origin(&self, id: &str) -> bool {
        self.origin().is_some_and(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Anchors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }

    /// Ids of anchors without a survey result, in registration order
    pub fn unsurveyed(&self) -> Vec<String> {
        self.anchors
            .iter()
            .filter(|a| !a.surveyed)
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn surveyed_count(&self) -> usize {
        self.anchors.iter().filter(|a| a.surveyed).count()
    }

    /// Record a measured range between `a` and `b`.
    ///
    /// The first measurement of a pair wins: if `a -> b` already exists this is
    /// a no-op. Otherwise `a -> b` is inserted together with the converse
    /// `b -> a` when that is missing. Unknown anchors are registered.
    ///
    /// # Returns
    /// * `Ok(true)` if a new edge was inserted
    /// * `Ok(false)` if the pair was already measured
    /// * `Err(InvalidMeasurement)` for a self-edge or a distance that is not positive and finite
    pub fn add_edge(&mut self, a: &str, b: &str, distance: f64) -> SurveyResult<bool> {
        if a == b || !distance.is_finite() || distance <= 0.0 {
            return Err(SurveyError::InvalidMeasurement {
                anchor: a.to_string(),
                target: b.to_string(),
                distance,
            });
        }

        if self.edge(a, b).is_some() {
            return Ok(false);
        }

        self.get_or_create(a).edges.push(Edge {
            neighbor: b.to_string(),
            distance,
        });
        debug!(anchor = a, target = b, distance, "Added range");

        let converse = self.get_or_create(b);
        if converse.edge(a).is_none() {
            converse.edges.push(Edge {
                neighbor: a.to_string(),
                distance,
            });
            debug!(anchor = b, target = a, distance, "Added converse range");
        }

        Ok(true)
    }

    /// Measured range from `a` to `b`
    pub fn edge(&self, a: &str, b: &str) -> Option<f64> {
        self.get(a).and_then(|anchor| anchor.edge(b))
    }

    /// Like `edge`, but a missing range is an error
    pub fn require_edge(&self, a: &str, b: &str) -> SurveyResult<f64> {
        self.edge(a, b).ok_or_else(|| SurveyError::MissingRange {
            from: a.to_string(),
            to: b.to_string(),
        })
    }

    /// Number of measured undirected pairs
    pub fn edge_count(&self) -> usize {
        let directed: usize = self.anchors.iter().map(|a| a.edges.len()).sum();
        directed / 2
    }

    /// Nearest neighbor of `a` whose range is strictly greater than `threshold`.
    ///
    /// Walking with increasing thresholds visits neighbors nearest-first
    /// without picking the same one twice. Ties go to the earliest measured
    /// edge.
    ///
    /// # Arguments
    /// * `exclude_origin` - never return the origin anchor
    /// * `require_surveyed` - only consider neighbors that already have a position
    pub fn neighbors_closer_than(
        &self,
        a: &str,
        threshold: f64,
        exclude_origin: bool,
        require_surveyed: bool,
    ) -> Option<&Edge> {
        let anchor = self.get(a)?;
        let mut best: Option<&Edge> = None;
        for edge in &anchor.edges {
            if exclude_origin && self.is_origin(&edge.neighbor) {
                continue;
            }
            if require_surveyed && !self.get(&edge.neighbor).is_some_and(|n| n.surveyed) {
                continue;
            }
            if edge.distance > threshold && best.map_or(true, |b| edge.distance < b.distance) {
                best = Some(edge);
            }
        }
        best
    }

    /// Finalize an anchor's position. A position is only ever set once.
    pub fn set_position(&mut self, id: &str, position: Point) -> SurveyResult<()> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| SurveyError::UnknownAnchor(id.to_string()))?;
        let anchor = &mut self.anchors[idx];
        if anchor.surveyed {
            return Err(SurveyError::AlreadySurveyed(id.to_string()));
        }
        anchor.position = Some(position);
        anchor.surveyed = true;
        Ok(())
    }

    pub fn set_marker(&mut self, id: &str, marker: SurveyMarker) {
        if let Some(&idx) = self.index.get(id) {
            self.anchors[idx].marker = Some(marker);
        }
    }

    /// Surveyed position of an anchor
    pub fn position(&self, id: &str) -> Option<Point> {
        self.get(id).and_then(|a| a.position)
    }

    /// Register anchors at known positions and range every pair from the geometry.
    ///
    /// Used for simulation: the survey then has to rediscover the layout from
    /// the ranges alone. Coincident points are skipped (no zero-length edges).
    pub fn seed_from_positions(&mut self, points: &[(String, Point)]) -> SurveyResult<()> {
        for (id, _) in points {
            self.get_or_create(id);
        }
        for (id1, p1) in points {
            for (id2, p2) in points {
                if id1 == id2 {
                    continue;
                }
                let d = geometry::distance(p1, p2);
                if d > 0.0 {
                    self.add_edge(id1, id2, d)?;
                }
            }
        }
        Ok(())
    }

    /// One line per anchor listing its measured ranges
    pub fn format_ranges(&self) -> String {
        let mut output = String::new();
        for anchor in &self.anchors {
            let _ = write!(output, "{}:", anchor.id);
            for edge in &anchor.edges {
                let _ = write!(output, "\t{}: {:.2}m", edge.neighbor, edge.distance);
            }
            output.push('\n');
        }
        output
    }
}
