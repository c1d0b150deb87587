// Ranging coordinator
//
// Fills in the distance graph one anchor pair at a time. Exactly one range
// request is outstanding at any moment; the coordinator is polled once per
// tick and never blocks while waiting for the result.
//
// A sweep walks every ordered pair (A, B) in registration order and skips
// pairs that already have a range. Sweeps repeat until one pass issues no
// request at all. Pairs that time out or fail are retried on the next pass,
// up to the per-pair attempt ceiling. A request the link refuses holds the
// slot for one timeout; refusals because the link is down use no attempt.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SurveyConfig;
use crate::error::SurveyError;
use crate::graph::{pair_key, DistanceGraph};
use crate::link::RangingLink;

/// State of the single outstanding measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingStatus {
    /// Nothing outstanding
    None,
    /// Request sent, waiting for the result
    Running,
    /// Result arrived, not yet applied to the graph
    Complete,
}

/// The one range request in flight
#[derive(Debug, Clone)]
pub struct PendingMeasurement {
    pub anchor: String,
    pub target: String,
    pub distance: f64,
    pub errors: u32,
    pub status: RangingStatus,
    pub issued_at: Instant,
}

impl PendingMeasurement {
    fn matches(&self, anchor: &str, target: &str) -> bool {
        (self.anchor == anchor && self.target == target)
            || (self.anchor == target && self.target == anchor)
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum RangingProgress {
    /// No sweep running
    Idle,
    /// A request is outstanding (or was just issued)
    Waiting,
    /// The sweep finished: no pair is left to measure
    Converged(RangingSummary),
}

/// Where a finished sweep left the graph
#[derive(Debug, Clone, PartialEq)]
pub struct RangingSummary {
    /// Undirected ranges in the graph
    pub edges: usize,
    /// Passes the sweep took
    pub passes: usize,
    /// Pairs given up after using all their attempts
    pub exhausted: Vec<(String, String)>,
}

/// Counters over the coordinator's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangingStats {
    pub requests: usize,
    pub added: usize,
    pub timeouts: usize,
    pub failures: usize,
    pub rejected: usize,
    pub send_errors: usize,
}

/// Drives the ranging link pair by pair until the graph is as complete as it will get.
pub struct RangingCoordinator {
    timeout: Duration,
    repetitions: u32,
    delay_ms: u32,
    /// 0 = unlimited
    max_attempts: u32,

    active: bool,
    pending: Option<PendingMeasurement>,
    /// No request goes out before this, after the link refused one
    hold_until: Option<Instant>,
    /// Next (i, j) registration indices to consider in the current pass
    cursor: (usize, usize),
    issued_this_pass: bool,
    passes: usize,
    /// Attempts per unordered pair
    attempts: HashMap<(String, String), u32>,
    stats: RangingStats,
}

impl RangingCoordinator {
    pub fn new(config: &SurveyConfig) -> Self {
        RangingCoordinator {
            timeout: config.ranging_timeout,
            repetitions: config.repetitions,
            delay_ms: config.delay_ms,
            max_attempts: config.max_attempts_per_pair,
            active: false,
            pending: None,
            hold_until: None,
            cursor: (0, 0),
            issued_this_pass: false,
            passes: 0,
            attempts: HashMap::new(),
            stats: RangingStats::default(),
        }
    }

    /// Begin a sweep. No-op if one is already running.
    pub fn start(&mut self) {
        if self.active {
            return;
        }
        info!("Ranging sweep started");
        self.active = true;
        self.hold_until = None;
        self.cursor = (0, 0);
        self.issued_this_pass = false;
        self.passes = 1;
    }

    /// Drop whatever is outstanding and sweep again from the first pair.
    /// Attempt counts survive, so exhausted pairs stay skipped.
    pub fn restart(&mut self) {
        self.cancel();
        self.start();
    }

    /// Forget every attempt count so exhausted pairs are tried again
    pub fn clear_attempts(&mut self) {
        self.attempts.clear();
    }

    /// True while a sweep is running
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn status(&self) -> RangingStatus {
        self.pending
            .as_ref()
            .map_or(RangingStatus::None, |p| p.status)
    }

    pub fn pending(&self) -> Option<&PendingMeasurement> {
        self.pending.as_ref()
    }

    pub fn stats(&self) -> &RangingStats {
        &self.stats
    }

    /// Attempts used so far on the pair (either order)
    pub fn attempts(&self, a: &str, b: &str) -> u32 {
        self.attempts.get(&pair_key(a, b)).copied().unwrap_or(0)
    }

    fn is_exhausted(&self, a: &str, b: &str) -> bool {
        self.max_attempts > 0 && self.attempts(a, b) >= self.max_attempts
    }

    /// Deliver a result for the outstanding request.
    ///
    /// Only a result naming the pending pair (in either order) while the
    /// request is running is accepted; anything else is stale and dropped.
    pub fn submit_result(&mut self, anchor: &str, target: &str, distance: f64, errors: u32) -> bool {
        match self.pending.as_mut() {
            Some(p) if p.status == RangingStatus::Running && p.matches(anchor, target) => {
                p.distance = distance;
                p.errors = errors;
                p.status = RangingStatus::Complete;
                true
            }
            _ => {
                warn!("Dropping unexpected ranging result {} -> {} ({:.3})", anchor, target, distance);
                false
            }
        }
    }

    /// Abandon the sweep and any outstanding request. No range is recorded.
    ///
    /// # Returns
    /// true if a request was outstanding
    pub fn cancel(&mut self) -> bool {
        self.active = false;
        self.hold_until = None;
        match self.pending.take() {
            Some(p) => {
                info!("Abandoned ranging {} -> {}", p.anchor, p.target);
                true
            }
            None => false,
        }
    }

    /// Advance the sweep: resolve the outstanding request, or issue the next one.
    pub fn poll(
        &mut self,
        graph: &mut DistanceGraph,
        link: &mut dyn RangingLink,
        now: Instant,
    ) -> RangingProgress {
        if !self.active {
            return RangingProgress::Idle;
        }

        if let Some(pending) = self.pending.take() {
            match pending.status {
                RangingStatus::Running => {
                    let elapsed = now.saturating_duration_since(pending.issued_at);
                    if elapsed <= self.timeout {
                        self.pending = Some(pending);
                        return RangingProgress::Waiting;
                    }
                    let err = SurveyError::RangingTimeout {
                        anchor: pending.anchor.clone(),
                        target: pending.target.clone(),
                        elapsed,
                    };
                    info!("Ranging: {}", err);
                    self.stats.timeouts += 1;
                    self.note_if_exhausted(&pending.anchor, &pending.target);
                }
                RangingStatus::Complete => self.apply(graph, &pending),
                RangingStatus::None => {}
            }
        }

        if let Some(until) = self.hold_until {
            if now < until {
                return RangingProgress::Waiting;
            }
            self.hold_until = None;
        }

        // At most one new request per poll; a pass that issued nothing ends the sweep
        loop {
            match self.next_pair(graph) {
                Some((a, b)) => {
                    self.issue(link, a, b, now);
                    return RangingProgress::Waiting;
                }
                None if self.issued_this_pass => {
                    self.cursor = (0, 0);
                    self.issued_this_pass = false;
                    self.passes += 1;
                    debug!(pass = self.passes, "Ranging pass");
                }
                None => break,
            }
        }

        self.active = false;
        let summary = RangingSummary {
            edges: graph.edge_count(),
            passes: self.passes,
            exhausted: self.exhausted_pairs(graph),
        };
        info!(
            "Ranging converged: {} ranges after {} passes, {} pairs given up",
            summary.edges,
            summary.passes,
            summary.exhausted.len()
        );
        RangingProgress::Converged(summary)
    }

    fn next_pair(&mut self, graph: &DistanceGraph) -> Option<(String, String)> {
        let ids: Vec<&str> = graph.iter().map(|a| a.id.as_str()).collect();
        let n = ids.len();
        while self.cursor.0 < n {
            let (i, j) = self.cursor;
            if j >= n {
                self.cursor = (i + 1, 0);
                continue;
            }
            self.cursor.1 += 1;

            let (a, b) = (ids[i], ids[j]);
            if i == j || graph.edge(a, b).is_some() || self.is_exhausted(a, b) {
                continue;
            }
            return Some((a.to_string(), b.to_string()));
        }
        None
    }

    fn issue(&mut self, link: &mut dyn RangingLink, anchor: String, target: String, now: Instant) {
        self.issued_this_pass = true;
        *self.attempts.entry(pair_key(&anchor, &target)).or_insert(0) += 1;
        self.stats.requests += 1;

        debug!(anchor = %anchor, target = %target, "Ranging request");
        match link.send_range_request(&anchor, &target, self.repetitions, self.delay_ms) {
            Ok(()) => {
                self.pending = Some(PendingMeasurement {
                    anchor,
                    target,
                    distance: 0.0,
                    errors: 0,
                    status: RangingStatus::Running,
                    issued_at: now,
                });
            }
            Err(e) => {
                // Same as a timeout: nothing recorded, retried next pass
                warn!("Failed to send range request {} -> {}: {}", anchor, target, e);
                self.stats.send_errors += 1;
                self.hold_until = Some(now + self.timeout);
                if matches!(e, SurveyError::LinkDown) {
                    if let Some(n) = self.attempts.get_mut(&pair_key(&anchor, &target)) {
                        *n = n.saturating_sub(1);
                    }
                } else {
                    self.note_if_exhausted(&anchor, &target);
                }
            }
        }
    }

    fn apply(&mut self, graph: &mut DistanceGraph, result: &PendingMeasurement) {
        if result.distance == 0.0 {
            info!(
                "Ranging {} -> {} failed ({} errors)",
                result.anchor, result.target, result.errors
            );
            self.stats.failures += 1;
            self.note_if_exhausted(&result.anchor, &result.target);
            return;
        }

        match graph.add_edge(&result.anchor, &result.target, result.distance) {
            Ok(true) => {
                info!(
                    "Added {} -> {}: {:.2}m ({} errors)",
                    result.anchor, result.target, result.distance, result.errors
                );
                self.stats.added += 1;
            }
            Ok(false) => {
                debug!(anchor = %result.anchor, target = %result.target, "Range already known");
            }
            Err(e) => {
                warn!("Rejected ranging result: {}", e);
                self.stats.rejected += 1;
                self.note_if_exhausted(&result.anchor, &result.target);
            }
        }
    }

    fn note_if_exhausted(&self, a: &str, b: &str) {
        if self.is_exhausted(a, b) {
            warn!("Giving up on {} <-> {} after {} attempts", a, b, self.attempts(a, b));
        }
    }

    fn exhausted_pairs(&self, graph: &DistanceGraph) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .attempts
            .keys()
            .filter(|(a, b)| graph.edge(a, b).is_none() && self.is_exhausted(a, b))
            .cloned()
            .collect();
        pairs.sort();
        pairs
    }
}
