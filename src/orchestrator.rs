// Survey orchestrator - top level glue between anchor registration, ranging and placement
//
// The orchestrator owns the distance graph. Everything arriving from other
// threads (discovered anchors, ranging results, tag positions) comes in as a
// closure on the command queue and is applied at the start of each tick.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SurveyConfig;
use crate::constants::STATUS_INTERVAL_SECS;
use crate::error::{SurveyError, SurveyResult};
use crate::geometry::Point;
use crate::graph::DistanceGraph;
use crate::link::RangingLink;
use crate::net::messages::TagPosition;
use crate::output::SurveyOutput;
use crate::queue::{CommandQueue, CommandSender};
use crate::ranging::{RangingCoordinator, RangingProgress};
use crate::trilateration::{self, BootstrapPlacement, Placement};

/// Where the survey is
#[derive(Debug, Clone, PartialEq)]
pub enum SurveyPhase {
    /// Waiting for enough anchors
    Idle,
    /// Filling in the distance graph
    Ranging,
    /// Ranging converged; the frame is not fixed yet
    Bootstrapping,
    /// Placing the remaining anchors one per step
    Placing,
    /// Nothing left to place
    Done,
    /// Stopped on an error that needs new ranges or an operator
    Halted(String),
}

impl fmt::Display for SurveyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurveyPhase::Idle => write!(f, "idle"),
            SurveyPhase::Ranging => write!(f, "ranging"),
            SurveyPhase::Bootstrapping => write!(f, "bootstrapping"),
            SurveyPhase::Placing => write!(f, "placing"),
            SurveyPhase::Done => write!(f, "done"),
            SurveyPhase::Halted(reason) => write!(f, "halted ({})", reason),
        }
    }
}

/// Thread-safe entry point into a running survey.
///
/// Every call queues a closure that runs on the orchestrator's next tick and
/// returns false if the orchestrator is gone.
#[derive(Clone)]
pub struct SurveyHandle {
    sender: CommandSender<SurveyOrchestrator>,
}

impl SurveyHandle {
    /// Create the queue first: links need a handle before the orchestrator exists.
    pub fn channel() -> (SurveyHandle, CommandQueue<SurveyOrchestrator>) {
        let (sender, queue) = CommandQueue::channel();
        (SurveyHandle { sender }, queue)
    }

    /// An anchor was discovered on the network
    pub fn submit_anchor(&self, anchor_id: &str) -> bool {
        let id = anchor_id.to_string();
        self.sender.enqueue(move |survey| survey.do_submit_anchor(&id))
    }

    /// A ranging result arrived. `distance == 0` is a failed measurement.
    pub fn submit_survey_result(&self, anchor_a: &str, anchor_b: &str, distance: f64, errors: u32) -> bool {
        let (a, b) = (anchor_a.to_string(), anchor_b.to_string());
        self.sender.enqueue(move |survey| {
            survey.do_submit_survey_result(&a, &b, distance, errors);
        })
    }

    pub fn submit_tag_position(&self, tag: TagPosition) -> bool {
        self.sender.enqueue(move |survey| survey.do_submit_tag_position(&tag))
    }

    /// Retry a survey halted on a recoverable error, e.g. after the link came back
    pub fn resume(&self) -> bool {
        self.sender.enqueue(|survey| {
            survey.do_resume();
        })
    }

    /// Ask `run` to return after the current tick
    pub fn stop(&self) -> bool {
        self.sender.enqueue(|survey| survey.stop_requested = true)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Runs the survey: registration, ranging sweep, bootstrap and placement
pub struct SurveyOrchestrator {
    config: SurveyConfig,
    graph: DistanceGraph,
    ranging: RangingCoordinator,
    link: Box<dyn RangingLink>,
    outputs: Vec<Box<dyn SurveyOutput>>,
    /// Taken while draining so queued closures can borrow the orchestrator
    queue: Option<CommandQueue<SurveyOrchestrator>>,
    phase: SurveyPhase,
    /// Whether the error behind `Halted` clears on retry
    halt_recoverable: bool,
    stop_requested: bool,
}

impl SurveyOrchestrator {
    pub fn new(
        config: SurveyConfig,
        link: Box<dyn RangingLink>,
        queue: CommandQueue<SurveyOrchestrator>,
    ) -> Self {
        SurveyOrchestrator {
            ranging: RangingCoordinator::new(&config),
            config,
            graph: DistanceGraph::new(),
            link,
            outputs: Vec::new(),
            queue: Some(queue),
            phase: SurveyPhase::Idle,
            halt_recoverable: false,
            stop_requested: false,
        }
    }

    /// Add an output handler
    pub fn add_output(&mut self, output: Box<dyn SurveyOutput>) {
        self.outputs.push(output);
    }

    pub fn graph(&self) -> &DistanceGraph {
        &self.graph
    }

    pub fn phase(&self) -> &SurveyPhase {
        &self.phase
    }

    pub fn ranging(&self) -> &RangingCoordinator {
        &self.ranging
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// Register a discovered anchor. With a fixed anchor list only listed anchors count.
    pub fn do_submit_anchor(&mut self, anchor_id: &str) {
        let fixed = &self.config.fixed_anchors;
        if !fixed.is_empty() && !fixed.iter().any(|id| id == anchor_id) {
            debug!(anchor = anchor_id, "Ignoring discovered anchor, fixed anchor list in use");
            return;
        }
        self.register_anchor(anchor_id);
    }

    /// Sweep again with fresh attempt counts if the survey halted on a recoverable error.
    ///
    /// # Returns
    /// true if ranging was restarted
    pub fn do_resume(&mut self) -> bool {
        if !self.halt_recoverable || !matches!(self.phase, SurveyPhase::Halted(_)) {
            return false;
        }
        if self.graph.len() < self.config.min_anchors {
            return false;
        }
        info!("Resuming halted survey");
        self.ranging.clear_attempts();
        self.ranging.restart();
        self.phase = SurveyPhase::Ranging;
        true
    }

    /// Register every anchor of the fixed list
    pub fn submit_all_anchors(&mut self) {
        let ids = self.config.fixed_anchors.clone();
        for id in &ids {
            self.register_anchor(id);
        }
    }

    fn register_anchor(&mut self, anchor_id: &str) {
        if anchor_id.is_empty() {
            warn!("Ignoring anchor with empty id");
            return;
        }

        let is_new = !self.graph.contains(anchor_id);
        self.graph.get_or_create(anchor_id);
        if is_new {
            info!("Anchor {} registered ({} total)", anchor_id, self.graph.len());
        }

        if self.graph.len() < self.config.min_anchors || self.ranging.is_active() {
            return;
        }
        if self.do_resume() {
            return;
        }
        match self.phase {
            SurveyPhase::Idle => self.ranging.start(),
            _ if is_new => self.ranging.restart(),
            _ => return,
        }
        self.phase = SurveyPhase::Ranging;
    }

    /// Hand a ranging result to the coordinator
    pub fn do_submit_survey_result(&mut self, anchor_a: &str, anchor_b: &str, distance: f64, errors: u32) -> bool {
        self.ranging.submit_result(anchor_a, anchor_b, distance, errors)
    }

    pub fn do_submit_tag_position(&mut self, tag: &TagPosition) {
        for output in &mut self.outputs {
            output.tag_position(tag);
        }
    }

    /// Fix the survey frame from the origin and its two nearest neighbors.
    pub fn do_first_survey(&mut self) -> SurveyResult<BootstrapPlacement> {
        let placement = trilateration::bootstrap(&mut self.graph, &self.config)?;
        for (id, position) in placement.anchors() {
            self.finalize(id, position);
        }

        let yaw = self.config.marker_yaw_deg;
        for output in &mut self.outputs {
            output.frame_rotated(yaw);
        }

        self.phase = SurveyPhase::Placing;
        Ok(placement)
    }

    /// Place at most one more anchor.
    pub fn do_next_survey(&mut self) -> SurveyResult<Placement> {
        let placement = trilateration::place_next(&mut self.graph, &self.config)?;
        match &placement {
            Placement::Placed(placed) => self.finalize(&placed.anchor, &placed.position),
            Placement::NothingToSurvey => self.complete(),
            Placement::NeedsBootstrap => self.phase = SurveyPhase::Bootstrapping,
        }
        Ok(placement)
    }

    /// Log every measured range and return the dump
    pub fn print_survey_ranges(&self) -> String {
        let ranges = self.graph.format_ranges();
        info!("Survey ranges:\n{}", ranges);
        ranges
    }

    /// Tell the outputs (and the network, if configured) about a final position
    fn finalize(&mut self, anchor_id: &str, position: &Point) {
        let mut marker = None;
        for output in &mut self.outputs {
            let m = output.anchor_surveyed(anchor_id, position);
            marker.get_or_insert(m);
        }
        if let Some(marker) = marker {
            self.graph.set_marker(anchor_id, marker);
        }

        if self.config.publish_positions {
            if let Err(e) = self.link.publish_position(anchor_id, position) {
                warn!("Failed to publish position of {}: {}", anchor_id, e);
            }
        }
    }

    fn complete(&mut self) {
        let unplaced = self.graph.unsurveyed();
        if unplaced.is_empty() {
            info!("Survey complete: all {} anchors placed", self.graph.len());
        } else {
            warn!(
                "Survey finished with {} anchors unplaced (no complete triangle): {}",
                unplaced.len(),
                unplaced.join(", ")
            );
        }
        for output in &mut self.outputs {
            output.survey_complete(&self.graph);
        }
        self.phase = SurveyPhase::Done;
    }

    fn halt(&mut self, err: SurveyError) {
        if err.is_recoverable() {
            warn!("Survey halted: {}", err);
        } else {
            error!("Survey halted: {}", err);
        }
        self.halt_recoverable = err.is_recoverable();
        self.phase = SurveyPhase::Halted(err.to_string());
    }

    fn drain_commands(&mut self) -> usize {
        match self.queue.take() {
            Some(mut queue) => {
                let n = queue.drain(self);
                self.queue = Some(queue);
                n
            }
            None => 0,
        }
    }

    /// One step: apply queued commands, advance ranging, then placement.
    pub fn tick(&mut self, now: Instant) {
        self.drain_commands();

        if let RangingProgress::Converged(summary) =
            self.ranging.poll(&mut self.graph, self.link.as_mut(), now)
        {
            if !summary.exhausted.is_empty() {
                warn!("No range for {} pairs", summary.exhausted.len());
            }
            self.phase = match self.graph.origin() {
                Some(origin) if origin.surveyed => SurveyPhase::Placing,
                _ => SurveyPhase::Bootstrapping,
            };
            debug!(phase = %self.phase, "Ranging finished");
        }

        if !self.config.auto_survey {
            return;
        }
        let result = match self.phase {
            SurveyPhase::Bootstrapping => self.do_first_survey().map(|_| ()),
            SurveyPhase::Placing => self.do_next_survey().map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.halt(e);
        }
    }

    fn log_status(&self) {
        let stats = self.ranging.stats();
        info!(
            "Status: {}, {} anchors, {} ranges, {} surveyed, {} requests ({} timeouts)",
            self.phase,
            self.graph.len(),
            self.graph.edge_count(),
            self.graph.surveyed_count(),
            stats.requests,
            stats.timeouts
        );
    }

    /// Tick until stopped, or, with `exit_when_settled`, until the survey is done or halted.
    ///
    /// Any outstanding measurement is abandoned on the way out.
    pub async fn run(&mut self, tick_interval: Duration, exit_when_settled: bool) -> SurveyPhase {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let status_every = Duration::from_secs(STATUS_INTERVAL_SECS);
        let mut next_status = Instant::now() + status_every;

        info!("Survey running, {} anchors registered", self.graph.len());
        loop {
            ticker.tick().await;
            let now = Instant::now();
            self.tick(now);

            if now >= next_status {
                next_status += status_every;
                self.log_status();
            }
            if self.stop_requested {
                info!("Survey stop requested");
                break;
            }
            if exit_when_settled && matches!(self.phase, SurveyPhase::Done | SurveyPhase::Halted(_)) {
                break;
            }
        }

        if self.ranging.cancel() {
            debug!("Pending measurement abandoned");
        }
        self.log_status();
        self.phase.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;
    use crate::link::{SimulatedAnchor, SimulatedLink};
    use crate::output::SurveyMarker;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn room() -> Vec<SimulatedAnchor> {
        [
            ("E937", [0.0, 1.0, 0.0]),
            ("18FC", [0.0, 1.0, 4.0]),
            ("C825", [5.0, 1.0, 6.0]),
            ("A1B2", [-3.0, 1.0, 7.0]),
            ("77D0", [6.0, 1.0, -2.0]),
        ]
        .into_iter()
        .map(|(id, position)| SimulatedAnchor { anchorid: id.to_string(), position })
        .collect()
    }

    fn simulated(config: SurveyConfig, configure: impl FnOnce(SimulatedLink) -> SimulatedLink) -> (SurveyOrchestrator, SurveyHandle) {
        let (handle, queue) = SurveyHandle::channel();
        let link = configure(SimulatedLink::new(&room(), handle.clone()));
        (SurveyOrchestrator::new(config, Box::new(link), queue), handle)
    }

    /// Tick with a fake clock, one second per tick
    fn tick_until_settled(survey: &mut SurveyOrchestrator, max_ticks: usize) {
        let mut now = Instant::now();
        for _ in 0..max_ticks {
            survey.tick(now);
            if matches!(survey.phase(), SurveyPhase::Done | SurveyPhase::Halted(_)) {
                return;
            }
            now += Duration::from_secs(1);
        }
        panic!("survey did not settle, phase {}", survey.phase());
    }

    /// Simulated link that can be taken down (sends refused) or made deaf (sends lost)
    struct GatedLink {
        inner: SimulatedLink,
        down: Arc<AtomicBool>,
        deaf: Arc<AtomicBool>,
    }

    impl RangingLink for GatedLink {
        fn send_range_request(&mut self, a: &str, b: &str, repetitions: u32, delay_ms: u32) -> SurveyResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SurveyError::LinkDown);
            }
            if self.deaf.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.inner.send_range_request(a, b, repetitions, delay_ms)
        }
    }

    fn gated(config: SurveyConfig) -> (SurveyOrchestrator, SurveyHandle, Arc<AtomicBool>, Arc<AtomicBool>) {
        let (handle, queue) = SurveyHandle::channel();
        let down = Arc::new(AtomicBool::new(false));
        let deaf = Arc::new(AtomicBool::new(false));
        let link = GatedLink {
            inner: SimulatedLink::new(&room(), handle.clone()),
            down: down.clone(),
            deaf: deaf.clone(),
        };
        (SurveyOrchestrator::new(config, Box::new(link), queue), handle, down, deaf)
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl SurveyOutput for Recorder {
        fn anchor_surveyed(&mut self, anchor_id: &str, _position: &Point) -> SurveyMarker {
            self.events.lock().unwrap().push(format!("anchor {}", anchor_id));
            SurveyMarker::next()
        }

        fn frame_rotated(&mut self, yaw_degrees: f64) {
            self.events.lock().unwrap().push(format!("yaw {}", yaw_degrees));
        }

        fn tag_position(&mut self, tag: &TagPosition) {
            self.events.lock().unwrap().push(format!("tag {}", tag.tag_id));
        }

        fn survey_complete(&mut self, _graph: &DistanceGraph) {
            self.events.lock().unwrap().push("complete".to_string());
        }
    }

    #[test]
    fn test_simulated_survey_reproduces_layout() {
        let (mut survey, handle) = simulated(SurveyConfig::default(), |link| link.with_drop_every(4));
        let recorder = Recorder::default();
        survey.add_output(Box::new(recorder.clone()));

        for anchor in room() {
            assert!(handle.submit_anchor(&anchor.anchorid));
        }
        tick_until_settled(&mut survey, 2_000);

        assert_eq!(survey.phase(), &SurveyPhase::Done);
        assert_eq!(survey.graph().edge_count(), 10);
        assert!(survey.ranging().pending().is_none());

        let truth = room();
        for a in &truth {
            let pa = survey.graph().position(&a.anchorid).unwrap();
            assert!((pa.y - 1.0).abs() < 1e-9);
            assert!(survey.graph().get(&a.anchorid).unwrap().marker.is_some());
            for b in &truth {
                let pb = survey.graph().position(&b.anchorid).unwrap();
                let expected = geometry::distance(&a.point(), &b.point());
                assert!((geometry::distance(&pa, &pb) - expected).abs() < 1e-6);
            }
        }

        let events = recorder.events.lock().unwrap();
        assert_eq!(events[0], "anchor E937");
        assert_eq!(events[3], "yaw 90");
        assert_eq!(events.iter().filter(|e| e.starts_with("anchor")).count(), 5);
        assert_eq!(events.last().unwrap(), "complete");
    }

    #[test]
    fn test_waits_for_min_anchors() {
        let config = SurveyConfig { min_anchors: 3, ..SurveyConfig::default() };
        let (mut survey, handle) = simulated(config, |link| link);

        handle.submit_anchor("E937");
        handle.submit_anchor("18FC");
        handle.submit_anchor("18FC");
        survey.tick(Instant::now());
        assert_eq!(survey.phase(), &SurveyPhase::Idle);
        assert_eq!(survey.graph().len(), 2);

        handle.submit_anchor("C825");
        survey.tick(Instant::now());
        assert_eq!(survey.phase(), &SurveyPhase::Ranging);
    }

    #[test]
    fn test_fixed_anchor_list() {
        let config = SurveyConfig {
            fixed_anchors: vec!["E937".to_string(), "18FC".to_string(), "C825".to_string()],
            ..SurveyConfig::default()
        };
        let (mut survey, handle) = simulated(config, |link| link);

        handle.submit_anchor("A1B2");
        survey.tick(Instant::now());
        assert!(survey.graph().is_empty());

        survey.submit_all_anchors();
        assert_eq!(survey.graph().len(), 3);
        tick_until_settled(&mut survey, 500);

        assert_eq!(survey.phase(), &SurveyPhase::Done);
        assert_eq!(survey.graph().surveyed_count(), 3);
        assert!(!survey.graph().contains("A1B2"));
    }

    #[test]
    fn test_two_anchors_halt_then_resume() {
        let config = SurveyConfig {
            fixed_anchors: Vec::new(),
            ..SurveyConfig::default()
        };
        let (mut survey, handle) = simulated(config, |link| link);

        handle.submit_anchor("E937");
        handle.submit_anchor("18FC");
        tick_until_settled(&mut survey, 100);
        match survey.phase() {
            SurveyPhase::Halted(reason) => assert!(reason.contains("E937")),
            other => panic!("expected halt, got {}", other),
        }

        // A third anchor restarts ranging and the survey completes
        handle.submit_anchor("C825");
        survey.tick(Instant::now());
        assert_eq!(survey.phase(), &SurveyPhase::Ranging);
        tick_until_settled(&mut survey, 100);
        assert_eq!(survey.phase(), &SurveyPhase::Done);
    }

    #[test]
    fn test_silent_pair_leaves_anchor_unplaced() {
        let config = SurveyConfig { max_attempts_per_pair: 2, ..SurveyConfig::default() };
        // A1B2 never answers anybody: it ends up without a triangle
        let (mut survey, handle) = simulated(config, |link| {
            ["E937", "18FC", "C825", "77D0"]
                .into_iter()
                .fold(link, |link, other| link.with_silent_pair("A1B2", other))
        });

        for anchor in room() {
            handle.submit_anchor(&anchor.anchorid);
        }
        tick_until_settled(&mut survey, 2_000);

        assert_eq!(survey.phase(), &SurveyPhase::Done);
        assert_eq!(survey.graph().unsurveyed(), vec!["A1B2"]);
        assert_eq!(survey.graph().edge_count(), 6);
    }

    #[test]
    fn test_manual_survey() {
        let config = SurveyConfig { auto_survey: false, ..SurveyConfig::default() };
        let (mut survey, handle) = simulated(config, |link| link);
        for anchor in room() {
            handle.submit_anchor(&anchor.anchorid);
        }

        let mut now = Instant::now();
        for _ in 0..100 {
            survey.tick(now);
            now += Duration::from_millis(100);
        }
        assert_eq!(survey.phase(), &SurveyPhase::Bootstrapping);
        assert_eq!(survey.graph().surveyed_count(), 0);

        let ranges = survey.print_survey_ranges();
        assert_eq!(ranges.lines().count(), 5);
        assert!(ranges.starts_with("E937:\t18FC: 4.00m"));

        let placement = survey.do_first_survey().unwrap();
        assert_eq!(placement.origin.0, "E937");
        assert_eq!(survey.phase(), &SurveyPhase::Placing);

        assert!(matches!(survey.do_next_survey().unwrap(), Placement::Placed(_)));
        assert!(matches!(survey.do_next_survey().unwrap(), Placement::Placed(_)));
        assert_eq!(survey.do_next_survey().unwrap(), Placement::NothingToSurvey);
        assert_eq!(survey.phase(), &SurveyPhase::Done);

        // Positions are set once
        assert!(matches!(
            survey.do_first_survey(),
            Err(SurveyError::AlreadySurveyed(_))
        ));
    }

    #[test]
    fn test_degenerate_ranges_halt() {
        struct Liar {
            handle: SurveyHandle,
        }

        impl RangingLink for Liar {
            fn send_range_request(&mut self, a: &str, b: &str, _: u32, _: u32) -> SurveyResult<()> {
                // Triangle inequality broken for every triple
                let d = if (a, b) == ("A", "B") || (a, b) == ("B", "A") { 10.0 } else { 1.0 };
                self.handle.submit_survey_result(a, b, d, 0);
                Ok(())
            }
        }

        let (handle, queue) = SurveyHandle::channel();
        let link = Liar { handle: handle.clone() };
        let mut survey = SurveyOrchestrator::new(SurveyConfig::default(), Box::new(link), queue);
        for id in ["A", "C", "B"] {
            handle.submit_anchor(id);
        }
        tick_until_settled(&mut survey, 100);

        match survey.phase() {
            SurveyPhase::Halted(reason) => assert!(reason.starts_with("degenerate triangle")),
            other => panic!("expected halt, got {}", other),
        }
        assert_eq!(survey.graph().surveyed_count(), 0);
        assert!(!survey.do_resume());
    }

    #[test]
    fn test_link_down_at_startup() {
        let config = SurveyConfig {
            fixed_anchors: ["E937", "18FC", "C825", "A1B2"].iter().map(|s| s.to_string()).collect(),
            ..SurveyConfig::default()
        };
        let (mut survey, _handle, down, _deaf) = gated(config);
        down.store(true, Ordering::SeqCst);
        survey.submit_all_anchors();

        // 20 ms ticks; the link comes up after one second
        let mut now = Instant::now();
        for n in 0..1_000 {
            if n == 50 {
                down.store(false, Ordering::SeqCst);
            }
            survey.tick(now);
            now += Duration::from_millis(20);
        }

        assert_eq!(survey.phase(), &SurveyPhase::Done);
        assert_eq!(survey.graph().edge_count(), 6);
        assert_eq!(survey.graph().surveyed_count(), 4);
        assert!(survey.ranging().stats().send_errors >= 1);
        assert!(survey.ranging().stats().send_errors <= 2);
    }

    #[test]
    fn test_known_anchor_resumes_halted_survey() {
        let config = SurveyConfig { max_attempts_per_pair: 1, ..SurveyConfig::default() };
        let (mut survey, handle, _down, deaf) = gated(config);
        deaf.store(true, Ordering::SeqCst);

        for id in ["E937", "18FC", "C825"] {
            handle.submit_anchor(id);
        }
        tick_until_settled(&mut survey, 200);
        match survey.phase() {
            SurveyPhase::Halted(reason) => assert!(reason.contains("bootstrap needs 2")),
            other => panic!("expected halt, got {}", other),
        }

        // Same anchor announced again once the network answers
        deaf.store(false, Ordering::SeqCst);
        handle.submit_anchor("18FC");
        survey.tick(Instant::now());
        assert_eq!(survey.phase(), &SurveyPhase::Ranging);
        assert_eq!(survey.graph().len(), 3);

        tick_until_settled(&mut survey, 200);
        assert_eq!(survey.phase(), &SurveyPhase::Done);
        assert_eq!(survey.graph().surveyed_count(), 3);
        assert!(!survey.do_resume());
    }

    #[test]
    fn test_resume_from_handle() {
        let config = SurveyConfig { max_attempts_per_pair: 1, ..SurveyConfig::default() };
        let (mut survey, handle, _down, deaf) = gated(config);
        deaf.store(true, Ordering::SeqCst);
        handle.submit_anchor("E937");
        handle.submit_anchor("18FC");
        tick_until_settled(&mut survey, 200);
        assert!(matches!(survey.phase(), SurveyPhase::Halted(_)));

        deaf.store(false, Ordering::SeqCst);
        assert!(handle.resume());
        survey.tick(Instant::now());
        assert_eq!(survey.phase(), &SurveyPhase::Ranging);
    }

    #[test]
    fn test_publish_positions() {
        struct Publisher {
            handle: SurveyHandle,
            published: Arc<Mutex<Vec<String>>>,
        }

        impl RangingLink for Publisher {
            fn send_range_request(&mut self, a: &str, b: &str, _: u32, _: u32) -> SurveyResult<()> {
                let truth: std::collections::HashMap<String, Point> =
                    room().into_iter().map(|x| (x.anchorid.clone(), x.point())).collect();
                self.handle
                    .submit_survey_result(a, b, geometry::distance(&truth[a], &truth[b]), 0);
                Ok(())
            }

            fn publish_position(&mut self, anchor_id: &str, _position: &Point) -> SurveyResult<()> {
                self.published.lock().unwrap().push(anchor_id.to_string());
                Ok(())
            }
        }

        let published = Arc::new(Mutex::new(Vec::new()));
        let (handle, queue) = SurveyHandle::channel();
        let link = Publisher { handle: handle.clone(), published: published.clone() };
        let config = SurveyConfig { publish_positions: true, ..SurveyConfig::default() };
        let mut survey = SurveyOrchestrator::new(config, Box::new(link), queue);

        for anchor in room() {
            handle.submit_anchor(&anchor.anchorid);
        }
        tick_until_settled(&mut survey, 500);

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 5);
        assert_eq!(published[0], "E937");
    }

    #[test]
    fn test_tags_reach_outputs() {
        let (mut survey, handle) = simulated(SurveyConfig::default(), |link| link);
        let recorder = Recorder::default();
        survey.add_output(Box::new(recorder.clone()));

        handle.submit_tag_position(TagPosition {
            tag_id: "T1".to_string(),
            position: Point::new(1.0, 1.0, 1.0),
        });
        survey.tick(Instant::now());
        assert_eq!(*recorder.events.lock().unwrap(), vec!["tag T1".to_string()]);
    }

    #[test]
    fn test_dropping_survey_closes_handle() {
        let (survey, handle) = simulated(SurveyConfig::default(), |link| link);
        assert!(!handle.is_closed());
        drop(survey);
        assert!(handle.is_closed());
        assert!(!handle.submit_anchor("E937"));
    }

    #[tokio::test]
    async fn test_run_until_settled() {
        let config = SurveyConfig {
            ranging_timeout: Duration::from_millis(20),
            ..SurveyConfig::default()
        };
        let (mut survey, handle) = simulated(config, |link| link.with_drop_every(3));
        for anchor in room() {
            handle.submit_anchor(&anchor.anchorid);
        }

        let phase = tokio::time::timeout(
            Duration::from_secs(10),
            survey.run(Duration::from_millis(1), true),
        )
        .await
        .unwrap();
        assert_eq!(phase, SurveyPhase::Done);
        assert_eq!(survey.graph().surveyed_count(), 5);
    }

    #[tokio::test]
    async fn test_stop() {
        let (mut survey, handle) = simulated(SurveyConfig::default(), |link| link);
        handle.submit_anchor("E937");
        assert!(handle.stop());

        let phase = tokio::time::timeout(
            Duration::from_secs(5),
            survey.run(Duration::from_millis(1), false),
        )
        .await
        .unwrap();
        assert_eq!(phase, SurveyPhase::Idle);
        assert_eq!(survey.graph().len(), 1);
    }
}
