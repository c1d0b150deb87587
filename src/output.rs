// Survey outputs
// The scene side of the survey: receives placed anchors, the presentation yaw and tag positions

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, info};

use crate::geometry::{self, Point};
use crate::graph::DistanceGraph;
use crate::net::messages::TagPosition;

/// Opaque handle for an anchor's marker in whatever scene consumes the survey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurveyMarker(u64);

impl SurveyMarker {
    /// Allocate a process-unique marker handle
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SurveyMarker(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Trait for survey output handlers
pub trait SurveyOutput: Send {
    /// An anchor's position was finalized. Returns the marker the scene created for it.
    fn anchor_surveyed(&mut self, anchor_id: &str, position: &Point) -> SurveyMarker;

    /// The marker frame was rotated for presentation (degrees about vertical)
    fn frame_rotated(&mut self, _yaw_degrees: f64) {}

    /// A tag position arrived on the stream
    fn tag_position(&mut self, _tag: &TagPosition) {}

    /// Every anchor has a position
    fn survey_complete(&mut self, _graph: &DistanceGraph) {}
}

/// Logs survey events through tracing
#[derive(Debug, Default)]
pub struct LogOutput;

impl LogOutput {
    pub fn new() -> Self {
        LogOutput
    }
}

impl SurveyOutput for LogOutput {
    fn anchor_surveyed(&mut self, anchor_id: &str, position: &Point) -> SurveyMarker {
        let marker = SurveyMarker::next();
        info!(
            "Surveyed {} at ({:.3}, {:.3}, {:.3}) marker {}",
            anchor_id, position.x, position.y, position.z, marker.id()
        );
        marker
    }

    fn frame_rotated(&mut self, yaw_degrees: f64) {
        info!("Marker frame rotated by {:.1} deg", yaw_degrees);
    }

    fn tag_position(&mut self, tag: &TagPosition) {
        info!(
            "Tag {} at ({:.3}, {:.3}, {:.3})",
            tag.tag_id, tag.position.x, tag.position.y, tag.position.z
        );
    }

    fn survey_complete(&mut self, graph: &DistanceGraph) {
        info!("Survey complete: {} anchors placed", graph.surveyed_count());
    }
}

/// CSV output: `timestamp,kind,id,x,y,z`
pub struct CsvOutput {
    writer: BufWriter<File>,
}

impl CsvOutput {
    pub fn new(path: &str) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(CsvOutput {
            writer: BufWriter::new(file),
        })
    }

    fn format_row(kind: &str, id: &str, position: &Point) -> String {
        let now = chrono::Utc::now();
        format!(
            "{},{},{},{:.4},{:.4},{:.4}",
            now.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            kind,
            id,
            position.x,
            position.y,
            position.z
        )
    }

    fn write_row(&mut self, row: &str) {
        if let Err(e) = writeln!(self.writer, "{}", row).and_then(|_| self.writer.flush()) {
            error!("Failed to write CSV: {}", e);
        }
    }
}

impl SurveyOutput for CsvOutput {
    fn anchor_surveyed(&mut self, anchor_id: &str, position: &Point) -> SurveyMarker {
        let row = Self::format_row("anchor", anchor_id, position);
        self.write_row(&row);
        SurveyMarker::next()
    }

    fn tag_position(&mut self, tag: &TagPosition) {
        let row = Self::format_row("tag", &tag.tag_id, &tag.position);
        self.write_row(&row);
    }
}

/// JSON lines output, one object per event
pub struct JsonOutput {
    writer: BufWriter<File>,
}

impl JsonOutput {
    pub fn new(path: &str) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(JsonOutput {
            writer: BufWriter::new(file),
        })
    }

    pub fn format_anchor(anchor_id: &str, position: &Point, marker: SurveyMarker) -> String {
        serde_json::json!({
            "type": "anchor",
            "anchorid": anchor_id,
            "position": geometry::to_array(position),
            "marker": marker.id(),
        })
        .to_string()
    }

    pub fn format_tag(tag: &TagPosition) -> String {
        serde_json::json!({
            "type": "tag",
            "tag": tag.tag_id,
            "position": geometry::to_array(&tag.position),
        })
        .to_string()
    }

    /// Final layout: anchor id -> position for every surveyed anchor
    pub fn format_survey(graph: &DistanceGraph) -> String {
        let anchors: serde_json::Map<String, serde_json::Value> = graph
            .iter()
            .filter_map(|a| {
                a.position
                    .map(|p| (a.id.clone(), serde_json::json!(geometry::to_array(&p))))
            })
            .collect();
        serde_json::json!({ "type": "survey", "anchors": anchors }).to_string()
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
            error!("Failed to write JSON output: {}", e);
        }
    }
}

impl SurveyOutput for JsonOutput {
    fn anchor_surveyed(&mut self, anchor_id: &str, position: &Point) -> SurveyMarker {
        let marker = SurveyMarker::next();
        let line = Self::format_anchor(anchor_id, position, marker);
        self.write_line(&line);
        marker
    }

    fn tag_position(&mut self, tag: &TagPosition) {
        let line = Self::format_tag(tag);
        self.write_line(&line);
    }

    fn survey_complete(&mut self, graph: &DistanceGraph) {
        let line = Self::format_survey(graph);
        self.write_line(&line);
    }
}
