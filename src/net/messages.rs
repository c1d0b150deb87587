// Anchor network message definitions
// Line-oriented wire format shared by the gateway link and the tag stream

use serde::{Deserialize, Serialize};

use crate::error::{SurveyError, SurveyResult};
use crate::geometry::Point;

/// JSON messages exchanged with the anchor network gateway, one per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkMessage {
    /// Ask `anchor` to range against `target` (outbound)
    Range {
        anchor: String,
        target: String,
        repetitions: u32,
        delay_ms: u32,
    },

    /// Averaged ranging result; distance 0 means the measurement failed (inbound)
    RangeResult {
        anchor: String,
        target: String,
        distance: f64,
        #[serde(default)]
        errors: u32,
    },

    /// An anchor announced itself (inbound)
    Anchor { anchorid: String },

    /// Surveyed position pushed back to the network (outbound)
    AnchorPosition { anchorid: String, position: [f64; 3] },

    /// Keep-alive
    Heartbeat {},
}

impl LinkMessage {
    /// Serialize to a single line without the terminator
    pub fn to_line(&self) -> SurveyResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Tag position from the positioning stream
#[derive(Debug, Clone, PartialEq)]
pub struct TagPosition {
    pub tag_id: String,
    pub position: Point,
}

/// Parse `# <tag_id> <x> <y> <z>`. Trailing fields are ignored.
pub fn parse_tag_position(line: &str) -> SurveyResult<TagPosition> {
    let malformed = || SurveyError::MalformedFrame(line.to_string());

    let body = line.strip_prefix('#').ok_or_else(malformed)?;
    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(malformed());
    }

    let mut coords = [0.0f64; 3];
    for (slot, field) in coords.iter_mut().zip(&fields[1..4]) {
        *slot = field.parse::<f64>().map_err(|_| malformed())?;
        if !slot.is_finite() {
            return Err(malformed());
        }
    }

    Ok(TagPosition {
        tag_id: fields[0].to_string(),
        position: Point::new(coords[0], coords[1], coords[2]),
    })
}

/// One decoded inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Tag(TagPosition),
    Link(LinkMessage),
}

/// Decode an inbound line.
///
/// # Returns
/// * `Ok(None)` for an empty line (keep-alive)
/// * `Err(MalformedFrame)` for anything that is neither a tag line nor a link message
pub fn parse_frame(line: &str) -> SurveyResult<Option<Frame>> {
    let line = line.trim_end_matches(['\r', '\n']).trim_start();
    if line.trim().is_empty() {
        return Ok(None);
    }

    if line.starts_with('#') {
        return parse_tag_position(line).map(|tag| Some(Frame::Tag(tag)));
    }
    if line.starts_with('{') {
        return serde_json::from_str::<LinkMessage>(line)
            .map(|msg| Some(Frame::Link(msg)))
            .map_err(|e| SurveyError::MalformedFrame(format!("{}: {}", line, e)));
    }

    Err(SurveyError::MalformedFrame(line.to_string()))
}
