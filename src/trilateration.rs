// Anchor placement from measured ranges
//
// The survey frame is fixed by the first three anchors: the origin, its
// nearest neighbor along +Z and the next-nearest neighbor turned about the
// vertical axis by the angle the law of cosines gives. Every other anchor is
// then placed one at a time against the origin and its nearest surveyed
// neighbor, and a fourth surveyed anchor picks between the two mirror-image
// candidates.

use tracing::{debug, info};

use crate::config::SurveyConfig;
use crate::error::{SurveyError, SurveyResult};
use crate::geometry::{self, Point};
use crate::graph::DistanceGraph;

/// Slack allowed on the cosine before a triangle counts as impossible
const COSINE_SLACK: f64 = 1e-12;

/// Angle at vertex `a` of the triangle with sides `ab`, `ac` and `bc` (law of cosines).
///
/// # Returns
/// The angle in radians, in [0, π]
///
/// # Errors
/// `DegenerateTriangle` if a side adjacent to `a` is zero or the sides
/// cannot close into a triangle
pub fn find_angle(ab: f64, ac: f64, bc: f64) -> SurveyResult<f64> {
    let degenerate = || SurveyError::DegenerateTriangle { ab, ac, bc };

    if !(ab > 0.0 && ac > 0.0 && bc.is_finite()) || !ab.is_finite() || !ac.is_finite() {
        return Err(degenerate());
    }

    let cos = (ab * ab + ac * ac - bc * bc) / (2.0 * ab * ac);
    if !cos.is_finite() || cos.abs() > 1.0 + COSINE_SLACK {
        return Err(degenerate());
    }
    Ok(cos.clamp(-1.0, 1.0).acos())
}

/// Point at range `ac` from `a_pos`, `angle` radians (yaw) off the a -> b direction.
///
/// The result is forced onto the survey plane at `height`.
pub fn calculate_position(
    a_pos: &Point,
    b_pos: &Point,
    ac: f64,
    angle: f64,
    height: f64,
) -> SurveyResult<Point> {
    let a_flat = geometry::on_plane(*a_pos, height);
    let b_flat = geometry::on_plane(*b_pos, height);
    let dir = geometry::direction(&a_flat, &b_flat).ok_or(SurveyError::DegenerateTriangle {
        ab: 0.0,
        ac,
        bc: f64::NAN,
    })?;

    let p = a_flat + geometry::yaw(&dir, angle) * ac;
    Ok(geometry::on_plane(p, height))
}

/// The three anchors that fix the survey frame
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapPlacement {
    pub origin: (String, Point),
    /// Nearest neighbor of the origin, along +Z
    pub first: (String, Point),
    /// Next-nearest neighbor, turned off the baseline
    pub second: (String, Point),
    /// Angle at the origin between the two, radians
    pub angle: f64,
}

impl BootstrapPlacement {
    pub fn anchors(&self) -> [(&str, &Point); 3] {
        [
            (self.origin.0.as_str(), &self.origin.1),
            (self.first.0.as_str(), &self.first.1),
            (self.second.0.as_str(), &self.second.1),
        ]
    }
}

/// Place the origin, its nearest neighbor and its next-nearest neighbor.
///
/// Either all three anchors are positioned or the graph is left untouched.
pub fn bootstrap(graph: &mut DistanceGraph, config: &SurveyConfig) -> SurveyResult<BootstrapPlacement> {
    let a = graph.origin().ok_or(SurveyError::NoAnchors)?.id.clone();
    let have = graph.get(&a).map_or(0, |anchor| anchor.edges.len());
    let not_enough = || SurveyError::NotEnoughRanges {
        anchor: a.clone(),
        have,
    };

    let b = graph
        .neighbors_closer_than(&a, 0.0, true, false)
        .cloned()
        .ok_or_else(not_enough)?;
    let c = graph
        .neighbors_closer_than(&a, b.distance, true, false)
        .cloned()
        .ok_or_else(not_enough)?;
    let bc = graph.require_edge(&b.neighbor, &c.neighbor)?;

    let angle = find_angle(b.distance, c.distance, bc)?;

    for id in [&a, &b.neighbor, &c.neighbor] {
        if graph.get(id).is_some_and(|anchor| anchor.surveyed) {
            return Err(SurveyError::AlreadySurveyed(id.clone()));
        }
    }

    let a_pos = Point::new(0.0, config.plane_height, 0.0);
    let b_pos = a_pos + geometry::forward() * b.distance;
    let c_pos = geometry::on_plane(
        a_pos + geometry::yaw(&geometry::forward(), angle) * c.distance,
        config.plane_height,
    );

    graph.set_position(&a, a_pos)?;
    graph.set_position(&b.neighbor, b_pos)?;
    graph.set_position(&c.neighbor, c_pos)?;

    info!(
        "Bootstrap: {} origin, {} at {:.2}m, {} at {:.2}m, angle {:.1} deg",
        a,
        b.neighbor,
        b.distance,
        c.neighbor,
        c.distance,
        angle.to_degrees()
    );

    Ok(BootstrapPlacement {
        origin: (a, a_pos),
        first: (b.neighbor, b_pos),
        second: (c.neighbor, c_pos),
        angle,
    })
}

/// One anchor placed by `place_next`
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedAnchor {
    pub anchor: String,
    pub position: Point,
    /// Surveyed neighbor the angle was measured against
    pub reference: String,
    /// Surveyed anchor used to pick the mirror candidate
    pub check: String,
    pub angle: f64,
    /// True if the mirror candidate was chosen
    pub flipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Placed(PlacedAnchor),
    /// The origin has no position yet
    NeedsBootstrap,
    /// No unsurveyed anchor has a complete triangle
    NothingToSurvey,
}

/// Place at most one unsurveyed anchor.
///
/// Anchors are tried in registration order. One without ranges to the
/// origin and a surveyed neighbor is skipped; one without a surveyed check
/// anchor it has a range to is deferred.
///
/// # Errors
/// * `DegenerateTriangle` if the ranges of the first complete triangle are inconsistent
/// * `MissingDisambiguationPoint` if nothing was placed and at least one anchor was deferred
pub fn place_next(graph: &mut DistanceGraph, config: &SurveyConfig) -> SurveyResult<Placement> {
    let (a, a_pos) = match graph.origin() {
        Some(origin) => match origin.position {
            Some(p) => (origin.id.clone(), p),
            None => return Ok(Placement::NeedsBootstrap),
        },
        None => return Err(SurveyError::NoAnchors),
    };

    let mut deferred: Vec<String> = Vec::new();

    for c in graph.unsurveyed() {
        let Some(reference) = graph.neighbors_closer_than(&c, 0.0, true, true).cloned() else {
            continue;
        };
        let b = reference.neighbor;
        let bc = reference.distance;
        let (Some(ab), Some(ac), Some(b_pos)) = (graph.edge(&a, &b), graph.edge(&a, &c), graph.position(&b))
        else {
            continue;
        };

        let angle = find_angle(ab, ac, bc)?;
        let mut candidate = calculate_position(&a_pos, &b_pos, ac, angle, config.plane_height)?;

        let check = graph.iter().find(|x| {
            x.surveyed && x.id != a && x.id != b && x.id != c && x.edge(&c).is_some()
        });
        let Some((x, x_pos, cx)) = check.and_then(|x| {
            Some((x.id.clone(), x.position?, x.edge(&c)?))
        }) else {
            debug!(anchor = %c, "No check anchor yet, deferring");
            deferred.push(c);
            continue;
        };

        let miss = (geometry::distance(&candidate, &x_pos) - cx).abs();
        let flipped = miss > config.ambiguity_tolerance;
        if flipped {
            debug!(anchor = %c, check = %x, miss, "Taking mirror candidate");
            candidate = calculate_position(&a_pos, &b_pos, ac, -angle, config.plane_height)?;
        }

        graph.set_position(&c, candidate)?;
        info!(
            "Placed {} at ({:.2}, {:.2}, {:.2}) from {} and {}{}",
            c,
            candidate.x,
            candidate.y,
            candidate.z,
            a,
            b,
            if flipped { " (mirrored)" } else { "" }
        );

        return Ok(Placement::Placed(PlacedAnchor {
            anchor: c,
            position: candidate,
            reference: b,
            check: x,
            angle,
            flipped,
        }));
    }

    match deferred.into_iter().next() {
        Some(anchor) => Err(SurveyError::MissingDisambiguationPoint { anchor }),
        None => Ok(Placement::NothingToSurvey),
    }
}
