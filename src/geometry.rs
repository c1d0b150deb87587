// Geometry helpers for the survey frame
//
// The survey frame is right-handed with +Y up. Anchors are placed in a
// horizontal plane, so every rotation here is a yaw about the vertical axis.
// Forward (+Z) is the direction of the first baseline.

use nalgebra::{Point3, Rotation3, Unit, Vector3};

/// Point in the survey frame
pub type Point = Point3<f64>;

/// Direction of the first baseline (origin -> nearest anchor)
pub fn forward() -> Vector3<f64> {
    Vector3::z()
}

/// Vertical axis; yaw rotations are about this
pub fn up() -> Unit<Vector3<f64>> {
    Vector3::y_axis()
}

/// Rotate a vector by `angle` radians about the vertical axis
///
/// A positive angle turns +Z towards +X.
pub fn yaw(v: &Vector3<f64>, angle: f64) -> Vector3<f64> {
    Rotation3::from_axis_angle(&up(), angle) * v
}

/// Euclidean distance between two points in the survey frame
pub fn distance(a: &Point, b: &Point) -> f64 {
    (b - a).norm()
}

/// Unit vector from `from` towards `to`, or `None` if the points coincide
pub fn direction(from: &Point, to: &Point) -> Option<Vector3<f64>> {
    let d = to - from;
    let n = d.norm();
    if n > f64::EPSILON {
        Some(d / n)
    } else {
        None
    }
}

/// Project a point onto the survey plane (replace its height)
pub fn on_plane(p: Point, height: f64) -> Point {
    Point::new(p.x, height, p.z)
}

/// Convert a point into a plain `[x, y, z]` array (for serialization)
pub fn to_array(p: &Point) -> [f64; 3] {
    [p.x, p.y, p.z]
}
