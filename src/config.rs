/// Default simplification tolerance, in the linear units of the input (usually degrees).
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
/// Maximum distance for two noded vertices to be considered the same during union.
pub const VERTEX_SNAP_DISTANCE: f64 = 1e-12;
/// Snap distance relative to the half-extent of the union's input, used when larger.
pub const RELATIVE_SNAP: f64 = 64.0 * f64::EPSILON;
/// Rings whose absolute area falls below this are treated as degenerate.
pub const AREA_EPSILON: f64 = 1e-18;
/// Relative tolerance on the cross product for collinearity tests.
pub const COLINEAR_THRESHOLD: f64 = 1e-12;
/// Smallest tolerance the simplifier backs off to before keeping the original ring.
pub const MIN_TOLERANCE: f64 = 1e-12;
/// Number of times the simplifier halves the tolerance of a ring that breaks topology.
pub const MAX_TOLERANCE_HALVINGS: u32 = 40;
/// Identifier assigned to single-feature inputs that carry none.
pub const UNKNOWN_FEATURE_ID: &str = "UNKNOWN";
/// File extension picked up in batch mode.
pub const GEOJSON_EXTENSION: &str = "geojson";
