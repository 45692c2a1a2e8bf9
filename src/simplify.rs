//! Topology-preserving ring simplification.
//!
//! Every ring is reduced on its own with Douglas-Peucker. A reduced ring is only
//! kept if it stays simple, keeps its orientation, crosses no other ring and
//! leaves every containment relation with the other rings as it was. A ring
//! that fails is retried with half the tolerance until the tolerance floor or
//! the halving limit is reached, after which the original ring is kept.

use geo::BoundingRect;
use geo_types::{MultiPolygon, Polygon};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::geom::{
    close_ring, point_segment_distance, rects_overlap, ring_within, validate_polygon, PolygonSet,
    Ring, RingExtensions,
};


/// Back-off limits for rings whose simplification breaks topology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub min_tolerance: f64,
    pub max_halvings: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min_tolerance: config::MIN_TOLERANCE,
            max_halvings: config::MAX_TOLERANCE_HALVINGS,
        }
    }
}

/// Simplifies every ring of a polygon set, preserving topology.
pub fn simplify(polygons: &PolygonSet, tolerance: f64) -> Result<PolygonSet> {
    simplify_with(polygons, tolerance, Backoff::default())
}

/// As [`simplify`], with explicit back-off limits.
pub fn simplify_with(polygons: &PolygonSet, tolerance: f64, backoff: Backoff) -> Result<PolygonSet> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(Error::InvalidTolerance(tolerance));
    }
    for (index, polygon) in polygons.0.iter().enumerate() {
        validate_polygon(polygon).map_err(|e| match e {
            Error::Geometry(message) => Error::geometry(format!("polygon {index}: {message}")),
            other => other,
        })?;
    }

    let originals: Vec<&Ring> = polygons
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .collect();

    // first attempts are independent of each other
    let candidates: Vec<Ring> = originals
        .par_iter()
        .map(|ring| douglas_peucker(ring, tolerance))
        .collect();

    let mut current: Vec<Ring> = originals.iter().map(|r| (*r).clone()).collect();
    let mut retries = 0;
    let mut fallbacks = 0;

    for (index, candidate) in candidates.into_iter().enumerate() {
        let original = originals[index];
        if candidate.0.len() == original.0.len() {
            continue;
        }
        if touches_other(index, original, &current) {
            debug!(ring = index, "ring touches another ring, kept as is");
            continue;
        }

        let mut candidate = candidate;
        let mut ring_tolerance = tolerance;
        let mut halvings = 0;
        loop {
            if is_acceptable(index, original, &candidate, &current) {
                current[index] = candidate;
                break;
            }
            halvings += 1;
            ring_tolerance /= 2.0;
            if halvings > backoff.max_halvings || ring_tolerance < backoff.min_tolerance {
                warn!(
                    ring = index,
                    tolerance = ring_tolerance,
                    "no topology-preserving simplification found, keeping original ring"
                );
                fallbacks += 1;
                break;
            }
            retries += 1;
            debug!(ring = index, tolerance = ring_tolerance, "retrying ring");
            candidate = douglas_peucker(original, ring_tolerance);
            if candidate.0.len() == original.0.len() {
                break;
            }
        }
    }
    debug!(rings = current.len(), retries, fallbacks, "simplified rings");

    let mut rings = current.into_iter();
    let simplified = polygons
        .0
        .iter()
        .map(|polygon| {
            let exterior = rings.next().unwrap_or_else(|| polygon.exterior().clone());
            let interiors = rings.by_ref().take(polygon.interiors().len()).collect();
            Polygon::new(exterior, interiors)
        })
        .collect();
    Ok(MultiPolygon(simplified))
}

/// Douglas-Peucker reduction of a closed ring. The ring is split at its first
/// vertex and the vertex farthest from it; both chains are reduced and at least
/// three vertices are kept.
pub fn douglas_peucker(ring: &Ring, tolerance: f64) -> Ring {
    let points = ring.vertices();
    let n = points.len();
    if n <= 3 {
        return ring.clone();
    }
    // closed: coords[n] == coords[0]
    let coords = &ring.0;

    let far = (1..n)
        .max_by(|&a, &b| {
            let da = (points[a] - points[0]).x.hypot((points[a] - points[0]).y);
            let db = (points[b] - points[0]).x.hypot((points[b] - points[0]).y);
            da.total_cmp(&db)
        })
        .unwrap_or(n / 2);

    let mut keep = vec![false; n + 1];
    keep[0] = true;
    keep[far] = true;
    let mut stack = vec![(0, far), (far, n)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let farthest = (first + 1..last)
            .map(|k| (k, point_segment_distance(coords[k], coords[first], coords[last])))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((index, distance)) = farthest {
            if distance > tolerance {
                keep[index] = true;
                stack.push((first, index));
                stack.push((index, last));
            }
        }
    }

    if keep[..n].iter().filter(|&&k| k).count() < 3 {
        let restore = (1..n)
            .filter(|&k| !keep[k])
            .max_by(|&a, &b| {
                let da = point_segment_distance(points[a], points[0], points[far]);
                let db = point_segment_distance(points[b], points[0], points[far]);
                da.total_cmp(&db)
            });
        if let Some(index) = restore {
            keep[index] = true;
        }
    }

    close_ring(
        (0..n)
            .filter(|&k| keep[k])
            .map(|k| points[k])
            .collect(),
    )
}

fn touches_other(index: usize, ring: &Ring, rings: &[Ring]) -> bool {
    rings
        .iter()
        .enumerate()
        .any(|(j, other)| j != index && ring.intersects_ring(other))
}

/// Whether `candidate` may replace `original` at `index` among `rings`.
fn is_acceptable(index: usize, original: &Ring, candidate: &Ring, rings: &[Ring]) -> bool {
    let area = candidate.signed_ring_area();
    if area.abs() <= config::AREA_EPSILON
        || (area > 0.0) != (original.signed_ring_area() > 0.0)
        || candidate.distinct_vertex_count() < 3
        || !candidate.is_simple_ring()
    {
        return false;
    }

    let (Some(before), Some(after)) = (original.bounding_rect(), candidate.bounding_rect()) else {
        return false;
    };
    rings.iter().enumerate().all(|(j, other)| {
        if j == index {
            return true;
        }
        let Some(bounds) = other.bounding_rect() else {
            return true;
        };
        if !rects_overlap(&bounds, &before) && !rects_overlap(&bounds, &after) {
            return true;
        }
        !candidate.intersects_ring(other)
            && ring_within(other, candidate) == ring_within(other, original)
            && ring_within(candidate, other) == ring_within(original, other)
    })
}
