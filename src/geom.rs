//! Planar geometry primitives shared by the merge, simplify and flatten stages.
//!
//! Geometry is carried in `geo-types` containers:
//! - a point is a [`Coord<f64>`]
//! - a ring is a closed [`LineString<f64>`] (first coordinate repeated last)
//! - a polygon is a [`Polygon<f64>`] with one exterior and any number of interiors
//! - a polygon set is a [`MultiPolygon<f64>`] of pairwise disjoint polygons
//!
//! This module adds the ring-level operations the stages need on top of those
//! containers: signed area and orientation, winding numbers and point location,
//! segment intersection queries and ring validation.

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::BoundingRect;
use geo_types::{Coord, Line, LineString, MultiPolygon, Polygon, Rect};
use itertools::Itertools;

use crate::config;
use crate::error::{Error, Result};

/// A closed ring of coordinates.
pub type Ring = LineString<f64>;
/// A set of pairwise disjoint polygons.
pub type PolygonSet = MultiPolygon<f64>;


/// Where a point lies relative to a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Inside,
    Outside,
    Boundary,
}

/// Twice the signed area of the triangle (o, a, b). Positive for a left turn.
pub fn cross(o: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (b.x - o.x) * (a.y - o.y)
}

/// Whether `p` lies on the line through `a` and `b`, relative to the segment lengths.
pub fn is_colinear(a: Coord<f64>, p: Coord<f64>, b: Coord<f64>) -> bool {
    let scale = (p - a).x.hypot((p - a).y) * (b - p).x.hypot((b - p).y);
    cross(a, p, b).abs() <= config::COLINEAR_THRESHOLD * scale
}

pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Euclidean distance from `p` to the closed segment `a`-`b`.
pub fn point_segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = b - a;
    let len2 = d.x * d.x + d.y * d.y;
    if len2 == 0.0 {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * d.x + (p.y - a.y) * d.y) / len2).clamp(0.0, 1.0);
    distance(p, a + d * t)
}

/// Builds a closed ring from a coordinate list, dropping consecutive duplicates.
pub fn close_ring(coords: Vec<Coord<f64>>) -> Ring {
    let mut coords: Vec<Coord<f64>> = coords.into_iter().dedup().collect();
    while coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    LineString(coords)
}

/// Returns the ring with its orientation reversed.
pub fn reversed(ring: &Ring) -> Ring {
    LineString(ring.0.iter().rev().copied().collect())
}

/// Whether two bounding rectangles overlap or touch.
pub fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Visits every pair of segments from `a` and `b` whose x-extents overlap.
/// Returns true as soon as `visit` does. With `same` set, `a` and `b` are the same
/// slice and each unordered pair is visited once.
pub(crate) fn sweep_pairs<F>(a: &[Line<f64>], b: &[Line<f64>], same: bool, mut visit: F) -> bool
where
    F: FnMut(usize, usize) -> bool,
{
    let span = |l: &Line<f64>| (l.start.x.min(l.end.x), l.start.x.max(l.end.x));
    let order_a: Vec<usize> = (0..a.len())
        .sorted_by(|&i, &j| span(&a[i]).0.total_cmp(&span(&a[j]).0))
        .collect();
    let order_b: Vec<usize> = if same {
        order_a.clone()
    } else {
        (0..b.len())
            .sorted_by(|&i, &j| span(&b[i]).0.total_cmp(&span(&b[j]).0))
            .collect()
    };

    for (pos, &i) in order_a.iter().enumerate() {
        let (_, max_x) = span(&a[i]);
        let start = if same { pos + 1 } else { 0 };
        for &j in &order_b[start..] {
            let (min_x, bmax) = span(&b[j]);
            if min_x > max_x {
                break;
            }
            if !same && bmax < span(&a[i]).0 {
                continue;
            }
            let (ymin_a, ymax_a) = (a[i].start.y.min(a[i].end.y), a[i].start.y.max(a[i].end.y));
            let (ymin_b, ymax_b) = (b[j].start.y.min(b[j].end.y), b[j].start.y.max(b[j].end.y));
            if ymin_b > ymax_a || ymin_a > ymax_b {
                continue;
            }
            if visit(i, j) {
                return true;
            }
        }
    }
    false
}

/// Ring-level operations on a closed `LineString`.
pub trait RingExtensions {
    /// Distinct vertices, without the closing coordinate.
    fn vertices(&self) -> &[Coord<f64>];
    fn segments(&self) -> Vec<Line<f64>>;
    /// Shoelace area, positive for counter-clockwise rings.
    fn signed_ring_area(&self) -> f64;
    fn is_ccw_ring(&self) -> bool;
    fn distinct_vertex_count(&self) -> usize;
    fn winding_number(&self, p: Coord<f64>) -> i32;
    fn locate(&self, p: Coord<f64>) -> Location;
    /// True if no two non-adjacent segments meet and no adjacent segments overlap.
    fn is_simple_ring(&self) -> bool;
    /// True if any segment of `self` touches or crosses any segment of `other`.
    fn intersects_ring(&self, other: &Ring) -> bool;
}

impl RingExtensions for LineString<f64> {
    fn vertices(&self) -> &[Coord<f64>] {
        match self.0.len() {
            0 => &[],
            n if self.is_closed() => &self.0[..n - 1],
            _ => &self.0,
        }
    }

    fn segments(&self) -> Vec<Line<f64>> {
        self.lines().collect()
    }

    fn signed_ring_area(&self) -> f64 {
        let twice: f64 = self
            .0
            .iter()
            .tuple_windows()
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum();
        twice / 2.0
    }

    fn is_ccw_ring(&self) -> bool {
        self.signed_ring_area() > 0.0
    }

    fn distinct_vertex_count(&self) -> usize {
        self.vertices()
            .iter()
            .map(|c| (c.x.to_bits(), c.y.to_bits()))
            .unique()
            .count()
    }

    fn winding_number(&self, p: Coord<f64>) -> i32 {
        let mut wn = 0;
        for line in self.lines() {
            let (a, b) = (line.start, line.end);
            if a.y <= p.y {
                if b.y > p.y && cross(a, b, p) > 0.0 {
                    wn += 1;
                }
            } else if b.y <= p.y && cross(a, b, p) < 0.0 {
                wn -= 1;
            }
        }
        wn
    }

    fn locate(&self, p: Coord<f64>) -> Location {
        let on_boundary = self
            .lines()
            .any(|l| point_segment_distance(p, l.start, l.end) <= config::VERTEX_SNAP_DISTANCE);
        if on_boundary {
            Location::Boundary
        } else if self.winding_number(p) != 0 {
            Location::Inside
        } else {
            Location::Outside
        }
    }

    fn is_simple_ring(&self) -> bool {
        let segments = self.segments();
        let n = segments.len();
        if n < 3 {
            return false;
        }
        let adjacent = |i: usize, j: usize| i.abs_diff(j) == 1 || i.abs_diff(j) == n - 1;

        !sweep_pairs(&segments, &segments, true, |i, j| {
            match line_intersection(segments[i], segments[j]) {
                None => false,
                Some(LineIntersection::Collinear { .. }) => true,
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    if !adjacent(i, j) {
                        return true;
                    }
                    // adjacent segments may only meet at their shared vertex
                    let shared = if segments[i].end == segments[j].start {
                        segments[i].end
                    } else {
                        segments[i].start
                    };
                    intersection != shared
                }
            }
        })
    }

    fn intersects_ring(&self, other: &Ring) -> bool {
        if let (Some(a), Some(b)) = (self.bounding_rect(), other.bounding_rect()) {
            if !rects_overlap(&a, &b) {
                return false;
            }
        }
        let mine = self.segments();
        let theirs = other.segments();
        sweep_pairs(&mine, &theirs, false, |i, j| {
            line_intersection(mine[i], theirs[j]).is_some()
        })
    }
}

/// Whether ring `inner` lies inside ring `outer`, judged from the first vertex of
/// `inner` that is not on the boundary of `outer`. Rings are assumed not to cross.
pub fn ring_within(inner: &Ring, outer: &Ring) -> bool {
    inner
        .vertices()
        .iter()
        .map(|&p| outer.locate(p))
        .find(|loc| *loc != Location::Boundary)
        .map_or(true, |loc| loc == Location::Inside)
}

/// Checks one ring against the ring invariants.
pub fn validate_ring(ring: &Ring, what: &str) -> Result<()> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(Error::geometry(format!("{what} has non-finite coordinates")));
    }
    let distinct = ring.distinct_vertex_count();
    if distinct < 3 {
        return Err(Error::geometry(format!(
            "{what} has {distinct} distinct vertices, at least 3 are required"
        )));
    }
    if ring.signed_ring_area().abs() <= config::AREA_EPSILON {
        return Err(Error::geometry(format!("{what} has zero area")));
    }
    if !ring.is_simple_ring() {
        return Err(Error::geometry(format!("{what} is self-intersecting")));
    }
    Ok(())
}

/// Checks every ring of a polygon.
pub fn validate_polygon(polygon: &Polygon<f64>) -> Result<()> {
    validate_ring(polygon.exterior(), "outer ring")?;
    for (i, interior) in polygon.interiors().iter().enumerate() {
        validate_ring(interior, &format!("inner ring {i}"))?;
    }
    Ok(())
}

/// Number of rings in a polygon set (outer rings plus holes).
pub fn ring_count(polygons: &PolygonSet) -> usize {
    polygons.0.iter().map(|p| 1 + p.interiors().len()).sum()
}

/// Number of distinct vertices over every ring of a polygon set.
pub fn vertex_count(polygons: &PolygonSet) -> usize {
    polygons
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .map(|r| r.vertices().len())
        .sum()
}
