//! Planar union of polygons with hole preservation.
//!
//! The union is computed on the noded edge arrangement of every input ring:
//! - rings are oriented so the winding number of a point counts the input
//!   polygons covering it (outer rings counter-clockwise, holes clockwise)
//! - every edge is split at every crossing, touching point and overlap end
//! - a split edge survives if exactly one of its sides is covered, and is
//!   oriented with the covered side on its left; sides are told apart with
//!   exact orientation tests on a point moved off the edge symbolically
//! - surviving edges are chained into rings, taking the sharpest left turn at
//!   every node so that shapes meeting at a single point stay separate rings
//! - rings are classified by orientation and nesting depth, and every hole is
//!   attached to the smallest outer ring that encloses it

use std::collections::HashMap;
use std::f64::consts::PI;

use geo::kernels::{Kernel, Orientation, RobustKernel};
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::BoundingRect;
use geo_types::{Coord, Line, MultiPolygon, Polygon, Rect};
use itertools::Itertools;
use rstar::{RTree, RTreeObject, AABB};
use tracing::{debug, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::geom::{
    self, close_ring, is_colinear, reversed, ring_within, validate_polygon, PolygonSet, Ring,
    RingExtensions,
};

#[cfg(test)]
mod tests {

    use super::*;
    use geo::{polygon, Area};
    use geo_types::LineString;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]
    }

    fn square_with_hole() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]),
            vec![LineString::from(vec![
                (1.0, 1.0),
                (1.0, 3.0),
                (3.0, 3.0),
                (3.0, 1.0),
                (1.0, 1.0),
            ])],
        )
    }

    fn star(cx: f64, cy: f64, radii: &[f64], phase: f64) -> Polygon<f64> {
        let n = radii.len() as f64;
        let ring: Vec<Coord<f64>> = radii
            .iter()
            .enumerate()
            .map(|(k, r)| {
                let angle = phase + 2.0 * PI * k as f64 / n;
                Coord {
                    x: cx + r * angle.cos(),
                    y: cy + r * angle.sin(),
                }
            })
            .collect();
        Polygon::new(LineString::from(ring), vec![])
    }

    fn stars(dx: f64, dy: f64) -> Vec<Polygon<f64>> {
        vec![
            star(dx + 0.01, dy + 0.02, &[0.03, 0.012, 0.027, 0.015, 0.03, 0.01, 0.025], 0.1),
            star(
                dx + 0.03,
                dy + 0.01,
                &[0.02, 0.029, 0.011, 0.024, 0.018, 0.03, 0.013, 0.026, 0.021],
                0.4,
            ),
            star(dx + 0.02, dy + 0.04, &[0.025, 0.01, 0.028, 0.017, 0.022, 0.012, 0.03, 0.014], 1.3),
        ]
    }

    #[test]
    fn overlapping_squares() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(0.5, 0.0, 1.5, 1.0);
        let merged = merge(&[a, b]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!(merged.0[0].interiors().is_empty());
        assert!((merged.unsigned_area() - 1.5).abs() < 1e-12);
        // the straight-through nodes at x=0.5 and x=1 are dissolved
        assert_eq!(merged.0[0].exterior().vertices().len(), 4);
    }

    #[test]
    fn disjoint_areas_add_up() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(3.0, 0.0, 5.0, 2.0);
        let merged = merge(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(merged.0.len(), 2);
        assert!((merged.unsigned_area() - (a.unsigned_area() + b.unsigned_area())).abs() < 1e-12);
    }

    #[test]
    fn holes_survive_a_disjoint_merge() {
        let holed = square_with_hole();
        let other = rect(10.0, 0.0, 11.0, 1.0);
        let merged = merge(&[holed, other]).unwrap();
        assert_eq!(merged.0.len(), 2);

        let with_holes: Vec<_> = merged
            .0
            .iter()
            .filter(|p| !p.interiors().is_empty())
            .collect();
        assert_eq!(with_holes.len(), 1);
        assert_eq!(with_holes[0].interiors().len(), 1);
        assert_eq!(with_holes[0].interiors()[0].0.len(), 5);
        assert!((merged.unsigned_area() - 13.0).abs() < 1e-12);
    }

    #[test]
    fn output_follows_input_order() {
        let first = rect(10.0, 0.0, 11.0, 1.0);
        let second = rect(0.0, 0.0, 1.0, 1.0);
        let merged = merge(&[first, second]).unwrap();
        assert!(merged.0[0].exterior().0.iter().all(|c| c.x >= 10.0));
    }

    #[test]
    fn union_closes_a_hole() {
        // a U opening upwards, capped by a bar across its arms
        let u = polygon![
            (x: 0.0, y: 0.0),
            (x: 3.0, y: 0.0),
            (x: 3.0, y: 3.0),
            (x: 2.0, y: 3.0),
            (x: 2.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 3.0),
            (x: 0.0, y: 3.0),
        ];
        let bar = rect(0.0, 2.5, 3.0, 4.0);
        let merged = merge(&[u, bar]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert_eq!(merged.0[0].interiors().len(), 1);
        assert!((merged.unsigned_area() - 10.5).abs() < 1e-12);

        let hole = &merged.0[0].interiors()[0];
        assert!(!hole.is_ccw_ring());
        assert!((hole.signed_ring_area().abs() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn partially_filled_hole_shrinks() {
        let holed = square_with_hole();
        let patch = rect(1.0, 1.0, 2.0, 3.0);
        let merged = merge(&[holed, patch]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert_eq!(merged.0[0].interiors().len(), 1);
        assert!((merged.unsigned_area() - 14.0).abs() < 1e-12);
    }

    #[test]
    fn island_inside_a_hole_stays_separate() {
        let holed = square_with_hole();
        let island = rect(1.5, 1.5, 2.5, 2.5);
        let merged = merge(&[holed, island]).unwrap();
        assert_eq!(merged.0.len(), 2);
        assert!((merged.unsigned_area() - 13.0).abs() < 1e-12);
    }

    #[test]
    fn corner_touching_squares_stay_apart() {
        let merged = merge(&[rect(0.0, 0.0, 1.0, 1.0), rect(1.0, 1.0, 2.0, 2.0)]).unwrap();
        assert_eq!(merged.0.len(), 2);
        for polygon in &merged.0 {
            assert_eq!(polygon.exterior().vertices().len(), 4);
        }
    }

    #[test]
    fn shared_edge_is_dissolved() {
        let merged = merge(&[rect(0.0, 0.0, 1.0, 1.0), rect(1.0, 0.0, 2.0, 1.0)]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert_eq!(merged.0[0].exterior().vertices().len(), 4);
        assert!((merged.unsigned_area() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn duplicates_collapse() {
        let a = rect(0.0, 0.0, 2.0, 2.0);
        let merged = merge(&[a.clone(), a.clone(), a]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn clockwise_input_is_handled() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = Polygon::new(reversed(rect(0.5, 0.5, 1.5, 1.5).exterior()), vec![]);
        let merged = merge(&[a, b]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 1.75).abs() < 1e-12);
    }

    #[test]
    fn single_polygon_passes_through() {
        let holed = square_with_hole();
        let merged = merge(&[holed.clone()]).unwrap();
        assert_eq!(merged.0, vec![holed]);
    }

    #[test]
    fn self_intersecting_input_is_rejected() {
        let bowtie = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0)];
        let result = merge(&[rect(5.0, 5.0, 6.0, 6.0), bowtie]);
        assert!(matches!(result, Err(Error::Geometry(_))));
    }

    #[test]
    fn empty_input_is_unsupported() {
        assert!(matches!(merge(&[]), Err(Error::UnsupportedGeometry(_))));
    }

    #[test]
    fn geographic_coordinates_merge_like_local_ones() {
        let far = merge(&stars(139.0, 35.0)).unwrap();
        let near = merge(&stars(0.0, 0.0)).unwrap();
        assert_eq!(far.0.len(), near.0.len());
        assert!(far.unsigned_area() > 1e-3);
        assert!((far.unsigned_area() - near.unsigned_area()).abs() < 1e-9);
        for polygon in &far.0 {
            assert!(polygon.exterior().is_ccw_ring());
            assert!(polygon.exterior().is_simple_ring());
        }
    }

    #[test]
    fn input_vertices_keep_their_exact_coordinates() {
        let a = rect(139.0, 35.0, 139.001, 35.001);
        let b = rect(139.0005, 35.0, 139.0015, 35.001);
        let merged = merge(&[a, b]).unwrap();
        assert_eq!(merged.0.len(), 1);
        let exterior = merged.0[0].exterior();
        assert_eq!(exterior.vertices().len(), 4);
        assert!(exterior.0.contains(&Coord { x: 139.0, y: 35.0 }));
        assert!(exterior.0.contains(&Coord { x: 139.0015, y: 35.001 }));
    }

    #[test]
    fn shallow_crossing_is_classified_exactly() {
        // the lower edge of the triangle crosses the top of the rectangle at x=5
        let e = 1e-9;
        let triangle = polygon![(x: 0.0, y: 1.0 - e), (x: 10.0, y: 1.0 + e), (x: 5.0, y: 3.0)];
        let merged = merge(&[rect(0.0, 0.0, 10.0, 1.0), triangle]).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!(merged.0[0].interiors().is_empty());
        assert!((merged.unsigned_area() - (20.0 - 2.5 * e)).abs() < 1e-12);
    }

    #[test]
    fn crossing_counts_edges_the_moved_point_sees() {
        let (a, b) = (Coord { x: 1.0, y: -1.0 }, Coord { x: 1.0, y: 1.0 });
        let p = Coord { x: 0.0, y: 0.0 };
        let up = Coord { x: 0.0, y: 1.0 };
        assert_eq!(crossing(a, b, p, up, 1), 1);
        assert_eq!(crossing(b, a, p, up, -1), -1);
        // an edge level with the point is never crossed
        let level = Coord { x: 2.0, y: 0.0 };
        assert_eq!(crossing(Coord { x: 1.0, y: 0.0 }, level, p, up, 1), 0);
        assert_eq!(side_of(b - a, Coord { x: -1.0, y: 0.0 }), 1);
    }
}

/// Merges polygons into their planar union.
///
/// A single polygon is validated and returned unchanged. Two or more are
/// unioned; the result is a set of disjoint polygons ordered by the first input
/// polygon that contributes to each.
pub fn merge(polygons: &[Polygon<f64>]) -> Result<PolygonSet> {
    merge_with_snap(polygons, config::VERTEX_SNAP_DISTANCE)
}

/// As [`merge`], with an explicit distance under which noded vertices are fused.
///
/// The distance is raised to [`config::RELATIVE_SNAP`] times the half-extent of
/// the input when that is larger.
pub fn merge_with_snap(polygons: &[Polygon<f64>], snap: f64) -> Result<PolygonSet> {
    if polygons.is_empty() {
        return Err(Error::unsupported("the union of no polygons is empty"));
    }
    for (index, polygon) in polygons.iter().enumerate() {
        validate_polygon(polygon).map_err(|e| match e {
            Error::Geometry(message) => Error::geometry(format!("polygon {index}: {message}")),
            other => other,
        })?;
    }
    if polygons.len() == 1 {
        return Ok(MultiPolygon(vec![polygons[0].clone()]));
    }

    let union = Union::new(polygons, snap);
    let result = union.compute();
    if result.0.is_empty() {
        return Err(Error::unsupported(format!(
            "the union of {} polygons has no area",
            polygons.len()
        )));
    }
    debug!(
        inputs = polygons.len(),
        outputs = result.0.len(),
        "union computed"
    );
    Ok(result)
}

/// Deduplicating store of arrangement vertices, remembering which input rings
/// each vertex originally belonged to.
///
/// Vertices are kept in a frame centred on the input, which keeps noding
/// precise far from the origin. `world` holds the matching input coordinates,
/// bit for bit for input vertices.
#[derive(Debug)]
struct VertexPool {
    coords: Vec<Coord<f64>>,
    world: Vec<Coord<f64>>,
    origins: Vec<Vec<usize>>,
    cells: HashMap<(i64, i64), Vec<usize>>,
    origin: Coord<f64>,
    snap: f64,
    cell: f64,
}

impl VertexPool {
    fn new(origin: Coord<f64>, snap: f64) -> Self {
        Self {
            coords: Vec::new(),
            world: Vec::new(),
            origins: Vec::new(),
            cells: HashMap::new(),
            origin,
            snap,
            cell: snap.max(1e-9),
        }
    }

    fn cell_of(&self, c: Coord<f64>) -> (i64, i64) {
        (
            (c.x / self.cell).floor() as i64,
            (c.y / self.cell).floor() as i64,
        )
    }

    /// Pools a vertex of input ring `ring`, given in input coordinates.
    fn insert_input(&mut self, world: Coord<f64>, ring: usize) -> usize {
        self.insert(world - self.origin, world, Some(ring))
    }

    /// Pools a noding point, given in the local frame.
    fn insert_node(&mut self, local: Coord<f64>) -> usize {
        self.insert(local, local + self.origin, None)
    }

    /// Returns the id of the vertex within snapping distance of `c`, adding one if needed.
    fn insert(&mut self, c: Coord<f64>, world: Coord<f64>, origin: Option<usize>) -> usize {
        let (cx, cy) = self.cell_of(c);
        let existing = (-1..=1)
            .cartesian_product(-1..=1)
            .filter_map(|(dx, dy)| self.cells.get(&(cx + dx, cy + dy)))
            .flatten()
            .copied()
            .find(|&id| geom::distance(self.coords[id], c) <= self.snap);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.coords.len();
                self.coords.push(c);
                self.world.push(world);
                self.origins.push(Vec::new());
                self.cells.entry((cx, cy)).or_default().push(id);
                id
            }
        };
        if let Some(ring) = origin {
            if !self.origins[id].contains(&ring) {
                self.origins[id].push(ring);
            }
        }
        id
    }
}

/// A directed edge between two pooled vertices, tagged with its source ring
/// and the input edge it was split from.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    from: usize,
    to: usize,
    ring: usize,
    source: usize,
}

/// Bounding box of an input edge, as stored in the segment index.
#[derive(Debug, Clone, Copy)]
struct IndexedEdge {
    index: usize,
    min: [f64; 2],
    max: [f64; 2],
}

impl IndexedEdge {
    fn new(index: usize, a: Coord<f64>, b: Coord<f64>) -> Self {
        Self {
            index,
            min: [a.x.min(b.x), a.y.min(b.y)],
            max: [a.x.max(b.x), a.y.max(b.y)],
        }
    }
}

impl RTreeObject for IndexedEdge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Clockwise angle in (0, 2pi] turning from direction `from` to direction `to`.
fn clockwise_angle(from: Coord<f64>, to: Coord<f64>) -> f64 {
    let ccw = (from.x * to.y - from.y * to.x).atan2(from.x * to.x + from.y * to.y);
    let cw = -ccw;
    if cw <= 0.0 {
        cw + 2.0 * PI
    } else {
        cw
    }
}

/// Whether `p` continues straight on from `a` towards `b`.
fn is_straight(a: Coord<f64>, p: Coord<f64>, b: Coord<f64>) -> bool {
    let (u, v) = (p - a, b - p);
    is_colinear(a, p, b) && u.x * v.x + u.y * v.y > 0.0
}

/// Sign of the side of `direction` that `towards` points to: 1 for left, -1 for right.
fn side_of(direction: Coord<f64>, towards: Coord<f64>) -> i32 {
    let c = direction.x * towards.y - direction.y * towards.x;
    if c > 0.0 {
        1
    } else if c < 0.0 {
        -1
    } else {
        0
    }
}

/// Contribution of edge `a -> b` to the winding number of `p` moved by a
/// vanishing step along `towards`, where `side` is the side of the edge the
/// moved point lies on.
///
/// Vertices level with `p` count as below it when the step does not go down,
/// so edges through `p` are resolved as the moved point sees them.
fn crossing(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>, towards: Coord<f64>, side: i32) -> i32 {
    let below = |v: Coord<f64>| v.y < p.y || (v.y == p.y && towards.y >= 0.0);
    match (below(a), below(b)) {
        (true, false) if side > 0 => 1,
        (false, true) if side < 0 => -1,
        _ => 0,
    }
}

/// A traced output ring, in the local frame and in input coordinates, and the
/// first input polygon contributing to it.
#[derive(Debug)]
struct TracedRing {
    ring: Ring,
    world: Ring,
    area: f64,
    first_polygon: usize,
}

/// Union of a fixed list of polygons.
#[derive(Debug)]
struct Union {
    ring_polygon: Vec<usize>, // input polygon of each ring
    pool: VertexPool,
    edges: Vec<Edge>,        // input edges
    index: RTree<IndexedEdge>,
    reach: f64, // largest x of any input vertex
}

impl Union {
    fn new(polygons: &[Polygon<f64>], snap: f64) -> Self {
        let bounds = polygons
            .iter()
            .filter_map(|polygon| polygon.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            });
        let origin = bounds.map_or(Coord { x: 0.0, y: 0.0 }, |rect| rect.center());
        let extent = bounds.map_or(0.0, |rect| rect.width().max(rect.height()) / 2.0);
        let snap = snap.max(extent * config::RELATIVE_SNAP);
        debug!(x = origin.x, y = origin.y, snap, "union frame");

        let mut union = Self {
            ring_polygon: Vec::new(),
            pool: VertexPool::new(origin, snap),
            edges: Vec::new(),
            index: RTree::new(),
            reach: f64::NEG_INFINITY,
        };

        for (index, polygon) in polygons.iter().enumerate() {
            let exterior = polygon.exterior();
            let exterior = if exterior.is_ccw_ring() {
                exterior.clone()
            } else {
                reversed(exterior)
            };
            union.add_ring(&exterior, index);

            for interior in polygon.interiors() {
                let interior = if interior.is_ccw_ring() {
                    reversed(interior)
                } else {
                    interior.clone()
                };
                union.add_ring(&interior, index);
            }
        }

        let coords = &union.pool.coords;
        let entries = union
            .edges
            .iter()
            .enumerate()
            .map(|(k, e)| IndexedEdge::new(k, coords[e.from], coords[e.to]))
            .collect();
        union.reach = coords.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
        union.index = RTree::bulk_load(entries);
        union
    }

    fn add_ring(&mut self, ring: &Ring, polygon: usize) {
        let id = self.ring_polygon.len();
        let vertices: Vec<usize> = ring
            .vertices()
            .iter()
            .map(|&c| self.pool.insert_input(c, id))
            .collect();

        for (&from, &to) in vertices.iter().circular_tuple_windows() {
            if from != to {
                let source = self.edges.len();
                self.edges.push(Edge {
                    from,
                    to,
                    ring: id,
                    source,
                });
            }
        }
        self.ring_polygon.push(polygon);
    }

    fn compute(mut self) -> PolygonSet {
        let pieces = self.node();
        let boundary = self.boundary_edges(pieces);
        let cycles = self.trace(&boundary);
        let rings = cycles
            .iter()
            .filter_map(|cycle| self.dissolve(cycle, &boundary))
            .collect();
        self.assemble(rings)
    }

    /// Splits every input edge at every node it shares with another edge.
    fn node(&mut self) -> Vec<Edge> {
        let lines: Vec<Line<f64>> = self
            .edges
            .iter()
            .map(|e| Line::new(self.pool.coords[e.from], self.pool.coords[e.to]))
            .collect();

        let mut crossings: Vec<(usize, usize, Coord<f64>)> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let envelope = IndexedEdge::new(i, line.start, line.end).envelope();
            for other in self.index.locate_in_envelope_intersecting(&envelope) {
                let j = other.index;
                if j <= i {
                    continue;
                }
                match line_intersection(*line, lines[j]) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => {
                        crossings.push((i, j, intersection));
                    }
                    Some(LineIntersection::Collinear { intersection }) => {
                        crossings.push((i, j, intersection.start));
                        crossings.push((i, j, intersection.end));
                    }
                    None => {}
                }
            }
        }

        let mut nodes: Vec<Vec<usize>> = self.edges.iter().map(|e| vec![e.from, e.to]).collect();
        for (i, j, c) in crossings {
            let id = self.pool.insert_node(c);
            nodes[i].push(id);
            nodes[j].push(id);
        }

        let coords = &self.pool.coords;
        self.edges
            .iter()
            .zip(nodes)
            .flat_map(|(edge, ids)| {
                let a = coords[edge.from];
                let d = coords[edge.to] - a;
                let along = |id: &usize| {
                    let p = coords[*id] - a;
                    p.x * d.x + p.y * d.y
                };
                ids.into_iter()
                    .sorted_by(|x, y| along(x).total_cmp(&along(y)))
                    .dedup()
                    .tuple_windows()
                    .filter(|(u, v)| u != v)
                    .map(|(from, to)| Edge { from, to, ..*edge })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Number of input polygons covering the point reached from `mid` by a
    /// vanishing step along `towards`. `mid` lies inside the pieces of `group`,
    /// which all join the same two vertices.
    ///
    /// Counts the crossings of a ray cast in +x, looked up in the segment index.
    fn coverage(&self, mid: Coord<f64>, towards: Coord<f64>, group: &[Edge]) -> i32 {
        let coords = &self.pool.coords;
        let ray = AABB::from_corners([mid.x, mid.y], [self.reach.max(mid.x), mid.y]);

        let others: i32 = self
            .index
            .locate_in_envelope_intersecting(&ray)
            .filter(|item| group.iter().all(|piece| piece.source != item.index))
            .map(|item| {
                let edge = self.edges[item.index];
                let (a, b) = (coords[edge.from], coords[edge.to]);
                let side = match RobustKernel::orient2d(a, b, mid) {
                    Orientation::CounterClockwise => 1,
                    Orientation::Clockwise => -1,
                    Orientation::Collinear => side_of(b - a, towards),
                };
                crossing(a, b, mid, towards, side)
            })
            .sum();

        let own: i32 = group
            .iter()
            .map(|piece| {
                let (a, b) = (coords[piece.from], coords[piece.to]);
                crossing(a, b, mid, towards, side_of(b - a, towards))
            })
            .sum();
        others + own
    }

    /// Keeps the pieces that separate covered from uncovered area, oriented with
    /// the covered side on the left.
    fn boundary_edges(&self, pieces: Vec<Edge>) -> Vec<Edge> {
        let coords = &self.pool.coords;
        let mut slots: HashMap<(usize, usize), usize> = HashMap::new();
        let mut groups: Vec<Vec<Edge>> = Vec::new();
        for piece in pieces {
            let key = (piece.from.min(piece.to), piece.from.max(piece.to));
            let slot = *slots.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(piece);
        }

        groups
            .iter()
            .filter_map(|group| {
                let piece = group[0];
                let (a, b) = (coords[piece.from], coords[piece.to]);
                let mid = Coord {
                    x: (a.x + b.x) / 2.0,
                    y: (a.y + b.y) / 2.0,
                };
                let normal = Coord {
                    x: a.y - b.y,
                    y: b.x - a.x,
                };
                let left = self.coverage(mid, normal, group) > 0;
                let right = self.coverage(mid, -normal, group) > 0;

                match (left, right) {
                    (true, false) => Some(piece),
                    (false, true) => Some(Edge {
                        from: piece.to,
                        to: piece.from,
                        ..piece
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    /// Chains boundary edges into closed cycles of edge indices.
    fn trace(&self, boundary: &[Edge]) -> Vec<Vec<usize>> {
        let coords = &self.pool.coords;
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); coords.len()];
        for (k, edge) in boundary.iter().enumerate() {
            outgoing[edge.from].push(k);
        }

        let mut used = vec![false; boundary.len()];
        let mut cycles = Vec::new();
        for start in 0..boundary.len() {
            if used[start] {
                continue;
            }
            let mut cycle = Vec::new();
            let mut current = start;
            let closed = loop {
                used[current] = true;
                cycle.push(current);

                let edge = boundary[current];
                let here = coords[edge.to];
                let back = coords[edge.from] - here;
                let turn = |k: usize| clockwise_angle(back, coords[boundary[k].to] - here);
                let next = outgoing[edge.to]
                    .iter()
                    .copied()
                    .min_by(|&x, &y| turn(x).total_cmp(&turn(y)));

                match next {
                    Some(next) if next == start => break true,
                    Some(next) if !used[next] => current = next,
                    _ => break false,
                }
            };

            if closed {
                cycles.push(cycle);
            } else {
                warn!(edges = cycle.len(), "dropping an open boundary chain");
            }
        }
        cycles
    }

    /// Turns a cycle into a ring, dropping straight-through vertices that were
    /// introduced by noding or by joining different input rings.
    fn dissolve(&self, cycle: &[usize], boundary: &[Edge]) -> Option<TracedRing> {
        let coords = &self.pool.coords;
        let n = cycle.len();
        let vertex = |k: usize| boundary[cycle[k % n]].from;
        let point = |k: usize| coords[vertex(k)];

        let start = (0..n).find(|&k| !is_straight(point(k + n - 1), point(k), point(k + 1)));
        let Some(start) = start else {
            warn!(vertices = n, "dropping a ring with no corners");
            return None;
        };

        let mut kept = vec![vertex(start)];
        for step in 1..n {
            let k = start + step;
            let v = vertex(k);
            let previous = coords[kept[kept.len() - 1]];
            let ring_in = boundary[cycle[(k + n - 1) % n]].ring;
            let ring_out = boundary[cycle[k % n]].ring;
            let original = ring_in == ring_out && self.pool.origins[v].contains(&ring_in);
            if original || !is_straight(previous, coords[v], point(k + 1)) {
                kept.push(v);
            }
        }

        let first_polygon = cycle
            .iter()
            .map(|&k| self.ring_polygon[boundary[k].ring])
            .min()
            .unwrap_or(0);
        let ring = close_ring(kept.iter().map(|&v| coords[v]).collect());
        let world = close_ring(kept.iter().map(|&v| self.pool.world[v]).collect());
        let area = ring.signed_ring_area();
        Some(TracedRing {
            ring,
            world,
            area,
            first_polygon,
        })
    }

    /// Groups traced rings into polygons: counter-clockwise rings are outers,
    /// clockwise rings are holes of the smallest outer ring around them.
    fn assemble(&self, rings: Vec<TracedRing>) -> PolygonSet {
        let rings: Vec<TracedRing> = rings
            .into_iter()
            .filter(|traced| {
                let degenerate = traced.area.abs() <= config::AREA_EPSILON
                    || traced.ring.distinct_vertex_count() < 3;
                if degenerate {
                    warn!(
                        area = traced.area,
                        vertices = traced.ring.vertices().len(),
                        "dropping a degenerate ring from the union"
                    );
                }
                !degenerate
            })
            .collect();
        let bounds: Vec<Option<Rect<f64>>> =
            rings.iter().map(|traced| traced.ring.bounding_rect()).collect();
        let encloses = |outer: usize, inner: usize| match (bounds[outer], bounds[inner]) {
            (Some(o), Some(i)) => {
                o.min().x <= i.min().x
                    && o.min().y <= i.min().y
                    && o.max().x >= i.max().x
                    && o.max().y >= i.max().y
                    && ring_within(&rings[inner].ring, &rings[outer].ring)
            }
            _ => false,
        };

        for (i, traced) in rings.iter().enumerate() {
            let depth = (0..rings.len())
                .filter(|&j| j != i && rings[j].area.abs() > traced.area.abs() && encloses(j, i))
                .count();
            if (depth % 2 == 1) != (traced.area < 0.0) {
                warn!(depth, area = traced.area, "ring orientation disagrees with nesting depth");
            }
        }

        let (outers, holes): (Vec<usize>, Vec<usize>) =
            (0..rings.len()).partition(|&k| rings[k].area > 0.0);

        let mut interiors: Vec<Vec<usize>> = vec![Vec::new(); outers.len()];
        for hole in holes {
            let area = rings[hole].area.abs();
            let parent = outers
                .iter()
                .enumerate()
                .filter(|&(_, &outer)| rings[outer].area > area && encloses(outer, hole))
                .min_by(|(_, &a), (_, &b)| rings[a].area.total_cmp(&rings[b].area))
                .map(|(slot, _)| slot);
            match parent {
                Some(slot) => interiors[slot].push(hole),
                None => warn!(area, "dropping a hole with no enclosing ring"),
            }
        }

        let polygons = outers
            .into_iter()
            .zip(interiors)
            .sorted_by_key(|&(outer, _)| rings[outer].first_polygon)
            .map(|(outer, holes)| {
                let holes = holes
                    .into_iter()
                    .sorted_by_key(|&hole| rings[hole].first_polygon)
                    .map(|hole| rings[hole].world.clone())
                    .collect();
                Polygon::new(rings[outer].world.clone(), holes)
            })
            .collect();
        MultiPolygon(polygons)
    }
}
