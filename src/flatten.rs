//! Output adapter for the overlay renderer's MultiPolygon layout.
//!
//! The renderer does not group rings per polygon. It expects every ring of a
//! feature, outer rings followed by their holes, in one list wrapped by a single
//! array: `"coordinates": [[ring, ring, ...]]`. Nothing else in the crate uses
//! this layout; the geometry stages work on standard polygon sets.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::geom::{close_ring, PolygonSet, Ring};

#[cfg(test)]
mod tests {

    use super::*;
    use geo::polygon;
    use geo_types::{LineString, MultiPolygon, Polygon};
    use serde_json::json;

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

    #[test]
    fn outer_ring_precedes_its_holes() {
        let flat = flatten(&MultiPolygon(vec![square_with_hole()]));
        assert_eq!(flat.rings.len(), 2);
        assert_eq!(flat.rings[0].0.len(), 5);
        assert_eq!(flat.rings[1].0.len(), 5);
        assert_eq!(flat.rings[1].0[0], geo_types::Coord { x: 1.0, y: 1.0 });
    }

    #[test]
    fn ring_count_is_outer_plus_holes() {
        let set = MultiPolygon(vec![
            square_with_hole(),
            polygon![(x: 10.0, y: 0.0), (x: 11.0, y: 0.0), (x: 11.0, y: 1.0)],
            square_with_hole(),
        ]);
        let flat = flatten(&set);
        assert_eq!(flat.rings.len(), 5);
        assert_eq!(flat.rings.len(), crate::geom::ring_count(&set));
        // polygon order is kept: the triangle is the third ring
        assert_eq!(flat.rings[2].0.len(), 4);
    }

    #[test]
    fn coordinates_are_wrapped_once() {
        let feature = FlatFeature::new(flatten(&MultiPolygon(vec![square_with_hole()])));
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], json!("Feature"));
        assert_eq!(value["properties"], json!({}));
        assert_eq!(value["geometry"]["type"], json!("MultiPolygon"));

        let coordinates = value["geometry"]["coordinates"].as_array().unwrap();
        assert_eq!(coordinates.len(), 1);
        let rings = coordinates[0].as_array().unwrap();
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[1][0], json!([1.0, 1.0]));
    }

    #[test]
    fn render_pretty_prints_one_object_per_feature() {
        let a = FlatFeature::new(flatten(&MultiPolygon(vec![square_with_hole()])));
        let b = a.clone();
        let text = render(&[a, b]).unwrap();
        assert!(text.starts_with("{\n  \"type\": \"Feature\",\n  \"properties\": {},\n  \"geometry\": {"));
        assert_eq!(text.matches("\"Feature\"").count(), 2);
        assert!(text.contains("}\n{"));
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn empty_set_flattens_to_no_rings() {
        let flat = flatten(&MultiPolygon(vec![]));
        assert!(flat.rings.is_empty());
        let value = serde_json::to_value(&flat).unwrap();
        assert_eq!(value["coordinates"], json!([[]]));
    }
}

/// Every ring of a polygon set in one list, each polygon's outer ring first.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatGeometry {
    pub rings: Vec<Ring>,
}

impl Serialize for FlatGeometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let rings: Vec<Vec<[f64; 2]>> = self
            .rings
            .iter()
            .map(|ring| ring.0.iter().map(|c| [c.x, c.y]).collect())
            .collect();
        let mut state = serializer.serialize_struct("FlatGeometry", 2)?;
        state.serialize_field("type", "MultiPolygon")?;
        state.serialize_field("coordinates", &[rings])?;
        state.end()
    }
}

/// An output feature. Properties are always empty and no id is written.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FlatFeature {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: Map<String, Value>,
    pub geometry: FlatGeometry,
}

impl FlatFeature {
    pub fn new(geometry: FlatGeometry) -> Self {
        Self {
            kind: "Feature",
            properties: Map::new(),
            geometry,
        }
    }
}

/// Concatenates the rings of every polygon, in set order, outer ring first.
pub fn flatten(polygons: &PolygonSet) -> FlatGeometry {
    let rings = polygons
        .0
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .map(|ring| {
            if ring.is_closed() {
                ring.clone()
            } else {
                close_ring(ring.0.clone())
            }
        })
        .collect();
    FlatGeometry { rings }
}

/// Pretty-prints each feature and joins them with newlines.
pub fn render(features: &[FlatFeature]) -> Result<String> {
    let objects = features
        .iter()
        .map(serde_json::to_string_pretty)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(objects.join("\n"))
}
