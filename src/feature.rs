//! GeoJSON feature collections in and out of the geometry core.
//!
//! Input is read with the `geojson` crate, and the geometry type is checked on
//! the parsed [`Value`] before any coordinate is converted. Every accepted
//! geometry is normalized to a [`PolygonSet`] straight away; downstream stages
//! never see the Polygon/MultiPolygon distinction.

use geo_types::{MultiPolygon, Polygon};
use geojson::feature::Id;
use geojson::{FeatureCollection, GeoJson, Geometry, JsonObject, PolygonType, Value};

use crate::error::{Error, Result};
use crate::geom::{close_ring, PolygonSet};


/// A geometry as it arrives on input, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryVariant {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl GeometryVariant {
    /// Normalizes the variant to a polygon set.
    pub fn into_polygon_set(self) -> PolygonSet {
        match self {
            GeometryVariant::Polygon(polygon) => MultiPolygon(vec![polygon]),
            GeometryVariant::MultiPolygon(polygons) => polygons,
        }
    }
}

/// A polygon set with the identifier and properties it was read with.
/// The payload is carried through untouched and never read by geometry code.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<Id>,
    pub properties: JsonObject,
    pub geometry: PolygonSet,
}

impl Feature {
    pub fn new(geometry: PolygonSet) -> Self {
        Self {
            id: None,
            properties: JsonObject::new(),
            geometry,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Parses GeoJSON text into features. Fails on the first feature whose geometry
/// is not a Polygon or MultiPolygon.
pub fn parse_feature_collection(text: &str) -> Result<Vec<Feature>> {
    let collection = match text.parse::<GeoJson>() {
        Ok(GeoJson::FeatureCollection(collection)) => collection,
        Ok(GeoJson::Feature(_)) => {
            return Err(Error::Format("expected a FeatureCollection, found a Feature".into()))
        }
        Ok(GeoJson::Geometry(geometry)) => {
            return Err(Error::Format(format!(
                "expected a FeatureCollection, found a {} geometry",
                type_name(&geometry.value)
            )))
        }
        Err(e) => return Err(Error::Format(e.to_string())),
    };

    // Reject unsupported types before interpreting any coordinates.
    for (index, feature) in collection.features.iter().enumerate() {
        match feature.geometry.as_ref().map(|geometry| &geometry.value) {
            Some(Value::Polygon(_) | Value::MultiPolygon(_)) => {}
            Some(other) => {
                return Err(Error::unsupported(format!(
                    "feature {index} has geometry type {}",
                    type_name(other)
                )))
            }
            None => {
                return Err(Error::unsupported(format!(
                    "feature {index} has no geometry"
                )))
            }
        }
    }

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            let geometry = feature
                .geometry
                .ok_or_else(|| Error::unsupported(format!("feature {index} has no geometry")))?;
            let variant = to_variant(geometry.value)
                .map_err(|e| Error::Format(format!("feature {index}: {e}")))?;
            Ok(Feature {
                id: feature.id,
                properties: feature.properties.unwrap_or_default(),
                geometry: normalized(variant.into_polygon_set()),
            })
        })
        .collect()
}

/// Checks what the geo-types conversion assumes: at least one ring per
/// polygon and two values per position.
fn check_polygon(rings: &PolygonType) -> std::result::Result<(), String> {
    if rings.is_empty() {
        return Err("polygon has no rings".into());
    }
    match rings.iter().flatten().find(|position| position.len() < 2) {
        Some(position) => Err(format!("position {position:?} has fewer than 2 values")),
        None => Ok(()),
    }
}

fn to_variant(value: Value) -> std::result::Result<GeometryVariant, String> {
    match &value {
        Value::Polygon(rings) => check_polygon(rings)?,
        Value::MultiPolygon(polygons) => polygons.iter().try_for_each(check_polygon)?,
        other => return Err(format!("geometry type {} is not areal", type_name(other))),
    }
    match value {
        Value::Polygon(_) => Polygon::try_from(value)
            .map(GeometryVariant::Polygon)
            .map_err(|e| e.to_string()),
        _ => MultiPolygon::try_from(value)
            .map(GeometryVariant::MultiPolygon)
            .map_err(|e| e.to_string()),
    }
}

/// Drops repeated positions and closes every ring.
fn normalized(set: PolygonSet) -> PolygonSet {
    set.into_iter()
        .map(|polygon| {
            let (exterior, interiors) = polygon.into_inner();
            Polygon::new(
                close_ring(exterior.0),
                interiors.into_iter().map(|ring| close_ring(ring.0)).collect(),
            )
        })
        .collect()
}

/// Builds a standard GeoJSON FeatureCollection, keeping ids, properties and the
/// usual polygon grouping.
pub fn to_feature_collection(features: &[Feature]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: features
            .iter()
            .map(|feature| geojson::Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(&feature.geometry))),
                id: feature.id.clone(),
                properties: Some(feature.properties.clone()),
                foreign_members: None,
            })
            .collect(),
        foreign_members: None,
    }
}
