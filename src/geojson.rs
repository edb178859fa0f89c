//! Esri JSON to GeoJSON (RFC 7946) conversion.
//!
//! Esri polygons are a flat list of rings where clockwise rings are shells
//! and counter-clockwise rings are holes. GeoJSON wants the opposite winding
//! and an explicit shell/hole nesting, so every ring is reversed and each hole
//! is attached to the first shell containing it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::arcgis::{Feature, FeatureSet};
use crate::error::HarvestError;

pub type Position = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFeature {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<GeoFeature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<GeoFeature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }
}

/// Turns an aggregated Esri feature set into a second serialization.
pub trait FeatureConverter: Send + Sync {
    fn convert(&self, set: &FeatureSet) -> Result<FeatureCollection, HarvestError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EsriGeoJsonConverter;

impl FeatureConverter for EsriGeoJsonConverter {
    fn convert(&self, set: &FeatureSet) -> Result<FeatureCollection, HarvestError> {
        let has_z = set
            .envelope
            .get("hasZ")
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        let id_field = set.object_id_field();

        let features = set
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                convert_feature(feature, id_field, has_z)
                    .map_err(|err| HarvestError::Conversion(format!("feature #{index}: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeatureCollection::new(features))
    }
}

fn convert_feature(
    feature: &Feature,
    id_field: Option<&str>,
    has_z: bool,
) -> Result<GeoFeature, String> {
    let geometry = match &feature.geometry {
        None | Some(Value::Null) => None,
        Some(value) => convert_geometry(value, has_z)?,
    };
    let id = id_field.and_then(|field| feature.attributes.get(field).cloned());
    Ok(GeoFeature {
        kind: "Feature".to_string(),
        id,
        geometry,
        properties: feature.attributes.clone(),
    })
}

fn convert_geometry(value: &Value, has_z: bool) -> Result<Option<Geometry>, String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("geometry is not an object: {value}"))?;

    if let Some(x) = object.get("x") {
        // Empty Esri points carry `"x": "NaN"` or `"x": null`.
        let (Some(x), Some(y)) = (x.as_f64(), object.get("y").and_then(|v| v.as_f64())) else {
            return Ok(None);
        };
        let mut position = vec![x, y];
        if has_z {
            if let Some(z) = object.get("z").and_then(|v| v.as_f64()) {
                position.push(z);
            }
        }
        return Ok(Some(Geometry::Point(position)));
    }

    if let Some(points) = object.get("points") {
        return Ok(Some(Geometry::MultiPoint(positions(points, has_z)?)));
    }

    if let Some(paths) = object.get("paths") {
        let mut lines = paths
            .as_array()
            .ok_or("paths is not an array")?
            .iter()
            .map(|path| positions(path, has_z))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(match lines.len() {
            0 => None,
            1 => lines.pop().map(Geometry::LineString),
            _ => Some(Geometry::MultiLineString(lines)),
        });
    }

    if let Some(rings) = object.get("rings") {
        let rings = rings
            .as_array()
            .ok_or("rings is not an array")?
            .iter()
            .map(|ring| positions(ring, has_z))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(rings_to_geometry(rings));
    }

    if object.contains_key("xmin") {
        return envelope_to_polygon(object);
    }

    Err(format!("unsupported geometry: {value}"))
}

fn positions(value: &Value, has_z: bool) -> Result<Vec<Position>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("expected coordinate array, got {value}"))?
        .iter()
        .map(|point| position(point, has_z))
        .collect()
}

fn position(value: &Value, has_z: bool) -> Result<Position, String> {
    let coords = value
        .as_array()
        .ok_or_else(|| format!("expected coordinate pair, got {value}"))?;
    let dims = if has_z { 3 } else { 2 };
    if coords.len() < 2 {
        return Err(format!("coordinate has fewer than two values: {value}"));
    }
    coords
        .iter()
        .take(dims)
        .map(|coord| {
            coord
                .as_f64()
                .ok_or_else(|| format!("coordinate is not a number: {coord}"))
        })
        .collect()
}

fn envelope_to_polygon(object: &Map<String, Value>) -> Result<Option<Geometry>, String> {
    let get = |key: &str| {
        object
            .get(key)
            .and_then(|value| value.as_f64())
            .ok_or_else(|| format!("envelope is missing {key}"))
    };
    let (xmin, ymin, xmax, ymax) = (get("xmin")?, get("ymin")?, get("xmax")?, get("ymax")?);
    Ok(Some(Geometry::Polygon(vec![vec![
        vec![xmin, ymin],
        vec![xmax, ymin],
        vec![xmax, ymax],
        vec![xmin, ymax],
        vec![xmin, ymin],
    ]])))
}

fn rings_to_geometry(rings: Vec<Vec<Position>>) -> Option<Geometry> {
    let mut polygons: Vec<Vec<Vec<Position>>> = Vec::new();
    let mut holes = Vec::new();

    for mut ring in rings {
        close_ring(&mut ring);
        if ring.len() < 4 {
            continue;
        }
        let shell = is_clockwise(&ring);
        ring.reverse();
        if shell {
            polygons.push(vec![ring]);
        } else {
            holes.push(ring);
        }
    }

    for hole in holes {
        let owner = hole.first().and_then(|first| {
            polygons
                .iter_mut()
                .find(|polygon| ring_contains(&polygon[0], first))
        });
        match owner {
            Some(polygon) => polygon.push(hole),
            None => {
                // Orphan hole: most likely a shell drawn with the wrong winding.
                let mut shell = hole;
                shell.reverse();
                polygons.push(vec![shell]);
            }
        }
    }

    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(polygons)),
    }
}

fn close_ring(ring: &mut Vec<Position>) {
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if first != last {
            let first = first.clone();
            ring.push(first);
        }
    }
}

fn is_clockwise(ring: &[Position]) -> bool {
    let sum: f64 = ring
        .windows(2)
        .map(|pair| (pair[1][0] - pair[0][0]) * (pair[1][1] + pair[0][1]))
        .sum();
    sum > 0.0
}

fn ring_contains(ring: &[Position], point: &[f64]) -> bool {
    let (x, y) = (point[0], point[1]);
    let mut inside = false;
    for pair in ring.windows(2) {
        let (xi, yi) = (pair[0][0], pair[0][1]);
        let (xj, yj) = (pair[1][0], pair[1][1]);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn feature(geometry: Value) -> Feature {
        Feature {
            attributes: Map::new(),
            geometry: Some(geometry),
        }
    }

    #[test]
    fn polygon_hole_attaches_to_shell() {
        // Esri: shell clockwise, hole counter-clockwise.
        let geometry = json!({
            "rings": [
                [[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0], [0.0, 0.0]],
                [[2.0, 2.0], [4.0, 2.0], [4.0, 4.0], [2.0, 4.0], [2.0, 2.0]]
            ]
        });
        let converted = convert_feature(&feature(geometry), None, false).unwrap();
        let Some(Geometry::Polygon(rings)) = converted.geometry else {
            panic!("expected polygon");
        };
        assert_eq!(rings.len(), 2);
        assert!(!is_clockwise(&rings[0]));
        assert!(is_clockwise(&rings[1]));
    }

    #[test]
    fn disjoint_shells_become_multipolygon() {
        let geometry = json!({
            "rings": [
                [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
                [[5.0, 5.0], [5.0, 6.0], [6.0, 6.0], [6.0, 5.0]]
            ]
        });
        let converted = convert_feature(&feature(geometry), None, false).unwrap();
        assert!(matches!(converted.geometry, Some(Geometry::MultiPolygon(ref p)) if p.len() == 2));
    }

    #[test]
    fn single_path_is_linestring() {
        let geometry = json!({ "paths": [[[0.0, 0.0], [1.0, 1.0]]] });
        let converted = convert_feature(&feature(geometry), None, false).unwrap();
        assert_eq!(
            converted.geometry,
            Some(Geometry::LineString(vec![vec![0.0, 0.0], vec![1.0, 1.0]]))
        );
    }

    #[test]
    fn nan_point_has_no_geometry() {
        let geometry = json!({ "x": "NaN", "y": "NaN" });
        let converted = convert_feature(&feature(geometry), None, false).unwrap();
        assert!(converted.geometry.is_none());
    }

    #[test]
    fn bad_coordinate_fails() {
        let geometry = json!({ "points": [["a", 1.0]] });
        assert!(convert_feature(&feature(geometry), None, false).is_err());
    }
}
