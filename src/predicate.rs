//! Row predicates applied after downsampling and flag filtering.

use std::path::Path;

use geo::{Contains, Geometry, MultiPolygon, Point};
use geojson::GeoJson;

use crate::error::{ConfigError, PredicateError};
use crate::types::Value;

/// A view of one shot restricted to the requested layers.
///
/// Rows are only materialised while a predicate is evaluated.
pub struct Row<'a> {
    fields: &'a [String],
    values: Vec<&'a Value>,
}

impl<'a> Row<'a> {
    /// Returns a new Row. `fields` and `values` must have the same length.
    pub fn new(fields: &'a [String], values: Vec<&'a Value>) -> Self {
        debug_assert_eq!(fields.len(), values.len());
        Self { fields, values }
    }

    /// Look up a field by name.
    pub fn get(&self, field: &str) -> Result<&'a Value, PredicateError> {
        self.fields
            .iter()
            .position(|name| name == field)
            .map(|index| self.values[index])
            .ok_or_else(|| PredicateError::MissingField(field.to_string()))
    }

    /// Look up a numeric field by name.
    pub fn get_f64(&self, field: &str) -> Result<f64, PredicateError> {
        self.get(field)?
            .as_f64()
            .ok_or_else(|| PredicateError::NotNumeric(field.to_string()))
    }
}

/// Decides whether a row is kept.
///
/// Returning an error means the predicate could not be evaluated for the row. The reducer drops
/// such rows and logs the error; it does not abort.
pub trait RowPredicate: Send + Sync {
    fn test(&self, row: &Row) -> Result<bool, PredicateError>;
}

impl<F> RowPredicate for F
where
    F: Fn(&Row) -> Result<bool, PredicateError> + Send + Sync,
{
    fn test(&self, row: &Row) -> Result<bool, PredicateError> {
        self(row)
    }
}

/// Default name of the longitude layer tested by [InBounds].
pub const DEFAULT_LON_FIELD: &str = "lon_lowestmode";
/// Default name of the latitude layer tested by [InBounds].
pub const DEFAULT_LAT_FIELD: &str = "lat_lowestmode";

/// Keeps shots whose position lies strictly inside a boundary region.
#[derive(Clone, Debug)]
pub struct InBounds {
    boundary: MultiPolygon<f64>,
    lon_field: String,
    lat_field: String,
}

impl InBounds {
    /// Returns a predicate testing the default longitude and latitude layers.
    pub fn new(boundary: MultiPolygon<f64>) -> Self {
        Self::with_fields(boundary, DEFAULT_LON_FIELD, DEFAULT_LAT_FIELD)
    }

    /// Returns a predicate testing the given longitude and latitude layers.
    pub fn with_fields(boundary: MultiPolygon<f64>, lon_field: &str, lat_field: &str) -> Self {
        Self {
            boundary,
            lon_field: lon_field.to_string(),
            lat_field: lat_field.to_string(),
        }
    }

    /// Names of the layers this predicate reads.
    pub fn fields(&self) -> [&str; 2] {
        [&self.lon_field, &self.lat_field]
    }
}

impl RowPredicate for InBounds {
    fn test(&self, row: &Row) -> Result<bool, PredicateError> {
        let lon = row.get_f64(&self.lon_field)?;
        let lat = row.get_f64(&self.lat_field)?;
        Ok(self.boundary.contains(&Point::new(lon, lat)))
    }
}

/// Parse a boundary region from a GeoJSON document.
///
/// Accepts a geometry, feature or feature collection. All polygons and multi-polygons found are
/// merged; other geometry types are ignored.
pub fn parse_boundary(text: &str) -> Result<MultiPolygon<f64>, ConfigError> {
    let geojson: GeoJson = text.parse()?;
    let collection = geojson::quick_collection(&geojson)?;
    let mut polygons = Vec::new();
    for geometry in collection {
        collect_polygons(geometry, &mut polygons);
    }
    if polygons.is_empty() {
        return Err(ConfigError::EmptyBoundary);
    }
    Ok(MultiPolygon::new(polygons))
}

fn collect_polygons(geometry: Geometry<f64>, polygons: &mut Vec<geo::Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(polygon) => polygons.push(polygon),
        Geometry::MultiPolygon(multi) => polygons.extend(multi),
        Geometry::GeometryCollection(collection) => {
            for geometry in collection {
                collect_polygons(geometry, polygons);
            }
        }
        _ => (),
    }
}

/// Read a boundary region from a GeoJSON file.
pub fn load_boundary(path: &Path) -> Result<MultiPolygon<f64>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_boundary(&text)
}
