//! Hierarchical granule containers.
//!
//! A granule is a read-only tree: beam groups at the top level, each holding layers addressed by
//! a slash-separated path such as `land_cover_data/landsat_treecover`. Every layer of a beam
//! holds one value per shot.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::GranuleError;
use crate::types::Value;

/// Prefix shared by the names of all beam groups in a granule.
pub const BEAM_GROUP_PREFIX: &str = "BEAM";

/// Returns whether a top-level group name follows the beam group naming convention.
pub fn is_beam_group(name: &str) -> bool {
    name.starts_with(BEAM_GROUP_PREFIX)
}

/// Read access to a parsed granule.
pub trait Granule {
    /// Names of all top-level groups, in container iteration order.
    ///
    /// This may include groups which are not beams, such as `METADATA`. Fails if the container
    /// cannot list its groups.
    fn group_names(&self) -> Result<Vec<String>, GranuleError>;

    /// Read one layer of a beam group as a column with one value per shot.
    ///
    /// # Arguments
    ///
    /// * `beam`: Name of the beam group
    /// * `layer`: Path of the layer within the beam group
    fn column(&self, beam: &str, layer: &str) -> Result<Array1<Value>, GranuleError>;
}

/// Parses an in-memory byte buffer into a [Granule].
///
/// The returned granule may borrow from `data`, so it cannot outlive the buffer.
pub trait GranuleParser: Send + Sync {
    fn parse<'a>(&self, data: &'a [u8]) -> Result<Box<dyn Granule + 'a>, GranuleError>;
}

/// A granule held entirely in memory.
///
/// Groups iterate in name order, matching the order in which HDF5 lists links by default.
/// Serialises as a JSON object of beam name to an object of layer path to an array of values.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MemoryGranule {
    groups: BTreeMap<String, HashMap<String, Vec<Value>>>,
}

impl MemoryGranule {
    /// Returns an empty granule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer to a beam group, creating the group if necessary.
    ///
    /// Returns the granule to allow chaining.
    pub fn with_layer<V: Into<Value>>(
        mut self,
        beam: &str,
        layer: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.insert_layer(beam, layer, values.into_iter().map(Into::into).collect());
        self
    }

    /// Add a layer to a beam group, replacing any existing layer with the same path.
    pub fn insert_layer(&mut self, beam: &str, layer: &str, values: Vec<Value>) {
        self.groups
            .entry(beam.to_string())
            .or_default()
            .insert(layer.to_string(), values);
    }
}

impl Granule for MemoryGranule {
    fn group_names(&self) -> Result<Vec<String>, GranuleError> {
        Ok(self.groups.keys().cloned().collect())
    }

    fn column(&self, beam: &str, layer: &str) -> Result<Array1<Value>, GranuleError> {
        let group = self
            .groups
            .get(beam)
            .ok_or_else(|| GranuleError::MissingBeam {
                beam: beam.to_string(),
            })?;
        let values = group.get(layer).ok_or_else(|| GranuleError::MissingLayer {
            beam: beam.to_string(),
            layer: layer.to_string(),
        })?;
        Ok(Array1::from_vec(values.clone()))
    }
}

/// Parses granules serialised as JSON [MemoryGranule] documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonGranuleParser;

impl GranuleParser for JsonGranuleParser {
    fn parse<'a>(&self, data: &'a [u8]) -> Result<Box<dyn Granule + 'a>, GranuleError> {
        let granule: MemoryGranule = serde_json::from_slice(data)?;
        Ok(Box::new(granule))
    }
}
