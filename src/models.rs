//! Subset configuration and its validated, immutable form.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;
use crate::predicate::RowPredicate;
use crate::types::DValue;

/// Layers kept from each GEDI L2A shot by default.
pub const DEFAULT_LAYERS: [&str; 13] = [
    "beam",
    "channel",
    "lat_lowestmode",
    "lon_lowestmode",
    "elev_lowestmode",
    "delta_time",
    "rh",
    "land_cover_data/landsat_water_persistence",
    "land_cover_data/landsat_treecover",
    "land_cover_data/region_class",
    "land_cover_data/urban_proportion",
    "land_cover_data/urban_focal_window_size",
    "shot_number",
];

/// Default downsampling factor.
pub const DEFAULT_STRIDE: usize = 10;

fn default_stride() -> usize {
    DEFAULT_STRIDE
}

/// Subset configuration as supplied by the user
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_subset_config"))]
pub struct SubsetConfig {
    /// Layers to keep, in output column order
    #[validate(length(min = 1, message = "layers must not be empty"))]
    pub layers: Vec<String>,
    /// Flag layers mapped to the value a shot must have to be kept
    #[serde(default)]
    pub flags: BTreeMap<String, DValue>,
    /// Keep every `stride`-th shot
    #[serde(default = "default_stride")]
    #[validate(range(min = 1, message = "stride must be greater than 0"))]
    pub stride: usize,
    /// Beams to subset. All beams if not specified
    #[serde(default)]
    pub beams: Option<Vec<String>>,
}

impl Default for SubsetConfig {
    /// Shots with good quality, no degrade and no elevation bias, downsampled by 10.
    fn default() -> Self {
        Self {
            layers: DEFAULT_LAYERS.iter().map(|s| s.to_string()).collect(),
            flags: BTreeMap::from([
                ("quality_flag".to_string(), 1.into()),
                ("degrade_flag".to_string(), 0.into()),
                ("elevation_bias_flag".to_string(), 0.into()),
            ]),
            stride: DEFAULT_STRIDE,
            beams: None,
        }
    }
}

/// Validate a subset configuration
fn validate_subset_config(config: &SubsetConfig) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for layer in &config.layers {
        if !seen.insert(layer.as_str()) {
            let mut error = ValidationError::new("Layers must be unique");
            error.add_param("layer".into(), layer);
            return Err(error);
        }
        if config.flags.contains_key(layer) {
            let mut error = ValidationError::new("A layer must not also be a flag");
            error.add_param("layer".into(), layer);
            return Err(error);
        }
    }
    Ok(())
}

/// Which beams of a granule to subset
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BeamSelection {
    /// Every group following the beam naming convention
    #[default]
    All,
    /// An explicit list of beams, in output order
    Named(Vec<String>),
}

impl From<Option<Vec<String>>> for BeamSelection {
    fn from(beams: Option<Vec<String>>) -> Self {
        beams.map_or(Self::All, Self::Named)
    }
}

/// Immutable description of the reduction applied to every beam.
///
/// Shared read-only between all workers.
#[derive(Clone)]
pub struct SubsetSpec {
    layers: Vec<String>,
    flags: BTreeMap<String, DValue>,
    stride: usize,
    predicate: Option<Arc<dyn RowPredicate>>,
}

impl SubsetSpec {
    /// Returns a new SubsetSpec after validating its parts.
    ///
    /// # Arguments
    ///
    /// * `layers`: Layers to keep, in output column order
    /// * `flags`: Flag layers mapped to required values
    /// * `stride`: Downsampling factor
    /// * `predicate`: Optional predicate applied to the remaining rows
    pub fn new(
        layers: Vec<String>,
        flags: BTreeMap<String, DValue>,
        stride: usize,
        predicate: Option<Arc<dyn RowPredicate>>,
    ) -> Result<Self, ConfigError> {
        let config = SubsetConfig {
            layers,
            flags,
            stride,
            beams: None,
        };
        Self::from_config(config, predicate).map(|(spec, _)| spec)
    }

    /// Validate a [SubsetConfig] and split it into a SubsetSpec and a [BeamSelection].
    pub fn from_config(
        config: SubsetConfig,
        predicate: Option<Arc<dyn RowPredicate>>,
    ) -> Result<(Self, BeamSelection), ConfigError> {
        config.validate()?;
        let spec = Self {
            layers: config.layers,
            flags: config.flags,
            stride: config.stride,
            predicate,
        };
        Ok((spec, config.beams.into()))
    }

    /// Layers kept in the output, in column order.
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Flag layers and their required values.
    pub fn flags(&self) -> &BTreeMap<String, DValue> {
        &self.flags
    }

    /// Downsampling factor.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Optional row predicate.
    pub fn predicate(&self) -> Option<&dyn RowPredicate> {
        self.predicate.as_deref()
    }
}

impl fmt::Debug for SubsetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsetSpec")
            .field("layers", &self.layers)
            .field("flags", &self.flags)
            .field("stride", &self.stride)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
