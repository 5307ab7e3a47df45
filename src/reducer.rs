//! Reduction of granule beams to result tables.

use ndarray::{Array1, ArrayView1, Axis, Slice};
use tracing::{debug, warn};

use crate::error::SubsetError;
use crate::granule::{is_beam_group, Granule};
use crate::models::{BeamSelection, SubsetSpec};
use crate::predicate::Row;
use crate::table::ResultTable;
use crate::types::{dvalue, Value};

/// Read a layer and check that it has the same number of shots as the layers read before it.
fn read_layer(
    granule: &dyn Granule,
    beam: &str,
    layer: &str,
    expected: &mut Option<usize>,
) -> Result<Array1<Value>, SubsetError> {
    let column = granule.column(beam, layer)?;
    match *expected {
        Some(expected) if expected != column.len() => Err(SubsetError::LengthMismatch {
            beam: beam.to_string(),
            layer: layer.to_string(),
            expected,
            actual: column.len(),
        }),
        Some(_) => Ok(column),
        None => {
            *expected = Some(column.len());
            Ok(column)
        }
    }
}

/// Reduce one beam of a granule to a table.
///
/// The beam is downsampled to every `stride`-th shot, filtered to shots matching every flag,
/// then filtered by the predicate if there is one. The output has one column per layer in
/// `spec`; flag layers are dropped.
///
/// Rows for which the predicate cannot be evaluated are dropped with a warning.
///
/// # Arguments
///
/// * `granule`: Granule containing the beam
/// * `beam`: Name of the beam group
/// * `spec`: Reduction to apply
#[tracing::instrument(level = "DEBUG", skip(granule, spec))]
pub fn reduce_beam(
    granule: &dyn Granule,
    beam: &str,
    spec: &SubsetSpec,
) -> Result<ResultTable, SubsetError> {
    let step = isize::try_from(spec.stride())?;
    let mut num_shots = None;
    let layers = spec
        .layers()
        .iter()
        .map(|layer| read_layer(granule, beam, layer, &mut num_shots))
        .collect::<Result<Vec<_>, _>>()?;
    let flags = spec
        .flags()
        .iter()
        .map(|(flag, required)| {
            read_layer(granule, beam, flag, &mut num_shots).map(|column| (required, column))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let downsample = Slice::new(0, None, step);
    let layers: Vec<ArrayView1<Value>> = layers
        .iter()
        .map(|column| column.slice_axis(Axis(0), downsample))
        .collect();
    let flags: Vec<(_, ArrayView1<Value>)> = flags
        .iter()
        .map(|(required, column)| (*required, column.slice_axis(Axis(0), downsample)))
        .collect();
    let num_rows = layers.first().map_or(0, |column| column.len());

    let mut keep: Vec<usize> = (0..num_rows)
        .filter(|&index| {
            flags
                .iter()
                .all(|(required, column)| dvalue::matches(required, &column[index]))
        })
        .collect();

    if let Some(predicate) = spec.predicate() {
        let mut dropped = 0_usize;
        let mut first_error = None;
        keep.retain(|&index| {
            let values = layers.iter().map(|column| &column[index]).collect();
            match predicate.test(&Row::new(spec.layers(), values)) {
                Ok(keep) => keep,
                Err(err) => {
                    dropped += 1;
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    false
                }
            }
        });
        if let Some(err) = first_error {
            warn!(beam, dropped, error = %err, "Dropped rows where the predicate could not be evaluated");
        }
    }

    debug!(
        beam,
        shots = num_shots.unwrap_or(0),
        rows = keep.len(),
        "Reduced beam"
    );
    let columns = layers
        .iter()
        .map(|column| column.select(Axis(0), &keep))
        .collect();
    Ok(ResultTable::new(spec.layers().to_vec(), columns))
}

/// Reduce the selected beams of a granule to one table.
///
/// Beam tables are concatenated in selection order. [BeamSelection::All] selects every beam
/// group in container order.
///
/// # Arguments
///
/// * `granule`: Granule to reduce
/// * `spec`: Reduction to apply to each beam
/// * `beams`: Beams to include
pub fn reduce_granule(
    granule: &dyn Granule,
    spec: &SubsetSpec,
    beams: &BeamSelection,
) -> Result<ResultTable, SubsetError> {
    let beams = match beams {
        BeamSelection::All => granule
            .group_names()?
            .into_iter()
            .filter(|name| is_beam_group(name))
            .collect(),
        BeamSelection::Named(beams) => beams.clone(),
    };
    let tables = beams
        .iter()
        .map(|beam| reduce_beam(granule, beam, spec))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResultTable::concat(spec.layers().to_vec(), tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GranuleError, PredicateError};
    use crate::granule::MemoryGranule;
    use crate::predicate::{InBounds, RowPredicate};
    use crate::test_utils;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn spec(stride: usize, flags: &[(&str, i64)]) -> SubsetSpec {
        SubsetSpec::new(
            vec!["shot_number".to_string()],
            flags
                .iter()
                .map(|(flag, value)| (flag.to_string(), (*value).into()))
                .collect::<BTreeMap<_, _>>(),
            stride,
            None,
        )
        .unwrap()
    }

    fn shot_numbers(table: &ResultTable) -> Vec<i64> {
        table
            .column("shot_number")
            .unwrap()
            .iter()
            .map(|value| match value {
                Value::Int(shot) => *shot,
                value => panic!("unexpected value {}", value),
            })
            .collect()
    }

    #[test]
    fn quality_at_stride_boundaries() {
        let quality = (0..20).map(|i| i64::from(i % 10 == 0));
        let granule = MemoryGranule::new()
            .with_layer("BEAM0000", "shot_number", 0_i64..20)
            .with_layer("BEAM0000", "quality_flag", quality);
        let table = reduce_beam(&granule, "BEAM0000", &spec(10, &[("quality_flag", 1)])).unwrap();
        assert_eq!(vec![0, 10], shot_numbers(&table));
        assert_eq!(["shot_number"], table.names());
    }

    #[test]
    fn downsample_keeps_multiples_of_stride() {
        let granule = MemoryGranule::new().with_layer("BEAM0000", "shot_number", 0_i64..23);
        let table = reduce_beam(&granule, "BEAM0000", &spec(5, &[])).unwrap();
        // ceil(23 / 5)
        assert_eq!(vec![0, 5, 10, 15, 20], shot_numbers(&table));
    }

    #[test]
    fn stride_longer_than_beam() {
        let granule = MemoryGranule::new().with_layer("BEAM0000", "shot_number", 0_i64..3);
        let table = reduce_beam(&granule, "BEAM0000", &spec(10, &[])).unwrap();
        assert_eq!(vec![0], shot_numbers(&table));
    }

    #[test]
    fn empty_beam() {
        let granule =
            MemoryGranule::new().with_layer("BEAM0000", "shot_number", Vec::<i64>::new());
        let table = reduce_beam(&granule, "BEAM0000", &spec(1, &[])).unwrap();
        assert!(table.is_empty());
        assert_eq!(["shot_number"], table.names());
    }

    #[test]
    fn flags_compare_numerically() {
        let granule = MemoryGranule::new()
            .with_layer("BEAM0000", "shot_number", 0_i64..4)
            .with_layer("BEAM0000", "quality_flag", [1_u64, 0, 1, 1])
            .with_layer("BEAM0000", "degrade_flag", [0.0, 0.0, 1.0, 0.0]);
        let table = reduce_beam(
            &granule,
            "BEAM0000",
            &spec(1, &[("quality_flag", 1), ("degrade_flag", 0)]),
        )
        .unwrap();
        assert_eq!(vec![0, 3], shot_numbers(&table));
        assert!(table.column("quality_flag").is_none());
        assert!(table.column("degrade_flag").is_none());
    }

    #[test]
    fn length_mismatch() {
        let granule = MemoryGranule::new()
            .with_layer("BEAM0000", "shot_number", 0_i64..20)
            .with_layer("BEAM0000", "quality_flag", [1_i64; 19]);
        match reduce_beam(&granule, "BEAM0000", &spec(1, &[("quality_flag", 1)])).unwrap_err() {
            SubsetError::LengthMismatch {
                beam,
                layer,
                expected,
                actual,
            } => {
                assert_eq!("BEAM0000", beam);
                assert_eq!("quality_flag", layer);
                assert_eq!(20, expected);
                assert_eq!(19, actual);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn missing_layer() {
        let granule = MemoryGranule::new().with_layer("BEAM0000", "shot_number", 0_i64..4);
        match reduce_beam(&granule, "BEAM0000", &spec(1, &[("quality_flag", 1)])).unwrap_err() {
            SubsetError::Granule(GranuleError::MissingLayer { beam: _, layer }) => {
                assert_eq!("quality_flag", layer)
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn predicate_filters_rows() {
        let granule = test_utils::get_test_granule();
        let predicate: Arc<dyn RowPredicate> =
            Arc::new(InBounds::new(test_utils::get_test_boundary()));
        let config = test_utils::get_test_subset_config();
        let (spec, _) = SubsetSpec::from_config(config, Some(predicate.clone())).unwrap();
        let table = reduce_beam(&granule, "BEAM0000", &spec).unwrap();
        assert!(!table.is_empty());
        let lon = table.column("lon_lowestmode").unwrap();
        let lat = table.column("lat_lowestmode").unwrap();
        for (lon, lat) in lon.iter().zip(lat.iter()) {
            let fields = spec.layers();
            let row = Row::new(fields, vec![lon, lat]);
            assert!(predicate.test(&row).unwrap());
        }
    }

    fn north_of_equator(row: &Row) -> Result<bool, PredicateError> {
        Ok(row.get_f64("lat_lowestmode")? > 0.0)
    }

    #[test]
    fn predicate_missing_field_drops_rows() {
        let granule = MemoryGranule::new()
            .with_layer("BEAM0000", "shot_number", 0_i64..4)
            .with_layer("BEAM0000", "lat_lowestmode", [1.0, -1.0, 1.0, 1.0]);
        // lat_lowestmode is not an output layer, so the predicate cannot see it.
        let spec = SubsetSpec::new(
            vec!["shot_number".to_string()],
            BTreeMap::new(),
            1,
            Some(Arc::new(north_of_equator)),
        )
        .unwrap();
        let table = reduce_beam(&granule, "BEAM0000", &spec).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn predicate_on_output_layer() {
        let granule = MemoryGranule::new()
            .with_layer("BEAM0000", "shot_number", 0_i64..4)
            .with_layer("BEAM0000", "lat_lowestmode", [1.0, -1.0, 1.0, 1.0]);
        let spec = SubsetSpec::new(
            vec!["shot_number".to_string(), "lat_lowestmode".to_string()],
            BTreeMap::new(),
            1,
            Some(Arc::new(north_of_equator)),
        )
        .unwrap();
        let table = reduce_beam(&granule, "BEAM0000", &spec).unwrap();
        assert_eq!(vec![0, 2, 3], shot_numbers(&table));
    }

    #[test]
    fn granule_concatenates_in_beam_order() {
        let granule = MemoryGranule::new()
            .with_layer("BEAM0000", "shot_number", 0_i64..3)
            .with_layer("BEAM0101", "shot_number", 100_i64..102)
            .with_layer("METADATA", "shot_number", [-1_i64]);
        let spec = spec(1, &[]);

        let all = reduce_granule(&granule, &spec, &BeamSelection::All).unwrap();
        assert_eq!(vec![0, 1, 2, 100, 101], shot_numbers(&all));

        let named = BeamSelection::Named(vec!["BEAM0101".to_string(), "BEAM0000".to_string()]);
        let table = reduce_granule(&granule, &spec, &named).unwrap();
        let b1 = reduce_beam(&granule, "BEAM0101", &spec).unwrap();
        let b2 = reduce_beam(&granule, "BEAM0000", &spec).unwrap();
        assert_eq!(
            ResultTable::concat(spec.layers().to_vec(), vec![b1, b2]),
            table
        );
        assert_eq!(vec![100, 101, 0, 1, 2], shot_numbers(&table));
    }

    #[test]
    fn granule_no_beams() {
        let granule = MemoryGranule::new().with_layer("METADATA", "shot_number", [1_i64]);
        let spec = spec(1, &[]);
        let table = reduce_granule(&granule, &spec, &BeamSelection::All).unwrap();
        assert_eq!(ResultTable::empty(spec.layers().to_vec()), table);
        let table = reduce_granule(&granule, &spec, &BeamSelection::Named(vec![])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn granule_missing_named_beam() {
        let granule = MemoryGranule::new().with_layer("BEAM0000", "shot_number", [1_i64]);
        let beams = BeamSelection::Named(vec!["BEAM0001".to_string()]);
        match reduce_granule(&granule, &spec(1, &[]), &beams).unwrap_err() {
            SubsetError::Granule(GranuleError::MissingBeam { beam }) => {
                assert_eq!("BEAM0001", beam)
            }
            err => panic!("unexpected error {}", err),
        }
    }

    /// A granule whose group listing fails.
    struct UnlistableGranule;

    impl Granule for UnlistableGranule {
        fn group_names(&self) -> Result<Vec<String>, GranuleError> {
            Err(GranuleError::Json(
                serde_json::from_str::<u32>("x").unwrap_err(),
            ))
        }

        fn column(&self, beam: &str, _layer: &str) -> Result<Array1<Value>, GranuleError> {
            Err(GranuleError::MissingBeam {
                beam: beam.to_string(),
            })
        }
    }

    #[test]
    fn granule_group_listing_failure() {
        match reduce_granule(&UnlistableGranule, &spec(1, &[]), &BeamSelection::All).unwrap_err()
        {
            SubsetError::Granule(GranuleError::Json(_)) => (),
            err => panic!("unexpected error {}", err),
        }
    }
}
