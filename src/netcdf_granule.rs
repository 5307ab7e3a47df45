//! HDF5 / netCDF-4 granules read directly from memory.
//!
//! The netCDF-C library opens HDF5 files, including granules which were not written through
//! netCDF, and `nc_open_mem` lets it do so from a byte buffer without touching disk.

use ndarray::Array1;

use netcdf::types::{BasicType, VariableType};
use netcdf::{Group, MemFile, Variable};

use crate::error::GranuleError;
use crate::granule::{Granule, GranuleParser};
use crate::types::Value;

/// Parses HDF5 / netCDF-4 granules with netCDF-C's in-memory driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetcdfGranuleParser;

impl GranuleParser for NetcdfGranuleParser {
    fn parse<'a>(&self, data: &'a [u8]) -> Result<Box<dyn Granule + 'a>, GranuleError> {
        let file = netcdf::open_mem(None, data)?;
        Ok(Box::new(NetcdfGranule { file }))
    }
}

/// A granule backed by a netCDF memory file borrowing the downloaded buffer.
pub struct NetcdfGranule<'a> {
    file: MemFile<'a>,
}

/// Read a layer addressed by the remaining components of its slash-separated path.
fn read_layer(
    group: &Group,
    path: &[&str],
    beam: &str,
    layer: &str,
) -> Result<Array1<Value>, GranuleError> {
    let missing = || GranuleError::MissingLayer {
        beam: beam.to_string(),
        layer: layer.to_string(),
    };
    match path {
        [name] => {
            let variable = group.variable(name).ok_or_else(missing)?;
            read_column(&variable, beam, layer)
        }
        [name, rest @ ..] => {
            let subgroup = group.group(name).ok_or_else(missing)?;
            read_layer(&subgroup, rest, beam, layer)
        }
        [] => Err(missing()),
    }
}

impl Granule for NetcdfGranule<'_> {
    fn group_names(&self) -> Result<Vec<String>, GranuleError> {
        // HDF5 lists links in name order; do the same regardless of creation order.
        let mut names: Vec<String> = self.file.groups()?.map(|group| group.name()).collect();
        names.sort();
        Ok(names)
    }

    fn column(&self, beam: &str, layer: &str) -> Result<Array1<Value>, GranuleError> {
        let group = self
            .file
            .group(beam)?
            .ok_or_else(|| GranuleError::MissingBeam {
                beam: beam.to_string(),
            })?;
        let path: Vec<&str> = layer.split('/').collect();
        read_layer(&group, &path, beam, layer)
    }
}

/// Read a 1-D or 2-D variable into a column. 2-D variables produce one [Value::List] per row.
fn read_column(
    variable: &Variable,
    beam: &str,
    layer: &str,
) -> Result<Array1<Value>, GranuleError> {
    let unsupported = |reason: &str| GranuleError::UnsupportedLayer {
        beam: beam.to_string(),
        layer: layer.to_string(),
        reason: reason.to_string(),
    };
    let dims: Vec<usize> = variable.dimensions().iter().map(|d| d.len()).collect();
    let values: Vec<Value> = match (variable.vartype(), dims.as_slice()) {
        (VariableType::Basic(basic), [_]) => match basic {
            BasicType::Byte | BasicType::Short | BasicType::Int | BasicType::Int64 => variable
                .get_values::<i64, _>(..)?
                .into_iter()
                .map(Value::Int)
                .collect(),
            BasicType::Ubyte | BasicType::Ushort | BasicType::Uint | BasicType::Uint64 => {
                variable
                    .get_values::<u64, _>(..)?
                    .into_iter()
                    .map(Value::UInt)
                    .collect()
            }
            BasicType::Float | BasicType::Double => variable
                .get_values::<f64, _>(..)?
                .into_iter()
                .map(Value::Float)
                .collect(),
            BasicType::Char => return Err(unsupported("character arrays are not supported")),
        },
        (VariableType::Basic(BasicType::Char), [_, _]) => {
            return Err(unsupported("character arrays are not supported"))
        }
        (VariableType::Basic(_), [rows, width]) => {
            let flat = variable.get_values::<f64, _>(..)?;
            if *width == 0 {
                vec![Value::List(Vec::new()); *rows]
            } else {
                flat.chunks(*width)
                    .map(|row| Value::List(row.to_vec()))
                    .collect()
            }
        }
        (VariableType::String, [rows]) => (0..*rows)
            .map(|index| variable.get_string([index]).map(Value::Text))
            .collect::<Result<_, _>>()?,
        _ => return Err(unsupported("only 1-D and 2-D numeric or 1-D string layers are supported")),
    };
    Ok(Array1::from_vec(values))
}
