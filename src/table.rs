//! Column-oriented result tables.

use ndarray::{concatenate, Array1, ArrayView1, Axis};

use crate::types::Value;

/// A table of named, equal-length columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultTable {
    names: Vec<String>,
    columns: Vec<Array1<Value>>,
}

impl ResultTable {
    /// Returns a table with the given column names and no rows.
    pub fn empty(names: Vec<String>) -> Self {
        let columns = names.iter().map(|_| Array1::from_vec(Vec::new())).collect();
        Self { names, columns }
    }

    /// Returns a table from columns.
    ///
    /// # Panics
    ///
    /// If the number of names and columns differ or the columns differ in length.
    pub fn new(names: Vec<String>, columns: Vec<Array1<Value>>) -> Self {
        assert_eq!(names.len(), columns.len(), "one name per column");
        if let Some(first) = columns.first() {
            assert!(
                columns.iter().all(|column| column.len() == first.len()),
                "columns must have equal length"
            );
        }
        Self { names, columns }
    }

    /// Concatenate tables with identical column names, in order.
    ///
    /// Returns an empty table with `names` if `tables` is empty.
    pub fn concat(names: Vec<String>, tables: Vec<ResultTable>) -> Self {
        if tables.is_empty() {
            return Self::empty(names);
        }
        debug_assert!(tables.iter().all(|table| table.names == names));
        let columns = (0..names.len())
            .map(|index| {
                let views: Vec<ArrayView1<Value>> = tables
                    .iter()
                    .map(|table| table.columns[index].view())
                    .collect();
                // Every view is 1-D so concatenation along axis 0 cannot fail.
                concatenate(Axis(0), &views).unwrap_or_else(|_| Array1::from_vec(Vec::new()))
            })
            .collect();
        Self { names, columns }
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |column| column.len())
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Array1<Value>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|index| &self.columns[index])
    }

    /// Values of row `index` in column order.
    pub fn row(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(move |column| &column[index])
    }
}
