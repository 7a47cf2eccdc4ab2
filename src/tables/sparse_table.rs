use std::collections::HashSet;

use super::{
    dense_table::{checked_dense_size, compute_strides, DenseTable},
    table_wrapper::TableError,
};

// Stores the listed entries of a factor table as index tuples (flattened, `arity` indices per
// entry) with one weight per entry; joint indices that are not listed have weight zero
#[derive(Clone, Debug, PartialEq)]
pub struct SparseTable {
    dims: Vec<usize>,
    indices: Vec<usize>,
    weights: Vec<f64>,
}

impl SparseTable {
    pub fn new(dims: Vec<usize>, entries: Vec<(Vec<usize>, f64)>) -> Result<Self, TableError> {
        let mut indices = Vec::with_capacity(entries.len() * dims.len());
        let mut weights = Vec::with_capacity(entries.len());
        for (entry, (entry_indices, weight)) in entries.into_iter().enumerate() {
            if entry_indices.len() != dims.len() {
                return Err(TableError::ArityMismatch {
                    entry,
                    expected: dims.len(),
                    actual: entry_indices.len(),
                });
            }
            indices.extend(entry_indices);
            weights.push(weight);
        }
        SparseTable::from_parts(dims, indices, weights)
    }

    // Creates a sparse table from flattened index tuples and weights, validating every entry
    pub fn from_parts(
        dims: Vec<usize>,
        indices: Vec<usize>,
        weights: Vec<f64>,
    ) -> Result<Self, TableError> {
        if dims.is_empty() {
            return Err(TableError::NoDimensions);
        }
        if let Some(dim) = dims.iter().position(|size| *size == 0) {
            return Err(TableError::EmptyDimension { dim });
        }
        checked_dense_size(&dims).ok_or(TableError::SizeOverflow)?;
        if indices.len() != weights.len() * dims.len() {
            return Err(TableError::LengthMismatch {
                expected: weights.len() * dims.len(),
                actual: indices.len(),
            });
        }

        let table = SparseTable::from_validated_parts(dims, indices, weights);
        let strides = compute_strides(&table.dims);
        let mut seen = HashSet::with_capacity(table.len());
        for entry in 0..table.len() {
            let (entry_indices, weight) = table.entry(entry);
            if let Some(dim) = entry_indices
                .iter()
                .zip(table.dims.iter())
                .position(|(index, size)| index >= size)
            {
                return Err(TableError::IndexOutOfRange {
                    entry,
                    dim,
                    index: entry_indices[dim],
                    size: table.dims[dim],
                });
            }
            if !(weight.is_finite() && weight >= 0.) {
                return Err(TableError::InvalidWeight { entry, weight });
            }
            let joint: usize = entry_indices
                .iter()
                .zip(strides.iter())
                .map(|(index, stride)| index * stride)
                .sum();
            if !seen.insert(joint) {
                return Err(TableError::DuplicateEntry { entry });
            }
        }
        Ok(table)
    }

    // Skips validation; callers guarantee that the parts describe a valid table
    pub(crate) fn from_validated_parts(
        dims: Vec<usize>,
        indices: Vec<usize>,
        weights: Vec<f64>,
    ) -> Self {
        SparseTable {
            dims,
            indices,
            weights,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn arity(&self) -> usize {
        self.dims.len()
    }

    // Returns the number of listed entries
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn indices(&self, entry: usize) -> &[usize] {
        let arity = self.dims.len();
        &self.indices[entry * arity..(entry + 1) * arity]
    }

    pub fn entry(&self, entry: usize) -> (&[usize], f64) {
        (self.indices(entry), self.weights[entry])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[usize], f64)> + '_ {
        self.indices
            .chunks_exact(self.dims.len())
            .zip(self.weights.iter().copied())
    }

    // Counts entries with non-zero weight
    pub fn nnz(&self) -> usize {
        self.weights.iter().filter(|w| **w != 0.).count()
    }

    // Returns the same entries with the given weights (used for beliefs over a table's entries)
    pub fn with_weights(&self, weights: Vec<f64>) -> SparseTable {
        debug_assert_eq!(weights.len(), self.weights.len());
        SparseTable {
            dims: self.dims.clone(),
            indices: self.indices.clone(),
            weights,
        }
    }

    // Drops entries whose weight is zero and lists the rest in joint index (row-major) order,
    // the order `DenseTable::to_sparse` produces
    pub fn without_zeros(&self) -> SparseTable {
        let mut order: Vec<usize> = (0..self.len())
            .filter(|entry| self.weights[*entry] != 0.)
            .collect();
        order.sort_unstable_by(|a, b| self.indices(*a).cmp(self.indices(*b)));

        let mut indices = Vec::with_capacity(order.len() * self.arity());
        let mut weights = Vec::with_capacity(order.len());
        for entry in order {
            indices.extend_from_slice(self.indices(entry));
            weights.push(self.weights[entry]);
        }
        SparseTable::from_validated_parts(self.dims.clone(), indices, weights)
    }

    // Looks up the weight of an index tuple (linear scan)
    pub fn weight(&self, indices: &[usize]) -> f64 {
        self.iter()
            .find(|(entry_indices, _)| *entry_indices == indices)
            .map_or(0., |(_, weight)| weight)
    }

    pub fn to_dense(&self) -> DenseTable {
        let strides = compute_strides(&self.dims);
        let size = self.dims.iter().product();
        let mut values = vec![0.; size];
        for (entry_indices, weight) in self.iter() {
            let joint: usize = entry_indices
                .iter()
                .zip(strides.iter())
                .map(|(index, stride)| index * stride)
                .sum();
            values[joint] = weight;
        }
        match DenseTable::new(self.dims.clone(), values) {
            Ok(table) => table,
            // validated sparse tables always convert
            Err(_) => unreachable!("sparse table with invalid dimensions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> SparseTable {
        SparseTable::new(
            vec![2, 3],
            vec![(vec![0, 2], 1.5), (vec![1, 0], 2.), (vec![1, 1], 0.)],
        )
        .unwrap()
    }

    #[test]
    fn entries_are_addressable() {
        let table = example();
        assert_eq!(table.len(), 3);
        assert_eq!(table.nnz(), 2);
        assert_eq!(table.entry(1), (&[1, 0][..], 2.));
        assert_eq!(table.weight(&[0, 2]), 1.5);
        assert_eq!(table.weight(&[0, 0]), 0.);
    }

    #[test]
    fn dense_conversion_agrees_on_every_index() {
        let table = example();
        let dense = table.to_dense();
        for a in 0..2 {
            for b in 0..3 {
                assert_eq!(dense.weight(&[a, b]), table.weight(&[a, b]));
            }
        }
        assert_eq!(dense.to_sparse(), table.without_zeros());
    }

    #[test]
    fn dropping_zeros_orders_entries_by_joint_index() {
        let table = SparseTable::new(
            vec![2, 3],
            vec![(vec![1, 2], 4.), (vec![0, 1], 1.), (vec![1, 0], 0.), (vec![0, 2], 3.)],
        )
        .unwrap();
        let compact = table.without_zeros();
        assert_eq!(compact.len(), 3);
        assert_eq!(compact.entry(0), (&[0, 1][..], 1.));
        assert_eq!(compact.entry(1), (&[0, 2][..], 3.));
        assert_eq!(compact.entry(2), (&[1, 2][..], 4.));
        assert_eq!(table.to_dense().to_sparse(), compact);
    }

    #[test]
    fn rejects_duplicates() {
        let result = SparseTable::new(vec![2], vec![(vec![1], 1.), (vec![1], 2.)]);
        assert_eq!(result, Err(TableError::DuplicateEntry { entry: 1 }));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let result = SparseTable::new(vec![2, 2], vec![(vec![0, 2], 1.)]);
        assert_eq!(
            result,
            Err(TableError::IndexOutOfRange {
                entry: 0,
                dim: 1,
                index: 2,
                size: 2
            })
        );
    }

    #[test]
    fn rejects_wrong_arity() {
        let result = SparseTable::new(vec![2, 2], vec![(vec![0], 1.)]);
        assert!(matches!(result, Err(TableError::ArityMismatch { .. })));
    }
}
