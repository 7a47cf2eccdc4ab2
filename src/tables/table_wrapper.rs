use ndarray::ArrayD;
use thiserror::Error;

use super::{
    dense_table::{compute_strides, DenseTable},
    sparse_table::SparseTable,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("table has no dimensions")]
    NoDimensions,

    #[error("dimension {dim} has size zero")]
    EmptyDimension { dim: usize },

    #[error("joint table size overflows usize")]
    SizeOverflow,

    #[error("expected {expected} values, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("entry {entry} has invalid weight {weight}")]
    InvalidWeight { entry: usize, weight: f64 },

    #[error("entry {entry}: index {index} along dimension {dim} is out of range 0..{size}")]
    IndexOutOfRange {
        entry: usize,
        dim: usize,
        index: usize,
        size: usize,
    },

    #[error("entry {entry} repeats an earlier index tuple")]
    DuplicateEntry { entry: usize },

    #[error("entry {entry} has {actual} indices, expected {expected}")]
    ArityMismatch {
        entry: usize,
        expected: usize,
        actual: usize,
    },

    #[error("table dimensions {actual:?} don't match neighbor domain sizes {expected:?}")]
    DomainMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

// Storage chosen for a table (the factor's own table or an auxiliary table of an update plan)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableRepresentation {
    Sparse,
    Dense,
}

/// Weight table of a factor, in whichever encoding the caller supplied.
///
/// Both encodings describe the same function from joint indices to non-negative weights:
/// a sparse table assigns weight zero to every index tuple it doesn't list.
#[derive(Clone, Debug, PartialEq)]
pub enum TableWrapper {
    Sparse(SparseTable),
    Dense(DenseTable),
}

impl TableWrapper {
    pub fn sparse(dims: Vec<usize>, entries: Vec<(Vec<usize>, f64)>) -> Result<Self, TableError> {
        Ok(TableWrapper::Sparse(SparseTable::new(dims, entries)?))
    }

    pub fn dense(dims: Vec<usize>, values: Vec<f64>) -> Result<Self, TableError> {
        Ok(TableWrapper::Dense(DenseTable::new(dims, values)?))
    }

    pub fn from_array(array: &ArrayD<f64>) -> Result<Self, TableError> {
        Ok(TableWrapper::Dense(DenseTable::from_array(array)?))
    }

    pub fn representation(&self) -> TableRepresentation {
        match self {
            TableWrapper::Sparse(_) => TableRepresentation::Sparse,
            TableWrapper::Dense(_) => TableRepresentation::Dense,
        }
    }

    pub fn dims(&self) -> &[usize] {
        match self {
            TableWrapper::Sparse(table) => table.dims(),
            TableWrapper::Dense(table) => table.dims(),
        }
    }

    pub fn arity(&self) -> usize {
        self.dims().len()
    }

    // Number of joint indices (validated tables never overflow)
    pub fn dense_size(&self) -> usize {
        self.dims().iter().product()
    }

    pub fn nnz(&self) -> usize {
        match self {
            TableWrapper::Sparse(table) => table.nnz(),
            TableWrapper::Dense(table) => table.nnz(),
        }
    }

    // Fraction of joint indices with non-zero weight
    pub fn density(&self) -> f64 {
        self.nnz() as f64 / self.dense_size() as f64
    }

    pub fn weight(&self, indices: &[usize]) -> f64 {
        match self {
            TableWrapper::Sparse(table) => table.weight(indices),
            TableWrapper::Dense(table) => table.weight(indices),
        }
    }

    // Lists the non-zero entries
    pub fn to_sparse(&self) -> SparseTable {
        match self {
            TableWrapper::Sparse(table) => table.without_zeros(),
            TableWrapper::Dense(table) => table.to_sparse(),
        }
    }

    pub fn to_dense(&self) -> DenseTable {
        match self {
            TableWrapper::Sparse(table) => table.to_dense(),
            TableWrapper::Dense(table) => table.clone(),
        }
    }

    pub fn to_array(&self) -> ArrayD<f64> {
        self.to_dense().to_array()
    }

    // Returns (joint index, weight) for every non-zero entry, sorted by joint index
    pub fn support_entries(&self) -> Vec<(usize, f64)> {
        match self {
            TableWrapper::Dense(table) => table
                .values()
                .iter()
                .enumerate()
                .filter(|(_, weight)| **weight != 0.)
                .map(|(joint, weight)| (joint, *weight))
                .collect(),
            TableWrapper::Sparse(table) => {
                let strides = compute_strides(table.dims());
                let mut entries: Vec<(usize, f64)> = table
                    .iter()
                    .filter(|(_, weight)| *weight != 0.)
                    .map(|(indices, weight)| {
                        let joint = indices
                            .iter()
                            .zip(strides.iter())
                            .map(|(index, stride)| index * stride)
                            .sum();
                        (joint, weight)
                    })
                    .collect();
                entries.sort_unstable_by_key(|(joint, _)| *joint);
                entries
            }
        }
    }

    // Checks that the table spans exactly the given neighbor domains
    pub fn validate_against(&self, domain_sizes: &[usize]) -> Result<(), TableError> {
        if self.dims() != domain_sizes {
            return Err(TableError::DomainMismatch {
                expected: domain_sizes.to_vec(),
                actual: self.dims().to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sparse_example() -> TableWrapper {
        TableWrapper::sparse(
            vec![2, 3],
            vec![(vec![1, 2], 4.), (vec![0, 1], 1.), (vec![1, 0], 0.)],
        )
        .unwrap()
    }

    #[test]
    fn statistics() {
        let table = sparse_example();
        assert_eq!(table.dense_size(), 6);
        assert_eq!(table.nnz(), 2);
        assert!((table.density() - 1. / 3.).abs() < 1e-12);
        assert_eq!(table.representation(), TableRepresentation::Sparse);
    }

    #[test]
    fn support_entries_are_sorted_and_non_zero() {
        let table = sparse_example();
        assert_eq!(table.support_entries(), vec![(1, 1.), (5, 4.)]);

        let dense = TableWrapper::Dense(table.to_dense());
        assert_eq!(dense.support_entries(), table.support_entries());
    }

    #[test]
    fn encodings_agree() {
        let sparse = sparse_example();
        let dense = TableWrapper::Dense(sparse.to_dense());
        for a in 0..2 {
            for b in 0..3 {
                assert_eq!(sparse.weight(&[a, b]), dense.weight(&[a, b]));
            }
        }
        assert_eq!(dense.to_sparse(), sparse.to_sparse());
    }

    #[test]
    fn domain_mismatch_is_reported() {
        let table = sparse_example();
        assert!(table.validate_against(&[2, 3]).is_ok());
        assert_eq!(
            table.validate_against(&[3, 2]),
            Err(TableError::DomainMismatch {
                expected: vec![3, 2],
                actual: vec![2, 3]
            })
        );
    }
}
