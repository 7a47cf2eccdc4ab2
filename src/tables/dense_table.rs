use ndarray::{ArrayD, Dimension, IxDyn};

use super::{sparse_table::SparseTable, table_wrapper::TableError};

// Computes row-major strides: the stride of a dimension is the product of the sizes of all
// dimensions after it
pub fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for index in (0..dims.len().saturating_sub(1)).rev() {
        strides[index] = strides[index + 1] * dims[index + 1];
    }
    strides
}

// Computes the number of joint indices, or None if it doesn't fit into usize
pub fn checked_dense_size(dims: &[usize]) -> Option<usize> {
    dims.iter()
        .try_fold(1usize, |product, size| product.checked_mul(*size))
}

// Stores one weight per joint index of the table's dimensions, in row-major order
#[derive(Clone, Debug, PartialEq)]
pub struct DenseTable {
    dims: Vec<usize>,
    strides: Vec<usize>,
    values: Vec<f64>,
}

impl DenseTable {
    pub fn new(dims: Vec<usize>, values: Vec<f64>) -> Result<Self, TableError> {
        if dims.is_empty() {
            return Err(TableError::NoDimensions);
        }
        if let Some(dim) = dims.iter().position(|size| *size == 0) {
            return Err(TableError::EmptyDimension { dim });
        }
        let expected = checked_dense_size(&dims).ok_or(TableError::SizeOverflow)?;
        if values.len() != expected {
            return Err(TableError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }
        if let Some(position) = values.iter().position(|w| !(w.is_finite() && *w >= 0.)) {
            return Err(TableError::InvalidWeight {
                entry: position,
                weight: values[position],
            });
        }

        Ok(DenseTable {
            strides: compute_strides(&dims),
            dims,
            values,
        })
    }

    // Creates a dense table from an n-dimensional array (dimension order = axis order)
    pub fn from_array(array: &ArrayD<f64>) -> Result<Self, TableError> {
        DenseTable::new(array.shape().to_vec(), array.iter().copied().collect())
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn joint_index(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .zip(self.strides.iter())
            .map(|(index, stride)| index * stride)
            .sum()
    }

    pub fn weight(&self, indices: &[usize]) -> f64 {
        self.values[self.joint_index(indices)]
    }

    // Counts entries with non-zero weight
    pub fn nnz(&self) -> usize {
        self.values.iter().filter(|w| **w != 0.).count()
    }

    // Converts to a sparse table that lists only the non-zero entries
    pub fn to_sparse(&self) -> SparseTable {
        let arity = self.dims.len();
        let mut indices = Vec::with_capacity(self.nnz() * arity);
        let mut weights = Vec::with_capacity(self.nnz());
        for (joint, weight) in self.values.iter().enumerate() {
            if *weight == 0. {
                continue;
            }
            let mut remainder = joint;
            for stride in self.strides.iter() {
                indices.push(remainder / stride);
                remainder %= stride;
            }
            weights.push(*weight);
        }
        SparseTable::from_validated_parts(self.dims.clone(), indices, weights)
    }

    pub fn to_array(&self) -> ArrayD<f64> {
        ArrayD::from_shape_fn(IxDyn(&self.dims), |index| {
            self.values[self.joint_index(index.slice())]
        })
    }
}
