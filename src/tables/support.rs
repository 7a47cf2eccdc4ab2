use bitvec::{order::LocalBits, vec::BitVec};

use super::{dense_table::compute_strides, table_wrapper::TableWrapper};

// Largest dense size for which projections are deduplicated with an occupancy bitmap
const MAX_BITMAP_SIZE: usize = 1 << 24;

// Set of joint indices with non-zero weight over `dims` (row-major), kept sorted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Support {
    dims: Vec<usize>,
    strides: Vec<usize>,
    joint_indices: Vec<usize>,
}

impl Support {
    pub fn of_table(table: &TableWrapper) -> Self {
        Support::from_sorted(
            table.dims().to_vec(),
            table
                .support_entries()
                .into_iter()
                .map(|(joint, _)| joint)
                .collect(),
        )
    }

    fn from_sorted(dims: Vec<usize>, joint_indices: Vec<usize>) -> Self {
        Support {
            strides: compute_strides(&dims),
            dims,
            joint_indices,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn joint_indices(&self) -> &[usize] {
        &self.joint_indices
    }

    pub fn len(&self) -> usize {
        self.joint_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joint_indices.is_empty()
    }

    pub fn dense_size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn density(&self) -> f64 {
        self.len() as f64 / self.dense_size() as f64
    }

    // Maps a joint index of this support to the joint index obtained by dropping the dimension
    // at `position`
    pub fn project_index(&self, joint: usize, position: usize) -> usize {
        let stride = self.strides[position];
        let block = stride * self.dims[position];
        (joint / block) * stride + joint % stride
    }

    // Index along the dimension at `position` of a joint index of this support
    pub fn index_along(&self, joint: usize, position: usize) -> usize {
        (joint / self.strides[position]) % self.dims[position]
    }

    // Position of a joint index within the support
    pub fn position_of(&self, joint: usize) -> Option<usize> {
        self.joint_indices.binary_search(&joint).ok()
    }

    // Returns the support of the table obtained by summing out the dimension at `position`
    pub fn project(&self, position: usize) -> Support {
        let mut dims = self.dims.clone();
        dims.remove(position);
        let dense_size: usize = dims.iter().product();

        let joint_indices = if dense_size <= MAX_BITMAP_SIZE {
            let mut occupied = BitVec::<usize, LocalBits>::repeat(false, dense_size);
            for joint in self.joint_indices.iter() {
                occupied.set(self.project_index(*joint, position), true);
            }
            occupied.iter_ones().collect()
        } else {
            let mut projected: Vec<usize> = self
                .joint_indices
                .iter()
                .map(|joint| self.project_index(*joint, position))
                .collect();
            projected.sort_unstable();
            projected.dedup();
            projected
        };

        Support::from_sorted(dims, joint_indices)
    }
}
