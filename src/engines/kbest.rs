use std::collections::HashMap;

use log::debug;

use crate::{
    engines::table_factor_engine::FactorMarginalizer,
    message::discrete_message::k_best_indices,
    tables::{dense_table::compute_strides, sparse_table::SparseTable},
};

// Tables up to this many joint indices are looked up densely, larger ones through a hash map
const MAX_DENSE_LOOKUP: usize = 1 << 20;

enum WeightLookup {
    Dense(Vec<f64>),
    Hashed(HashMap<usize, f64>),
}

impl WeightLookup {
    fn weight(&self, joint: usize) -> f64 {
        match self {
            WeightLookup::Dense(values) => values[joint],
            WeightLookup::Hashed(values) => values.get(&joint).copied().unwrap_or(0.),
        }
    }
}

// Approximate marginalizer that only considers the `k` most likely values of every input
// dimension whose domain is larger than `k`
pub struct KBestMarginalizer {
    k: usize,
    dims: Vec<usize>,
    strides: Vec<usize>,
    lookup: WeightLookup,
    outputs: Vec<Vec<f64>>,
}

impl KBestMarginalizer {
    pub fn new(table: &SparseTable, k: usize) -> Self {
        let dims = table.dims().to_vec();
        let strides = compute_strides(&dims);
        let dense_size = dims
            .iter()
            .try_fold(1usize, |product, size| product.checked_mul(*size));
        let joint_of = |indices: &[usize]| -> usize {
            indices
                .iter()
                .zip(strides.iter())
                .map(|(index, stride)| index * stride)
                .sum()
        };

        let lookup = match dense_size {
            Some(size) if size <= MAX_DENSE_LOOKUP => {
                let mut values = vec![0.; size];
                for (indices, weight) in table.iter() {
                    values[joint_of(indices)] = weight;
                }
                WeightLookup::Dense(values)
            }
            _ => WeightLookup::Hashed(
                table
                    .iter()
                    .filter(|(_, weight)| *weight != 0.)
                    .map(|(indices, weight)| (joint_of(indices), weight))
                    .collect(),
            ),
        };
        debug!(
            "K-best marginalizer with k = {} over dimensions {:?} ({} lookup)",
            k,
            dims,
            match lookup {
                WeightLookup::Dense(_) => "dense",
                WeightLookup::Hashed(_) => "hashed",
            }
        );

        KBestMarginalizer {
            k,
            outputs: dims.iter().map(|size| vec![0.; *size]).collect(),
            dims,
            strides,
            lookup,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl FactorMarginalizer for KBestMarginalizer {
    fn marginalize_edge(&mut self, output: usize, incoming: &[&[f64]]) -> &[f64] {
        // Kept indices of every other dimension; the output dimension is summed over completely
        let mut kept: Vec<Vec<usize>> = Vec::with_capacity(self.dims.len() - 1);
        let mut kept_strides = Vec::with_capacity(self.dims.len() - 1);
        let mut kept_messages = Vec::with_capacity(self.dims.len() - 1);
        for dim in (0..self.dims.len()).filter(|dim| *dim != output) {
            kept.push(k_best_indices(incoming[dim], self.k));
            kept_strides.push(self.strides[dim]);
            kept_messages.push(incoming[dim]);
        }

        let accumulator = &mut self.outputs[output];
        accumulator.fill(0.);
        let output_stride = self.strides[output];
        let lookup = &self.lookup;
        let mut accumulate = |joint: usize, product: f64| {
            if product == 0. {
                return;
            }
            for (value, target) in accumulator.iter_mut().enumerate() {
                *target += product * lookup.weight(joint + value * output_stride);
            }
        };

        let mut labeling = vec![0; kept.len()];
        let mut joint: usize = kept
            .iter()
            .zip(kept_strides.iter())
            .map(|(indices, stride)| indices[0] * stride)
            .sum();
        let product_of = |labeling: &[usize]| -> f64 {
            labeling
                .iter()
                .zip(kept.iter())
                .zip(kept_messages.iter())
                .map(|((label, indices), message)| message[indices[*label]])
                .product()
        };
        accumulate(joint, product_of(&labeling));

        let mut i = 0;
        while i < labeling.len() {
            if labeling[i] + 1 < kept[i].len() {
                // "Advance" to next kept index
                joint -= kept[i][labeling[i]] * kept_strides[i];
                labeling[i] += 1;
                joint += kept[i][labeling[i]] * kept_strides[i];
                accumulate(joint, product_of(&labeling));
                i = 0;
            } else {
                // "Carry over" to first kept index
                joint -= kept[i][labeling[i]] * kept_strides[i];
                labeling[i] = 0;
                joint += kept[i][0] * kept_strides[i];
                i += 1;
            }
        }
        &self.outputs[output]
    }

    fn marginalize_all(&mut self, incoming: &[&[f64]]) -> &[Vec<f64>] {
        for output in 0..self.dims.len() {
            self.marginalize_edge(output, incoming);
        }
        &self.outputs
    }
}
