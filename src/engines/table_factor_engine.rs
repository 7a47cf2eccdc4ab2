use crate::tables::sparse_table::SparseTable;

// Computes unnormalized factor-to-variable messages from incoming variable-to-factor messages
pub trait FactorMarginalizer: Send {
    // Message to the neighbor at `output`, ignoring the incoming message on that edge
    fn marginalize_edge(&mut self, output: usize, incoming: &[&[f64]]) -> &[f64];

    // Messages to every neighbor, indexed by position
    fn marginalize_all(&mut self, incoming: &[&[f64]]) -> &[Vec<f64>];
}

// Naive sum-product over the non-zero entries of a factor table
pub struct TableMarginalizer {
    table: SparseTable,
    prefix: Vec<f64>, // per entry and dimension: product of incoming weights at earlier dimensions
    outputs: Vec<Vec<f64>>,
}

impl TableMarginalizer {
    // Creates a marginalizer over the listed entries (zero-weight entries are dropped)
    pub fn new(table: &SparseTable) -> Self {
        let table = table.without_zeros();
        TableMarginalizer {
            prefix: Vec::new(),
            outputs: table.dims().iter().map(|size| vec![0.; *size]).collect(),
            table,
        }
    }

    pub fn table(&self) -> &SparseTable {
        &self.table
    }

    // Unnormalized belief over the table's entries: weight times every incoming message
    pub fn entry_beliefs(&self, incoming: &[&[f64]]) -> Vec<f64> {
        self.table
            .iter()
            .map(|(indices, weight)| {
                indices
                    .iter()
                    .zip(incoming.iter())
                    .fold(weight, |product, (index, message)| product * message[*index])
            })
            .collect()
    }
}

impl FactorMarginalizer for TableMarginalizer {
    fn marginalize_edge(&mut self, output: usize, incoming: &[&[f64]]) -> &[f64] {
        let accumulator = &mut self.outputs[output];
        accumulator.fill(0.);
        for (indices, weight) in self.table.iter() {
            let mut product = weight;
            for (dim, (index, message)) in indices.iter().zip(incoming.iter()).enumerate() {
                if dim != output {
                    product *= message[*index];
                }
            }
            accumulator[indices[output]] += product;
        }
        &self.outputs[output]
    }

    // Every output in one pass over the entries: the cached prefix product of the dimensions
    // before d times a running suffix product of the dimensions after d
    fn marginalize_all(&mut self, incoming: &[&[f64]]) -> &[Vec<f64>] {
        let arity = self.table.arity();
        self.prefix.resize(self.table.len() * arity, 0.);
        for accumulator in self.outputs.iter_mut() {
            accumulator.fill(0.);
        }

        for (entry, (indices, weight)) in self.table.iter().enumerate() {
            let prefix = &mut self.prefix[entry * arity..(entry + 1) * arity];
            let mut product = 1.;
            for dim in 0..arity {
                prefix[dim] = product;
                product *= incoming[dim][indices[dim]];
            }

            let mut suffix = weight;
            for dim in (0..arity).rev() {
                self.outputs[dim][indices[dim]] += prefix[dim] * suffix;
                suffix *= incoming[dim][indices[dim]];
            }
        }
        &self.outputs
    }
}
