// Relative cost per source entry of a dense (strided) marginalization step
pub const DENSE_MARGINALIZATION_COEF: f64 = 0.4;
// Relative cost per mapped entry of a marginalization step with a sparse side
pub const SPARSE_MARGINALIZATION_COEF: f64 = 1.0;
// Relative cost per domain index of an output message
pub const OUTPUT_COEF: f64 = 0.2;
// Relative cost per (entry, dimension) pair of the naive table scan
pub const NAIVE_COEF: f64 = 1.0;

/// Estimated cost of one way of updating a factor.
///
/// Sizes are counts of entries touched per update; memory counts the words held by auxiliary
/// tables and index mappings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Costs {
    dense_marginalization_size: f64,
    sparse_marginalization_size: f64,
    naive_marginalization_size: f64,
    output_size: f64,
    memory: f64,
}

impl Costs {
    // Cost of the naive update-all: every entry visits every dimension
    pub fn naive(entries: usize, domain_sizes: &[usize]) -> Self {
        let mut costs = Costs {
            naive_marginalization_size: (entries * domain_sizes.len()) as f64,
            ..Costs::default()
        };
        for size in domain_sizes.iter() {
            costs.add_output(*size);
        }
        costs
    }

    pub fn add_dense_marginalization(&mut self, size: usize) {
        self.dense_marginalization_size += size as f64;
    }

    pub fn add_sparse_marginalization(&mut self, size: usize) {
        self.sparse_marginalization_size += size as f64;
    }

    pub fn add_output(&mut self, size: usize) {
        self.output_size += size as f64;
    }

    pub fn add_memory(&mut self, words: usize) {
        self.memory += words as f64;
    }

    pub fn dense_marginalization_size(&self) -> f64 {
        self.dense_marginalization_size
    }

    pub fn sparse_marginalization_size(&self) -> f64 {
        self.sparse_marginalization_size
    }

    pub fn output_size(&self) -> f64 {
        self.output_size
    }

    pub fn memory(&self) -> f64 {
        self.memory
    }

    pub fn execution_time(&self) -> f64 {
        DENSE_MARGINALIZATION_COEF * self.dense_marginalization_size
            + SPARSE_MARGINALIZATION_COEF * self.sparse_marginalization_size
            + NAIVE_COEF * self.naive_marginalization_size
            + OUTPUT_COEF * self.output_size
    }

    pub fn weighted(&self, execution_time_scaling: f64, memory_scaling: f64) -> f64 {
        execution_time_scaling * self.execution_time() + memory_scaling * self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_costs() {
        let costs = Costs::naive(10, &[2, 3]);
        assert!((costs.execution_time() - (20. + 0.2 * 5.)).abs() < 1e-12);
        assert_eq!(costs.memory(), 0.);
    }

    #[test]
    fn weighted_combines_time_and_memory() {
        let mut costs = Costs::default();
        costs.add_dense_marginalization(10);
        costs.add_sparse_marginalization(3);
        costs.add_output(5);
        costs.add_memory(7);
        let time = 0.4 * 10. + 3. + 0.2 * 5.;
        assert!((costs.execution_time() - time).abs() < 1e-12);
        assert!((costs.weighted(2., 0.5) - (2. * time + 3.5)).abs() < 1e-12);
    }
}
