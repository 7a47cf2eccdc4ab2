use crate::tables::table_wrapper::TableRepresentation;

// Inner loop of a marginalization step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Kernel {
    // Dense source and destination: the source is viewed as [outer][dim_size][stride]
    Strided {
        outer: usize,
        dim_size: usize,
        stride: usize,
    },
    // Any step with a sparse side: one triple per visited source entry. `source_positions` is
    // None when every source position is visited in order.
    Mapped {
        source_positions: Option<Vec<usize>>,
        destination_positions: Vec<usize>,
        message_indices: Vec<usize>,
    },
}

impl Kernel {
    // Words held by the index mappings
    pub fn mapping_size(&self) -> usize {
        match self {
            Kernel::Strided { .. } => 0,
            Kernel::Mapped {
                source_positions,
                destination_positions,
                message_indices,
            } => {
                source_positions.as_ref().map_or(0, Vec::len)
                    + destination_positions.len()
                    + message_indices.len()
            }
        }
    }
}

// Table held in a plan slot. Slot 0 holds the factor's own weights.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxTable {
    pub dims: Vec<usize>, // factor dimensions still present, ascending
    pub representation: TableRepresentation,
    pub len: usize, // dense size, or support size when sparse
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanStep {
    // Sums the factor dimension `dim` out of `source` into `destination`, weighting by the
    // incoming message on the edge at position `dim`
    Marginalization {
        source: usize,
        destination: usize,
        dim: usize,
        source_representation: TableRepresentation,
        destination_representation: TableRepresentation,
        kernel: Kernel,
    },
    // Emits the one-dimensional table in `source` as the message to the edge at `edge`.
    // Sparse tables list the domain indices they hold in `scatter`.
    Output {
        source: usize,
        edge: usize,
        scatter: Option<Vec<usize>>,
    },
}

/// Compiled update-all of one factor.
///
/// Replaying the steps leaves the unnormalized message to every edge in `outputs`; the slots
/// hold intermediate tables private to this plan.
#[derive(Clone, Debug)]
pub struct UpdatePlan {
    tables: Vec<AuxTable>,
    steps: Vec<PlanStep>,
    buffers: Vec<Vec<f64>>,
    outputs: Vec<Vec<f64>>,
}

impl UpdatePlan {
    pub(crate) fn new(
        tables: Vec<AuxTable>,
        steps: Vec<PlanStep>,
        factor_values: Vec<f64>,
        domain_sizes: &[usize],
    ) -> Self {
        let mut buffers = Vec::with_capacity(tables.len());
        buffers.push(factor_values);
        buffers.extend(tables.iter().skip(1).map(|table| vec![0.; table.len]));
        UpdatePlan {
            tables,
            steps,
            buffers,
            outputs: domain_sizes.iter().map(|size| vec![0.; *size]).collect(),
        }
    }

    pub fn tables(&self) -> &[AuxTable] {
        &self.tables
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    // Number of auxiliary tables, excluding the factor's own table
    pub fn aux_table_count(&self) -> usize {
        self.tables.len() - 1
    }

    // Plans are equal in structure when they run the same steps over the same tables
    pub fn same_structure(&self, other: &UpdatePlan) -> bool {
        self.tables == other.tables && self.steps == other.steps
    }

    pub fn execute(&mut self, incoming: &[&[f64]]) -> &[Vec<f64>] {
        for step in self.steps.iter() {
            match step {
                PlanStep::Marginalization {
                    source,
                    destination,
                    dim,
                    kernel,
                    ..
                } => {
                    let (head, tail) = self.buffers.split_at_mut(*destination);
                    marginalize(kernel, &head[*source], &mut tail[0], incoming[*dim]);
                }
                PlanStep::Output {
                    source,
                    edge,
                    scatter,
                } => {
                    let output = &mut self.outputs[*edge];
                    let values = &self.buffers[*source];
                    match scatter {
                        None => output.copy_from_slice(values),
                        Some(domain_indices) => {
                            output.fill(0.);
                            for (value, index) in values.iter().zip(domain_indices.iter()) {
                                output[*index] = *value;
                            }
                        }
                    }
                }
            }
        }
        &self.outputs
    }
}

fn marginalize(kernel: &Kernel, source: &[f64], destination: &mut [f64], message: &[f64]) {
    destination.fill(0.);
    match kernel {
        Kernel::Strided {
            outer,
            dim_size,
            stride,
        } => {
            for o in 0..*outer {
                let destination = &mut destination[o * stride..(o + 1) * stride];
                for (k, weight) in message.iter().enumerate().take(*dim_size) {
                    let start = (o * dim_size + k) * stride;
                    for (target, value) in destination
                        .iter_mut()
                        .zip(source[start..start + stride].iter())
                    {
                        *target += value * weight;
                    }
                }
            }
        }
        Kernel::Mapped {
            source_positions,
            destination_positions,
            message_indices,
        } => match source_positions {
            None => {
                for ((value, position), index) in source
                    .iter()
                    .zip(destination_positions.iter())
                    .zip(message_indices.iter())
                {
                    destination[*position] += value * message[*index];
                }
            }
            Some(source_positions) => {
                for ((source_position, position), index) in source_positions
                    .iter()
                    .zip(destination_positions.iter())
                    .zip(message_indices.iter())
                {
                    destination[*position] += source[*source_position] * message[*index];
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_kernel_sums_middle_dimension() {
        // 2 x 3 x 2 table with value = joint index, folding the middle dimension
        let source: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let mut destination = vec![0.; 4];
        let kernel = Kernel::Strided {
            outer: 2,
            dim_size: 3,
            stride: 2,
        };
        marginalize(&kernel, &source, &mut destination, &[1., 10., 100.]);
        // destination[a][c] = sum_b source[a][b][c] * message[b]
        assert_eq!(destination, vec![420., 531., 1086., 1197.]);
    }

    #[test]
    fn mapped_kernel_accumulates_collisions() {
        let source = vec![1., 2., 3.];
        let mut destination = vec![0.; 2];
        let kernel = Kernel::Mapped {
            source_positions: None,
            destination_positions: vec![0, 1, 0],
            message_indices: vec![0, 1, 1],
        };
        marginalize(&kernel, &source, &mut destination, &[0.5, 2.]);
        assert_eq!(destination, vec![6.5, 4.]);
        assert_eq!(kernel.mapping_size(), 6);
    }

    #[test]
    fn output_scatters_sparse_values() {
        let tables = vec![AuxTable {
            dims: vec![0],
            representation: TableRepresentation::Sparse,
            len: 2,
        }];
        let steps = vec![PlanStep::Output {
            source: 0,
            edge: 0,
            scatter: Some(vec![1, 3]),
        }];
        let mut plan = UpdatePlan::new(tables, steps, vec![5., 7.], &[4]);
        let uniform = [0.25; 4];
        assert_eq!(plan.execute(&[&uniform]), &[vec![0., 5., 0., 7.]]);
    }
}
