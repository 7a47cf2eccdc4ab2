use ndarray::Array1;

// Natural-log value used in place of ln(0) so that zero weights don't propagate -inf
pub const LOG_FLOOR: f64 = -100.;

// Stores a message over the domain of one variable, along with the normalization energy
// extracted when it was last normalized (the unnormalized message is weights * exp(-energy))
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteMessage {
    weights: Array1<f64>,
    normalization_energy: f64,
}

impl DiscreteMessage {
    // Creates the uniform message over a domain of the given size, i.e. the all-ones vector
    // normalized with energy -ln(domain_size)
    pub fn uniform(domain_size: usize) -> Self {
        DiscreteMessage {
            weights: Array1::from_elem(domain_size, 1. / domain_size as f64),
            normalization_energy: -(domain_size as f64).ln(),
        }
    }

    // Creates the message that puts all weight on `index`
    pub fn delta(domain_size: usize, index: usize) -> Self {
        let mut weights = Array1::zeros(domain_size);
        weights[index] = 1.;
        DiscreteMessage {
            weights,
            normalization_energy: 0.,
        }
    }

    // Wraps raw weights without normalizing them
    pub fn from_weights(weights: Vec<f64>) -> Self {
        DiscreteMessage {
            weights: Array1::from(weights),
            normalization_energy: 0.,
        }
    }

    pub fn domain_size(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    // Messages are always stored contiguously
    pub fn as_slice(&self) -> &[f64] {
        self.weights.as_slice().unwrap_or(&[])
    }

    pub fn normalization_energy(&self) -> f64 {
        self.normalization_energy
    }

    pub fn sum(&self) -> f64 {
        self.weights.sum()
    }

    // Returns the index of the only non-zero weight, if there is exactly one
    pub fn certain_index(&self) -> Option<usize> {
        certain_index(self.weights.iter().copied())
    }

    // Returns the indices of the `k` largest weights in increasing index order
    // (ties are broken in favour of the lower index)
    pub fn k_best_indices(&self, k: usize) -> Vec<usize> {
        k_best_indices(self.as_slice(), k)
    }

    pub fn set_uniform(&mut self) {
        let domain_size = self.weights.len();
        self.weights.fill(1. / domain_size as f64);
        self.normalization_energy = -(domain_size as f64).ln();
    }

    // Overwrites this message with freshly computed normalized weights, blended with the previous
    // message when `damping` is non-zero: new = damping * previous + (1 - damping) * computed.
    // The previous weights are copied into `snapshot` before being overwritten.
    pub fn assign_damped(
        &mut self,
        computed: &[f64],
        normalization_energy: f64,
        damping: f64,
        snapshot: &mut Option<Array1<f64>>,
    ) {
        if damping == 0. {
            for (value, new_value) in self.weights.iter_mut().zip(computed) {
                *value = *new_value;
            }
        } else {
            let previous = snapshot.get_or_insert_with(|| Array1::zeros(computed.len()));
            previous.assign(&self.weights);
            for ((value, new_value), old_value) in
                self.weights.iter_mut().zip(computed).zip(previous.iter())
            {
                *value = damping * old_value + (1. - damping) * new_value;
            }
        }
        self.normalization_energy = normalization_energy;
    }
}

// Divides `values` by their sum and returns the normalization energy -ln(sum),
// or None if the sum is zero (or NaN), in which case `values` is left untouched
pub fn normalize(values: &mut [f64]) -> Option<f64> {
    let sum: f64 = values.iter().sum();
    if !(sum > 0.) {
        return None;
    }
    for value in values.iter_mut() {
        *value /= sum;
    }
    Some(-sum.ln())
}

pub fn certain_index(values: impl Iterator<Item = f64>) -> Option<usize> {
    let mut found = None;
    for (index, value) in values.enumerate() {
        if value != 0. {
            if found.is_some() {
                return None;
            }
            found = Some(index);
        }
    }
    found
}

pub fn k_best_indices(values: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    if k < values.len() {
        order.sort_by(|a, b| values[*b].total_cmp(&values[*a]).then(a.cmp(b)));
        order.truncate(k);
        order.sort_unstable();
    }
    order
}

// Logarithm with the zero weight mapped to LOG_FLOOR
pub fn floored_ln(value: f64) -> f64 {
    if value > 0. {
        value.ln()
    } else {
        LOG_FLOOR
    }
}
