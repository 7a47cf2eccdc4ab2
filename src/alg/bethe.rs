use log::debug;

use crate::{alg::solver::SumProductSolver, errors::SolverResult};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BetheFreeEnergy {
    pub internal_energy: f64,
    pub entropy: f64,
    pub free_energy: f64, // internal_energy - entropy
}

// Σ b·(-ln w) over the entries a belief puts mass on
fn internal_energy<'a>(pairs: impl Iterator<Item = (f64, &'a f64)>) -> f64 {
    pairs
        .filter(|(belief, _)| *belief > 0.)
        .map(|(belief, weight)| -belief * weight.ln())
        .sum()
}

// -Σ b·ln b, with 0·ln 0 = 0
fn entropy<'a>(beliefs: impl Iterator<Item = &'a f64>) -> f64 {
    beliefs
        .filter(|belief| **belief > 0.)
        .map(|belief| -belief * belief.ln())
        .sum()
}

/// Bethe free energy of the solver's current beliefs.
///
/// Priors count as unary factors, so a variable with a prior and `d` factors appears in `d + 1`
/// regions. On a tree at a fixed point of the updates the free energy equals `-ln Z`.
pub fn bethe_free_energy(solver: &SumProductSolver) -> SolverResult<BetheFreeEnergy> {
    let mut energy = 0.;
    let mut entropy_sum = 0.;

    for factor in 0..solver.graph().factor_count() {
        let belief = solver.factor_belief(factor)?;
        let entries = solver.factor_engine(factor)?.entries();
        energy += internal_energy(belief.weights().iter().copied().zip(entries.weights()));
        entropy_sum += entropy(belief.weights().iter());
    }

    for (variable, node) in solver.graph().variables().iter().enumerate() {
        let belief = solver.variable_belief(variable)?;
        let variable_entropy = entropy(belief.iter());
        let mut regions = node.degree();
        if let Some(prior) = node.prior() {
            energy += internal_energy(belief.iter().copied().zip(prior));
            entropy_sum += variable_entropy;
            regions += 1;
        }
        entropy_sum -= (regions as f64 - 1.) * variable_entropy;
    }

    debug!("Bethe internal energy {}, entropy {}", energy, entropy_sum);
    Ok(BetheFreeEnergy {
        internal_energy: energy,
        entropy: entropy_sum,
        free_energy: energy - entropy_sum,
    })
}

// Derivative of the free energy with respect to each non-zero table weight of a factor, with
// messages held fixed. Aligned with the entries of the factor's engine.
pub fn factor_weight_derivatives(solver: &SumProductSolver, factor: usize) -> SolverResult<Vec<f64>> {
    let belief = solver.factor_belief(factor)?;
    let entries = solver.factor_engine(factor)?.entries();
    Ok(belief
        .weights()
        .iter()
        .zip(entries.weights())
        .map(|(belief, weight)| -belief / weight)
        .collect())
}
