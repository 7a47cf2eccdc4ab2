use std::{process::ExitCode, time::Instant};

use log::{error, info};
use sumprod::{
    bethe_free_energy, read_uai_file, FactorGraph, SolverOptions, SumProductSolver, TableWrapper,
    UaiError,
};

// Attractive Ising-like grid with a field on the first row, used when no model file is given
fn construct_grid(rows: usize, cols: usize) -> Result<FactorGraph, UaiError> {
    let mut graph = FactorGraph::new();
    for _ in 0..rows * cols {
        graph.add_variable(2);
    }
    for col in 0..cols {
        graph.set_prior(col, vec![0.8, 0.2])?;
    }

    let coupling = |value: f64| TableWrapper::dense(vec![2, 2], vec![value, 1., 1., value]);
    for row in 0..rows {
        for col in 0..cols {
            let variable = row * cols + col;
            let table = coupling(1.5 + 0.1 * (variable % 3) as f64).map_err(|error| {
                UaiError::Parse {
                    line: 0,
                    reason: error.to_string(),
                }
            })?;
            if col + 1 < cols {
                graph.add_factor(vec![variable, variable + 1], table.clone())?;
            }
            if row + 1 < rows {
                graph.add_factor(vec![variable, variable + cols], table)?;
            }
        }
    }
    Ok(graph)
}

fn run() -> Result<(), UaiError> {
    let mut args = std::env::args().skip(1);
    let time_start = Instant::now();
    let graph = match args.next() {
        Some(path) => {
            let lg = args.next().as_deref() == Some("--lg");
            info!("Processing instance {}.", path);
            read_uai_file(path, lg)?
        }
        None => {
            info!("No model file given, using a 4x4 grid.");
            construct_grid(4, 4)?
        }
    };
    info!(
        "Model with {} variables and {} factors loaded. Elapsed time {:?}.",
        graph.variable_count(),
        graph.factor_count(),
        time_start.elapsed()
    );

    let mut solver = SumProductSolver::new(graph, SolverOptions::default())?;
    let summary = solver.solve()?;
    info!(
        "Converged: {}. Iterations: {}. Last change {:e}.",
        summary.converged, summary.iterations, summary.last_change
    );

    for variable in 0..solver.graph().variable_count() {
        info!("Belief of variable {}: {}", variable, solver.variable_belief(variable)?);
    }
    let bethe = bethe_free_energy(&solver)?;
    info!(
        "Bethe free energy {} (internal energy {}, entropy {}).",
        bethe.free_energy, bethe.internal_energy, bethe.entropy
    );
    Ok(())
}

fn main() -> ExitCode {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info"); // change "info" to "debug" for debug-level logging, etc.
    }
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{}", error);
            ExitCode::FAILURE
        }
    }
}
