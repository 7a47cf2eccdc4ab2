use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    mem,
    path::Path,
    str::FromStr,
};

use log::{debug, warn};
use thiserror::Error;

use crate::{
    errors::SolverError,
    graph::factor_graph::FactorGraph,
    tables::table_wrapper::{TableError, TableWrapper},
};

#[derive(Error, Debug)]
pub enum UaiError {
    #[error("failed to read model file: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid model: {0}")]
    Model(#[from] SolverError),
}

// States for reading UAI files
enum UaiState {
    ModelType,
    NumberOfVariables,
    DomainSizes,
    NumberOfFunctions,
    FunctionScopes(usize),      // function index
    NumberOfTableValues(usize), // function index
    TableValues(usize, usize),  // function index, function table size
    EndOfFile,
}

fn parse_values<T: FromStr>(line: &str, line_number: usize) -> Result<Vec<T>, UaiError> {
    line.split_whitespace()
        .map(|token| {
            token.parse::<T>().map_err(|_| UaiError::Parse {
                line: line_number,
                reason: format!("unexpected token {:?}", token),
            })
        })
        .collect()
}

fn parse_single<T: FromStr>(line: &str, line_number: usize) -> Result<T, UaiError> {
    let mut values = parse_values::<T>(line, line_number)?;
    if values.len() != 1 {
        return Err(UaiError::Parse {
            line: line_number,
            reason: format!("expected a single value, found {:?}", line),
        });
    }
    Ok(values.remove(0))
}

/// Reads a model in UAI format into a factor graph.
///
/// `MARKOV` and `BAYES` models are accepted; each function becomes one factor whose table
/// keeps the file's value order (the last scope variable changes fastest). If `lg` is set,
/// table values are read as natural logarithms of the weights.
/// The format is described [here](https://uaicompetition.github.io/uci-2022/file-formats/model-format/).
pub fn read_uai<R: BufRead>(reader: R, lg: bool) -> Result<FactorGraph, UaiError> {
    let mut state = UaiState::ModelType;
    let mut graph = FactorGraph::new();

    let mut num_variables = 0;
    let mut domain_sizes: Vec<usize> = Vec::new();
    let mut num_functions = 0;
    let mut function_scopes: Vec<Vec<usize>> = Vec::new();
    let mut function_values: Vec<f64> = Vec::new();
    let mut line_number = 0;

    for line in reader.lines() {
        let line = line?;
        line_number += 1;
        let trimmed_line = line.trim();
        if trimmed_line.is_empty() {
            continue;
        }
        let parse_error = |reason: String| UaiError::Parse {
            line: line_number,
            reason,
        };

        match state {
            UaiState::ModelType => {
                debug!("Reading model type");
                if trimmed_line != "MARKOV" && trimmed_line != "BAYES" {
                    return Err(parse_error(format!(
                        "unsupported model type {:?}",
                        trimmed_line
                    )));
                }
                state = UaiState::NumberOfVariables;
            }
            UaiState::NumberOfVariables => {
                debug!("Reading number of variables");
                num_variables = parse_single(trimmed_line, line_number)?;
                state = UaiState::DomainSizes;
            }
            UaiState::DomainSizes => {
                debug!("Reading domain sizes");
                let sizes: Vec<usize> = parse_values(trimmed_line, line_number)?;
                if sizes.len() != num_variables {
                    return Err(parse_error(format!(
                        "{} domain sizes for {} variables",
                        sizes.len(),
                        num_variables
                    )));
                }
                for size in sizes.iter() {
                    graph.add_variable(*size);
                }
                domain_sizes = sizes;
                state = UaiState::NumberOfFunctions;
            }
            UaiState::NumberOfFunctions => {
                debug!("Reading number of functions");
                num_functions = parse_single(trimmed_line, line_number)?;
                function_scopes = Vec::new();
                state = if num_functions > 0 {
                    UaiState::FunctionScopes(0)
                } else {
                    UaiState::EndOfFile
                };
            }
            UaiState::FunctionScopes(function_idx) => {
                debug!("Reading scope of function {}", function_idx);
                let function_desc: Vec<usize> = parse_values(trimmed_line, line_number)?;
                let (scope_len, function_scope) = function_desc.split_at(1);
                if scope_len.first() != Some(&function_scope.len()) {
                    return Err(parse_error(format!(
                        "scope of function {} does not match its declared length",
                        function_idx
                    )));
                }
                if let Some(variable) = function_scope.iter().find(|v| **v >= domain_sizes.len()) {
                    return Err(parse_error(format!(
                        "function {} refers to unknown variable {}",
                        function_idx, variable
                    )));
                }
                function_scopes.push(function_scope.to_vec());
                state = if function_idx + 1 < num_functions {
                    UaiState::FunctionScopes(function_idx + 1)
                } else {
                    UaiState::NumberOfTableValues(0)
                };
            }
            UaiState::NumberOfTableValues(function_idx) => {
                debug!("Reading function table size of function {}", function_idx);
                // values may follow the table size on the same line
                let mut tokens = trimmed_line.splitn(2, char::is_whitespace);
                let num_entries: usize = parse_single(tokens.next().unwrap_or(""), line_number)?;
                function_values = Vec::new();
                if let Some(rest) = tokens.next() {
                    function_values.extend(parse_values::<f64>(rest, line_number)?);
                }
                state = UaiState::TableValues(function_idx, num_entries);
            }
            UaiState::TableValues(function_idx, num_entries) => {
                function_values.extend(parse_values::<f64>(trimmed_line, line_number)?);
                debug!(
                    "Reading function {}. Collected {} out of {} entries.",
                    function_idx,
                    function_values.len(),
                    num_entries
                );
            }
            UaiState::EndOfFile => {
                warn!("Ignored trailing line at the end of file: {}", line);
            }
        }

        // Finish the current function once its table is complete
        if let UaiState::TableValues(function_idx, num_entries) = state {
            if function_values.len() > num_entries {
                return Err(parse_error(format!(
                    "function {} has more than {} table values",
                    function_idx, num_entries
                )));
            }
            if function_values.len() == num_entries {
                let mut values = mem::take(&mut function_values);
                if lg {
                    values.iter_mut().for_each(|value| *value = value.exp());
                }
                add_function(&mut graph, &domain_sizes, &function_scopes[function_idx], values)
                    .map_err(|error| match error {
                        UaiError::Parse { reason, .. } => parse_error(reason),
                        error => error,
                    })?;

                // Proceed to the next function
                state = if function_idx + 1 < num_functions {
                    UaiState::NumberOfTableValues(function_idx + 1)
                } else {
                    UaiState::EndOfFile
                };
            }
        }
    }

    if !matches!(state, UaiState::EndOfFile) {
        return Err(UaiError::Parse {
            line: line_number,
            reason: "unexpected end of file".to_string(),
        });
    }
    debug!("UAI import complete.");
    Ok(graph)
}

fn add_function(
    graph: &mut FactorGraph,
    domain_sizes: &[usize],
    scope: &[usize],
    values: Vec<f64>,
) -> Result<(), UaiError> {
    if scope.is_empty() {
        warn!("Ignored constant function with value {:?}", values.first());
        return Ok(());
    }
    let dims = scope.iter().map(|variable| domain_sizes[*variable]).collect();
    let table = TableWrapper::dense(dims, values).map_err(|error: TableError| UaiError::Parse {
        line: 0,
        reason: error.to_string(),
    })?;
    graph.add_factor(scope.to_vec(), table)?;
    Ok(())
}

pub fn read_uai_file<P: AsRef<Path>>(path: P, lg: bool) -> Result<FactorGraph, UaiError> {
    debug!("In read_uai_file() for file {:?} with lg option {}", path.as_ref(), lg);
    read_uai(BufReader::new(File::open(path)?), lg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "MARKOV
3
2 2 3
3
1 0
2 0 1
2 1 2

2
 0.436 0.564

4
 0.128 0.872
 0.920 0.080

6 0.210 0.333 0.457
  0.811 0.000 0.189
";

    #[test]
    fn reads_markov_model() {
        let graph = read_uai(MODEL.as_bytes(), false).unwrap();
        assert_eq!(graph.variable_count(), 3);
        assert_eq!(graph.factor_count(), 3);
        assert_eq!(graph.factors()[1].neighbors(), &[0, 1]);
        assert_eq!(graph.factors()[2].table().dims(), &[2, 3]);
        assert_eq!(graph.factors()[1].table().weight(&[1, 0]), 0.920);
        assert_eq!(graph.factors()[2].table().weight(&[1, 2]), 0.189);
        assert_eq!(graph.factors()[2].table().weight(&[1, 1]), 0.);
        for factor in 0..3 {
            graph.validate_factor(factor).unwrap();
        }
    }

    #[test]
    fn reads_log_values() {
        let model = "MARKOV\n1\n2\n1\n1 0\n2\n0 -1\n";
        let graph = read_uai(model.as_bytes(), true).unwrap();
        let table = graph.factors()[0].table();
        assert!((table.weight(&[0]) - 1.).abs() < 1e-12);
        assert!((table.weight(&[1]) - (-1f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn reports_malformed_input() {
        assert!(matches!(
            read_uai("MRF\n".as_bytes(), false),
            Err(UaiError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            read_uai("MARKOV\n2\n2 2\n1\n2 0 1\n4\n1 1 1\n".as_bytes(), false),
            Err(UaiError::Parse { .. })
        ));
        assert!(matches!(
            read_uai("MARKOV\n2\n2 2\n1\n2 0 1\n3\n1 1 1\n".as_bytes(), false),
            Err(UaiError::Parse { line: 7, .. })
        ));
        assert!(matches!(
            read_uai("MARKOV\n1\n2\n1\n1 3\n".as_bytes(), false),
            Err(UaiError::Parse { line: 5, .. })
        ));
    }
}
