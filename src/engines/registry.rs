use log::debug;

use crate::{
    engines::{factor_engine::UpdateStrategy, kbest::KBestMarginalizer},
    errors::SolverResult,
    graph::options::ResolvedOptions,
    plan::compiler::optimize,
    tables::{sparse_table::SparseTable, table_wrapper::TableWrapper},
};

// What an engine constructor gets to see about the factor it is built for
pub struct FactorContext<'a> {
    pub factor: usize,
    pub table: &'a TableWrapper,
    pub entries: &'a SparseTable, // non-zero entries of `table`
    pub domain_sizes: &'a [usize],
    pub density_hint: Option<f64>,
    pub options: &'a ResolvedOptions,
}

type Predicate = Box<dyn Fn(&FactorContext) -> bool + Send + Sync>;
type Constructor = Box<dyn Fn(&FactorContext) -> SolverResult<UpdateStrategy> + Send + Sync>;

struct RegistryEntry {
    name: String,
    applies: Predicate,
    build: Constructor,
}

/// Ordered list of factor update strategies.
///
/// The first entry whose predicate accepts a factor builds its strategy. Entries added with
/// [`EngineRegistry::register`] are tried before the built-in ones, in registration order.
pub struct EngineRegistry {
    entries: Vec<RegistryEntry>,
    custom_count: usize,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        let mut registry = EngineRegistry {
            entries: Vec::new(),
            custom_count: 0,
        };
        registry.entries.push(RegistryEntry {
            name: "k-best".to_string(),
            applies: Box::new(|context: &FactorContext| {
                context.options.max_message_size.map_or(false, |k| {
                    context.domain_sizes.iter().any(|size| *size > k)
                })
            }),
            build: Box::new(|context: &FactorContext| {
                let k = context.options.max_message_size.unwrap_or(usize::MAX);
                Ok(UpdateStrategy::KBest(KBestMarginalizer::new(context.entries, k)))
            }),
        });
        registry.entries.push(RegistryEntry {
            name: "table".to_string(),
            applies: Box::new(|_: &FactorContext| true),
            build: Box::new(|context: &FactorContext| {
                Ok(
                    match optimize(
                        context.factor,
                        context.table,
                        context.density_hint,
                        context.options,
                    ) {
                        Some(plan) => UpdateStrategy::Optimized(plan),
                        None => UpdateStrategy::Naive,
                    },
                )
            }),
        });
        registry
    }
}

impl EngineRegistry {
    pub fn register<P, C>(&mut self, name: &str, applies: P, build: C) -> &mut Self
    where
        P: Fn(&FactorContext) -> bool + Send + Sync + 'static,
        C: Fn(&FactorContext) -> SolverResult<UpdateStrategy> + Send + Sync + 'static,
    {
        self.entries.insert(
            self.custom_count,
            RegistryEntry {
                name: name.to_string(),
                applies: Box::new(applies),
                build: Box::new(build),
            },
        );
        self.custom_count += 1;
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    // Builds the strategy of the first applicable entry and returns it with the entry's name
    pub fn resolve(&self, context: &FactorContext) -> SolverResult<(String, UpdateStrategy)> {
        for entry in self.entries.iter() {
            if (entry.applies)(context) {
                debug!("Factor {}: using {} engine", context.factor, entry.name);
                return Ok((entry.name.clone(), (entry.build)(context)?));
            }
        }
        // the built-in table entry always applies
        Ok(("table".to_string(), UpdateStrategy::Naive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{factor_graph::NodeId, options::SolverOptions};

    fn resolve_with(registry: &EngineRegistry, options: &SolverOptions) -> String {
        let table = TableWrapper::dense(vec![3, 5], vec![1.; 15]).unwrap();
        let entries = table.to_sparse();
        let resolved = ResolvedOptions::resolve(NodeId::Factor(0), 2, options, None).unwrap();
        let context = FactorContext {
            factor: 0,
            table: &table,
            entries: &entries,
            domain_sizes: &[3, 5],
            density_hint: None,
            options: &resolved,
        };
        registry.resolve(&context).unwrap().0
    }

    #[test]
    fn default_entries() {
        let registry = EngineRegistry::default();
        assert_eq!(registry.names(), vec!["k-best", "table"]);

        let mut options = SolverOptions::default();
        assert_eq!(resolve_with(&registry, &options), "table");
        options.set_max_message_size(Some(5));
        assert_eq!(resolve_with(&registry, &options), "table");
        options.set_max_message_size(Some(4));
        assert_eq!(resolve_with(&registry, &options), "k-best");
    }

    #[test]
    fn custom_entries_come_first() {
        let mut registry = EngineRegistry::default();
        registry
            .register("first", |context| context.domain_sizes.len() == 2, |_| {
                Ok(UpdateStrategy::Naive)
            })
            .register("second", |_| true, |_| Ok(UpdateStrategy::Naive));
        assert_eq!(registry.names(), vec!["first", "second", "k-best", "table"]);
        assert_eq!(resolve_with(&registry, &SolverOptions::default()), "first");
    }
}
