use bitvec::{order::LocalBits, vec::BitVec};
use log::debug;
use queues::{IsQueue, Queue};

use crate::graph::{
    factor_graph::{FactorGraph, NodeId},
    options::ScheduleKind,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleEntry {
    Node(NodeId),                            // update every outgoing message of the node
    Edge { node: NodeId, position: usize }, // update the message at one sibling position
}

/// Order in which one iteration visits the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
    is_tree: bool,
}

impl Schedule {
    pub fn new(graph: &FactorGraph, kind: ScheduleKind) -> Self {
        match kind {
            ScheduleKind::Flooding => Schedule::flooding(graph),
            ScheduleKind::TreeOrFlooding if graph.is_forest() => Schedule::tree(graph),
            ScheduleKind::TreeOrFlooding => {
                debug!("Graph has cycles, falling back to flooding schedule");
                Schedule::flooding(graph)
            }
        }
    }

    // Every factor, then every variable
    pub fn flooding(graph: &FactorGraph) -> Self {
        let entries = (0..graph.factor_count())
            .map(|factor| ScheduleEntry::Node(NodeId::Factor(factor)))
            .chain((0..graph.variable_count()).map(|v| ScheduleEntry::Node(NodeId::Variable(v))))
            .collect();
        Schedule {
            entries,
            is_tree: false,
        }
    }

    // Two passes per connected component of a forest: messages flow from the leaves to the root
    // of a BFS tree, then back out to the leaves
    pub fn tree(graph: &FactorGraph) -> Self {
        let node_count = graph.variable_count() + graph.factor_count();
        let flat_index = |node: NodeId| match node {
            NodeId::Variable(index) => index,
            NodeId::Factor(index) => graph.variable_count() + index,
        };

        let mut is_visited = BitVec::<usize, LocalBits>::repeat(false, node_count);
        let mut upward = Vec::new();
        let mut downward = Vec::new();

        for root in graph.node_ids() {
            if is_visited[flat_index(root)] {
                continue;
            }
            is_visited.set(flat_index(root), true);

            // (node, position of the edge towards its parent) in BFS order
            let mut component = Vec::new();
            let mut queue: Queue<(NodeId, Option<usize>)> = Queue::new();
            let _ = queue.add((root, None));
            while let Ok((node, parent_position)) = queue.remove() {
                component.push((node, parent_position));
                let siblings = graph.siblings(node).unwrap_or(&[]);
                for (position, edge) in siblings.iter().enumerate() {
                    if Some(position) == parent_position {
                        continue;
                    }
                    let ends = graph.edge(*edge);
                    let (child, child_position) = match node {
                        NodeId::Variable(_) => (NodeId::Factor(ends.factor), ends.factor_position),
                        NodeId::Factor(_) => {
                            (NodeId::Variable(ends.variable), ends.variable_position)
                        }
                    };
                    if !is_visited[flat_index(child)] {
                        is_visited.set(flat_index(child), true);
                        let _ = queue.add((child, Some(child_position)));
                        downward.push(ScheduleEntry::Edge { node, position });
                    }
                }
            }

            upward.extend(component.iter().rev().filter_map(|(node, parent_position)| {
                parent_position.map(|position| ScheduleEntry::Edge {
                    node: *node,
                    position,
                })
            }));
        }

        debug!(
            "Tree schedule with {} upward and {} downward edge updates",
            upward.len(),
            downward.len()
        );
        upward.extend(downward);
        Schedule {
            entries: upward,
            is_tree: true,
        }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn is_tree(&self) -> bool {
        self.is_tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::table_wrapper::TableWrapper;

    // v0 - f0 - v1 - f1 - v2
    fn construct_chain() -> FactorGraph {
        let mut graph = FactorGraph::new();
        for _ in 0..3 {
            graph.add_variable(2);
        }
        for pair in [[0, 1], [1, 2]] {
            graph
                .add_factor(pair.to_vec(), TableWrapper::dense(vec![2, 2], vec![1.; 4]).unwrap())
                .unwrap();
        }
        graph
    }

    #[test]
    fn flooding_visits_factors_then_variables() {
        let graph = construct_chain();
        let schedule = Schedule::new(&graph, ScheduleKind::Flooding);
        assert!(!schedule.is_tree());
        assert_eq!(
            schedule.entries(),
            &[
                ScheduleEntry::Node(NodeId::Factor(0)),
                ScheduleEntry::Node(NodeId::Factor(1)),
                ScheduleEntry::Node(NodeId::Variable(0)),
                ScheduleEntry::Node(NodeId::Variable(1)),
                ScheduleEntry::Node(NodeId::Variable(2)),
            ]
        );
    }

    #[test]
    fn tree_schedule_on_chain() {
        let graph = construct_chain();
        let schedule = Schedule::new(&graph, ScheduleKind::TreeOrFlooding);
        assert!(schedule.is_tree());
        let edge = |node, position| ScheduleEntry::Edge { node, position };
        use NodeId::{Factor, Variable};
        assert_eq!(
            schedule.entries(),
            &[
                // towards the root v0
                edge(Variable(2), 0),
                edge(Factor(1), 0),
                edge(Variable(1), 0),
                edge(Factor(0), 0),
                // away from the root
                edge(Variable(0), 0),
                edge(Factor(0), 1),
                edge(Variable(1), 1),
                edge(Factor(1), 1),
            ]
        );
    }

    #[test]
    fn cycles_fall_back_to_flooding() {
        let mut graph = construct_chain();
        graph
            .add_factor(vec![0, 2], TableWrapper::dense(vec![2, 2], vec![1.; 4]).unwrap())
            .unwrap();
        let schedule = Schedule::new(&graph, ScheduleKind::TreeOrFlooding);
        assert!(!schedule.is_tree());
        assert_eq!(schedule.entries().len(), 6);
    }

    #[test]
    fn isolated_nodes_need_no_updates() {
        let mut graph = FactorGraph::new();
        graph.add_variable(3);
        let schedule = Schedule::tree(&graph);
        assert!(schedule.entries().is_empty());
    }
}
