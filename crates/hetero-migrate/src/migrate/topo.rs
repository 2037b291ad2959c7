//! Foreign-key-aware load ordering.
//!
//! Tables form a directed graph with an edge parent → child for every FK.
//! The migrator loads tables in topological order so parents complete
//! before children start. Cycles (self-references, mutual FKs) cannot be
//! ordered; the affected strongly-connected component is loaded with FK
//! enforcement disabled on the target.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

/// One table in the computed load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSlot {
    /// Table name (unqualified).
    pub table: String,

    /// Dependency depth: tables at level N depend only on tables at
    /// levels < N. Tables sharing a level may load in parallel.
    pub level: usize,

    /// Whether the table sits in an FK cycle and needs FK enforcement
    /// disabled while loading.
    pub in_cycle: bool,
}

/// Compute the load order for `(table, fk_parent_tables)` pairs.
///
/// References to tables outside the set (filtered out or cross-schema)
/// are ignored. The result is ordered parents-first; ties and cycle
/// members keep a deterministic order by table name.
pub fn load_order<S: AsRef<str>>(tables: &[(S, Vec<S>)]) -> Vec<LoadSlot> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();

    for (table, _) in tables {
        let name = table.as_ref().to_string();
        let node = graph.add_node(name.clone());
        index.insert(name, node);
    }
    for (table, parents) in tables {
        let child = index[table.as_ref()];
        for parent in parents {
            if let Some(&parent_node) = index.get(parent.as_ref()) {
                graph.add_edge(parent_node, child, ());
            }
        }
    }

    // tarjan_scc emits components in reverse topological order of the
    // condensation; reversing yields parents before children.
    let mut components = tarjan_scc(&graph);
    components.reverse();

    // Map node -> component position for level computation.
    let mut component_of: HashMap<NodeIndex, usize> = HashMap::new();
    for (pos, component) in components.iter().enumerate() {
        for &node in component {
            component_of.insert(node, pos);
        }
    }

    let mut level_of: HashMap<usize, usize> = HashMap::new();
    let mut slots = Vec::new();

    for (pos, component) in components.iter().enumerate() {
        let mut level = 0;
        for &node in component {
            for parent in graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
            {
                let parent_pos = component_of[&parent];
                if parent_pos != pos {
                    level = level.max(level_of[&parent_pos] + 1);
                }
            }
        }
        level_of.insert(pos, level);

        let in_cycle = component.len() > 1
            || component
                .first()
                .map(|&n| graph.find_edge(n, n).is_some())
                .unwrap_or(false);

        let mut names: Vec<String> = component.iter().map(|&n| graph[n].clone()).collect();
        names.sort();
        for table in names {
            slots.push(LoadSlot {
                table,
                level,
                in_cycle,
            });
        }
    }

    slots
}
