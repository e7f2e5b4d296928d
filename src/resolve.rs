use crate::descriptor::DescriptorId;
use crate::error::{ScheduleError, ScheduleResult};
use crate::graph::DependencyGraph;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Execution order for one tag group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchedule {
    group: String,
    order: Vec<DescriptorId>,
}

impl ResolvedSchedule {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn order(&self) -> &[DescriptorId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &DescriptorId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, id: &DescriptorId) -> Option<usize> {
        self.order.iter().position(|candidate| candidate == id)
    }
}

/// Orders the graph with Kahn's algorithm. Among nodes that are ready at the same time
/// the earliest registered runs first, so identical registration sequences always
/// resolve identically.
pub fn resolve(graph: &DependencyGraph) -> ScheduleResult<ResolvedSchedule> {
    let node_count = graph.node_count();
    let mut in_degree = vec![0usize; node_count];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for (from, to) in graph.edge_indices() {
        in_degree[to] += 1;
        outgoing[from].push(to);
    }

    // Nodes are stored in registration order, so the index doubles as the tie-break key.
    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..node_count).filter(|&index| in_degree[index] == 0).map(Reverse).collect();

    let nodes = graph.nodes();
    let mut order = Vec::with_capacity(node_count);
    while let Some(Reverse(index)) = ready.pop() {
        order.push(nodes[index].id.clone());
        for &next in &outgoing[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < node_count {
        let unresolved =
            (0..node_count).filter(|&index| in_degree[index] > 0).map(|index| nodes[index].id.clone()).collect();
        return Err(ScheduleError::CyclicDependency { group: graph.group().to_string(), nodes: unresolved });
    }

    Ok(ResolvedSchedule { group: graph.group().to_string(), order })
}
