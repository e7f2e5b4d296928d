use crate::descriptor::DescriptorId;
use crate::registry::DescriptorRegistry;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: DescriptorId,
    pub sequence: u64,
}

/// Ordering constraints between the members of one tag group.
///
/// Nodes are kept in registration order; edges are `(from, to)` node indices meaning
/// `from` runs before `to`. Parallel edges are collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    group: String,
    nodes: Vec<GraphNode>,
    edges: BTreeSet<(usize, usize)>,
}

impl DependencyGraph {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&DescriptorId, &DescriptorId)> + '_ {
        self.edges.iter().map(|&(from, to)| (&self.nodes[from].id, &self.nodes[to].id))
    }

    pub fn contains_edge(&self, from: &DescriptorId, to: &DescriptorId) -> bool {
        let from = self.nodes.iter().position(|node| &node.id == from);
        let to = self.nodes.iter().position(|node| &node.id == to);
        match (from, to) {
            (Some(from), Some(to)) => self.edges.contains(&(from, to)),
            _ => false,
        }
    }
}

/// Builds the dependency graph of `group` from a registry snapshot.
///
/// References that name no member of the group are ignored, as are references to the
/// descriptor's own name.
pub fn build(registry: &DescriptorRegistry, group: &str) -> DependencyGraph {
    let mut members: Vec<_> = registry.query(group).collect();
    members.sort_by_key(|entry| entry.sequence());

    let nodes: Vec<GraphNode> = members
        .iter()
        .map(|entry| GraphNode { id: entry.id().clone(), sequence: entry.sequence() })
        .collect();

    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, entry) in members.iter().enumerate() {
        by_name.entry(entry.descriptor().name.as_str()).or_default().push(index);
    }

    let mut edges = BTreeSet::new();
    for (index, entry) in members.iter().enumerate() {
        let descriptor = entry.descriptor();
        for reference in &descriptor.after {
            if *reference == descriptor.name {
                continue;
            }
            for &dependency in by_name.get(reference.as_str()).into_iter().flatten() {
                edges.insert((dependency, index));
            }
        }
        for reference in &descriptor.before {
            if *reference == descriptor.name {
                continue;
            }
            for &dependent in by_name.get(reference.as_str()).into_iter().flatten() {
                edges.insert((index, dependent));
            }
        }
    }

    DependencyGraph { group: group.to_string(), nodes, edges }
}
