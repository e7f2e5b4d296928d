use crate::descriptor::DescriptorId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("descriptor '{id}' is already registered")]
    DuplicateDescriptor { id: DescriptorId },

    /// `nodes` holds every descriptor left unresolved, in registration order.
    #[error("cyclic dependency in group '{group}' between: {}", join_ids(.nodes))]
    CyclicDependency { group: String, nodes: Vec<DescriptorId> },
}

impl ScheduleError {
    pub fn cycle_nodes(&self) -> Option<&[DescriptorId]> {
        match self {
            ScheduleError::CyclicDependency { nodes, .. } => Some(nodes.as_slice()),
            ScheduleError::DuplicateDescriptor { .. } => None,
        }
    }
}

fn join_ids(ids: &[DescriptorId]) -> String {
    ids.iter().map(DescriptorId::as_str).collect::<Vec<_>>().join(", ")
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;
