use crate::error::ScheduleResult;
use crate::graph;
use crate::registry::DescriptorRegistry;
use crate::resolve::{self, ResolvedSchedule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
    /// Any mutation drops every cached schedule.
    Coarse,
    /// Only groups the mutated descriptor belonged to are dropped.
    #[default]
    Fine,
}

/// Resolved schedules per tag group. A group without an entry is dirty.
#[derive(Debug, Default)]
pub struct ScheduleCache {
    mode: InvalidationMode,
    schedules: HashMap<String, Arc<ResolvedSchedule>>,
    resolutions: u64,
}

impl ScheduleCache {
    pub fn new(mode: InvalidationMode) -> Self {
        Self { mode, schedules: HashMap::new(), resolutions: 0 }
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InvalidationMode) {
        self.mode = mode;
    }

    /// Returns the cached schedule for `group`, resolving it from `registry` when dirty.
    /// A failed resolution leaves the group dirty.
    pub fn get_schedule(
        &mut self,
        registry: &DescriptorRegistry,
        group: &str,
    ) -> ScheduleResult<Arc<ResolvedSchedule>> {
        if let Some(schedule) = self.schedules.get(group) {
            return Ok(Arc::clone(schedule));
        }
        let graph = graph::build(registry, group);
        let schedule = Arc::new(resolve::resolve(&graph)?);
        self.resolutions += 1;
        debug!(
            target: "kestrel::schedule",
            group,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "resolved schedule"
        );
        self.schedules.insert(group.to_string(), Arc::clone(&schedule));
        Ok(schedule)
    }

    /// Marks the given groups dirty, or every group under [`InvalidationMode::Coarse`].
    pub fn invalidate<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.mode {
            InvalidationMode::Coarse => self.invalidate_all(),
            InvalidationMode::Fine => {
                for group in groups {
                    self.schedules.remove(group.as_ref());
                }
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        self.schedules.clear();
    }

    pub fn is_dirty(&self, group: &str) -> bool {
        !self.schedules.contains_key(group)
    }

    /// Number of successful resolutions performed so far.
    pub fn resolutions(&self) -> u64 {
        self.resolutions
    }
}
