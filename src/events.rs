use crate::descriptor::{DescriptorId, OwnerId};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleEvent {
    Registered { id: DescriptorId, groups: Vec<String> },
    Unregistered { id: DescriptorId },
    OwnerReleased { owner: OwnerId, removed: usize },
    Resolved { group: String, len: usize },
    CycleDetected { group: String, nodes: Vec<DescriptorId> },
    CallbackFailed { group: String, id: DescriptorId, message: String },
    DeferredCommandFailed { group: String, message: String },
}

impl fmt::Display for ScheduleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleEvent::Registered { id, groups } => {
                write!(f, "Registered id={} groups={}", id, groups.join(","))
            }
            ScheduleEvent::Unregistered { id } => write!(f, "Unregistered id={id}"),
            ScheduleEvent::OwnerReleased { owner, removed } => {
                write!(f, "OwnerReleased owner={} removed={}", owner.to_raw(), removed)
            }
            ScheduleEvent::Resolved { group, len } => write!(f, "Resolved group={group} len={len}"),
            ScheduleEvent::CycleDetected { group, nodes } => {
                let nodes: Vec<&str> = nodes.iter().map(DescriptorId::as_str).collect();
                write!(f, "CycleDetected group={} nodes={}", group, nodes.join(","))
            }
            ScheduleEvent::CallbackFailed { group, id, message } => {
                write!(f, "CallbackFailed group={group} id={id} message={message}")
            }
            ScheduleEvent::DeferredCommandFailed { group, message } => {
                write!(f, "DeferredCommandFailed group={group} message={message}")
            }
        }
    }
}

/// Bounded log of scheduler events; the oldest entries are dropped once full.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<ScheduleEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self { events: VecDeque::new(), capacity, dropped: 0 }
    }

    pub fn push(&mut self, event: ScheduleEvent) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<ScheduleEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(1024)
    }
}
