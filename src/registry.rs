use crate::descriptor::{CallbackDescriptor, DescriptorId, OwnerId};
use crate::error::{ScheduleError, ScheduleResult};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct RegisteredDescriptor {
    descriptor: CallbackDescriptor,
    sequence: u64,
}

impl RegisteredDescriptor {
    pub fn descriptor(&self) -> &CallbackDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &DescriptorId {
        &self.descriptor.id
    }

    /// Position in the registration sequence of the current epoch. Used as the tie-break
    /// between otherwise unordered descriptors.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Every registered update descriptor, keyed by id.
///
/// Cloning produces an independent snapshot suitable for resolving groups off-thread.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    entries: HashMap<DescriptorId, RegisteredDescriptor>,
    // Retained across unregister so a round trip keeps its slot for the epoch.
    sequences: HashMap<DescriptorId, u64>,
    next_sequence: u64,
    epoch: u64,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: CallbackDescriptor) -> ScheduleResult<&RegisteredDescriptor> {
        if self.entries.contains_key(&descriptor.id) {
            return Err(ScheduleError::DuplicateDescriptor { id: descriptor.id });
        }
        let sequence = match self.sequences.get(&descriptor.id) {
            Some(&sequence) => sequence,
            None => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.sequences.insert(descriptor.id.clone(), sequence);
                sequence
            }
        };
        let id = descriptor.id.clone();
        Ok(self.entries.entry(id).or_insert(RegisteredDescriptor { descriptor, sequence }))
    }

    /// Removes `id`; returns `None` when it was not registered.
    pub fn unregister(&mut self, id: &DescriptorId) -> Option<CallbackDescriptor> {
        self.entries.remove(id).map(|entry| entry.descriptor)
    }

    /// Removes every descriptor owned by `owner`, returned in registration order.
    pub fn unregister_owner(&mut self, owner: OwnerId) -> Vec<CallbackDescriptor> {
        let mut owned: Vec<(u64, DescriptorId)> = self
            .entries
            .values()
            .filter(|entry| entry.descriptor.owner == owner)
            .map(|entry| (entry.sequence, entry.descriptor.id.clone()))
            .collect();
        owned.sort();
        owned.into_iter().filter_map(|(_, id)| self.unregister(&id)).collect()
    }

    /// Descriptors participating in `group`. Iteration order is unspecified.
    pub fn query<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a RegisteredDescriptor> + 'a {
        self.entries.values().filter(move |entry| entry.descriptor.in_group(group))
    }

    pub fn get(&self, id: &DescriptorId) -> Option<&RegisteredDescriptor> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &DescriptorId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every group at least one registered descriptor participates in.
    pub fn groups(&self) -> BTreeSet<String> {
        self.entries.values().flat_map(|entry| entry.descriptor.groups()).collect()
    }

    /// Sequence slots still remembered for ids that are no longer registered.
    pub fn retired_len(&self) -> usize {
        self.sequences.len() - self.entries.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Starts a new registration epoch: ids that are no longer registered lose their
    /// remembered sequence slot. Live descriptors keep theirs.
    pub fn begin_epoch(&mut self) {
        let entries = &self.entries;
        self.sequences.retain(|id, _| entries.contains_key(id));
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> CallbackDescriptor {
        CallbackDescriptor::new(id, 1u64)
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = DescriptorRegistry::new();
        registry.register(descriptor("A")).expect("first registration");
        let err = registry.register(descriptor("A")).unwrap_err();
        assert_eq!(err, ScheduleError::DuplicateDescriptor { id: "A".into() });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_missing_is_a_noop() {
        let mut registry = DescriptorRegistry::new();
        assert!(registry.unregister(&"ghost".into()).is_none());
        registry.register(descriptor("A")).expect("register");
        assert!(registry.unregister(&"A".into()).is_some());
        assert!(registry.unregister(&"A".into()).is_none(), "double teardown tolerated");
    }

    #[test]
    fn unregister_owner_removes_only_owned_descriptors() {
        let mut registry = DescriptorRegistry::new();
        registry.register(CallbackDescriptor::new("A", 1u64)).expect("register A");
        registry.register(CallbackDescriptor::new("B", 2u64)).expect("register B");
        registry.register(CallbackDescriptor::new("C", 1u64)).expect("register C");
        let removed = registry.unregister_owner(OwnerId::from_raw(1));
        let ids: Vec<_> = removed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert!(registry.contains(&"B".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reregistration_keeps_sequence_within_epoch() {
        let mut registry = DescriptorRegistry::new();
        registry.register(descriptor("A")).expect("register A");
        registry.register(descriptor("B")).expect("register B");
        let original = registry.get(&"A".into()).map(RegisteredDescriptor::sequence);
        registry.unregister(&"A".into());
        registry.register(descriptor("A")).expect("re-register A");
        assert_eq!(registry.get(&"A".into()).map(RegisteredDescriptor::sequence), original);
    }

    #[test]
    fn new_epoch_forgets_retired_ids() {
        let mut registry = DescriptorRegistry::new();
        registry.register(descriptor("A")).expect("register A");
        registry.register(descriptor("B")).expect("register B");
        registry.unregister(&"A".into());
        registry.begin_epoch();
        registry.register(descriptor("A")).expect("re-register A");
        let a = registry.get(&"A".into()).map(RegisteredDescriptor::sequence).unwrap_or_default();
        let b = registry.get(&"B".into()).map(RegisteredDescriptor::sequence).unwrap_or_default();
        assert!(a > b, "retired id is appended after the new epoch starts");
        assert_eq!(registry.epoch(), 1);
    }

    #[test]
    fn retired_ids_are_counted_until_the_epoch_ends() {
        let mut registry = DescriptorRegistry::new();
        registry.register(descriptor("A")).expect("register A");
        registry.register(descriptor("B")).expect("register B");
        registry.unregister(&"A".into());
        assert_eq!(registry.retired_len(), 1);
        registry.register(descriptor("A")).expect("re-register A");
        assert_eq!(registry.retired_len(), 0);
        registry.unregister(&"B".into());
        registry.begin_epoch();
        assert_eq!(registry.retired_len(), 0);
    }

    #[test]
    fn query_filters_by_group() {
        let mut registry = DescriptorRegistry::new();
        registry.register(descriptor("X").tag("physics")).expect("register X");
        registry.register(descriptor("Y").tag("render")).expect("register Y");
        registry.register(descriptor("Z")).expect("register Z");
        let physics: Vec<_> = registry.query("physics").map(|e| e.id().as_str()).collect();
        assert_eq!(physics, vec!["X"]);
        let defaults: Vec<_> = registry.query("default").map(|e| e.id().as_str()).collect();
        assert_eq!(defaults, vec!["Z"]);
        assert_eq!(registry.groups().into_iter().collect::<Vec<_>>(), vec!["default", "physics", "render"]);
    }
}
