use bevy_ecs::prelude::Entity;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Group that untagged descriptors belong to.
pub const DEFAULT_GROUP: &str = "default";
/// Group that descriptors flagged with [`DescriptorFlags::ENABLE_IN_EDITOR`] join as well.
pub const EDITOR_GROUP: &str = "editor";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(String);

impl DescriptorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DescriptorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DescriptorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Behaviour instance (usually an entity) that owns a set of descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(u64);

impl OwnerId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl From<Entity> for OwnerId {
    fn from(entity: Entity) -> Self {
        Self(entity.to_bits())
    }
}

impl From<u64> for OwnerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescriptorFlags: u8 {
        const ENABLE_IN_EDITOR = 1 << 0;
    }
}

/// Registration metadata for one update callback.
///
/// `after` and `before` hold qualified names (`"Namespace.Type::Method"`) compared
/// verbatim against other descriptors' [`CallbackDescriptor::name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackDescriptor {
    pub id: DescriptorId,
    pub name: String,
    pub owner: OwnerId,
    pub tags: BTreeSet<String>,
    pub after: BTreeSet<String>,
    pub before: BTreeSet<String>,
    pub flags: DescriptorFlags,
}

impl CallbackDescriptor {
    pub fn new(id: impl Into<DescriptorId>, owner: impl Into<OwnerId>) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_string(),
            id,
            owner: owner.into(),
            tags: BTreeSet::new(),
            after: BTreeSet::new(),
            before: BTreeSet::new(),
            flags: DescriptorFlags::empty(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn after(mut self, reference: impl Into<String>) -> Self {
        self.after.insert(reference.into());
        self
    }

    pub fn before(mut self, reference: impl Into<String>) -> Self {
        self.before.insert(reference.into());
        self
    }

    pub fn with_flags(mut self, flags: DescriptorFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn enabled_in_editor(self) -> Self {
        self.with_flags(DescriptorFlags::ENABLE_IN_EDITOR)
    }

    /// Groups this descriptor is scheduled in: its tags, or the default group when it
    /// has none, plus the editor group when flagged for it.
    pub fn groups(&self) -> BTreeSet<String> {
        let mut groups = self.tags.clone();
        if groups.is_empty() {
            groups.insert(DEFAULT_GROUP.to_string());
        }
        if self.flags.contains(DescriptorFlags::ENABLE_IN_EDITOR) {
            groups.insert(EDITOR_GROUP.to_string());
        }
        groups
    }

    pub fn in_group(&self, group: &str) -> bool {
        if self.tags.contains(group) {
            return true;
        }
        (group == DEFAULT_GROUP && self.tags.is_empty())
            || (group == EDITOR_GROUP && self.flags.contains(DescriptorFlags::ENABLE_IN_EDITOR))
    }
}
