// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component registration: ids, names and relation traits.
//!
//! The registry is world-bound. Component ids are handed out monotonically
//! and never recycled; trait flags live in fixed-width bitsets so checks on
//! hot paths are single bit probes.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::bitset::BitSet;
use crate::error::{EcsError, Result};
use crate::id::{Id, COMPONENT_MAX};

/// Options accepted at component registration.
#[derive(Debug, Clone, Default)]
pub struct ComponentOptions {
    pub name: Option<String>,
    /// At most one outgoing relation per entity per this base.
    pub exclusive: bool,
    /// Destroying the target of a relation with this base destroys the source.
    pub cascade_delete: bool,
    /// Relations with this base stay off archetype signatures; values live in
    /// the relation table.
    pub dont_fragment: bool,
}

impl ComponentOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    pub fn dont_fragment(mut self) -> Self {
        self.dont_fragment = true;
        self
    }
}

/// World-bound component registry.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    next: i64,
    names: AHashMap<String, Id>,
    names_by_id: AHashMap<Id, String>,
    exclusive: BitSet,
    cascade_delete: BitSet,
    dont_fragment: BitSet,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            next: 1,
            ..Self::default()
        }
    }

    /// Register a component type, binding its name and trait flags.
    pub fn register(&mut self, options: ComponentOptions) -> Result<Id> {
        if let Some(name) = &options.name {
            if self.names.contains_key(name) {
                return Err(EcsError::DuplicateComponentName(name.clone()));
            }
        }
        if self.next > COMPONENT_MAX {
            return Err(EcsError::OutOfComponentIds);
        }

        let id = Id::from_raw(self.next);
        self.next += 1;

        if let Some(name) = options.name {
            self.names.insert(name.clone(), id);
            self.names_by_id.insert(id, name);
        }
        let idx = id.raw() as usize;
        if options.exclusive {
            self.exclusive.set(idx);
        }
        if options.cascade_delete {
            self.cascade_delete.set(idx);
        }
        if options.dont_fragment {
            self.dont_fragment.set(idx);
        }
        Ok(id)
    }

    /// Look up a component id by registered name.
    pub fn lookup(&self, name: &str) -> Option<Id> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: Id) -> Option<&str> {
        self.names_by_id.get(&id).map(String::as_str)
    }

    fn flagged(&self, id: Id, flags: &BitSet) -> bool {
        id.base().is_some_and(|base| flags.contains(base.raw() as usize))
    }

    /// Trait check; accepts a component id or any relation form (checked
    /// through the relation's base).
    pub fn is_exclusive(&self, id: Id) -> bool {
        self.flagged(id, &self.exclusive)
    }

    pub fn is_cascade_delete(&self, id: Id) -> bool {
        self.flagged(id, &self.cascade_delete)
    }

    pub fn is_dont_fragment(&self, id: Id) -> bool {
        self.flagged(id, &self.dont_fragment)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut components = Vec::with_capacity((self.next - 1) as usize);
        for raw in 1..self.next {
            let id = Id::from_raw(raw);
            components.push(ComponentRecord {
                id,
                name: self.names_by_id.get(&id).cloned(),
                exclusive: self.exclusive.contains(raw as usize),
                cascade_delete: self.cascade_delete.contains(raw as usize),
                dont_fragment: self.dont_fragment.contains(raw as usize),
            });
        }
        RegistrySnapshot {
            next: self.next,
            components,
        }
    }

    pub fn restore(snapshot: &RegistrySnapshot) -> Self {
        let mut registry = Self::new();
        for record in &snapshot.components {
            let idx = record.id.raw() as usize;
            if let Some(name) = &record.name {
                registry.names.insert(name.clone(), record.id);
                registry.names_by_id.insert(record.id, name.clone());
            }
            if record.exclusive {
                registry.exclusive.set(idx);
            }
            if record.cascade_delete {
                registry.cascade_delete.set(idx);
            }
            if record.dont_fragment {
                registry.dont_fragment.set(idx);
            }
        }
        registry.next = snapshot.next;
        registry
    }
}

/// Serializable registry state carried by world snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub next: i64,
    pub components: Vec<ComponentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: Id,
    pub name: Option<String>,
    pub exclusive: bool,
    pub cascade_delete: bool,
    pub dont_fragment: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::relation;

    #[test]
    fn test_monotonic_ids() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register(ComponentOptions::default()).unwrap();
        let b = registry.register(ComponentOptions::default()).unwrap();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentOptions::named("Position")).unwrap();
        let err = registry.register(ComponentOptions::named("Position"));
        assert_eq!(
            err,
            Err(EcsError::DuplicateComponentName("Position".to_string()))
        );
    }

    #[test]
    fn test_id_space_exhaustion() {
        let mut registry = ComponentRegistry::new();
        for _ in 0..COMPONENT_MAX {
            registry.register(ComponentOptions::default()).unwrap();
        }
        assert_eq!(
            registry.register(ComponentOptions::default()),
            Err(EcsError::OutOfComponentIds)
        );
    }

    #[test]
    fn test_flags_resolve_through_relation_base() {
        let mut registry = ComponentRegistry::new();
        let child_of = registry
            .register(ComponentOptions::named("ChildOf").exclusive().dont_fragment())
            .unwrap();
        let rel = relation(child_of, Id::from_raw(2048)).unwrap();
        assert!(registry.is_exclusive(rel));
        assert!(registry.is_dont_fragment(rel));
        assert!(!registry.is_cascade_delete(rel));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentOptions::named("A").cascade_delete()).unwrap();
        registry.register(ComponentOptions::default()).unwrap();

        let restored = ComponentRegistry::restore(&registry.snapshot());
        assert_eq!(restored.lookup("A"), Some(Id::from_raw(1)));
        assert!(restored.is_cascade_delete(Id::from_raw(1)));
        let next = restored.snapshot().next;
        assert_eq!(next, 3);
    }
}
