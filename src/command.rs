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

//! Command buffer for deferred structural mutations
//!
//! All public mutators enqueue here; `World::sync` drains the buffer with a
//! fixed-point loop, grouping commands per entity. The buffer is also the
//! only mutator surface handed to lifecycle hooks, which keeps hook
//! re-entrancy confined to message passing.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::archetype::{canonical, Signature, ValueMap};
use crate::error::{EcsError, Result};
use crate::id::{Id, IdKind};
use crate::value::Value;

/// Iteration cap for the fixed-point loop; hook-driven command chains that
/// fail to converge within this many passes abort the sync.
pub const MAX_SYNC_ITERATIONS: usize = 100;

/// Deferred structural mutation
#[derive(Debug)]
pub enum Command {
    Set { entity: Id, ty: Id, value: Value },
    Remove { entity: Id, ty: Id },
    Destroy { entity: Id },
}

impl Command {
    pub fn entity(&self) -> Id {
        match self {
            Command::Set { entity, .. }
            | Command::Remove { entity, .. }
            | Command::Destroy { entity } => *entity,
        }
    }
}

/// Command buffer for deferred operations
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Create new command buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Queue a component write. The type may be a component id, an entity id
    /// used as a tag, or a concrete relation; wildcard relations are
    /// read-only.
    pub fn set(&mut self, entity: Id, ty: Id, value: Value) -> Result<()> {
        match ty.kind() {
            IdKind::Invalid => Err(EcsError::InvalidId(ty.raw())),
            IdKind::WildcardRelation { .. } => Err(EcsError::IllegalWildcardWrite(ty)),
            _ => {
                self.commands.push(Command::Set { entity, ty, value });
                Ok(())
            }
        }
    }

    /// Queue a value-less write (a tag).
    pub fn add(&mut self, entity: Id, ty: Id) -> Result<()> {
        self.set(entity, ty, Value::unit())
    }

    /// Queue a component removal. A wildcard relation removes every relation
    /// sharing its base.
    pub fn remove(&mut self, entity: Id, ty: Id) -> Result<()> {
        if ty.kind() == IdKind::Invalid {
            return Err(EcsError::InvalidId(ty.raw()));
        }
        self.commands.push(Command::Remove { entity, ty });
        Ok(())
    }

    /// Queue entity destruction.
    pub fn despawn(&mut self, entity: Id) {
        self.commands.push(Command::Destroy { entity });
    }

    /// Snapshot the FIFO and clear the buffer (one fixed-point iteration).
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Get length
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Clear buffer
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Group a drained batch by entity, preserving per-entity insertion order and
/// first-command order across entities.
pub(crate) fn group_by_entity(batch: Vec<Command>) -> Vec<(Id, Vec<Command>)> {
    let mut order: Vec<Id> = Vec::new();
    let mut groups: FxHashMap<Id, Vec<Command>> = FxHashMap::default();
    for command in batch {
        let entity = command.entity();
        let group = groups.entry(entity).or_insert_with(|| {
            order.push(entity);
            Vec::new()
        });
        group.push(command);
    }
    order
        .into_iter()
        .map(|entity| {
            let commands = groups.remove(&entity).unwrap_or_default();
            (entity, commands)
        })
        .collect()
}

/// Per-entity accumulator of pending adds and removes.
///
/// A `set` evicts the same key from the removes and vice versa, so the last
/// intent for a type within one batch wins.
#[derive(Debug, Default)]
pub struct ChangeSet {
    adds: FxHashMap<Id, Option<Value>>,
    removes: FxHashSet<Id>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an add. `None` is the payload of internally scheduled
    /// wildcard-marker adds, which carry no value.
    pub fn set(&mut self, ty: Id, value: Option<Value>) {
        self.removes.remove(&ty);
        self.adds.insert(ty, value);
    }

    pub fn remove(&mut self, ty: Id) {
        self.adds.remove(&ty);
        self.removes.insert(ty);
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    pub fn adds(&self) -> impl Iterator<Item = (Id, Option<&Value>)> + '_ {
        self.adds.iter().map(|(ty, v)| (*ty, v.as_ref()))
    }

    pub fn pending_add(&self, ty: Id) -> bool {
        self.adds.contains_key(&ty)
    }

    pub fn pending_remove(&self, ty: Id) -> bool {
        self.removes.contains(&ty)
    }

    pub fn removes(&self) -> impl Iterator<Item = Id> + '_ {
        self.removes.iter().copied()
    }

    /// The signature after applying this change set to `current`, or `None`
    /// when unchanged. `is_structural` filters adds that never enter
    /// signatures (concrete don't-fragment relations).
    pub fn final_types(
        &self,
        current: &[Id],
        is_structural: impl Fn(Id) -> bool,
    ) -> Option<Signature> {
        let mut types: Signature = current
            .iter()
            .copied()
            .filter(|ty| !self.removes.contains(ty))
            .collect();
        for &ty in self.adds.keys() {
            if is_structural(ty) {
                types.push(ty);
            }
        }
        let types = canonical(types);
        if types[..] == *current {
            None
        } else {
            Some(types)
        }
    }

    /// Apply adds and removes onto an entity's value map.
    pub fn apply_to(&self, values: &mut ValueMap) {
        for ty in &self.removes {
            values.remove(ty);
        }
        for (&ty, value) in &self.adds {
            values.insert(ty, value.clone());
        }
    }

    /// Pending adds whose relation base is `base`.
    pub fn adds_with_base(&self, base: Id) -> SmallVec<[Id; 4]> {
        self.adds
            .keys()
            .copied()
            .filter(|ty| ty.is_relation() && ty.base() == Some(base))
            .collect()
    }
}
