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

//! Reverse references: which (source, type) pairs mention an entity.
//!
//! An entity is mentioned either as the target of an entity-relation or by
//! being used directly as a component type on another entity. The destruction
//! sweep walks this index instead of scanning archetypes.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::id::Id;

#[derive(Debug, Default)]
pub struct ReverseIndex {
    refs: FxHashMap<Id, FxHashSet<(Id, Id)>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: Id, source: Id, ty: Id) {
        self.refs.entry(target).or_default().insert((source, ty));
    }

    pub fn remove(&mut self, target: Id, source: Id, ty: Id) {
        if let Some(set) = self.refs.get_mut(&target) {
            set.remove(&(source, ty));
            if set.is_empty() {
                self.refs.remove(&target);
            }
        }
    }

    /// Detach and return every reference to `target`.
    pub fn take(&mut self, target: Id) -> Vec<(Id, Id)> {
        self.refs
            .remove(&target)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn references(&self, target: Id) -> impl Iterator<Item = (Id, Id)> + '_ {
        self.refs.get(&target).into_iter().flatten().copied()
    }

    pub fn is_referenced(&self, target: Id) -> bool {
        self.refs.contains_key(&target)
    }
}
