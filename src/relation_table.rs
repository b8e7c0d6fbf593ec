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

//! Value store for relations whose base is marked don't-fragment.
//!
//! These relations never enter archetype signatures; an archetype only
//! carries the wildcard marker for the base. The concrete `(relation, value)`
//! pairs live here, keyed by entity, and reads unify them with the archetype
//! columns.

use rustc_hash::FxHashMap;

use crate::id::Id;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct RelationTable {
    by_entity: FxHashMap<Id, FxHashMap<Id, Value>>,
}

impl RelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a relation value; returns the previous value if one existed.
    pub fn set(&mut self, entity: Id, rel: Id, value: Value) -> Option<Value> {
        self.by_entity.entry(entity).or_default().insert(rel, value)
    }

    /// Remove one relation; drops the entity's entry when it becomes empty.
    pub fn remove(&mut self, entity: Id, rel: Id) -> Option<Value> {
        let rels = self.by_entity.get_mut(&entity)?;
        let prev = rels.remove(&rel);
        if rels.is_empty() {
            self.by_entity.remove(&entity);
        }
        prev
    }

    /// Drop every relation of an entity (destruction path).
    pub fn remove_entity(&mut self, entity: Id) -> Option<FxHashMap<Id, Value>> {
        self.by_entity.remove(&entity)
    }

    pub fn get(&self, entity: Id, rel: Id) -> Option<&Value> {
        self.by_entity.get(&entity)?.get(&rel)
    }

    pub fn contains(&self, entity: Id, rel: Id) -> bool {
        self.get(entity, rel).is_some()
    }

    /// All `(relation, value)` pairs of `entity` whose base is `base`.
    pub fn relations_with_base<'a>(
        &'a self,
        entity: Id,
        base: Id,
    ) -> impl Iterator<Item = (Id, &'a Value)> + 'a {
        self.by_entity
            .get(&entity)
            .into_iter()
            .flatten()
            .filter(move |(rel, _)| rel.base() == Some(base))
            .map(|(rel, value)| (*rel, value))
    }

    pub fn has_base(&self, entity: Id, base: Id) -> bool {
        self.relations_with_base(entity, base).next().is_some()
    }

    /// All `(relation, value)` pairs of `entity`, any base.
    pub fn relations<'a>(&'a self, entity: Id) -> impl Iterator<Item = (Id, &'a Value)> + 'a {
        self.by_entity
            .get(&entity)
            .into_iter()
            .flatten()
            .map(|(rel, value)| (*rel, value))
    }
}
