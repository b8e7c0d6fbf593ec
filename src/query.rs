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

//! Query system with archetype matching
//!
//! A query is a component-set predicate plus a negative filter. Cached
//! queries keep their matched-archetype list current through creation and
//! collection notifications, so repeated reads cost O(matching archetypes).

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::archetype::{canonical, Signature};
use crate::component::ComponentRegistry;
use crate::error::{EcsError, Result};
use crate::id::{Id, IdKind};

/// Component-set predicate for query caching: required types (wildcards
/// allowed) and excluded types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    required: SmallVec<[Id; 8]>,
    excluded: SmallVec<[Id; 8]>,
}

impl QueryKey {
    /// Canonicalize a (types, filter) request. Every id must classify as a
    /// component, entity or relation.
    pub fn new(required: &[Id], excluded: &[Id]) -> Result<Self> {
        for &ty in required.iter().chain(excluded) {
            if ty.kind() == IdKind::Invalid {
                return Err(EcsError::InvalidId(ty.raw()));
            }
        }
        Ok(Self {
            required: canonical(SmallVec::from_slice(required)),
            excluded: canonical(SmallVec::from_slice(excluded)),
        })
    }

    pub fn required(&self) -> &[Id] {
        &self.required
    }

    pub fn excluded(&self) -> &[Id] {
        &self.excluded
    }

    /// Concrete don't-fragment relations cannot be matched structurally; they
    /// are enforced per row against the relation table.
    pub(crate) fn row_filters(&self, registry: &ComponentRegistry) -> RowFilters {
        let off_signature = |ty: &&Id| -> bool {
            ty.is_relation() && !ty.is_wildcard() && registry.is_dont_fragment(**ty)
        };
        RowFilters {
            required: self.required.iter().filter(off_signature).copied().collect(),
            excluded: self.excluded.iter().filter(off_signature).copied().collect(),
        }
    }
}

/// Per-row side-table constraints derived from a key.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowFilters {
    pub required: SmallVec<[Id; 4]>,
    pub excluded: SmallVec<[Id; 4]>,
}

impl RowFilters {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.excluded.is_empty()
    }
}

fn any_relation_with_base(signature: &[Id], base: Id) -> bool {
    signature
        .iter()
        .any(|ty| ty.is_relation() && ty.base() == Some(base))
}

/// Archetype-level match of one required type.
fn required_matches(ty: Id, signature: &[Id], registry: &ComponentRegistry) -> bool {
    match ty.kind() {
        IdKind::WildcardRelation { base } => {
            if registry.is_dont_fragment(ty) {
                // Marker presence means some row carries such a relation
                signature.contains(&ty)
            } else {
                any_relation_with_base(signature, base)
            }
        }
        IdKind::EntityRelation { .. } | IdKind::ComponentRelation { .. }
            if registry.is_dont_fragment(ty) =>
        {
            // Off-signature; demand the marker here, the row filter does the rest
            ty.wildcard_form().is_some_and(|marker| signature.contains(&marker))
        }
        _ => signature.contains(&ty),
    }
}

/// Archetype-level rejection by one excluded type.
fn excluded_matches(ty: Id, signature: &[Id], registry: &ComponentRegistry) -> bool {
    match ty.kind() {
        // Any relation with the base rejects, the bare marker included
        IdKind::WildcardRelation { base } => any_relation_with_base(signature, base),
        IdKind::EntityRelation { .. } | IdKind::ComponentRelation { .. }
            if registry.is_dont_fragment(ty) =>
        {
            // Enforced per row; the archetype alone cannot reject
            false
        }
        _ => signature.contains(&ty),
    }
}

/// Full archetype-level predicate of a key against a signature.
pub(crate) fn matches(key: &QueryKey, signature: &[Id], registry: &ComponentRegistry) -> bool {
    key.required
        .iter()
        .all(|&ty| required_matches(ty, signature, registry))
        && !key
            .excluded
            .iter()
            .any(|&ty| excluded_matches(ty, signature, registry))
}

/// Handle to a cached query. Clones are cheap; all of them go stale together
/// once the underlying state is disposed.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) key: QueryKey,
    pub(crate) epoch: u64,
}

impl Query {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

/// Cached state for one live key.
#[derive(Debug)]
pub(crate) struct QueryState {
    pub epoch: u64,
    pub refs: usize,
    pub matches: Vec<usize>,
}

/// World-owned store of cached queries, reference-counted per key.
#[derive(Debug, Default)]
pub(crate) struct QueryRegistry {
    states: AHashMap<QueryKey, QueryState>,
    next_epoch: u64,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share or create the state for a key; `init` supplies the initial
    /// archetype scan only when the key is new.
    pub fn acquire(&mut self, key: QueryKey, init: impl FnOnce() -> Vec<usize>) -> Query {
        if let Some(state) = self.states.get_mut(&key) {
            state.refs += 1;
            return Query {
                key,
                epoch: state.epoch,
            };
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.states.insert(
            key.clone(),
            QueryState {
                epoch,
                refs: 1,
                matches: init(),
            },
        );
        Query { key, epoch }
    }

    /// The live state behind a handle; stale handles fail `QueryDisposed`.
    pub fn get(&self, query: &Query) -> Result<&QueryState> {
        self.states
            .get(&query.key)
            .filter(|state| state.epoch == query.epoch)
            .ok_or(EcsError::QueryDisposed)
    }

    /// Drop one reference; disposes the state at zero. Returns whether the
    /// state was disposed.
    pub fn release(&mut self, query: &Query) -> Result<bool> {
        let state = self
            .states
            .get_mut(&query.key)
            .filter(|state| state.epoch == query.epoch)
            .ok_or(EcsError::QueryDisposed)?;
        state.refs -= 1;
        if state.refs == 0 {
            self.states.remove(&query.key);
            return Ok(true);
        }
        Ok(false)
    }

    /// Offer a freshly created archetype to every live query.
    pub fn on_archetype_created(
        &mut self,
        index: usize,
        signature: &Signature,
        registry: &ComponentRegistry,
    ) {
        for (key, state) in self.states.iter_mut() {
            if matches(key, signature, registry) {
                state.matches.push(index);
            }
        }
    }

    /// Drop a collected archetype from every match list.
    pub fn on_archetype_removed(&mut self, index: usize) {
        for state in self.states.values_mut() {
            state.matches.retain(|&idx| idx != index);
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }
}
