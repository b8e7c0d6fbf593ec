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

//! Identifier algebra: components, entities and relations in one integer space.
//!
//! The whole id space lives in a single `i64`:
//!
//! - `0` is reserved (invalid)
//! - `1..=1023` are component ids
//! - `>= 1024` are entity ids
//! - negative values are relations, packed as `-(base << 42 | target)` where
//!   the target may be `0` (wildcard), a component id or an entity id
//!
//! Packing relations into the same space lets a relation participate anywhere
//! a component type can: archetype signatures, queries, hooks.

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, Result};

/// Highest valid component id.
pub const COMPONENT_MAX: i64 = 1023;

/// First valid entity id.
pub const ENTITY_BASE: i64 = 1024;

/// Bits reserved for the relation target.
const TARGET_BITS: u32 = 42;
const TARGET_MASK: i64 = (1 << TARGET_BITS) - 1;

/// An identifier: component, entity or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(i64);

/// Classification of an [`Id`]. Every traversal over a signature is a match
/// over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Invalid,
    /// Bare component type, `1..=1023`
    Component,
    /// Entity instance, `>= 1024`
    Entity,
    /// Relation whose target is an entity
    EntityRelation { base: Id, target: Id },
    /// Relation whose target is a component
    ComponentRelation { base: Id, target: Id },
    /// Relation with the wildcard target; matches any target with this base
    WildcardRelation { base: Id },
}

impl Id {
    /// Rehydrate an id from its raw integer form (snapshots, external stores).
    /// No validation; classify with [`Id::kind`] before trusting it.
    pub const fn from_raw(raw: i64) -> Self {
        Id(raw)
    }

    /// The raw integer form.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Classify this id. Total and allocation-free.
    pub fn kind(self) -> IdKind {
        match self.0 {
            0 => IdKind::Invalid,
            v if (1..=COMPONENT_MAX).contains(&v) => IdKind::Component,
            v if v >= ENTITY_BASE => IdKind::Entity,
            v => {
                let packed = -v;
                let base = packed >> TARGET_BITS;
                let target = packed & TARGET_MASK;
                if !(1..=COMPONENT_MAX).contains(&base) {
                    return IdKind::Invalid;
                }
                let base = Id(base);
                match target {
                    0 => IdKind::WildcardRelation { base },
                    t if t <= COMPONENT_MAX => IdKind::ComponentRelation { base, target: Id(t) },
                    t => IdKind::EntityRelation { base, target: Id(t) },
                }
            }
        }
    }

    pub fn is_component(self) -> bool {
        matches!(self.kind(), IdKind::Component)
    }

    pub fn is_entity(self) -> bool {
        matches!(self.kind(), IdKind::Entity)
    }

    pub fn is_relation(self) -> bool {
        matches!(
            self.kind(),
            IdKind::EntityRelation { .. }
                | IdKind::ComponentRelation { .. }
                | IdKind::WildcardRelation { .. }
        )
    }

    pub fn is_wildcard(self) -> bool {
        matches!(self.kind(), IdKind::WildcardRelation { .. })
    }

    /// Base component id: the id itself for a bare component, the relation's
    /// base for any relation form.
    pub fn base(self) -> Option<Id> {
        match self.kind() {
            IdKind::Component => Some(self),
            IdKind::EntityRelation { base, .. }
            | IdKind::ComponentRelation { base, .. }
            | IdKind::WildcardRelation { base } => Some(base),
            _ => None,
        }
    }

    /// Concrete relation target, if any.
    pub fn target(self) -> Option<Id> {
        match self.kind() {
            IdKind::EntityRelation { target, .. } | IdKind::ComponentRelation { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// The wildcard form of a relation (or of a bare component id).
    pub fn wildcard_form(self) -> Option<Id> {
        self.base().map(|b| Id(-(b.0 << TARGET_BITS)))
    }
}

/// Build a relation id from a base component and a concrete target.
///
/// The target must be a component id or an entity id below the target-space
/// bound; use [`wildcard`] for the star form.
pub fn relation(base: Id, target: Id) -> Result<Id> {
    if !(1..=COMPONENT_MAX).contains(&base.0) {
        return Err(EcsError::InvalidId(base.0));
    }
    match target.0 {
        t if (1..=TARGET_MASK).contains(&t) => Ok(Id(-((base.0 << TARGET_BITS) | t))),
        t => Err(EcsError::InvalidId(t)),
    }
}

/// Build the wildcard relation `(base, *)`.
///
/// The same id doubles as the archetype marker for don't-fragment bases.
pub fn wildcard(base: Id) -> Result<Id> {
    if !(1..=COMPONENT_MAX).contains(&base.0) {
        return Err(EcsError::InvalidId(base.0));
    }
    Ok(Id(-(base.0 << TARGET_BITS)))
}
