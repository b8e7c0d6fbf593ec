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

//! World snapshots.
//!
//! A snapshot is an in-memory capture: the entity allocator state, the
//! component registry, and per-entity component lists with opaque cloned
//! values. The identifier-level parts serialize with serde; values do not
//! cross this boundary in any wire format.

use crate::component::RegistrySnapshot;
use crate::entity::AllocatorSnapshot;
use crate::id::Id;
use crate::value::Value;

pub const SNAPSHOT_VERSION: u32 = 1;

/// A capture of world state, restorable with `World::from_snapshot`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u32,
    pub entity_allocator: AllocatorSnapshot,
    pub components: RegistrySnapshot,
    pub entities: Vec<EntitySnapshot>,
}

/// One entity with its component types and values. Don't-fragment relations
/// appear like any other component; wildcard markers are derived on restore
/// and never stored.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub id: Id,
    pub components: Vec<(Id, Option<Value>)>,
}

#[cfg(test)]
mod tests {
    use crate::component::{ComponentOptions, ComponentRegistry};
    use crate::entity::{AllocatorSnapshot, EntityAllocator};

    #[test]
    fn test_allocator_snapshot_serializes() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.alloc();
        alloc.alloc();
        alloc.free(a).unwrap();

        let json = serde_json::to_string(&alloc.snapshot()).unwrap();
        let back: AllocatorSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.next, 1026);
        assert_eq!(back.freelist, vec![1024]);
    }

    #[test]
    fn test_registry_snapshot_serializes() {
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentOptions::named("ChildOf").dont_fragment())
            .unwrap();

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        let back: crate::component::RegistrySnapshot = serde_json::from_str(&json).unwrap();
        let restored = ComponentRegistry::restore(&back);
        assert!(restored.is_dont_fragment(crate::id::Id::from_raw(1)));
        assert_eq!(restored.lookup("ChildOf"), Some(crate::id::Id::from_raw(1)));
    }
}
