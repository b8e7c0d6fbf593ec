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

//! Entity id allocation with reuse.

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, Result};
use crate::id::{Id, ENTITY_BASE};

/// Entity ids are handed out from the freelist first, then from a monotonic
/// cursor starting at 1024. Unlike component ids, entity ids are recycled.
#[derive(Debug)]
pub struct EntityAllocator {
    next: i64,
    freelist: Vec<i64>,
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            next: ENTITY_BASE,
            freelist: Vec::new(),
        }
    }

    /// Allocate an entity id.
    ///
    /// # Panics
    /// Panics if the id cursor leaves the relation target space (2^42 ids;
    /// practically unreachable).
    pub fn alloc(&mut self) -> Id {
        if let Some(raw) = self.freelist.pop() {
            return Id::from_raw(raw);
        }
        let raw = self.next;
        if raw >= (1 << 42) {
            panic!("Entity id exhaustion at {raw:#x}");
        }
        self.next += 1;
        Id::from_raw(raw)
    }

    /// Return an id to the freelist. Fails with `InvalidId` for ids that were
    /// never handed out or are already free.
    pub fn free(&mut self, entity: Id) -> Result<()> {
        let raw = entity.raw();
        if raw < ENTITY_BASE || raw >= self.next || self.freelist.contains(&raw) {
            return Err(EcsError::InvalidId(raw));
        }
        self.freelist.push(raw);
        Ok(())
    }

    pub fn snapshot(&self) -> AllocatorSnapshot {
        AllocatorSnapshot {
            next: self.next,
            freelist: self.freelist.clone(),
        }
    }

    pub fn restore(snapshot: &AllocatorSnapshot) -> Self {
        Self {
            next: snapshot.next,
            freelist: snapshot.freelist.clone(),
        }
    }
}

/// Serializable `(cursor, freelist)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    pub next: i64,
    pub freelist: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_starts_at_entity_base() {
        let mut alloc = EntityAllocator::new();
        assert_eq!(alloc.alloc().raw(), 1024);
        assert_eq!(alloc.alloc().raw(), 1025);
    }

    #[test]
    fn test_freed_ids_are_reused() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.alloc();
        let _b = alloc.alloc();
        alloc.free(a).unwrap();
        assert_eq!(alloc.alloc(), a);
    }

    #[test]
    fn test_free_unallocated_fails() {
        let mut alloc = EntityAllocator::new();
        assert!(alloc.free(Id::from_raw(9999)).is_err());
        let a = alloc.alloc();
        alloc.free(a).unwrap();
        // Double free
        assert!(alloc.free(a).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.alloc();
        alloc.alloc();
        alloc.free(a).unwrap();

        let mut restored = EntityAllocator::restore(&alloc.snapshot());
        assert_eq!(restored.alloc(), a);
        assert_eq!(restored.alloc().raw(), 1026);
    }
}
