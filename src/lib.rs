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

//! Relational ECS - archetype storage with first-class entity relations
//!
//! Entities are grouped by their exact component-type set into columnar
//! archetypes; relations (component, target) live in the same id space as
//! components and participate in signatures, queries and hooks. Structural
//! changes are deferred through a command buffer and applied by `World::sync`.

pub mod archetype;
pub mod bitset;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod hook;
pub mod id;
pub mod query;
pub mod relation_table;
pub mod reverse_index;
pub mod snapshot;
pub mod value;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, Fetched, Signature};
pub use command::CommandBuffer;
pub use component::{ComponentOptions, ComponentRegistry};
pub use error::{EcsError, Result};
pub use hook::{GroupHooks, HookId, Hooks};
pub use id::{relation, wildcard, Id, IdKind};
pub use query::{Query, QueryKey};
pub use snapshot::Snapshot;
pub use value::Value;
pub use world::{QueryRows, World};
