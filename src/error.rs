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

//! Error types

use std::fmt;

use crate::id::Id;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// An identifier that does not classify, or a relation built from an
    /// out-of-range base or a bad target
    InvalidId(i64),

    /// Operation targeted an entity not present in the world
    UnknownEntity(Id),

    /// Read of a component type the entity does not carry, or a low-level
    /// column write for a type outside the archetype signature
    UnknownComponent(Id),

    /// `set` with a wildcard relation type (wildcards are read-only)
    IllegalWildcardWrite(Id),

    /// Component id space (1..=1023) exhausted
    OutOfComponentIds,

    /// Component name already bound in this world
    DuplicateComponentName(String),

    /// Query handle used after release/dispose
    QueryDisposed,

    /// The command fixed-point loop did not converge within the iteration cap
    CommandLoopExceeded,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::InvalidId(raw) => write!(f, "Invalid identifier: {raw}"),
            EcsError::UnknownEntity(id) => write!(f, "Unknown entity: {id:?}"),
            EcsError::UnknownComponent(id) => write!(f, "Unknown component: {id:?}"),
            EcsError::IllegalWildcardWrite(id) => {
                write!(f, "Illegal write through wildcard relation: {id:?}")
            }
            EcsError::OutOfComponentIds => write!(f, "Component id space exhausted (max 1023)"),
            EcsError::DuplicateComponentName(name) => {
                write!(f, "Component name already registered: {name}")
            }
            EcsError::QueryDisposed => write!(f, "Query used after dispose"),
            EcsError::CommandLoopExceeded => {
                write!(f, "Command loop failed to converge (max 100 iterations)")
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
