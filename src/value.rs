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

//! Type-erased component payloads.
//!
//! Components are registered at runtime and carry no compile-time type, so
//! column cells hold a boxed payload. Runtime identity is the component id
//! alone; the payload's Rust type is recovered with `downcast_ref` at the
//! call site that knows what it stored.

use std::any::Any;
use std::fmt;

/// Object-safe bound for stored component data.
///
/// Blanket-implemented for any `'static + Clone + Debug + Send + Sync` type.
pub trait ComponentValue: Any + Send + Sync {
    fn clone_value(&self) -> Box<dyn ComponentValue>;
    fn as_any(&self) -> &dyn Any;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> ComponentValue for T
where
    T: Any + Clone + fmt::Debug + Send + Sync,
{
    fn clone_value(&self) -> Box<dyn ComponentValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque component payload stored in archetype columns and the relation
/// table.
pub struct Value(Box<dyn ComponentValue>);

impl Value {
    /// Wrap a payload.
    pub fn new<T: ComponentValue>(data: T) -> Self {
        Value(Box::new(data))
    }

    /// The payload of a value-less `add`; a tag.
    pub fn unit() -> Self {
        Value(Box::new(()))
    }

    /// Downcast to the concrete payload type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.0.as_any().is::<T>()
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        Value(self.0.clone_value())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.debug(f)
    }
}
