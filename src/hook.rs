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

//! Lifecycle hooks fired on component set and remove.
//!
//! Hooks never touch the world directly; they receive the command buffer and
//! enqueue follow-up mutations, which the sync loop applies on its next
//! iteration. A hook registered for a concrete relation fires for that
//! relation; one registered for the wildcard form fires for every relation
//! sharing the base.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::command::CommandBuffer;
use crate::component::ComponentRegistry;
use crate::id::Id;
use crate::query::{self, QueryKey};
use crate::value::Value;

/// Single-component hook callback: `(commands, entity, type, value)`.
/// `value` is the final value for `on_set`/`on_init` and the previous value
/// for `on_remove`.
pub type HookFn = Box<dyn FnMut(&mut CommandBuffer, Id, Id, Option<&Value>) + Send>;

/// Multi-component hook callback: `(commands, entity)`.
pub type GroupHookFn = Box<dyn FnMut(&mut CommandBuffer, Id) + Send>;

/// Callbacks for a single component type (or wildcard-relation base).
#[derive(Default)]
pub struct Hooks {
    pub on_init: Option<HookFn>,
    pub on_set: Option<HookFn>,
    pub on_remove: Option<HookFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init(mut self, f: impl FnMut(&mut CommandBuffer, Id, Id, Option<&Value>) + Send + 'static) -> Self {
        self.on_init = Some(Box::new(f));
        self
    }

    pub fn on_set(mut self, f: impl FnMut(&mut CommandBuffer, Id, Id, Option<&Value>) + Send + 'static) -> Self {
        self.on_set = Some(Box::new(f));
        self
    }

    pub fn on_remove(mut self, f: impl FnMut(&mut CommandBuffer, Id, Id, Option<&Value>) + Send + 'static) -> Self {
        self.on_remove = Some(Box::new(f));
        self
    }
}

/// Callbacks observing a tuple of required component types. `on_init` is
/// invoked at registration for every entity already satisfying the tuple.
#[derive(Default)]
pub struct GroupHooks {
    pub on_init: Option<GroupHookFn>,
    pub on_set: Option<GroupHookFn>,
    pub on_remove: Option<GroupHookFn>,
}

impl GroupHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init(mut self, f: impl FnMut(&mut CommandBuffer, Id) + Send + 'static) -> Self {
        self.on_init = Some(Box::new(f));
        self
    }

    pub fn on_set(mut self, f: impl FnMut(&mut CommandBuffer, Id) + Send + 'static) -> Self {
        self.on_set = Some(Box::new(f));
        self
    }

    pub fn on_remove(mut self, f: impl FnMut(&mut CommandBuffer, Id) + Send + 'static) -> Self {
        self.on_remove = Some(Box::new(f));
        self
    }
}

/// Handle for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct GroupHook {
    id: HookId,
    key: QueryKey,
    hooks: GroupHooks,
}

/// Registry of all hooks, plus the archetype-level match cache for group
/// hooks (dispatch cost stays proportional to hooks matching the archetype,
/// not to all hooks).
#[derive(Default)]
pub(crate) struct HookRegistry {
    single: FxHashMap<Id, Vec<(HookId, Hooks)>>,
    group: Vec<GroupHook>,
    group_match_cache: FxHashMap<usize, SmallVec<[usize; 4]>>,
    next_id: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_single(&mut self, ty: Id, hooks: Hooks) -> HookId {
        self.next_id += 1;
        let id = HookId(self.next_id);
        self.single.entry(ty).or_default().push((id, hooks));
        id
    }

    pub fn register_group(&mut self, key: QueryKey, hooks: GroupHooks) -> HookId {
        self.next_id += 1;
        let id = HookId(self.next_id);
        self.group.push(GroupHook { id, key, hooks });
        self.group_match_cache.clear();
        id
    }

    /// Remove a hook by handle; returns whether anything was removed.
    pub fn unregister(&mut self, id: HookId) -> bool {
        for entries in self.single.values_mut() {
            if let Some(pos) = entries.iter().position(|(hid, _)| *hid == id) {
                entries.remove(pos);
                return true;
            }
        }
        if let Some(pos) = self.group.iter().position(|hook| hook.id == id) {
            self.group.remove(pos);
            self.group_match_cache.clear();
            return true;
        }
        false
    }

    /// Keys a concrete event type fires under: itself, and the wildcard form
    /// for relations.
    fn fire_keys(ty: Id) -> SmallVec<[Id; 2]> {
        let mut keys: SmallVec<[Id; 2]> = SmallVec::new();
        keys.push(ty);
        if ty.is_relation() && !ty.is_wildcard() {
            if let Some(star) = ty.wildcard_form() {
                keys.push(star);
            }
        }
        keys
    }

    pub fn fire_set(&mut self, commands: &mut CommandBuffer, entity: Id, ty: Id, value: Option<&Value>) {
        for key in Self::fire_keys(ty) {
            if let Some(entries) = self.single.get_mut(&key) {
                for (_, hooks) in entries.iter_mut() {
                    if let Some(f) = hooks.on_set.as_mut() {
                        f(commands, entity, ty, value);
                    }
                }
            }
        }
    }

    pub fn fire_remove(&mut self, commands: &mut CommandBuffer, entity: Id, ty: Id, prev: Option<&Value>) {
        for key in Self::fire_keys(ty) {
            if let Some(entries) = self.single.get_mut(&key) {
                for (_, hooks) in entries.iter_mut() {
                    if let Some(f) = hooks.on_remove.as_mut() {
                        f(commands, entity, ty, prev);
                    }
                }
            }
        }
    }

    /// Invoke a freshly registered `on_init` for one existing holder.
    pub fn fire_init(&mut self, id: HookId, commands: &mut CommandBuffer, entity: Id, ty: Id, value: Option<&Value>) {
        for entries in self.single.values_mut() {
            for (hid, hooks) in entries.iter_mut() {
                if *hid == id {
                    if let Some(f) = hooks.on_init.as_mut() {
                        f(commands, entity, ty, value);
                    }
                    return;
                }
            }
        }
    }

    /// Invoke a freshly registered group `on_init` for one satisfying entity.
    pub fn fire_group_init(&mut self, id: HookId, commands: &mut CommandBuffer, entity: Id) {
        if let Some(hook) = self.group.iter_mut().find(|hook| hook.id == id) {
            if let Some(f) = hook.hooks.on_init.as_mut() {
                f(commands, entity);
            }
        }
    }

    fn group_matches(
        &mut self,
        archetype: usize,
        signature: &[Id],
        registry: &ComponentRegistry,
    ) -> SmallVec<[usize; 4]> {
        if let Some(cached) = self.group_match_cache.get(&archetype) {
            return cached.clone();
        }
        let matched: SmallVec<[usize; 4]> = self
            .group
            .iter()
            .enumerate()
            .filter(|(_, hook)| query::matches(&hook.key, signature, registry))
            .map(|(idx, _)| idx)
            .collect();
        self.group_match_cache.insert(archetype, matched.clone());
        matched
    }

    /// Fire group hooks for one entity mutation, given its archetype before
    /// and after. `None` stands for "not in the world" (destroyed).
    pub fn fire_group(
        &mut self,
        commands: &mut CommandBuffer,
        entity: Id,
        old: Option<(usize, &[Id])>,
        new: Option<(usize, &[Id])>,
        registry: &ComponentRegistry,
    ) {
        let old_matched = old
            .map(|(idx, sig)| self.group_matches(idx, sig, registry))
            .unwrap_or_default();
        let new_matched = new
            .map(|(idx, sig)| self.group_matches(idx, sig, registry))
            .unwrap_or_default();

        for idx in 0..self.group.len() {
            let was = old_matched.contains(&idx);
            let is = new_matched.contains(&idx);
            let hook = &mut self.group[idx];
            if is {
                // First satisfied, or mutated while satisfying
                if let Some(f) = hook.hooks.on_set.as_mut() {
                    f(commands, entity);
                }
            } else if was {
                if let Some(f) = hook.hooks.on_remove.as_mut() {
                    f(commands, entity);
                }
            }
        }
    }

    pub fn invalidate_archetype(&mut self, archetype: usize) {
        self.group_match_cache.remove(&archetype);
    }

    pub fn has_group_hooks(&self) -> bool {
        !self.group.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_single_hook_fires_for_wildcard_form() {
        let mut registry = HookRegistry::new();
        let base = Id::from_raw(3);
        let target = Id::from_raw(2048);
        let rel = crate::id::relation(base, target).unwrap();
        let star = crate::id::wildcard(base).unwrap();

        let direct = Arc::new(AtomicUsize::new(0));
        let via_star = Arc::new(AtomicUsize::new(0));

        let d = direct.clone();
        registry.register_single(
            rel,
            Hooks::new().on_set(move |_, _, _, _| {
                d.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let s = via_star.clone();
        registry.register_single(
            star,
            Hooks::new().on_set(move |_, _, _, _| {
                s.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut commands = CommandBuffer::new();
        registry.fire_set(&mut commands, Id::from_raw(1024), rel, None);

        assert_eq!(direct.load(Ordering::SeqCst), 1);
        assert_eq!(via_star.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_stops_dispatch() {
        let mut registry = HookRegistry::new();
        let ty = Id::from_raw(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = registry.register_single(
            ty,
            Hooks::new().on_remove(move |_, _, _, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut commands = CommandBuffer::new();
        registry.fire_remove(&mut commands, Id::from_raw(1024), ty, None);
        assert!(registry.unregister(id));
        registry.fire_remove(&mut commands, Id::from_raw(1024), ty, None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
