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

//! World: central entity and archetype storage
//!
//! The world owns every structure: archetypes, the entity-to-archetype map,
//! both id allocators, the don't-fragment relation table, the reverse index,
//! the command buffer, cached queries and the hook registry. Public mutators
//! only enqueue commands; `sync` is the single point where structural
//! invariants are transiently broken and restored.

use std::collections::VecDeque;

use ahash::AHashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::archetype::{canonical, Archetype, FetchPlan, Fetched, Signature, ValueMap};
use crate::command::{group_by_entity, ChangeSet, Command, CommandBuffer, MAX_SYNC_ITERATIONS};
use crate::component::{ComponentOptions, ComponentRegistry};
use crate::entity::EntityAllocator;
use crate::error::{EcsError, Result};
use crate::hook::{GroupHooks, HookId, HookRegistry, Hooks};
use crate::id::{self, Id, IdKind};
use crate::query::{self, Query, QueryKey, QueryRegistry, RowFilters};
use crate::relation_table::RelationTable;
use crate::reverse_index::ReverseIndex;
use crate::snapshot::{EntitySnapshot, Snapshot, SNAPSHOT_VERSION};
use crate::value::Value;

/// Central ECS world. Single-writer; every mutation funnels through the
/// command buffer and [`World::sync`].
pub struct World {
    components: ComponentRegistry,
    entities: EntityAllocator,

    /// All archetypes; collected slots are tombstoned so indices stay stable
    archetypes: Vec<Option<Archetype>>,

    /// Maps canonical signatures to archetype indices
    archetype_index: AHashMap<Signature, usize>,

    /// For each type, the archetypes whose signature contains it
    archetypes_by_component: FxHashMap<Id, Vec<usize>>,

    /// Every live entity's archetype
    entity_archetype: FxHashMap<Id, usize>,

    /// Values of don't-fragment relations, keyed by entity
    relation_values: RelationTable,

    /// Who references whom, for cascade and cleanup on destruction
    reverse_index: ReverseIndex,

    commands: CommandBuffer,
    queries: QueryRegistry,
    hooks: HookRegistry,
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        let mut world = Self {
            components: ComponentRegistry::new(),
            entities: EntityAllocator::new(),
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            archetypes_by_component: FxHashMap::default(),
            entity_archetype: FxHashMap::default(),
            relation_values: RelationTable::new(),
            reverse_index: ReverseIndex::new(),
            commands: CommandBuffer::new(),
            queries: QueryRegistry::new(),
            hooks: HookRegistry::new(),
        };

        // Bootstrap the empty archetype (entities with no components).
        // Always at index 0, which simplifies spawn.
        world.ensure_archetype(Signature::new());
        world
    }

    // ========== Component registration ==========

    /// Register a component type.
    pub fn component(&mut self, options: ComponentOptions) -> Result<Id> {
        self.components.register(options)
    }

    /// Look up a component id by registered name.
    pub fn lookup_component(&self, name: &str) -> Option<Id> {
        self.components.lookup(name)
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.components
    }

    // ========== Entities ==========

    /// Allocate an entity. The entity starts in the empty archetype; all
    /// further structural changes go through the command buffer.
    pub fn spawn(&mut self) -> Id {
        let entity = self.entities.alloc();
        let mut values = ValueMap::default();
        self.archetype_mut(0).push(entity, &mut values);
        self.entity_archetype.insert(entity, 0);
        entity
    }

    /// Check if an entity is alive.
    pub fn exists(&self, entity: Id) -> bool {
        self.entity_archetype.contains_key(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_archetype.len()
    }

    /// Live archetypes (collected slots excluded).
    pub fn archetype_count(&self) -> usize {
        self.archetypes.iter().flatten().count()
    }

    // ========== Deferred mutators ==========

    /// Queue a component write. Applied on the next [`World::sync`].
    pub fn set(&mut self, entity: Id, ty: Id, value: Value) -> Result<()> {
        if !self.exists(entity) {
            return Err(EcsError::UnknownEntity(entity));
        }
        self.commands.set(entity, ty, value)
    }

    /// Queue a value-less write (a tag).
    pub fn add(&mut self, entity: Id, ty: Id) -> Result<()> {
        if !self.exists(entity) {
            return Err(EcsError::UnknownEntity(entity));
        }
        self.commands.add(entity, ty)
    }

    /// Queue a component removal. Removing an absent component is a no-op;
    /// removing a wildcard relation removes every relation sharing its base.
    pub fn remove(&mut self, entity: Id, ty: Id) -> Result<()> {
        if !self.exists(entity) {
            return Err(EcsError::UnknownEntity(entity));
        }
        self.commands.remove(entity, ty)
    }

    /// Queue entity destruction. Idempotent: destroying a dead entity is a
    /// no-op at execution time.
    pub fn despawn(&mut self, entity: Id) {
        self.commands.despawn(entity);
    }

    // ========== Reads ==========

    /// Check if an entity carries a type. Wildcard relations test for any
    /// relation sharing the base.
    pub fn has(&self, entity: Id, ty: Id) -> bool {
        let Some(&arch_idx) = self.entity_archetype.get(&entity) else {
            return false;
        };
        match ty.kind() {
            IdKind::Invalid => false,
            IdKind::WildcardRelation { base } => {
                if self.components.is_dont_fragment(ty) {
                    self.relation_values.has_base(entity, base)
                } else {
                    self.archetype(arch_idx)
                        .signature()
                        .iter()
                        .any(|t| !t.is_wildcard() && t.is_relation() && t.base() == Some(base))
                }
            }
            IdKind::EntityRelation { .. } | IdKind::ComponentRelation { .. }
                if self.components.is_dont_fragment(ty) =>
            {
                self.relation_values.contains(entity, ty)
            }
            _ => self.archetype(arch_idx).contains_type(ty),
        }
    }

    /// Read a concrete component value. Use [`World::relations`] for
    /// wildcards.
    pub fn get(&self, entity: Id, ty: Id) -> Result<&Value> {
        let &arch_idx = self
            .entity_archetype
            .get(&entity)
            .ok_or(EcsError::UnknownEntity(entity))?;
        match ty.kind() {
            IdKind::Invalid | IdKind::WildcardRelation { .. } => Err(EcsError::InvalidId(ty.raw())),
            IdKind::EntityRelation { .. } | IdKind::ComponentRelation { .. }
                if self.components.is_dont_fragment(ty) =>
            {
                self.relation_values
                    .get(entity, ty)
                    .ok_or(EcsError::UnknownComponent(ty))
            }
            _ => self
                .archetype(arch_idx)
                .get(entity, ty)
                .ok_or(EcsError::UnknownComponent(ty)),
        }
    }

    /// Read a concrete component value; `None` when the entity is dead or
    /// does not carry the type.
    pub fn get_opt(&self, entity: Id, ty: Id) -> Option<&Value> {
        self.get(entity, ty).ok()
    }

    /// All `(target, value)` pairs for relations on `entity` sharing a base.
    /// Accepts the wildcard relation or the bare base component id.
    pub fn relations(&self, entity: Id, rel: Id) -> Result<SmallVec<[(Id, &Value); 4]>> {
        let base = match rel.kind() {
            IdKind::WildcardRelation { base } => base,
            IdKind::Component => rel,
            _ => return Err(EcsError::InvalidId(rel.raw())),
        };
        let &arch_idx = self
            .entity_archetype
            .get(&entity)
            .ok_or(EcsError::UnknownEntity(entity))?;
        Ok(self
            .archetype(arch_idx)
            .relations(entity, base, &self.relation_values))
    }

    // ========== Sync: the fixed-point loop ==========

    /// Drain and apply queued commands to quiescence.
    ///
    /// Hooks run inside the loop and may enqueue further commands; each pass
    /// drains the whole buffer grouped per entity. Fails with
    /// `CommandLoopExceeded` when hook-driven chains do not converge within
    /// [`MAX_SYNC_ITERATIONS`] passes.
    pub fn sync(&mut self) -> Result<()> {
        for iteration in 0..MAX_SYNC_ITERATIONS {
            if self.commands.is_empty() {
                return Ok(());
            }
            let batch = self.commands.take();
            trace!(iteration, commands = batch.len(), "sync pass");
            for (entity, commands) in group_by_entity(batch) {
                self.execute_entity_commands(entity, commands)?;
            }
        }
        if self.commands.is_empty() {
            Ok(())
        } else {
            Err(EcsError::CommandLoopExceeded)
        }
    }

    /// Apply one entity's grouped commands: build the change set, transition
    /// the archetype at most once, update side structures, fire hooks.
    fn execute_entity_commands(&mut self, entity: Id, commands: Vec<Command>) -> Result<()> {
        if commands
            .iter()
            .any(|c| matches!(c, Command::Destroy { .. }))
        {
            return self.destroy_entity(entity);
        }
        // The entity may have died earlier in this sync
        let Some(&arch_idx) = self.entity_archetype.get(&entity) else {
            return Ok(());
        };

        let mut changes = ChangeSet::new();
        let mut df_bases: SmallVec<[Id; 4]> = SmallVec::new();
        let touch_df_base = |df_bases: &mut SmallVec<[Id; 4]>, base: Id| {
            if !df_bases.contains(&base) {
                df_bases.push(base);
            }
        };

        for command in commands {
            match command {
                Command::Set { ty, value, .. } => {
                    if ty.is_relation() && self.components.is_exclusive(ty) {
                        let base = ty.base().expect("relation has a base");
                        for existing in self.current_relations_with_base(entity, arch_idx, base, &changes) {
                            if existing != ty {
                                changes.remove(existing);
                            }
                        }
                    }
                    if ty.is_relation() && self.components.is_dont_fragment(ty) {
                        touch_df_base(&mut df_bases, ty.base().expect("relation has a base"));
                    }
                    changes.set(ty, Some(value));
                }
                Command::Remove { ty, .. } => match ty.kind() {
                    IdKind::WildcardRelation { base } => {
                        for existing in self.current_relations_with_base(entity, arch_idx, base, &changes) {
                            changes.remove(existing);
                        }
                        if self.components.is_dont_fragment(ty) {
                            touch_df_base(&mut df_bases, base);
                        }
                    }
                    _ => {
                        if ty.is_relation() && self.components.is_dont_fragment(ty) {
                            touch_df_base(&mut df_bases, ty.base().expect("relation has a base"));
                        }
                        changes.remove(ty);
                    }
                },
                Command::Destroy { .. } => unreachable!("handled above"),
            }
        }

        // Marker fixup: after the whole batch, an archetype carries the
        // wildcard marker for a base iff the entity keeps at least one
        // don't-fragment relation with that base.
        for &base in &df_bases {
            let marker = id::wildcard(base)?;
            let mut remaining: FxHashSet<Id> = self
                .relation_values
                .relations_with_base(entity, base)
                .map(|(rel, _)| rel)
                .collect();
            let removed: Vec<Id> = changes.removes().collect();
            for rel in removed {
                remaining.remove(&rel);
            }
            let added: Vec<Id> = changes
                .adds_with_base(base)
                .into_iter()
                .filter(|rel| !rel.is_wildcard() && self.components.is_dont_fragment(*rel))
                .collect();
            remaining.extend(added);
            if remaining.is_empty() {
                changes.remove(marker);
            } else {
                changes.set(marker, None);
            }
        }

        if changes.is_empty() {
            return Ok(());
        }

        // Snapshot everything needed after mutation starts
        let old_sig: Signature = SmallVec::from_slice(self.archetype(arch_idx).signature());
        let final_types = changes.final_types(&old_sig, |ty| self.is_structural(ty));

        let mut structural_adds: Vec<(Id, Option<Value>)> = Vec::new();
        let mut df_adds: Vec<(Id, Value)> = Vec::new();
        for (ty, value) in changes.adds() {
            if self.is_structural(ty) {
                structural_adds.push((ty, value.cloned()));
            } else {
                df_adds.push((ty, value.cloned().unwrap_or_else(Value::unit)));
            }
        }
        let mut structural_removes: Vec<Id> = Vec::new();
        let mut df_removes: Vec<Id> = Vec::new();
        for ty in changes.removes() {
            if self.is_structural(ty) {
                structural_removes.push(ty);
            } else {
                df_removes.push(ty);
            }
        }

        let mut removed_events: Vec<(Id, Option<Value>)> = Vec::new();
        let mut added_events: Vec<(Id, Option<Value>)> = Vec::new();

        // Archetype transition (at most once per entity per batch)
        let mut new_arch_idx = arch_idx;
        if let Some(new_sig) = final_types {
            let new_idx = self.ensure_archetype(new_sig);
            let mut values = self.archetype_mut(arch_idx).remove(entity)?;
            for &ty in &structural_removes {
                if ty.is_wildcard() {
                    continue; // markers are bookkeeping, not user-visible removes
                }
                if let Some(prev) = values.get(&ty) {
                    removed_events.push((ty, prev.clone()));
                }
            }
            changes.apply_to(&mut values);
            self.archetype_mut(new_idx).push(entity, &mut values);
            self.entity_archetype.insert(entity, new_idx);
            new_arch_idx = new_idx;
        } else {
            // Signature unchanged: overwrite in place
            for (ty, value) in &structural_adds {
                if let Some(value) = value {
                    self.archetype_mut(arch_idx).write(entity, *ty, value.clone())?;
                }
            }
        }

        // Don't-fragment values go through the relation table, not columns
        for &ty in &df_removes {
            if let Some(prev) = self.relation_values.remove(entity, ty) {
                removed_events.push((ty, Some(prev)));
            }
        }
        for (ty, value) in df_adds {
            self.relation_values.set(entity, ty, value.clone());
            added_events.push((ty, Some(value)));
        }
        for (ty, value) in structural_adds {
            if ty.is_wildcard() {
                continue; // markers are bookkeeping, not user-visible adds
            }
            added_events.push((ty, value));
        }

        // Reverse index: track every applied add/remove that mentions an
        // entity, as relation target or as a type used directly
        for (ty, _) in &removed_events {
            self.unindex_reference(entity, *ty);
        }
        for (ty, _) in &added_events {
            self.index_reference(entity, *ty);
        }

        let new_sig: Signature = SmallVec::from_slice(self.archetype(new_arch_idx).signature());
        self.dispatch_hooks(
            entity,
            Some((arch_idx, old_sig)),
            Some((new_arch_idx, new_sig)),
            &removed_events,
            &added_events,
        );
        Ok(())
    }

    /// Relations with `base` currently on `entity`, from the signature, the
    /// relation table and the batch's pending adds.
    fn current_relations_with_base(
        &self,
        entity: Id,
        arch_idx: usize,
        base: Id,
        changes: &ChangeSet,
    ) -> SmallVec<[Id; 4]> {
        let mut out: SmallVec<[Id; 4]> = SmallVec::new();
        for &ty in self.archetype(arch_idx).signature() {
            if ty.is_relation() && !ty.is_wildcard() && ty.base() == Some(base) {
                out.push(ty);
            }
        }
        for (rel, _) in self.relation_values.relations_with_base(entity, base) {
            if !out.contains(&rel) {
                out.push(rel);
            }
        }
        for rel in changes.adds_with_base(base) {
            if !rel.is_wildcard() && !out.contains(&rel) {
                out.push(rel);
            }
        }
        out
    }

    /// Concrete don't-fragment relations never enter signatures; everything
    /// else does (wildcard markers included).
    fn is_structural(&self, ty: Id) -> bool {
        !(ty.is_relation() && !ty.is_wildcard() && self.components.is_dont_fragment(ty))
    }

    fn index_reference(&mut self, source: Id, ty: Id) {
        match ty.kind() {
            IdKind::EntityRelation { target, .. } => self.reverse_index.insert(target, source, ty),
            IdKind::Entity => self.reverse_index.insert(ty, source, ty),
            _ => {}
        }
    }

    fn unindex_reference(&mut self, source: Id, ty: Id) {
        match ty.kind() {
            IdKind::EntityRelation { target, .. } => self.reverse_index.remove(target, source, ty),
            IdKind::Entity => self.reverse_index.remove(ty, source, ty),
            _ => {}
        }
    }

    // ========== Destruction & cascade ==========

    /// Breadth-first destruction sweep driven by the reverse index.
    fn destroy_entity(&mut self, root: Id) -> Result<()> {
        let mut queue: VecDeque<Id> = VecDeque::new();
        let mut visited: FxHashSet<Id> = FxHashSet::default();
        let mut destroyed: Vec<Id> = Vec::new();
        queue.push_back(root);

        while let Some(entity) = queue.pop_front() {
            if !visited.insert(entity) {
                continue;
            }
            if !self.exists(entity) {
                continue;
            }

            for (source, ty) in self.reverse_index.take(entity) {
                if !self.exists(source) {
                    continue;
                }
                if matches!(ty.kind(), IdKind::EntityRelation { .. })
                    && self.components.is_cascade_delete(ty)
                {
                    queue.push_back(source);
                } else {
                    // Non-cascading references are dropped right away,
                    // through the standard removal pipeline
                    self.execute_entity_commands(
                        source,
                        vec![Command::Remove { entity: source, ty }],
                    )?;
                }
            }

            self.release_entity(entity)?;
            destroyed.push(entity);
        }

        debug!(root = root.raw(), count = destroyed.len(), "destroyed entities");
        self.collect_dead_archetypes(&destroyed);
        Ok(())
    }

    /// Tear down one entity: row, relation-table entry, outgoing reverse
    /// references, id; then fire its removal hooks.
    fn release_entity(&mut self, entity: Id) -> Result<()> {
        let arch_idx = self
            .entity_archetype
            .remove(&entity)
            .expect("live entity has an archetype");
        let old_sig: Signature = SmallVec::from_slice(self.archetype(arch_idx).signature());
        let values = self.archetype_mut(arch_idx).remove(entity)?;

        let mut removed_events: Vec<(Id, Option<Value>)> = Vec::new();
        for (ty, prev) in values {
            if ty.is_wildcard() {
                continue;
            }
            self.unindex_reference(entity, ty);
            removed_events.push((ty, prev));
        }
        if let Some(relations) = self.relation_values.remove_entity(entity) {
            for (rel, prev) in relations {
                self.unindex_reference(entity, rel);
                removed_events.push((rel, Some(prev)));
            }
        }

        self.entities.free(entity)?;
        self.dispatch_hooks(entity, Some((arch_idx, old_sig)), None, &removed_events, &[]);
        Ok(())
    }

    /// Collect empty archetypes whose signature references a destroyed
    /// entity; their ids would otherwise dangle in signatures forever.
    fn collect_dead_archetypes(&mut self, destroyed: &[Id]) {
        if destroyed.is_empty() {
            return;
        }
        let dead: FxHashSet<Id> = destroyed.iter().copied().collect();
        let mut doomed: Vec<usize> = Vec::new();
        for (idx, slot) in self.archetypes.iter().enumerate() {
            let Some(archetype) = slot else { continue };
            if !archetype.is_empty() {
                continue;
            }
            let references_dead = archetype.signature().iter().any(|ty| match ty.kind() {
                IdKind::Entity => dead.contains(ty),
                IdKind::EntityRelation { target, .. } => dead.contains(&target),
                _ => false,
            });
            if references_dead {
                doomed.push(idx);
            }
        }

        for idx in doomed {
            let archetype = self.archetypes[idx].take().expect("doomed slot is live");
            let signature: Signature = SmallVec::from_slice(archetype.signature());
            debug!(archetype = idx, "collected archetype");
            self.archetype_index.remove(&signature);
            for ty in &signature {
                if let Some(list) = self.archetypes_by_component.get_mut(ty) {
                    list.retain(|&i| i != idx);
                    if list.is_empty() {
                        self.archetypes_by_component.remove(ty);
                    }
                }
            }
            self.queries.on_archetype_removed(idx);
            self.hooks.invalidate_archetype(idx);
        }
    }

    // ========== Archetype plumbing ==========

    /// Find or create the archetype for a canonical signature. Creation
    /// registers the per-component lists and notifies live queries.
    fn ensure_archetype(&mut self, signature: Signature) -> usize {
        let signature = canonical(signature);
        if let Some(&idx) = self.archetype_index.get(&signature) {
            return idx;
        }

        let idx = self.archetypes.len();
        self.archetypes.push(Some(Archetype::new(signature.clone())));
        self.archetype_index.insert(signature.clone(), idx);
        for &ty in &signature {
            self.archetypes_by_component.entry(ty).or_default().push(idx);
        }
        debug!(archetype = idx, types = signature.len(), "created archetype");
        self.queries
            .on_archetype_created(idx, &signature, &self.components);
        idx
    }

    fn archetype(&self, idx: usize) -> &Archetype {
        self.archetypes[idx].as_ref().expect("live archetype")
    }

    fn archetype_mut(&mut self, idx: usize) -> &mut Archetype {
        self.archetypes[idx].as_mut().expect("live archetype")
    }

    // ========== Hooks ==========

    /// Register lifecycle hooks for a component type or wildcard base. With
    /// `on_init`, every existing holder is visited once.
    pub fn hook(&mut self, ty: Id, hooks: Hooks) -> Result<HookId> {
        if ty.kind() == IdKind::Invalid {
            return Err(EcsError::InvalidId(ty.raw()));
        }
        let walk_init = hooks.on_init.is_some();
        let id = self.hooks.register_single(ty, hooks);

        if walk_init {
            let holders = self.query_uncached(&[ty], &[])?;
            let with_values: Vec<(Id, Option<Value>)> = holders
                .into_iter()
                .map(|entity| {
                    let value = if ty.is_wildcard() {
                        None
                    } else {
                        self.get_opt(entity, ty).cloned()
                    };
                    (entity, value)
                })
                .collect();
            let mut hooks = std::mem::take(&mut self.hooks);
            for (entity, value) in &with_values {
                hooks.fire_init(id, &mut self.commands, *entity, ty, value.as_ref());
            }
            self.hooks = hooks;
        }
        Ok(id)
    }

    /// Register a multi-component hook observing a required type tuple. With
    /// `on_init`, every entity already satisfying the tuple is visited once;
    /// satisfaction is archetype-level, like group dispatch itself.
    pub fn hook_many(&mut self, required: &[Id], hooks: GroupHooks) -> Result<HookId> {
        let key = QueryKey::new(required, &[])?;
        let walk_init = hooks.on_init.is_some();
        let id = self.hooks.register_group(key.clone(), hooks);

        if walk_init {
            let mut holders: Vec<Id> = Vec::new();
            for idx in self.scan_matching(&key) {
                holders.extend(self.archetype(idx).entities().iter().copied());
            }
            let mut hooks = std::mem::take(&mut self.hooks);
            for entity in holders {
                hooks.fire_group_init(id, &mut self.commands, entity);
            }
            self.hooks = hooks;
        }
        Ok(id)
    }

    /// Remove a hook; returns whether it was registered.
    pub fn unhook(&mut self, id: HookId) -> bool {
        self.hooks.unregister(id)
    }

    fn dispatch_hooks(
        &mut self,
        entity: Id,
        old: Option<(usize, Signature)>,
        new: Option<(usize, Signature)>,
        removed: &[(Id, Option<Value>)],
        added: &[(Id, Option<Value>)],
    ) {
        if removed.is_empty() && added.is_empty() {
            return;
        }
        // Detach the registry so hooks can enqueue into the command buffer
        // without aliasing the world
        let mut hooks = std::mem::take(&mut self.hooks);
        for (ty, prev) in removed {
            hooks.fire_remove(&mut self.commands, entity, *ty, prev.as_ref());
        }
        for (ty, value) in added {
            hooks.fire_set(&mut self.commands, entity, *ty, value.as_ref());
        }
        if hooks.has_group_hooks() {
            hooks.fire_group(
                &mut self.commands,
                entity,
                old.as_ref().map(|(idx, sig)| (*idx, &sig[..])),
                new.as_ref().map(|(idx, sig)| (*idx, &sig[..])),
                &self.components,
            );
        }
        self.hooks = hooks;
    }

    // ========== Queries ==========

    /// Create (or share) a cached query. Identical `(types, filter)` requests
    /// return handles to one reference-counted state.
    pub fn create_query(&mut self, required: &[Id], excluded: &[Id]) -> Result<Query> {
        let key = QueryKey::new(required, excluded)?;
        let matches = self.scan_matching(&key);
        Ok(self.queries.acquire(key, move || matches))
    }

    /// Drop one reference to a cached query; the state is disposed at zero
    /// and any further read through a stale handle fails `QueryDisposed`.
    pub fn release_query(&mut self, query: &Query) -> Result<()> {
        self.queries.release(query).map(|_| ())
    }

    /// Entities matched by a cached query.
    pub fn query_entities(&self, query: &Query) -> Result<Vec<Id>> {
        let state = self.queries.get(query)?;
        let filters = query.key().row_filters(&self.components);
        let mut out = Vec::new();
        for &idx in &state.matches {
            let archetype = self.archetype(idx);
            for &entity in archetype.entities() {
                if self.row_passes(entity, &filters) {
                    out.push(entity);
                }
            }
        }
        Ok(out)
    }

    /// Visit every matched entity with the values of `types`. Wildcard
    /// positions yield `(target, value)` lists.
    pub fn query_for_each<F>(&self, query: &Query, types: &[Id], mut f: F) -> Result<()>
    where
        F: FnMut(Id, &[Fetched<'_>]),
    {
        let state = self.queries.get(query)?;
        let filters = query.key().row_filters(&self.components);
        for &idx in &state.matches {
            let archetype = self.archetype(idx);
            let plan = archetype.fetch_plan(types, &self.components);
            for row in 0..archetype.len() {
                let entity = archetype.entities()[row];
                if !self.row_passes(entity, &filters) {
                    continue;
                }
                let fetched = archetype.fetch_row(&plan, row, &self.relation_values);
                f(entity, &fetched);
            }
        }
        Ok(())
    }

    /// Iterate matched rows lazily.
    pub fn query_iter<'w>(&'w self, query: &Query, types: &[Id]) -> Result<QueryRows<'w>> {
        let state = self.queries.get(query)?;
        Ok(QueryRows {
            world: self,
            matches: state.matches.clone(),
            types: SmallVec::from_slice(types),
            filters: query.key().row_filters(&self.components),
            arch_cursor: 0,
            row_cursor: 0,
            plan: None,
        })
    }

    /// `(entity, value)` pairs of one concrete type across all matches.
    pub fn query_component_data<'w>(
        &'w self,
        query: &Query,
        ty: Id,
    ) -> Result<Vec<(Id, Option<&'w Value>)>> {
        let state = self.queries.get(query)?;
        let filters = query.key().row_filters(&self.components);
        let types = [ty];
        let mut out = Vec::new();
        for &idx in &state.matches {
            let archetype = self.archetype(idx);
            let plan = archetype.fetch_plan(&types, &self.components);
            for row in 0..archetype.len() {
                let entity = archetype.entities()[row];
                if !self.row_passes(entity, &filters) {
                    continue;
                }
                let fetched = archetype.fetch_row(&plan, row, &self.relation_values);
                out.push((entity, fetched[0].value()));
            }
        }
        Ok(out)
    }

    /// Ad-hoc query without caching.
    pub fn query(&self, types: &[Id]) -> Result<Vec<Id>> {
        self.query_uncached(types, &[])
    }

    /// Ad-hoc query with a negative filter.
    pub fn query_filtered(&self, types: &[Id], excluded: &[Id]) -> Result<Vec<Id>> {
        self.query_uncached(types, excluded)
    }

    fn query_uncached(&self, required: &[Id], excluded: &[Id]) -> Result<Vec<Id>> {
        let key = QueryKey::new(required, excluded)?;
        let filters = key.row_filters(&self.components);
        let mut out = Vec::new();
        for idx in self.scan_matching(&key) {
            for &entity in self.archetype(idx).entities() {
                if self.row_passes(entity, &filters) {
                    out.push(entity);
                }
            }
        }
        Ok(out)
    }

    fn row_passes(&self, entity: Id, filters: &RowFilters) -> bool {
        if filters.is_empty() {
            return true;
        }
        filters
            .required
            .iter()
            .all(|&rel| self.relation_values.contains(entity, rel))
            && !filters
                .excluded
                .iter()
                .any(|&rel| self.relation_values.contains(entity, rel))
    }

    /// Scan for archetypes matching a key, seeded from the per-component
    /// lists when a required type pins one down.
    fn scan_matching(&self, key: &QueryKey) -> Vec<usize> {
        let seed = key.required().iter().find_map(|&ty| self.index_key(ty));
        match seed {
            Some(index_ty) => self
                .archetypes_by_component
                .get(&index_ty)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&idx| self.archetype_live_matches(key, idx))
                .collect(),
            None => (0..self.archetypes.len())
                .filter(|&idx| self.archetype_live_matches(key, idx))
                .collect(),
        }
    }

    fn archetype_live_matches(&self, key: &QueryKey, idx: usize) -> bool {
        self.archetypes[idx]
            .as_ref()
            .is_some_and(|archetype| query::matches(key, archetype.signature(), &self.components))
    }

    /// The signature entry that indexes archetypes carrying `ty`, if the type
    /// pins one down: itself for structural types, the marker for
    /// don't-fragment forms. Non-don't-fragment wildcards match through any
    /// base relation and cannot seed.
    fn index_key(&self, ty: Id) -> Option<Id> {
        match ty.kind() {
            IdKind::WildcardRelation { .. } => {
                if self.components.is_dont_fragment(ty) {
                    Some(ty)
                } else {
                    None
                }
            }
            IdKind::EntityRelation { .. } | IdKind::ComponentRelation { .. } => {
                if self.components.is_dont_fragment(ty) {
                    ty.wildcard_form()
                } else {
                    Some(ty)
                }
            }
            _ => Some(ty),
        }
    }

    // ========== Snapshot boundary ==========

    /// Capture the world's entity-by-archetype state. Values are opaque
    /// clones; wildcard markers are derived state and stay out.
    pub fn snapshot(&self) -> Snapshot {
        let mut entities: Vec<EntitySnapshot> = Vec::with_capacity(self.entity_archetype.len());
        for (&entity, &arch_idx) in &self.entity_archetype {
            let archetype = self.archetype(arch_idx);
            let mut components: Vec<(Id, Option<Value>)> = Vec::new();
            for &ty in archetype.signature() {
                if ty.is_wildcard() {
                    continue;
                }
                components.push((ty, archetype.get(entity, ty).cloned()));
            }
            for (rel, value) in self.relation_values.relations(entity) {
                components.push((rel, Some(value.clone())));
            }
            entities.push(EntitySnapshot {
                id: entity,
                components,
            });
        }
        entities.sort_by_key(|snapshot| snapshot.id);

        Snapshot {
            version: SNAPSHOT_VERSION,
            entity_allocator: self.entities.snapshot(),
            components: self.components.snapshot(),
            entities,
        }
    }

    /// Rebuild a world from a snapshot: allocators first, then one archetype
    /// placement per entity, then the reverse index.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<World> {
        let mut world = World::new();
        world.components = ComponentRegistry::restore(&snapshot.components);
        world.entities = EntityAllocator::restore(&snapshot.entity_allocator);

        for entity_snapshot in &snapshot.entities {
            let entity = entity_snapshot.id;
            if !entity.is_entity() {
                return Err(EcsError::InvalidId(entity.raw()));
            }

            let mut signature = Signature::new();
            let mut values = ValueMap::default();
            let mut relations: Vec<(Id, Value)> = Vec::new();
            for (ty, value) in &entity_snapshot.components {
                if ty.kind() == IdKind::Invalid || ty.is_wildcard() {
                    return Err(EcsError::InvalidId(ty.raw()));
                }
                if world.is_structural(*ty) {
                    signature.push(*ty);
                    values.insert(*ty, value.clone());
                } else {
                    relations.push((*ty, value.clone().unwrap_or_else(Value::unit)));
                }
            }
            for (rel, _) in &relations {
                let marker = rel.wildcard_form().expect("relation has a base");
                if !signature.contains(&marker) {
                    signature.push(marker);
                }
            }

            let arch_idx = world.ensure_archetype(signature);
            world.archetype_mut(arch_idx).push(entity, &mut values);
            world.entity_archetype.insert(entity, arch_idx);
            for (rel, value) in relations {
                world.relation_values.set(entity, rel, value);
                world.index_reference(entity, rel);
            }
            for (ty, _) in &entity_snapshot.components {
                if world.is_structural(*ty) {
                    world.index_reference(entity, *ty);
                }
            }
        }
        Ok(world)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy row iterator over a cached query's matches.
pub struct QueryRows<'w> {
    world: &'w World,
    matches: Vec<usize>,
    types: SmallVec<[Id; 8]>,
    filters: RowFilters,
    arch_cursor: usize,
    row_cursor: usize,
    plan: Option<FetchPlan>,
}

impl<'w> Iterator for QueryRows<'w> {
    type Item = (Id, SmallVec<[Fetched<'w>; 4]>);

    fn next(&mut self) -> Option<Self::Item> {
        let world: &'w World = self.world;
        loop {
            let &arch_idx = self.matches.get(self.arch_cursor)?;
            let archetype = world.archetype(arch_idx);
            if self.row_cursor >= archetype.len() {
                self.arch_cursor += 1;
                self.row_cursor = 0;
                self.plan = None;
                continue;
            }
            let row = self.row_cursor;
            self.row_cursor += 1;

            let entity = archetype.entities()[row];
            if !world.row_passes(entity, &self.filters) {
                continue;
            }
            let plan = self
                .plan
                .get_or_insert_with(|| archetype.fetch_plan(&self.types, &world.components));
            let fetched = archetype.fetch_row(plan, row, &world.relation_values);
            return Some((entity, fetched));
        }
    }
}
