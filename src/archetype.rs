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

//! Archetype storage with row allocation and removal
//!
//! An archetype holds every entity whose structural component-type set is
//! exactly its signature, one column per signature entry. Row `i` of every
//! column belongs to `entities[i]`.

use std::cell::RefCell;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::component::ComponentRegistry;
use crate::error::{EcsError, Result};
use crate::id::{Id, IdKind};
use crate::relation_table::RelationTable;
use crate::value::Value;

/// Component signature: the canonical sorted type list.
pub type Signature = SmallVec<[Id; 8]>;

/// Sort and dedup a type list into its canonical signature form.
pub(crate) fn canonical(mut types: Signature) -> Signature {
    types.sort_unstable();
    types.dedup();
    types
}

/// Values carried by an entity, keyed by type. `None` marks a cell that was
/// never written (wildcard-marker columns); it is internal and never escapes
/// through the read surface.
pub type ValueMap = FxHashMap<Id, Option<Value>>;

/// One column of payloads, parallel to the entity vector.
#[derive(Debug, Default)]
struct Column {
    cells: Vec<Option<Value>>,
}

/// Archetype: Structure of Arrays storage
pub struct Archetype {
    signature: Signature,
    entities: Vec<Id>,
    columns: Vec<Column>,
    column_indices: FxHashMap<Id, usize>,
    rows: FxHashMap<Id, usize>,
    fetch_plans: RefCell<FxHashMap<SmallVec<[Id; 8]>, FetchPlan>>,
}

impl Archetype {
    /// Create new archetype; the signature must already be canonical.
    pub fn new(signature: Signature) -> Self {
        let mut column_indices = FxHashMap::default();
        let mut columns = Vec::with_capacity(signature.len());
        for (idx, &ty) in signature.iter().enumerate() {
            column_indices.insert(ty, idx);
            columns.push(Column::default());
        }
        Self {
            signature,
            entities: Vec::new(),
            columns,
            column_indices,
            rows: FxHashMap::default(),
            fetch_plans: RefCell::new(FxHashMap::default()),
        }
    }

    /// Get signature
    pub fn signature(&self) -> &[Id] {
        &self.signature
    }

    pub fn contains_type(&self, ty: Id) -> bool {
        self.column_indices.contains_key(&ty)
    }

    /// Get all entities
    pub fn entities(&self) -> &[Id] {
        &self.entities
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn row_of(&self, entity: Id) -> Option<usize> {
        self.rows.get(&entity).copied()
    }

    /// Allocate a row for an entity not yet present, consuming the matching
    /// values from `values`. Signature types without a provided value get the
    /// unwritten sentinel.
    pub fn push(&mut self, entity: Id, values: &mut ValueMap) -> usize {
        debug_assert!(!self.rows.contains_key(&entity), "entity already present");
        let row = self.entities.len();
        self.entities.push(entity);
        for (idx, &ty) in self.signature.iter().enumerate() {
            self.columns[idx].cells.push(values.remove(&ty).flatten());
        }
        self.rows.insert(entity, row);
        row
    }

    /// Remove a row and return its values. The last row is swapped into the
    /// hole and its index-map entry rewritten, keeping rows compact.
    pub fn remove(&mut self, entity: Id) -> Result<ValueMap> {
        let row = self
            .rows
            .remove(&entity)
            .ok_or(EcsError::UnknownEntity(entity))?;

        self.entities.swap_remove(row);
        let mut values = ValueMap::default();
        for (idx, &ty) in self.signature.iter().enumerate() {
            values.insert(ty, self.columns[idx].cells.swap_remove(row));
        }

        // If we swapped someone in, rewrite their row index
        if row < self.entities.len() {
            self.rows.insert(self.entities[row], row);
        }
        Ok(values)
    }

    /// Read a concrete column cell. `None` for absent rows, absent columns
    /// and unwritten cells.
    pub fn get(&self, entity: Id, ty: Id) -> Option<&Value> {
        let row = self.row_of(entity)?;
        let idx = *self.column_indices.get(&ty)?;
        self.columns[idx].cells[row].as_ref()
    }

    /// Write a concrete column cell in place.
    pub fn write(&mut self, entity: Id, ty: Id, value: Value) -> Result<()> {
        let row = self
            .rows
            .get(&entity)
            .copied()
            .ok_or(EcsError::UnknownEntity(entity))?;
        let idx = *self
            .column_indices
            .get(&ty)
            .ok_or(EcsError::UnknownComponent(ty))?;
        self.columns[idx].cells[row] = Some(value);
        Ok(())
    }

    /// All concrete `(target, value)` pairs on `entity` whose relation base is
    /// `base`, unifying signature columns with the don't-fragment table.
    pub fn relations<'a>(
        &'a self,
        entity: Id,
        base: Id,
        table: &'a RelationTable,
    ) -> SmallVec<[(Id, &'a Value); 4]> {
        let mut out = SmallVec::new();
        if let Some(row) = self.row_of(entity) {
            for (idx, &ty) in self.signature.iter().enumerate() {
                match ty.kind() {
                    IdKind::EntityRelation { base: b, target }
                    | IdKind::ComponentRelation { base: b, target }
                        if b == base =>
                    {
                        if let Some(value) = self.columns[idx].cells[row].as_ref() {
                            out.push((target, value));
                        }
                    }
                    _ => {}
                }
            }
            for (rel, value) in table.relations_with_base(entity, base) {
                if let Some(target) = rel.target() {
                    out.push((target, value));
                }
            }
        }
        out
    }

    /// Resolve a types list against this archetype. Cached per distinct list;
    /// the signature never changes after construction, so plans stay valid for
    /// the archetype's lifetime.
    pub(crate) fn fetch_plan(&self, types: &[Id], registry: &ComponentRegistry) -> FetchPlan {
        let key: SmallVec<[Id; 8]> = SmallVec::from_slice(types);
        if let Some(plan) = self.fetch_plans.borrow().get(&key) {
            return plan.clone();
        }

        let mut steps = SmallVec::new();
        for &ty in types {
            let step = match ty.kind() {
                IdKind::WildcardRelation { base } => {
                    let mut columns = SmallVec::new();
                    for (idx, &sig_ty) in self.signature.iter().enumerate() {
                        match sig_ty.kind() {
                            IdKind::EntityRelation { base: b, target }
                            | IdKind::ComponentRelation { base: b, target }
                                if b == base =>
                            {
                                columns.push((target, idx));
                            }
                            _ => {}
                        }
                    }
                    FetchStep::Wildcard {
                        base,
                        columns,
                        dont_fragment: registry.is_dont_fragment(ty),
                    }
                }
                _ => match self.column_indices.get(&ty) {
                    Some(&idx) => FetchStep::Column(idx),
                    // Concrete don't-fragment relations live off-signature
                    None => FetchStep::RelationValue(ty),
                },
            };
            steps.push(step);
        }

        let plan = FetchPlan { steps };
        self.fetch_plans.borrow_mut().insert(key, plan.clone());
        plan
    }

    /// Materialize one row of a plan.
    pub(crate) fn fetch_row<'a>(
        &'a self,
        plan: &FetchPlan,
        row: usize,
        table: &'a RelationTable,
    ) -> SmallVec<[Fetched<'a>; 4]> {
        let entity = self.entities[row];
        plan.steps
            .iter()
            .map(|step| match step {
                FetchStep::Column(idx) => Fetched::Value(self.columns[*idx].cells[row].as_ref()),
                FetchStep::RelationValue(rel) => Fetched::Value(table.get(entity, *rel)),
                FetchStep::Wildcard {
                    base,
                    columns,
                    dont_fragment,
                } => {
                    let mut pairs: SmallVec<[(Id, &Value); 4]> = SmallVec::new();
                    for (target, idx) in columns {
                        if let Some(value) = self.columns[*idx].cells[row].as_ref() {
                            pairs.push((*target, value));
                        }
                    }
                    if *dont_fragment {
                        for (rel, value) in table.relations_with_base(entity, *base) {
                            if let Some(target) = rel.target() {
                                pairs.push((target, value));
                            }
                        }
                    }
                    Fetched::Relations(pairs)
                }
            })
            .collect()
    }
}

/// Resolved access path for one types list against one archetype.
#[derive(Debug, Clone)]
pub(crate) struct FetchPlan {
    steps: SmallVec<[FetchStep; 8]>,
}

#[derive(Debug, Clone)]
enum FetchStep {
    Column(usize),
    RelationValue(Id),
    Wildcard {
        base: Id,
        columns: SmallVec<[(Id, usize); 4]>,
        dont_fragment: bool,
    },
}

/// One position of a fetched row.
#[derive(Debug)]
pub enum Fetched<'a> {
    /// Payload of a concrete type; `None` when the entity has no value for it.
    Value(Option<&'a Value>),
    /// `(target, value)` pairs of a wildcard position.
    Relations(SmallVec<[(Id, &'a Value); 4]>),
}

impl<'a> Fetched<'a> {
    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Fetched::Value(v) => *v,
            Fetched::Relations(_) => None,
        }
    }

    pub fn relations(&self) -> &[(Id, &'a Value)] {
        match self {
            Fetched::Value(_) => &[],
            Fetched::Relations(pairs) => pairs,
        }
    }
}
