use analysis::domains::{Dropped, JoinSemiLattice};

use crate::domains::{AbstractValue, FieldKey, PointsToSet};
use crate::error::{AnalysisError, Result};
use crate::location::{AINDEX, Location};
use crate::memory::Memory;

/// The value at any location. Derived locations project the value of their
/// base, the field 0 of a condition variable is its set of lockers.
pub fn get(memory: &Memory, location: &Location) -> AbstractValue {
    match location {
        Location::Nil => AbstractValue::Untyped,
        Location::FunctionPointer(function) => AbstractValue::closure(*function, Vec::new()),
        Location::Field(base, index) => {
            let base = get(memory, base);
            match (&base, *index) {
                (AbstractValue::Cond(Dropped::Elem(lockers)), 0) => {
                    AbstractValue::Pointer(lockers.clone())
                }
                (AbstractValue::Cond(Dropped::Top), 0) => AbstractValue::Wildcard,
                _ => base.field(&FieldKey::Index(*index)),
            }
        }
        Location::Index(base) => get(memory, base).field(&FieldKey::Index(AINDEX)),
        _ => memory.get(location),
    }
}

/// The join of the values at every location of the set.
pub fn get_all(memory: &Memory, locations: &PointsToSet) -> Result<AbstractValue> {
    let mut result = AbstractValue::Untyped;
    for location in locations.iter() {
        let value = get(memory, location);
        result.check_compatible(&value)?;
        result = result.join(&value, &());
    }
    Ok(result)
}

/// Writes `value` to any location. Fields are written by rewriting their
/// base. The lumped elements of arrays are always updated weakly.
pub fn update(memory: &Memory, location: &Location, value: AbstractValue) -> Result<Memory> {
    update_with(memory, location, value, false)
}

/// Joins `value` into the value at any location.
pub fn weak_update(memory: &Memory, location: &Location, value: AbstractValue) -> Result<Memory> {
    update_with(memory, location, value, true)
}

fn update_with(memory: &Memory, location: &Location, value: AbstractValue, weak: bool) -> Result<Memory> {
    match location {
        Location::Nil => Err(AnalysisError::NilWrite),
        Location::FunctionPointer(function) => Err(AnalysisError::UnsupportedOperation(format!(
            "write to the function pointer {function}"
        ))),
        Location::Field(base, index) => update_field(memory, base, *index, value, weak),
        Location::Index(base) => update_field(memory, base, AINDEX, value, true),
        _ if weak => memory.weak_update(location, value),
        _ => memory.update(location, value),
    }
}

fn update_field(
    memory: &Memory,
    base: &Location,
    index: i32,
    value: AbstractValue,
    weak: bool,
) -> Result<Memory> {
    let weak = weak || index == AINDEX;
    let old_base = get(memory, base);
    let old = get(memory, &base.field(index));
    old.check_compatible(&value)?;
    let new = if weak { old.join(&value, &()) } else { value };

    let new_base = match (&old_base, index) {
        (AbstractValue::Cond(_), 0) => AbstractValue::Cond(match new {
            AbstractValue::Pointer(lockers) => Dropped::Elem(lockers),
            AbstractValue::Untyped => Dropped::Elem(PointsToSet::new()),
            _ => Dropped::Top,
        }),
        _ => old_base.with_field(FieldKey::Index(index), new),
    };
    update_with(memory, base, new_base, false)
}

/// Records an allocation at `location` with its initial value.
pub fn heap_alloc(memory: &Memory, location: &Location, value: AbstractValue) -> Result<Memory> {
    memory.allocate(location, value, false)
}

/// Writes `value` through a pointer. The write is strong only when the
/// pointer targets a single cell, nil targets are skipped.
pub fn store(memory: &Memory, targets: &PointsToSet, value: AbstractValue) -> Result<Memory> {
    let non_nil = targets.filter_nil();
    if non_nil.is_empty() {
        if targets.has_nil() {
            return Err(AnalysisError::NilWrite);
        }
        return Ok(memory.clone());
    }
    if memory.can_strong_update(targets) {
        if let Some(target) = targets.single() {
            return update(memory, target, value);
        }
    }
    non_nil
        .sorted()
        .into_iter()
        .try_fold(memory.clone(), |mem, target| weak_update(&mem, target, value.clone()))
}
