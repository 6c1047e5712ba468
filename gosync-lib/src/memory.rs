use core::cmp::Ordering;
use core::fmt::Display;

use analysis::domains::{Height, JoinSemiLattice, Lift, Map};

use crate::domains::{AbstractValue, PointsToSet};
use crate::error::{AnalysisError, Result};
use crate::location::Location;

/// The abstract memory: values bound to addressable locations, and the
/// allocation count of allocation sites.
///
/// A top location and a location it represents are never bound at the same
/// time. Writes to a location whose top representative is bound are
/// absorbed by the top value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Memory {
    values: Map<Location, AbstractValue>,
    /// `Some(false)` for sites allocated once, `Some(true)` for sites
    /// allocated more than once.
    allocs: Map<Location, Lift<bool>>,
}

/// Joins two values reporting the incompatible tags instead of panicking.
fn checked_join(a: &AbstractValue, b: &AbstractValue) -> Result<AbstractValue> {
    a.check_compatible(b)?;
    Ok(a.join(b, &()))
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound top representative of a location that is not top itself.
    fn bound_top(&self, location: &Location) -> Option<(Location, &AbstractValue)> {
        if location.is_top() {
            return None;
        }
        let top = location.top_representative()?;
        let value = self.values.get(&top)?;
        Some((top, value))
    }

    /// The value of an addressable location. Unbound locations and the ones
    /// that need to be resolved through a base are bottom.
    pub fn get(&self, location: &Location) -> AbstractValue {
        if !location.is_addressable() {
            return AbstractValue::Untyped;
        }
        if let Some(value) = self.values.get(location) {
            return value.clone();
        }
        match self.bound_top(location) {
            Some((_, value)) => value.clone(),
            None => AbstractValue::Untyped,
        }
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.values.contains_key(location) || self.bound_top(location).is_some()
    }

    /// Top locations, and the sites allocated more than once, stand for
    /// multiple concrete cells.
    pub fn is_multialloc(&self, location: &Location) -> bool {
        let base = location.base();
        base.is_top() || self.allocs.get(base) == Some(&Some(true))
    }

    /// Writes can replace the old value only when the set has a single
    /// element that stands for a single cell.
    pub fn can_strong_update(&self, set: &PointsToSet) -> bool {
        set.single()
            .is_some_and(|l| l.is_nil() || !self.is_multialloc(l))
    }

    /// Binds `value` to an addressable location. The update is strong unless
    /// the location stands for multiple cells.
    pub fn update(&self, location: &Location, value: AbstractValue) -> Result<Self> {
        if !location.is_addressable() {
            return Err(AnalysisError::UnsupportedOperation(format!(
                "direct write to the derived location {location}"
            )));
        }
        let old = self.get(location);
        old.check_compatible(&value)?;

        if location.is_top() {
            return self.update_top(location, value);
        }
        if let Some((top, top_value)) = self.bound_top(location) {
            if value <= *top_value {
                return Ok(self.clone());
            }
            return Err(AnalysisError::InternalConsistency(format!(
                "writing {value} to {location} is not absorbed by {top_value} at {top}"
            )));
        }
        let new = if self.is_multialloc(location) {
            old.join(&value, &())
        } else {
            value
        };
        Ok(self.bind(location.clone(), new))
    }

    /// Joins `value` into the value of an addressable location.
    pub fn weak_update(&self, location: &Location, value: AbstractValue) -> Result<Self> {
        let joined = checked_join(&self.get(location), &value)?;
        self.update(location, joined)
    }

    /// Binds the top location, absorbing the values of the locations it
    /// represents.
    fn update_top(&self, top: &Location, value: AbstractValue) -> Result<Self> {
        let represented: Vec<Location> = self
            .values
            .keys()
            .filter(|l| top.represents(l))
            .cloned()
            .collect();
        let mut joined = checked_join(&self.get(top), &value)?;
        let mut values = self.values.clone();
        for l in &represented {
            if let Some(v) = values.get(l) {
                joined = checked_join(&joined, &v.inject_top_location(top))?;
            }
            values = values.remove(l);
        }
        Ok(Self {
            values: values.insert(top.clone(), joined, &()),
            allocs: self.allocs.clone(),
        })
    }

    fn bind(&self, location: Location, value: AbstractValue) -> Self {
        Self {
            values: self.values.insert(location, value, &()),
            allocs: self.allocs.clone(),
        }
    }

    /// Records an allocation at `location` and stores its initial value.
    /// The second allocation of a site, or a forced one, makes the site
    /// multialloc and the store weak.
    pub fn allocate(&self, location: &Location, value: AbstractValue, force_multialloc: bool) -> Result<Self> {
        if location.is_top() {
            return self.update(location, value);
        }
        let multi = force_multialloc || self.allocs.contains_key(location);
        let mem = Self {
            values: self.values.clone(),
            allocs: self.allocs.insert(location.clone(), Some(multi), &()),
        };
        mem.update(location, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Location, &AbstractValue)> {
        self.values.iter()
    }

    pub fn for_each<F: FnMut(&Location, &AbstractValue)>(&self, mut f: F) {
        for (l, v) in self.values.iter() {
            f(l, v);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.values.ptr_eq(&other.values) && self.allocs.ptr_eq(&other.allocs)
    }

    /// Folds the locations represented by a bound top location into it.
    fn canonicalize(values: Map<Location, AbstractValue>) -> Map<Location, AbstractValue> {
        let tops: Vec<Location> = values.keys().filter(|l| l.is_top()).cloned().collect();
        let mut result = values.clone();
        for top in tops {
            let represented: Vec<(Location, AbstractValue)> = values
                .iter()
                .filter(|(l, _)| top.represents(l))
                .map(|(l, v)| (l.clone(), v.inject_top_location(&top)))
                .collect();
            for (l, v) in represented {
                result = result.remove(&l).join_at(top.clone(), &v, &());
            }
        }
        result
    }

    fn leq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.values.iter().all(|(l, v)| *v <= other.get(l))
            && self
                .allocs
                .iter()
                .all(|(l, a)| other.allocs.get(l).is_some_and(|b| a <= b) || other.is_multialloc(l))
    }
}

impl PartialOrd for Memory {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.leq(other), other.leq(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl JoinSemiLattice for Memory {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        Self::new()
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        if self.ptr_eq(other) {
            return self.clone();
        }
        let values = self.values.join(&other.values, ctx);
        let allocs = self.allocs.join(&other.allocs, &());
        Self {
            values: Self::canonicalize(values),
            allocs,
        }
    }
}

impl Height for Memory {
    fn height(&self) -> i64 {
        self.values.height()
    }
}

impl core::fmt::Debug for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

impl Display for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        writeln!(f, "[")?;
        for (l, v) in entries {
            let multi = if self.is_multialloc(l) { " (multi)" } else { "" };
            writeln!(f, "  {l}{multi}: {v}")?;
        }
        write!(f, "]")
    }
}
