use core::cmp::Ordering;
use core::fmt::Display;

use analysis::domains::{Height, JoinSemiLattice};
use analysis::trie::HashTrieSet;

use crate::location::Location;

/// Sets of abstract locations. The sets are canonical: a set never
/// contains both a top location and a location it represents.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PointsToSet(HashTrieSet<Location>);

impl PointsToSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(location: Location) -> Self {
        Self::new().add(location)
    }

    pub fn nil() -> Self {
        Self::singleton(Location::Nil)
    }

    pub fn add(&self, location: Location) -> Self {
        if location.is_top() {
            let pruned = if self.0.iter().any(|l| location.represents(l)) {
                self.0.filter(|l| !location.represents(l))
            } else {
                self.0.clone()
            };
            return Self(pruned.insert(location));
        }
        match location.top_representative() {
            Some(top) if self.0.contains(&top) => self.clone(),
            _ => Self(self.0.insert(location)),
        }
    }

    pub fn remove(&self, location: &Location) -> Self {
        Self(self.0.remove(location))
    }

    /// Membership either directly or through the top representative.
    pub fn contains(&self, location: &Location) -> bool {
        self.0.contains(location)
            || location
                .top_representative()
                .is_some_and(|top| self.0.contains(&top))
    }

    pub fn filter<F: FnMut(&Location) -> bool>(&self, keep: F) -> Self {
        Self(self.0.filter(keep))
    }

    /// The set without the nil pointer.
    pub fn filter_nil(&self) -> Self {
        if !self.has_nil() {
            return self.clone();
        }
        self.remove(&Location::Nil)
    }

    pub fn has_nil(&self) -> bool {
        self.0.contains(&Location::Nil)
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The only element of a singleton set.
    pub fn single(&self) -> Option<&Location> {
        let mut iter = self.0.iter();
        let first = iter.next()?;
        iter.next().is_none().then_some(first)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> + Clone {
        self.0.iter()
    }

    /// The elements in a deterministic order.
    pub fn sorted(&self) -> Vec<&Location> {
        let mut result: Vec<_> = self.0.iter().collect();
        result.sort();
        result
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }

    /// Adds every element of `other` keeping the result canonical. When
    /// `other` adds nothing new the result shares the root of `self`.
    pub fn mono_join(&self, other: &Self) -> Self {
        if self.ptr_eq(other) || other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        other.0.iter().fold(self.clone(), |acc, l| acc.add(l.clone()))
    }

    /// The elements of either set that are included in the other one,
    /// directly or through a top location.
    pub fn mono_meet(&self, other: &Self) -> Self {
        if self.ptr_eq(other) {
            return self.clone();
        }
        let mine = self.0.iter().filter(|l| other.contains(l));
        let theirs = other.0.iter().filter(|l| self.contains(l));
        mine.chain(theirs)
            .fold(Self::new(), |acc, l| acc.add(l.clone()))
    }

    pub fn leq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.iter().all(|l| other.contains(l))
    }

    /// Replaces the members represented by `top` with `top`.
    pub fn inject_top_location(&self, top: &Location) -> Self {
        if self.0.iter().any(|l| top.represents(l)) {
            self.add(top.clone())
        } else {
            self.clone()
        }
    }
}

impl FromIterator<Location> for PointsToSet {
    fn from_iter<I: IntoIterator<Item = Location>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |acc, l| acc.add(l))
    }
}

impl PartialOrd for PointsToSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.leq(other), other.leq(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl JoinSemiLattice for PointsToSet {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        Self::new()
    }

    fn join(&self, other: &Self, _: &Self::LatticeContext) -> Self {
        self.mono_join(other)
    }
}

impl Height for PointsToSet {
    fn height(&self) -> i64 {
        self.size() as i64
    }
}

impl core::fmt::Debug for PointsToSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

impl Display for PointsToSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let elements: Vec<String> = self.sorted().iter().map(|l| l.to_string()).collect();
        write!(f, "{{{}}}", elements.join(", "))
    }
}
