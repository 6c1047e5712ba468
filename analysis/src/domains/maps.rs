use std::collections::BTreeMap;

use crate::domains::*;
use crate::trie::HashTrie;

/// Pointwise lifting of a lattice to maps over an unbounded set of keys.
/// Keys that are not bound are mapped to bottom, and bindings to bottom are
/// never stored, so every element has a single representation.
///
/// The map is persistent: cloning is cheap, and joining a map with itself or
/// with a smaller map returns a map sharing the same trie root.
#[derive(Clone)]
pub struct Map<K, V>(HashTrie<K, V>);

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self(HashTrie::default())
    }
}

impl<K: Eq + Hash + Clone + Debug, V: JoinSemiLattice> Map<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.0.get(key)
    }

    pub fn get_or_bottom(&self, key: &K, ctx: &V::LatticeContext) -> V {
        self.0.get(key).cloned().unwrap_or_else(|| V::bottom(ctx))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.0.contains_key(key)
    }

    /// Binds `key` to `value`. Binding bottom removes the key.
    pub fn insert(&self, key: K, value: V, ctx: &V::LatticeContext) -> Self {
        if value == V::bottom(ctx) {
            return self.remove(&key);
        }
        Self(self.0.insert(key, value))
    }

    pub fn remove(&self, key: &K) -> Self {
        Self(self.0.remove(key))
    }

    /// Joins `value` into the current binding of `key`.
    pub fn join_at(&self, key: K, value: &V, ctx: &V::LatticeContext) -> Self {
        let joined = match self.0.get(&key) {
            Some(old) => old.join(value, ctx),
            None => value.clone(),
        };
        self.insert(key, joined, ctx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }

    pub fn filter<F: FnMut(&K, &V) -> bool>(&self, keep: F) -> Self {
        Self(self.0.filter(keep))
    }

    /// Applies `f` to every binding, dropping the bindings mapped to bottom.
    pub fn map_values<F>(&self, mut f: F, ctx: &V::LatticeContext) -> Self
    where
        F: FnMut(&K, &V) -> V,
    {
        let mut result = self.clone();
        for (k, v) in self.0.iter() {
            let mapped = f(k, v);
            if mapped != *v {
                result = result.insert(k.clone(), mapped, ctx);
            }
        }
        result
    }

    /// The greatest lower bound, computed pointwise. Keys bound in only one of
    /// the operands are mapped to bottom in the result.
    pub fn meet(&self, other: &Self, ctx: &V::LatticeContext) -> Self
    where
        V: Lattice,
    {
        self.meet_by(other, ctx, |a, b| a.meet(b, ctx))
    }

    /// Pointwise meet for value lattices that only have a partial meet
    /// operation, e.g., because they cannot represent their top element.
    pub fn meet_by<F>(&self, other: &Self, ctx: &V::LatticeContext, mut meet: F) -> Self
    where
        F: FnMut(&V, &V) -> V,
    {
        if self.ptr_eq(other) {
            return self.clone();
        }
        let mut result = Self::new();
        for (k, v) in self.0.iter() {
            if let Some(w) = other.0.get(k) {
                result = result.insert(k.clone(), meet(v, w), ctx);
            }
        }
        result
    }
}

impl<K: Eq + Hash + Clone + Debug, V: JoinSemiLattice> FromIterator<(K, V)> for Map<K, V>
where
    V::LatticeContext: Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let ctx: V::LatticeContext = Default::default();
        iter.into_iter()
            .fold(Self::new(), |map, (k, v)| map.join_at(k, &v, &ctx))
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for Map<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K: Eq + Hash, V: Eq> Eq for Map<K, V> {}

impl<K: Debug, V: Debug> Debug for Map<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl<K: Eq + Hash + Clone + Debug, V: JoinSemiLattice> PartialOrd for Map<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0.ptr_eq(&other.0) {
            return Some(Ordering::Equal);
        }
        let mut less = true;
        let mut greater = true;
        self.0.all_pairs(&other.0, |_, mine, theirs| {
            match (mine, theirs) {
                // Stored values are never bottom.
                (Some(_), None) => less = false,
                (None, Some(_)) => greater = false,
                (Some(a), Some(b)) => match a.partial_cmp(b) {
                    Some(Ordering::Less) => greater = false,
                    Some(Ordering::Greater) => less = false,
                    Some(Ordering::Equal) => {}
                    None => {
                        less = false;
                        greater = false;
                    }
                },
                (None, None) => {}
            }
            less || greater
        });
        match (less, greater) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl<K: Eq + Hash + Clone + Debug, V: JoinSemiLattice> JoinSemiLattice for Map<K, V> {
    type LatticeContext = V::LatticeContext;

    fn bottom(_: &Self::LatticeContext) -> Self {
        Self::new()
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        let (joined, _) = self.0.merge(&other.0, |_, a, b| {
            let result = a.join(b, ctx);
            let same = result == *a;
            (result, same)
        });
        Self(joined)
    }

    fn widen(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
        let (widened, _) = self.0.merge(&previous.0, |_, a, b| {
            let result = a.widen(b, ctx, iteration);
            let same = result == *a;
            (result, same)
        });
        Self(widened)
    }
}

impl<K, V: Height> Height for Map<K, V> {
    fn height(&self) -> i64 {
        let heights: Vec<i64> = self.0.values().map(Height::height).collect();
        if heights.iter().any(|h| *h < 0) {
            return -1;
        }
        heights.iter().fold(0_i64, |acc, h| acc.saturating_add(*h))
    }
}

/// The fixed set of keys of a [FiniteMap] together with the context of the
/// value lattice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FiniteMapCtx<K, C> {
    pub keys: Vec<K>,
    pub values: C,
}

/// Pointwise lifting of a lattice to total maps over a fixed set of keys.
/// Every key of the context is always bound.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FiniteMap<K: Ord, V>(BTreeMap<K, V>);

impl<K: Ord, V> FiniteMap<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }

    /// Rebinds a key of the map. Keys outside of the key set of the map are
    /// rejected, the map is returned unchanged.
    pub fn with(mut self, key: K, value: V) -> Self {
        if let Some(slot) = self.0.get_mut(&key) {
            *slot = value;
        }
        self
    }

    fn zip_with<F: FnMut(&V, &V) -> V>(&self, other: &Self, mut f: F) -> Self
    where
        K: Clone + Debug,
    {
        if self.0.len() != other.0.len() || self.0.keys().zip(other.0.keys()).any(|(a, b)| a != b) {
            panic!(
                "Unexpected finite map operands over different keys: {:?} and {:?}",
                self.0.keys().collect::<Vec<_>>(),
                other.0.keys().collect::<Vec<_>>()
            );
        }
        Self(
            self.0
                .iter()
                .zip(other.0.values())
                .map(|((k, a), b)| (k.clone(), f(a, b)))
                .collect(),
        )
    }
}

impl<K: Ord + Clone + Debug, V: JoinSemiLattice> PartialOrd for FiniteMap<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0.len() != other.0.len() {
            return None;
        }
        let mut result = Ordering::Equal;
        for ((ka, a), (kb, b)) in self.0.iter().zip(other.0.iter()) {
            if ka != kb {
                return None;
            }
            match (result, a.partial_cmp(b)?) {
                (_, Ordering::Equal) => {}
                (Ordering::Equal, ord) => result = ord,
                (prev, ord) if prev != ord => return None,
                _ => {}
            }
        }
        Some(result)
    }
}

impl<K: Ord + Clone + Debug + Hash, V: JoinSemiLattice> JoinSemiLattice for FiniteMap<K, V> {
    type LatticeContext = FiniteMapCtx<K, V::LatticeContext>;

    fn bottom(ctx: &Self::LatticeContext) -> Self {
        Self(
            ctx.keys
                .iter()
                .map(|k| (k.clone(), V::bottom(&ctx.values)))
                .collect(),
        )
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        self.zip_with(other, |a, b| a.join(b, &ctx.values))
    }

    fn widen(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
        self.zip_with(previous, |a, b| a.widen(b, &ctx.values, iteration))
    }
}

impl<K: Ord + Clone + Debug + Hash, V: Lattice> Lattice for FiniteMap<K, V> {
    fn top(ctx: &Self::LatticeContext) -> Self {
        Self(
            ctx.keys
                .iter()
                .map(|k| (k.clone(), V::top(&ctx.values)))
                .collect(),
        )
    }

    fn meet(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        self.zip_with(other, |a, b| a.meet(b, &ctx.values))
    }
}

impl<K: Ord, V: Height> Height for FiniteMap<K, V> {
    fn height(&self) -> i64 {
        let heights: Vec<i64> = self.0.values().map(Height::height).collect();
        if heights.iter().any(|h| *h < 0) {
            return -1;
        }
        heights.iter().fold(0_i64, |acc, h| acc.saturating_add(*h))
    }
}
