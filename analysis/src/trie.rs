use core::fmt::Debug;
use core::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::FxHasher;

/// Hash used to place keys in a [`HashTrie`]. It does not depend on any
/// per-process random state, so the shape of a trie only depends on its
/// key set.
pub fn stable_hash<K: Hash + ?Sized>(key: &K) -> u32 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    let full = hasher.finish();
    (full ^ (full >> 32)) as u32
}

enum Node<K, V> {
    /// All the entries sharing the same hash.
    Leaf { hash: u32, entries: Vec<(K, V)> },
    /// Keys matching `prefix` above `bit`, split on `bit`.
    Branch {
        prefix: u32,
        bit: u32,
        size: usize,
        left: Rc<Node<K, V>>,
        right: Rc<Node<K, V>>,
    },
}

impl<K, V> Node<K, V> {
    fn size(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Branch { size, .. } => *size,
        }
    }

    /// Prefix and branching bit. Leaves behave like a branch on bit 0.
    fn shape(&self) -> (u32, u32) {
        match self {
            Node::Leaf { hash, .. } => (*hash, 0),
            Node::Branch { prefix, bit, .. } => (*prefix, *bit),
        }
    }
}

fn mask(hash: u32, bit: u32) -> u32 {
    hash & !((bit << 1).wrapping_sub(1))
}

fn matches(hash: u32, prefix: u32, bit: u32) -> bool {
    mask(hash, bit) == prefix
}

fn goes_right(hash: u32, bit: u32) -> bool {
    hash & bit != 0
}

fn branching_bit(a: u32, b: u32) -> u32 {
    1 << (31 - (a ^ b).leading_zeros())
}

fn branch<K, V>(prefix: u32, bit: u32, left: Rc<Node<K, V>>, right: Rc<Node<K, V>>) -> Rc<Node<K, V>> {
    let size = left.size() + right.size();
    Rc::new(Node::Branch {
        prefix,
        bit,
        size,
        left,
        right,
    })
}

/// Joins two subtrees with disjoint prefixes under a fresh branch.
fn link<K, V>(p0: u32, t0: Rc<Node<K, V>>, p1: u32, t1: Rc<Node<K, V>>) -> Rc<Node<K, V>> {
    let bit = branching_bit(p0, p1);
    let prefix = mask(p0, bit);
    if goes_right(p0, bit) {
        branch(prefix, bit, t1, t0)
    } else {
        branch(prefix, bit, t0, t1)
    }
}

/// A persistent map implemented as a big-endian Patricia trie over the
/// [`stable_hash`] of the keys. Updates copy the path to the modified leaf
/// and share everything else, so cloning is O(1) and two versions of a map
/// share most of their nodes.
///
/// The shape of the trie is canonical: two tries with the same key set have
/// the same structure. [`HashTrie::merge`] and [`HashTrie::equal`] exploit
/// this by skipping subtrees that are shared between the operands, and
/// operations that do not change the map return a trie with the very same
/// root, see [`HashTrie::ptr_eq`].
pub struct HashTrie<K, V> {
    root: Option<Rc<Node<K, V>>>,
}

impl<K, V> Clone for HashTrie<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for HashTrie<K, V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<K, V> HashTrie<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.size())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// True if both tries have the same root node. Implies equality.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Iterates the entries in the order of their hashes.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: self.root.as_deref().into_iter().collect(),
            bucket: Default::default(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + Clone {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K: Eq + Hash, V> HashTrie<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = stable_hash(key);
        let mut node = self.root.as_ref()?;
        loop {
            match node.as_ref() {
                Node::Leaf { hash: h, entries } => {
                    if *h != hash {
                        return None;
                    }
                    return entries.iter().find(|(k, _)| k == key).map(|(_, v)| v);
                }
                Node::Branch {
                    prefix,
                    bit,
                    left,
                    right,
                    ..
                } => {
                    if !matches(hash, *prefix, *bit) {
                        return None;
                    }
                    node = if goes_right(hash, *bit) { right } else { left };
                }
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Compares two tries entry by entry. Subtrees shared between the two
    /// tries are considered equal without looking at them.
    pub fn equal<F>(&self, other: &Self, mut eq: F) -> bool
    where
        F: FnMut(&V, &V) -> bool,
    {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => equal_node(a, b, &mut eq),
            _ => false,
        }
    }

    /// Calls `pred` for every key present in at least one of the tries with
    /// the corresponding values, and returns whether all calls returned true.
    /// Subtrees shared between the tries are skipped, so `pred` must hold
    /// for identical values.
    pub fn all_pairs<F>(&self, other: &Self, mut pred: F) -> bool
    where
        F: FnMut(&K, Option<&V>, Option<&V>) -> bool,
    {
        all_pairs_node(self.root.as_ref(), other.root.as_ref(), &mut pred)
    }
}

impl<K: Eq + Hash + Clone, V: Clone> HashTrie<K, V> {
    /// Returns a trie where `key` is bound to `value`. When the key is
    /// already bound to an equal value, the result shares the root of `self`.
    pub fn insert(&self, key: K, value: V) -> Self
    where
        V: PartialEq,
    {
        let hash = stable_hash(&key);
        let root = match &self.root {
            None => Rc::new(Node::Leaf {
                hash,
                entries: vec![(key, value)],
            }),
            Some(root) => insert_node(root, hash, key, value),
        };
        Self { root: Some(root) }
    }

    /// Returns a trie without `key`. When the key is not bound, the result
    /// shares the root of `self`.
    pub fn remove(&self, key: &K) -> Self {
        let Some(root) = &self.root else {
            return self.clone();
        };
        match remove_node(root, stable_hash(key), key) {
            None => self.clone(),
            Some(root) => Self { root },
        }
    }

    /// Keeps the entries satisfying the predicate.
    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut result = self.clone();
        for (k, v) in self.iter() {
            if !keep(k, v) {
                result = result.remove(k);
            }
        }
        result
    }

    /// Merges two tries. Keys bound in only one of the operands keep their
    /// value, keys bound in both are combined with `combine`, which returns
    /// the combined value and whether it is equal to the value on the left.
    ///
    /// Subtrees shared between the operands are reused verbatim, so
    /// `combine` must return its left operand (flagged as equal) for
    /// identical operands. The returned flag is true when the result is
    /// equal to `self`, in which case the result shares the root of `self`.
    pub fn merge<F>(&self, other: &Self, mut combine: F) -> (Self, bool)
    where
        F: FnMut(&K, &V, &V) -> (V, bool),
    {
        match (&self.root, &other.root) {
            (_, None) => (self.clone(), true),
            (None, Some(_)) => (other.clone(), false),
            (Some(a), Some(b)) => {
                let (root, same) = merge_node(a, b, &mut combine);
                (Self { root: Some(root) }, same)
            }
        }
    }

    /// Applies `f` to every value, sharing the nodes where `f` returned an
    /// equal value.
    pub fn map_values<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&K, &V) -> V,
        V: PartialEq,
    {
        let mut result = self.clone();
        for (k, v) in self.iter() {
            let mapped = f(k, v);
            if mapped != *v {
                result = result.insert(k.clone(), mapped);
            }
        }
        result
    }
}

fn insert_node<K: Eq + Clone, V: Clone + PartialEq>(
    node: &Rc<Node<K, V>>,
    hash: u32,
    key: K,
    value: V,
) -> Rc<Node<K, V>> {
    match node.as_ref() {
        Node::Leaf { hash: h, entries } if *h == hash => {
            let position = entries.iter().position(|(k, _)| *k == key);
            if position.is_some_and(|pos| entries[pos].1 == value) {
                return node.clone();
            }
            let mut entries = entries.clone();
            match position {
                Some(pos) => entries[pos].1 = value,
                None => entries.push((key, value)),
            }
            Rc::new(Node::Leaf { hash, entries })
        }
        Node::Leaf { hash: h, .. } => link(
            hash,
            Rc::new(Node::Leaf {
                hash,
                entries: vec![(key, value)],
            }),
            *h,
            node.clone(),
        ),
        Node::Branch {
            prefix,
            bit,
            left,
            right,
            ..
        } => {
            if !matches(hash, *prefix, *bit) {
                let leaf = Rc::new(Node::Leaf {
                    hash,
                    entries: vec![(key, value)],
                });
                return link(hash, leaf, *prefix, node.clone());
            }
            if goes_right(hash, *bit) {
                let new_right = insert_node(right, hash, key, value);
                if Rc::ptr_eq(&new_right, right) {
                    return node.clone();
                }
                branch(*prefix, *bit, left.clone(), new_right)
            } else {
                let new_left = insert_node(left, hash, key, value);
                if Rc::ptr_eq(&new_left, left) {
                    return node.clone();
                }
                branch(*prefix, *bit, new_left, right.clone())
            }
        }
    }
}

/// Returns `None` when the key was not found, `Some(None)` when the subtree
/// became empty.
fn remove_node<K: Eq + Clone, V: Clone>(
    node: &Rc<Node<K, V>>,
    hash: u32,
    key: &K,
) -> Option<Option<Rc<Node<K, V>>>> {
    match node.as_ref() {
        Node::Leaf { hash: h, entries } => {
            if *h != hash {
                return None;
            }
            let pos = entries.iter().position(|(k, _)| k == key)?;
            if entries.len() == 1 {
                return Some(None);
            }
            let mut entries = entries.clone();
            entries.remove(pos);
            Some(Some(Rc::new(Node::Leaf { hash, entries })))
        }
        Node::Branch {
            prefix,
            bit,
            left,
            right,
            ..
        } => {
            if !matches(hash, *prefix, *bit) {
                return None;
            }
            if goes_right(hash, *bit) {
                Some(match remove_node(right, hash, key)? {
                    None => Some(left.clone()),
                    Some(new_right) => Some(branch(*prefix, *bit, left.clone(), new_right)),
                })
            } else {
                Some(match remove_node(left, hash, key)? {
                    None => Some(right.clone()),
                    Some(new_left) => Some(branch(*prefix, *bit, new_left, right.clone())),
                })
            }
        }
    }
}

fn merge_node<K, V, F>(s: &Rc<Node<K, V>>, t: &Rc<Node<K, V>>, combine: &mut F) -> (Rc<Node<K, V>>, bool)
where
    K: Eq + Clone,
    V: Clone,
    F: FnMut(&K, &V, &V) -> (V, bool),
{
    if Rc::ptr_eq(s, t) {
        return (s.clone(), true);
    }
    let (p, m) = s.shape();
    let (q, n) = t.shape();
    match (s.as_ref(), t.as_ref()) {
        (Node::Leaf { entries: left, .. }, Node::Leaf { entries: right, .. }) if p == q => {
            let mut entries = left.clone();
            let mut same = true;
            for (key, value) in right {
                match entries.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => {
                        let (combined, equal) = combine(key, &slot.1, value);
                        if !equal {
                            slot.1 = combined;
                            same = false;
                        }
                    }
                    None => {
                        entries.push((key.clone(), value.clone()));
                        same = false;
                    }
                }
            }
            if same {
                (s.clone(), true)
            } else {
                (Rc::new(Node::Leaf { hash: p, entries }), false)
            }
        }
        (
            Node::Branch {
                left: s0, right: s1, ..
            },
            Node::Branch {
                left: t0, right: t1, ..
            },
        ) if p == q && m == n => {
            let (l, l_same) = merge_node(s0, t0, combine);
            let (r, r_same) = merge_node(s1, t1, combine);
            if l_same && r_same {
                (s.clone(), true)
            } else {
                (branch(p, m, l, r), false)
            }
        }
        // The right operand fits into one of the children of the left one.
        (
            Node::Branch {
                left: s0, right: s1, ..
            },
            _,
        ) if m > n && matches(q, p, m) => {
            if goes_right(q, m) {
                let (r, same) = merge_node(s1, t, combine);
                if same {
                    (s.clone(), true)
                } else {
                    (branch(p, m, s0.clone(), r), false)
                }
            } else {
                let (l, same) = merge_node(s0, t, combine);
                if same {
                    (s.clone(), true)
                } else {
                    (branch(p, m, l, s1.clone()), false)
                }
            }
        }
        // The left operand fits into one of the children of the right one.
        (
            _,
            Node::Branch {
                left: t0, right: t1, ..
            },
        ) if n > m && matches(p, q, n) => {
            if goes_right(p, n) {
                let (r, _) = merge_node(s, t1, combine);
                (branch(q, n, t0.clone(), r), false)
            } else {
                let (l, _) = merge_node(s, t0, combine);
                (branch(q, n, l, t1.clone()), false)
            }
        }
        _ => (link(p, s.clone(), q, t.clone()), false),
    }
}

fn equal_node<K: Eq, V, F>(s: &Rc<Node<K, V>>, t: &Rc<Node<K, V>>, eq: &mut F) -> bool
where
    F: FnMut(&V, &V) -> bool,
{
    if Rc::ptr_eq(s, t) {
        return true;
    }
    if s.size() != t.size() || s.shape() != t.shape() {
        return false;
    }
    match (s.as_ref(), t.as_ref()) {
        (Node::Leaf { entries: left, .. }, Node::Leaf { entries: right, .. }) => {
            left.iter().all(|(key, value)| {
                right
                    .iter()
                    .find(|(k, _)| k == key)
                    .is_some_and(|(_, other)| eq(value, other))
            })
        }
        (
            Node::Branch {
                left: s0, right: s1, ..
            },
            Node::Branch {
                left: t0, right: t1, ..
            },
        ) => equal_node(s0, t0, eq) && equal_node(s1, t1, eq),
        _ => false,
    }
}

fn all_pairs_node<K: Eq, V, F>(s: Option<&Rc<Node<K, V>>>, t: Option<&Rc<Node<K, V>>>, pred: &mut F) -> bool
where
    F: FnMut(&K, Option<&V>, Option<&V>) -> bool,
{
    let (s, t) = match (s, t) {
        (None, None) => return true,
        (Some(s), None) => return iter_node(s).all(|(k, v)| pred(k, Some(v), None)),
        (None, Some(t)) => return iter_node(t).all(|(k, v)| pred(k, None, Some(v))),
        (Some(s), Some(t)) => (s, t),
    };
    if Rc::ptr_eq(s, t) {
        return true;
    }
    let (p, m) = s.shape();
    let (q, n) = t.shape();
    match (s.as_ref(), t.as_ref()) {
        (Node::Leaf { entries: left, .. }, Node::Leaf { entries: right, .. }) if p == q => {
            left.iter().all(|(key, value)| {
                let other = right.iter().find(|(k, _)| k == key).map(|(_, v)| v);
                pred(key, Some(value), other)
            }) && right
                .iter()
                .filter(|(key, _)| !left.iter().any(|(k, _)| k == key))
                .all(|(key, value)| pred(key, None, Some(value)))
        }
        (
            Node::Branch {
                left: s0, right: s1, ..
            },
            Node::Branch {
                left: t0, right: t1, ..
            },
        ) if p == q && m == n => {
            all_pairs_node(Some(s0), Some(t0), pred) && all_pairs_node(Some(s1), Some(t1), pred)
        }
        (
            Node::Branch {
                left: s0, right: s1, ..
            },
            _,
        ) if m > n && matches(q, p, m) => {
            if goes_right(q, m) {
                all_pairs_node(Some(s0), None, pred) && all_pairs_node(Some(s1), Some(t), pred)
            } else {
                all_pairs_node(Some(s0), Some(t), pred) && all_pairs_node(Some(s1), None, pred)
            }
        }
        (
            _,
            Node::Branch {
                left: t0, right: t1, ..
            },
        ) if n > m && matches(p, q, n) => {
            if goes_right(p, n) {
                all_pairs_node(None, Some(t0), pred) && all_pairs_node(Some(s), Some(t1), pred)
            } else {
                all_pairs_node(Some(s), Some(t0), pred) && all_pairs_node(None, Some(t1), pred)
            }
        }
        _ => all_pairs_node(Some(s), None, pred) && all_pairs_node(None, Some(t), pred),
    }
}

fn iter_node<K, V>(node: &Rc<Node<K, V>>) -> Iter<'_, K, V> {
    Iter {
        stack: vec![node.as_ref()],
        bucket: Default::default(),
    }
}

pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    bucket: core::slice::Iter<'a, (K, V)>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            stack: self.stack.clone(),
            bucket: self.bucket.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((k, v)) = self.bucket.next() {
                return Some((k, v));
            }
            match self.stack.pop()? {
                Node::Leaf { entries, .. } => self.bucket = entries.iter(),
                Node::Branch { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
    }
}

impl<'a, K, V> IntoIterator for &'a HashTrie<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> FromIterator<(K, V)> for HashTrie<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |trie, (k, v)| trie.insert(k, v))
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for HashTrie<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other, |a, b| a == b)
    }
}

impl<K: Eq + Hash, V: Eq> Eq for HashTrie<K, V> {}

impl<K: Debug, V: Debug> Debug for HashTrie<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A persistent set on top of [`HashTrie`].
pub struct HashTrieSet<K>(HashTrie<K, ()>);

impl<K> Clone for HashTrieSet<K> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K> Default for HashTrieSet<K> {
    fn default() -> Self {
        Self(HashTrie::default())
    }
}

impl<K> HashTrieSet<K> {
    pub fn new() -> Self {
        Self::default()
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

    pub fn iter(&self) -> impl Iterator<Item = &K> + Clone {
        self.0.keys()
    }
}

impl<K: Eq + Hash + Clone> HashTrieSet<K> {
    pub fn contains(&self, key: &K) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&self, key: K) -> Self {
        Self(self.0.insert(key, ()))
    }

    pub fn remove(&self, key: &K) -> Self {
        Self(self.0.remove(key))
    }

    pub fn filter<F: FnMut(&K) -> bool>(&self, mut keep: F) -> Self {
        Self(self.0.filter(|k, _| keep(k)))
    }

    /// The union shares the root of `self` when `other` is a subset.
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.merge(&other.0, |_, _, _| ((), true)).0)
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.0
            .all_pairs(&other.0, |_, mine, theirs| mine.is_none() || theirs.is_some())
    }
}

impl<K: Eq + Hash + Clone> FromIterator<K> for HashTrieSet<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self(iter.into_iter().map(|k| (k, ())).collect())
    }
}

impl<K: Eq + Hash> PartialEq for HashTrieSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K: Eq + Hash> Eq for HashTrieSet<K> {}

impl<K: Debug> Debug for HashTrieSet<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
