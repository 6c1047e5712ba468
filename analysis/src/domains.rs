use core::cmp::Ordering;
use core::fmt::{Debug, Display};
use core::hash::Hash;
use core::ops::{Deref, DerefMut};

use fixedbitset::FixedBitSet;

/////////////////////////
// Traits for domains. //
/////////////////////////

/// A join semi-lattice is a partially ordered set that where the least upper
/// bound exists for every subset. Usually, the ordering relation can be viewed
/// as "safe approximation". For example, the interval \[4, 7\] is a safe
/// approximation of \[5, 6\]. The goal of abstract interpretation is to calculate
/// a precise but safe approximation of the program behavior. In this library,
/// Top represents the biggest element (largest approximation), Bottom represents
/// the smallest one.
pub trait JoinSemiLattice: Eq + PartialOrd + Clone + Debug {
    /// A type to hold some information about the lattice on the side.
    ///
    /// For some lattices, like the power set lattice, we need to
    /// store somewhere the top or the bottom value. When we need
    /// no such values, set this to unit.
    type LatticeContext;

    /// The unit element of the join operation. Strictly speaking a join
    /// semi-lattice does not need to have a bottom element, but having one
    /// makes certain computations simpler. In case a domain lacks a bottom
    /// element consider using the [Option] transformer to introduce one.
    /// Bottom values in the analysis result often stand for dead code.
    ///
    /// Required to be the smallest element according to the ordering.
    fn bottom(ctx: &Self::LatticeContext) -> Self;

    /// Given two elements of the lattice the join operation will compute a
    /// precise and safe over approximation of its arguments. It computes
    /// the least upper bound. It is typically useful to calculate the
    /// analysis state after merge points where the program location after
    /// the branching needs to over approximate all predecessors.
    ///
    /// Requirements:
    /// * Reflexive: a.join(a, ctx) == a
    /// * Commutative: a.join(b, ctx) == b.join(a, ctx)
    /// * Bottom is unit: bottom.join(b, ctx) == b
    /// * Upper bound: a.join(b, ctx) >= a and a.join(b, ctx) >= b
    /// * Top is the largest: top.join(b, ctx) == top
    /// * Ordering is respected: a <= b => a.join(b, ctx) == b
    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self;

    /// In case a lattice has infinite (or very long) ascending chains,
    /// the widening operation can ensure convergence. Other lattices
    /// can use the default implementation. Widening is a larger
    /// over approximation step, usually by removing certain constraints
    /// that did not stabilize from a numerical domain. The analysis
    /// state from the previous iteration can inform this operation what
    /// parts of the state needs widened. Widening also gets an iteration
    /// number that is an approximation of the number iterations over
    /// the whole control flow graph. This number can be helpful to
    /// implement a tiered widening, where later tiers are approximating
    /// more aggressively.
    ///
    /// Requirements:
    /// * Reflexive: a.widen(a, x, ctx, i) == a
    /// * b.widen(a, x, ctx, i) == b if a <= b
    fn widen(&self, _previous: &Self, _ctx: &Self::LatticeContext, _iteration: usize) -> Self {
        self.clone()
    }
}

pub trait JoinSemiLatticeNoContext: JoinSemiLattice {
    /// See [JoinSemiLattice::bottom] for details. This version does not
    /// require a context.
    fn bottom_() -> Self;

    /// See [JoinSemiLattice::join] for details. This version does not
    /// require a context.
    fn join_(&self, other: &Self) -> Self;

    /// See [JoinSemiLattice::widen] for details. This version does not
    /// require a context.
    fn widen_(&self, previous: &Self, iteration: usize) -> Self;
}

// TODO: also implement it for contexts like ((), ())
impl<L: JoinSemiLattice<LatticeContext = ()>> JoinSemiLatticeNoContext for L {
    fn bottom_() -> Self {
        <L as JoinSemiLattice>::bottom(&())
    }

    fn join_(&self, other: &Self) -> Self {
        self.join(other, &())
    }

    fn widen_(&self, previous: &Self, iteration: usize) -> Self {
        self.widen(previous, &(), iteration)
    }
}

/// A lattice is a join semi-lattice that is also a meet semi-lattice, i.e.,
/// the greatest lower bound (meet) also exists for all subsets.
pub trait Lattice: JoinSemiLattice {
    /// The unit element of the meet operation, the largest element of the
    /// lattice.
    ///
    /// Requirements:
    /// Top is the greatest element of the lattice.
    fn top(ctx: &Self::LatticeContext) -> Self;

    /// Given two elements of the lattice the meet operation will compute the
    /// greatest lower bound. This is usually useful to exclude infeasible
    /// program states. Often used to implement the evaluation of conditions
    /// or assertions.
    ///
    /// * Reflexive: a.meet(a, ctx) == a
    /// * Commutative: a.meet(b, ctx) == b.meet(a, ctx)
    /// * Top is unit: top.meet(b, ctx) == b
    /// * Lower bound: a.meet(b, ctx) <= a and a.meet(b, ctx) <= b
    /// * Bottom is the smallest: bottom.meet(b, ctx) == bottom
    /// * Ordering is respected: a <= b => a.meet(b, ctx) == a
    fn meet(&self, other: &Self, ctx: &Self::LatticeContext) -> Self;

    /// The dual operation of widen, useful when the domain has long (or infinite) descending
    /// chains.
    fn narrow(&self, _previous: &Self, _ctx: &Self::LatticeContext, _iteration: usize) -> Self {
        self.clone()
    }
}

pub trait LatticeNoContext: Lattice {
    /// See [Lattice::top] for details. This version does not
    /// require a context.
    fn top_() -> Self;

    /// See [Lattice::meet] for details. This version does not
    /// require a context.
    fn meet_(&self, other: &Self) -> Self;

    /// See [Lattice::meet] for details. This version does not
    /// require a context.
    fn narrow_(&self, previous: &Self, iteration: usize) -> Self;
}

impl<L: Lattice<LatticeContext = ()>> LatticeNoContext for L {
    fn top_() -> Self {
        <L as Lattice>::top(&())
    }

    fn meet_(&self, other: &Self) -> Self {
        self.meet(other, &())
    }

    fn narrow_(&self, previous: &Self, iteration: usize) -> Self {
        self.narrow(previous, &(), iteration)
    }
}

/// The height of an element is the length of the longest chain between
/// bottom and the element. It is used to compare the precision of results
/// and to detect changes cheaply. Elements of lattices with unbounded
/// chains, like intervals with an infinite bound, report a negative height.
pub trait Height {
    fn height(&self) -> i64;
}

/// Joins all the elements of an iterator, returns bottom for an empty one.
pub fn join_all<'a, L, I>(elements: I, ctx: &L::LatticeContext) -> L
where
    L: JoinSemiLattice + 'a,
    I: IntoIterator<Item = &'a L>,
{
    elements
        .into_iter()
        .fold(L::bottom(ctx), |acc, element| acc.join(element, ctx))
}

/////////////////////////////////////
// Concrete domain implementations //
/////////////////////////////////////

/// The unit lattice is useful for testing, as a placeholder,
/// or as a building block in one of the lattice construction
/// methods (transformers) like the product lattice.
impl JoinSemiLattice for () {
    type LatticeContext = ();

    fn bottom(&(): &Self::LatticeContext) -> Self {}

    fn join(&self, &(): &Self, &(): &Self::LatticeContext) -> Self {}
}

impl Lattice for () {
    fn top(&(): &Self::LatticeContext) -> Self {}

    fn meet(&self, &(): &Self, &(): &Self::LatticeContext) -> Self {}
}

/// Bool is a lattice, where false is bottom and true is top,
/// join is or, meet is and.
impl JoinSemiLattice for bool {
    type LatticeContext = ();

    fn bottom(_ctx: &Self::LatticeContext) -> Self {
        false
    }

    fn join(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        *self || *other
    }
}

impl Lattice for bool {
    fn top(_ctx: &Self::LatticeContext) -> Self {
        true
    }

    fn meet(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        *self && *other
    }
}

impl Height for () {
    fn height(&self) -> i64 {
        0
    }
}

impl Height for bool {
    fn height(&self) -> i64 {
        i64::from(*self)
    }
}

/// A power set lattice over the natural numbers below the size stored in
/// the context. Sets of arbitrary elements can use it after numbering them.
#[derive(PartialEq, Eq, Clone)]
pub struct BitSet(pub FixedBitSet);

impl Deref for BitSet {
    type Target = FixedBitSet;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BitSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitSetTop(pub usize);

impl BitSet {
    pub fn from(ctx: &BitSetTop, values: &[usize]) -> Self {
        let mut inner = FixedBitSet::with_capacity(ctx.0);
        for &v in values {
            inner.insert(v);
        }
        Self(inner)
    }
}

impl PartialOrd for BitSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.is_superset(other), other.is_superset(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (_, _) => None,
        }
    }
}

impl Debug for BitSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let elements: Vec<String> = self.ones().map(|x| x.to_string()).collect();
        write!(f, "{{{}}}", elements.join(", "))
    }
}

impl JoinSemiLattice for BitSet {
    type LatticeContext = BitSetTop;

    fn bottom(ctx: &Self::LatticeContext) -> Self {
        Self(FixedBitSet::with_capacity(ctx.0))
    }

    fn join(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }
}

impl Lattice for BitSet {
    fn top(ctx: &Self::LatticeContext) -> Self {
        let mut result = FixedBitSet::with_capacity(ctx.0);
        result.toggle_range(..);
        Self(result)
    }

    fn meet(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        let mut result = self.clone();
        result.intersect_with(other);
        result
    }
}

impl Height for BitSet {
    fn height(&self) -> i64 {
        self.count_ones(..) as i64
    }
}

mod numerical;
pub use numerical::*;

mod transformers;
pub use transformers::*;

mod maps;
pub use maps::*;
