use crate::domains::*;

/////////////////////////
// Domain transformers //
/////////////////////////

///```text
///       Top
///    /  |  |  \
///   e1 e2 e3 ...
///    \  |  |  /
///      Bottom
///```
///
/// Distinct elements are incomparable, their join is top.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Flat<T> {
    Bottom,
    Element(T),
    Top,
}

pub type FlatInt = Flat<i64>;

impl<T> From<T> for Flat<T> {
    fn from(val: T) -> Self {
        Flat::Element(val)
    }
}

impl<T> Flat<T> {
    pub fn element(&self) -> Option<&T> {
        match self {
            Flat::Element(val) => Some(val),
            _ => None,
        }
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Flat::Bottom)
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Flat::Top)
    }

    pub fn map<U, F: FnOnce(&T) -> U>(&self, f: F) -> Flat<U> {
        match self {
            Flat::Bottom => Flat::Bottom,
            Flat::Element(val) => Flat::Element(f(val)),
            Flat::Top => Flat::Top,
        }
    }
}

impl<T: Display> Display for Flat<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Flat::Bottom => write!(f, "⊥"),
            Flat::Element(val) => write!(f, "{val}"),
            Flat::Top => write!(f, "⊤"),
        }
    }
}

impl<T: Eq> PartialOrd for Flat<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a == b => Some(Ordering::Equal),
            (Flat::Bottom, _) | (_, Flat::Top) => Some(Ordering::Less),
            (Flat::Top, _) | (_, Flat::Bottom) => Some(Ordering::Greater),
            _ => None,
        }
    }
}

impl<T: Eq + Clone + Debug> JoinSemiLattice for Flat<T> {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        Flat::Bottom
    }

    fn join(&self, other: &Self, _: &Self::LatticeContext) -> Self {
        match (self, other) {
            (Flat::Bottom, x) | (x, Flat::Bottom) => x.clone(),
            (a, b) if a == b => a.clone(),
            _ => Flat::Top,
        }
    }
}

impl<T: Eq + Clone + Debug> Lattice for Flat<T> {
    fn top(_: &Self::LatticeContext) -> Self {
        Flat::Top
    }

    fn meet(&self, other: &Self, _: &Self::LatticeContext) -> Self {
        match (self, other) {
            (Flat::Top, x) | (x, Flat::Top) => x.clone(),
            (a, b) if a == b => a.clone(),
            _ => Flat::Bottom,
        }
    }
}

impl<T> Height for Flat<T> {
    fn height(&self) -> i64 {
        match self {
            Flat::Bottom => 0,
            Flat::Element(_) => 1,
            Flat::Top => 2,
        }
    }
}

/// Lifting adds a fresh bottom element below a lattice. The standard
/// ordering of [Option] already puts [None] below every [Some], so the
/// lifted lattice is simply an [Option]. Lifting a lifted lattice yields
/// distinct bottoms at every level (`None`, `Some(None)`, ...).
pub type Lift<T> = Option<T>;

impl<T: JoinSemiLattice> JoinSemiLattice for Option<T> {
    type LatticeContext = T::LatticeContext;

    fn bottom(_: &Self::LatticeContext) -> Self {
        None
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        match (self, other) {
            (None, x) | (x, None) => x.clone(),
            (Some(a), Some(b)) => Some(a.join(b, ctx)),
        }
    }

    fn widen(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
        match (self, previous) {
            (Some(a), Some(prev)) => Some(a.widen(prev, ctx, iteration)),
            _ => self.clone(),
        }
    }
}

impl<T: Lattice> Lattice for Option<T> {
    fn top(ctx: &Self::LatticeContext) -> Self {
        Some(T::top(ctx))
    }

    fn meet(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        match (self, other) {
            (Some(a), Some(b)) => Some(a.meet(b, ctx)),
            _ => None,
        }
    }
}

impl<T: Height> Height for Option<T> {
    fn height(&self) -> i64 {
        match self {
            None => 0,
            Some(val) if val.height() < 0 => -1,
            Some(val) => val.height() + 1,
        }
    }
}

/// Dropping adds a fresh top element above a lattice. Useful for lattices
/// that cannot represent their top element, like sets of elements drawn
/// from an unbounded universe.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum Dropped<T> {
    Elem(T),
    Top,
}

impl<T> Dropped<T> {
    pub fn elem(&self) -> Option<&T> {
        match self {
            Dropped::Elem(val) => Some(val),
            Dropped::Top => None,
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Dropped::Top)
    }

    /// Meet for underlying lattices that have a greatest lower bound but no
    /// representable top.
    pub fn meet_by<F: FnOnce(&T, &T) -> T>(&self, other: &Self, meet: F) -> Self
    where
        T: Clone,
    {
        match (self, other) {
            (Dropped::Top, x) | (x, Dropped::Top) => x.clone(),
            (Dropped::Elem(a), Dropped::Elem(b)) => Dropped::Elem(meet(a, b)),
        }
    }
}

impl<T: PartialOrd> PartialOrd for Dropped<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Dropped::Top, Dropped::Top) => Some(Ordering::Equal),
            (Dropped::Top, _) => Some(Ordering::Greater),
            (_, Dropped::Top) => Some(Ordering::Less),
            (Dropped::Elem(a), Dropped::Elem(b)) => a.partial_cmp(b),
        }
    }
}

impl<T: JoinSemiLattice> JoinSemiLattice for Dropped<T> {
    type LatticeContext = T::LatticeContext;

    fn bottom(ctx: &Self::LatticeContext) -> Self {
        Dropped::Elem(T::bottom(ctx))
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        match (self, other) {
            (Dropped::Elem(a), Dropped::Elem(b)) => Dropped::Elem(a.join(b, ctx)),
            _ => Dropped::Top,
        }
    }
}

impl<T: Lattice> Lattice for Dropped<T> {
    fn top(_: &Self::LatticeContext) -> Self {
        Dropped::Top
    }

    fn meet(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        self.meet_by(other, |a, b| a.meet(b, ctx))
    }
}

impl<T: Height> Height for Dropped<T> {
    fn height(&self) -> i64 {
        match self {
            Dropped::Elem(val) => val.height(),
            Dropped::Top => i64::MAX,
        }
    }
}

/// Combines the componentwise comparisons of a product into the ordering
/// of the product.
fn combine_orderings(orderings: &[Option<Ordering>]) -> Option<Ordering> {
    let mut result = Ordering::Equal;
    for ordering in orderings {
        match (result, (*ordering)?) {
            (_, Ordering::Equal) => {}
            (Ordering::Equal, ord) => result = ord,
            (prev, ord) if prev != ord => return None,
            _ => {}
        }
    }
    Some(result)
}

fn sum_heights(heights: &[i64]) -> i64 {
    if heights.iter().any(|h| *h < 0) {
        return -1;
    }
    heights.iter().fold(0_i64, |acc, h| acc.saturating_add(*h))
}

macro_rules! product_domain {
    ($n:literal; $($ty:ident $idx:tt),+) => {
        paste::paste! {
            #[doc = "Product of " $n " lattices, every operation is applied componentwise."]
            #[derive(PartialEq, Eq, Hash, Clone, Debug)]
            pub struct [<Prod $n>]<$($ty),+>($(pub $ty),+);

            impl<$($ty: JoinSemiLattice),+> PartialOrd for [<Prod $n>]<$($ty),+> {
                fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                    combine_orderings(&[$(self.$idx.partial_cmp(&other.$idx)),+])
                }
            }

            impl<$($ty: JoinSemiLattice),+> JoinSemiLattice for [<Prod $n>]<$($ty),+> {
                type LatticeContext = ($(<$ty as JoinSemiLattice>::LatticeContext,)+);

                fn bottom(ctx: &Self::LatticeContext) -> Self {
                    Self($($ty::bottom(&ctx.$idx)),+)
                }

                fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
                    Self($(self.$idx.join(&other.$idx, &ctx.$idx)),+)
                }

                fn widen(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
                    Self($(self.$idx.widen(&previous.$idx, &ctx.$idx, iteration)),+)
                }
            }

            impl<$($ty: Lattice),+> Lattice for [<Prod $n>]<$($ty),+> {
                fn top(ctx: &Self::LatticeContext) -> Self {
                    Self($($ty::top(&ctx.$idx)),+)
                }

                fn meet(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
                    Self($(self.$idx.meet(&other.$idx, &ctx.$idx)),+)
                }

                fn narrow(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
                    Self($(self.$idx.narrow(&previous.$idx, &ctx.$idx, iteration)),+)
                }
            }

            impl<$($ty: Height),+> Height for [<Prod $n>]<$($ty),+> {
                fn height(&self) -> i64 {
                    sum_heights(&[$(self.$idx.height()),+])
                }
            }
        }
    };
}

product_domain!(2; A 0, B 1);
product_domain!(3; A 0, B 1, C 2);
product_domain!(4; A 0, B 1, C 2, D 3);
product_domain!(5; A 0, B 1, C 2, D 3, E 4);
