use crate::domains::*;

pub const INF: i64 = i64::MAX;
pub const NEG_INF: i64 = i64::MIN;

/// Intervals over the integers extended with the infinities. Bottom is
/// encoded as `[INF, NEG_INF]`, top as `[NEG_INF, INF]`.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub struct Interval {
    pub min: i64,
    pub max: i64,
}

impl From<i64> for Interval {
    fn from(val: i64) -> Self {
        Self { min: val, max: val }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_bottom() {
            return write!(f, "⊥");
        }
        let to_str = |x: i64| match x {
            INF => "inf".to_owned(),
            NEG_INF => "-inf".to_owned(),
            _ => x.to_string(),
        };
        write!(f, "[{}, {}]", to_str(self.min), to_str(self.max))
    }
}

impl Interval {
    pub fn new(min: i64, max: i64) -> Self {
        if min > max {
            return Self::bottom(&());
        }
        Self { min, max }
    }

    pub fn is_bottom(&self) -> bool {
        self.min > self.max
    }

    pub fn is_top(&self) -> bool {
        self.min == NEG_INF && self.max == INF
    }

    /// The interval contains a single number.
    pub fn singleton(&self) -> Option<i64> {
        (self.min == self.max && self.min != INF && self.min != NEG_INF).then_some(self.min)
    }

    pub fn contains(&self, val: i64) -> bool {
        self.min <= val && val <= self.max
    }

    /// Shifts both bounds by `delta`, the infinite bounds stay infinite.
    pub fn shift(&self, delta: i64) -> Self {
        if self.is_bottom() {
            return *self;
        }
        Self {
            min: saturating_shift(self.min, delta),
            max: saturating_shift(self.max, delta),
        }
    }
}

/// Adds `delta` to a bound, leaving the infinities alone and clamping the
/// finite results before they would turn into an infinity.
pub fn saturating_shift(bound: i64, delta: i64) -> i64 {
    match bound {
        INF | NEG_INF => bound,
        _ => bound.saturating_add(delta).clamp(NEG_INF + 1, INF - 1),
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        if self.is_bottom() {
            return Some(Ordering::Less);
        }
        if other.is_bottom() {
            return Some(Ordering::Greater);
        }
        if self.min <= other.min && self.max >= other.max {
            return Some(Ordering::Greater);
        }
        if self.min >= other.min && self.max <= other.max {
            return Some(Ordering::Less);
        }

        None
    }
}

impl JoinSemiLattice for Interval {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        Self {
            min: INF,
            max: NEG_INF,
        }
    }

    fn join(&self, other: &Self, _: &Self::LatticeContext) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn widen(&self, prev: &Self, _: &Self::LatticeContext, _: usize) -> Self {
        if prev.is_bottom() {
            return *self;
        }
        Self {
            min: if prev.min > self.min {
                NEG_INF
            } else {
                self.min
            },
            max: if prev.max < self.max { INF } else { self.max },
        }
    }
}

impl Lattice for Interval {
    fn top(_: &Self::LatticeContext) -> Self {
        Self {
            min: NEG_INF,
            max: INF,
        }
    }

    fn meet(&self, other: &Self, _: &Self::LatticeContext) -> Self {
        // We only want one canonical representation for bottom.
        Self::new(self.min.max(other.min), self.max.min(other.max))
    }
}

impl Height for Interval {
    fn height(&self) -> i64 {
        if self.is_bottom() {
            return 0;
        }
        if self.min == NEG_INF || self.max == INF {
            return -1;
        }
        self.max.saturating_sub(self.min).saturating_add(1)
    }
}

impl core::ops::Add<Interval> for Interval {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.is_bottom() || rhs.is_bottom() {
            return Self::bottom(&());
        }
        Self {
            min: if self.min == NEG_INF || rhs.min == NEG_INF {
                NEG_INF
            } else {
                saturating_shift(self.min, rhs.min)
            },
            max: if self.max == INF || rhs.max == INF {
                INF
            } else {
                saturating_shift(self.max, rhs.max)
            },
        }
    }
}

impl core::ops::Neg for Interval {
    type Output = Self;

    fn neg(self) -> Self {
        if self.is_bottom() {
            return self;
        }
        Self {
            min: if self.max == INF { NEG_INF } else { -self.max },
            max: if self.min == NEG_INF { INF } else { -self.min },
        }
    }
}

impl core::ops::Sub<Interval> for Interval {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}
