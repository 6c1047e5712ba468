use core::cmp::Ordering;

use analysis::domains::{FiniteMap, FiniteMapCtx, JoinSemiLattice};

use crate::domains::AbstractValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    Ok,
    Panic,
}

/// The possible results of an operation: the value after a successful
/// execution and the value when the operation panics. Both bottom means
/// the operation blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpOutcomes(FiniteMap<Outcome, AbstractValue>);

fn outcomes_ctx() -> FiniteMapCtx<Outcome, ()> {
    FiniteMapCtx {
        keys: vec![Outcome::Ok, Outcome::Panic],
        values: (),
    }
}

impl OpOutcomes {
    pub fn block() -> Self {
        Self(FiniteMap::bottom(&outcomes_ctx()))
    }

    pub fn succeed(value: AbstractValue) -> Self {
        Self(Self::block().0.with(Outcome::Ok, value))
    }

    pub fn panic(value: AbstractValue) -> Self {
        Self(Self::block().0.with(Outcome::Panic, value))
    }

    pub fn join(&self, other: &Self) -> Self {
        Self(self.0.join(&other.0, &outcomes_ctx()))
    }

    pub fn get(&self, outcome: Outcome) -> &AbstractValue {
        match self.0.get(&outcome) {
            Some(value) => value,
            None => panic!("Outcome {outcome:?} is missing from {:?}", self.0),
        }
    }

    /// The value after a successful execution.
    pub fn ok(&self) -> &AbstractValue {
        self.get(Outcome::Ok)
    }

    /// The value when the operation panics.
    pub fn panicked(&self) -> &AbstractValue {
        self.get(Outcome::Panic)
    }

    pub fn may_succeed(&self) -> bool {
        !self.ok().is_bot()
    }

    pub fn may_panic(&self) -> bool {
        !self.panicked().is_bot()
    }

    pub fn blocks(&self) -> bool {
        !self.may_succeed() && !self.may_panic()
    }
}

impl PartialOrd for OpOutcomes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl JoinSemiLattice for OpOutcomes {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        Self::block()
    }

    fn join(&self, other: &Self, _: &Self::LatticeContext) -> Self {
        OpOutcomes::join(self, other)
    }
}
