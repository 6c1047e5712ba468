use core::fmt::Display;
use std::rc::Rc;

use crate::ssa::{FunctionId, ValueId};

/// The field index of the lumped element of arrays and slices.
pub const AINDEX: i32 = -2;

/// The field index of the function in the struct representing a closure.
pub const CLOSURE_FUN: i32 = -1;

/// The abstract thread identifier. [Goroutine::Top] stands for every
/// goroutine at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Goroutine {
    Top,
    Thread(u32),
}

/// The calling context of a location: the function the allocating code was
/// called from, if tracked.
pub type Context = Option<FunctionId>;

/// Abstract addresses. Only [Location::Global], [Location::AllocationSite]
/// and [Location::Local] can be bound in memory directly, the rest are
/// resolved through their base.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    Global(ValueId),
    AllocationSite {
        goroutine: Goroutine,
        context: Context,
        site: ValueId,
    },
    /// A virtual register.
    Local {
        goroutine: Goroutine,
        context: Context,
        site: ValueId,
    },
    Field(Rc<Location>, i32),
    Index(Rc<Location>),
    FunctionPointer(FunctionId),
    Nil,
}

impl Location {
    pub fn alloc(goroutine: Goroutine, context: Context, site: ValueId) -> Self {
        Location::AllocationSite {
            goroutine,
            context,
            site,
        }
    }

    /// The top location of an allocation site.
    pub fn top_alloc(site: ValueId) -> Self {
        Self::alloc(Goroutine::Top, None, site)
    }

    pub fn field(&self, index: i32) -> Self {
        Location::Field(Rc::new(self.clone()), index)
    }

    pub fn index(&self) -> Self {
        Location::Index(Rc::new(self.clone()))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Location::Nil)
    }

    /// Top locations stand for all the allocations of their site.
    pub fn is_top(&self) -> bool {
        match self {
            Location::AllocationSite { goroutine, .. } => *goroutine == Goroutine::Top,
            Location::Field(base, _) | Location::Index(base) => base.is_top(),
            _ => false,
        }
    }

    /// The top location representing this location, including itself for
    /// top locations.
    pub fn top_representative(&self) -> Option<Location> {
        match self {
            Location::AllocationSite { site, .. } => Some(Location::top_alloc(*site)),
            Location::Field(base, index) => Some(Location::Field(
                Rc::new(base.top_representative()?),
                *index,
            )),
            Location::Index(base) => Some(Location::Index(Rc::new(base.top_representative()?))),
            _ => None,
        }
    }

    /// Whether `self` is a top location standing for the distinct location
    /// `other`.
    pub fn represents(&self, other: &Location) -> bool {
        self.is_top() && self != other && other.top_representative().as_ref() == Some(self)
    }

    pub fn is_addressable(&self) -> bool {
        matches!(
            self,
            Location::Global(_) | Location::AllocationSite { .. } | Location::Local { .. }
        )
    }

    /// The addressable location a derived location is resolved through.
    pub fn base(&self) -> &Location {
        match self {
            Location::Field(base, _) | Location::Index(base) => base.base(),
            _ => self,
        }
    }

    /// The value creating the location.
    pub fn site(&self) -> Option<ValueId> {
        match self.base() {
            Location::Global(site)
            | Location::AllocationSite { site, .. }
            | Location::Local { site, .. } => Some(*site),
            _ => None,
        }
    }
}

impl Display for Goroutine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Goroutine::Top => write!(f, "⊤"),
            Goroutine::Thread(id) => write!(f, "{id}"),
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let context = |ctx: &Context| match ctx {
            Some(function) => format!("@{function}"),
            None => String::new(),
        };
        match self {
            Location::Global(site) => write!(f, "global:{site}"),
            Location::AllocationSite {
                goroutine,
                context: ctx,
                site,
            } => write!(f, "alloc[{goroutine}{}]:{site}", context(ctx)),
            Location::Local {
                goroutine,
                context: ctx,
                site,
            } => write!(f, "local[{goroutine}{}]:{site}", context(ctx)),
            Location::Field(base, AINDEX) => write!(f, "{base}[*]"),
            Location::Field(base, index) => write!(f, "{base}.{index}"),
            Location::Index(base) => write!(f, "{base}[i]"),
            Location::FunctionPointer(function) => write!(f, "fun:{function}"),
            Location::Nil => write!(f, "nil"),
        }
    }
}
