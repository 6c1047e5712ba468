//! Building blocks of a static analyzer for the concurrency primitives of Go
//! programs: channels, goroutines, mutexes, read-write mutexes, condition
//! variables, and wait-groups.
//!
//! The analyzed program is given in SSA form (see [ssa]) together with the
//! results of an upfront points-to analysis (see [pointer]). The
//! [cfg::builder] lifts the SSA into an instrumented control flow graph that
//! models deferred calls, select statements and goroutine spawns. The
//! abstract state of the analyzed program is an abstract [memory::Memory]
//! mapping [location::Location]s to [domains::AbstractValue]s, and the
//! [semantics] module describes the effect of each concurrency primitive as
//! a set of possible outcomes.
//!
//! The lattices are built with the helpers of the `analysis` crate.

/// Control flow graphs instrumented with synthetic nodes for block
/// boundaries, deferred calls, select statements and goroutine spawns.
pub mod cfg;

/// Analysis options.
pub mod config;

/// Abstract domains for the values of the analyzed program.
pub mod domains;

/// Errors of the analyzer.
pub mod error;

/// Which channels might still be used after a program point.
pub mod live_channels;

/// Abstract addresses.
pub mod location;

/// Reading and writing memory through arbitrary locations.
pub mod memops;

/// The abstract memory.
pub mod memory;

/// Interface to the results of a points-to analysis.
pub mod pointer;

/// Abstract semantics of the concurrency primitives and other operations.
pub mod semantics;

/// In-memory representation of programs in SSA form.
pub mod ssa;

/// Replacing unknown pointers with the results of the points-to analysis.
pub mod wildcard;

#[cfg(test)]
mod test_programs;



#[cfg(test)]
mod semantics_tests;


#[cfg(test)]
mod wildcard_tests;
