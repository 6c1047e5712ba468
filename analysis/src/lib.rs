//! This crate contains a set of helpers to build static analysis tools based
//! on [abstract interpretation](https://en.wikipedia.org/wiki/Abstract_interpretation).
//! The building blocks include
//! [lattice](https://en.wikipedia.org/wiki/Lattice_(order)) domains and the
//! transformers to combine them, persistent maps based on hash tries,
//! a trait for flow graphs, and worklist based fixed-point solvers.
//!
//! Look at the gosync-lib crate for an example how to define analyses using
//! the helpers in this crate.
//!
//! Some resources to learn more about abstract interpretation:
//! * [Static Program Analysis, Anders Møller and Michael I. Schwartzbach](https://cs.au.dk/~amoeller/spa/)
//! * [Introduction to Static Analysis, Xavier Rival and Kwangkeun Yi](https://mitpress.mit.edu/9780262043410/introduction-to-static-analysis/)
//! * [Fast Mergeable Integer Maps, Chris Okasaki and Andrew Gill](https://ittc.ku.edu/~andygill/papers/IntMap98.pdf)

/// Trait for describing flow graphs, and some algorithms and data
/// structures to make it easier to work with them.
pub mod cfg;

/// A curated collection of semi-lattices and lattices, including some
/// transformers to help building larger lattices from smaller ones.
pub mod domains;

/// Implementations of fixed-point iteration algorithms using worklists.
pub mod solvers;

/// Persistent hash maps and sets with structural sharing.
pub mod trie;
