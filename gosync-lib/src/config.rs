/// Which buffer abstraction of the channel record drives the dispatching
/// [send](crate::semantics::send) and [receive](crate::semantics::receive)
/// operations. Both abstractions are always part of the channel record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferAbstraction {
    #[default]
    Flat,
    Interval,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Options {
    /// Report the inconsistencies of the points-to analysis as warnings.
    pub verbose: bool,
    pub buffer_abstraction: BufferAbstraction,
    /// Do not materialize the allocations of `append` calls. Their points-to
    /// sets tend to blow up.
    pub filter_append_sites: bool,
    /// Iteration limit per node for the fixed-point computations. Zero means
    /// no limit.
    pub node_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            buffer_abstraction: BufferAbstraction::Flat,
            filter_append_sites: true,
            node_limit: 0,
        }
    }
}
