//! A backward analysis over the [Cfg] computing, for every node, the
//! channels created by a `make(chan)` instruction that may be used at the
//! node or after it. Spawned goroutines and deferred or panicking paths
//! count as "after".

use std::collections::HashMap;

use analysis::cfg::FlowGraph;
use analysis::domains::{BitSet, BitSetTop, Lattice};
use analysis::solvers::{Direction, NodeTransfer, SolveMonotone};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::cfg::{Cfg, NodeId, NodeKind};
use crate::config::Options;
use crate::pointer::PointerAnalysis;
use crate::ssa::{InstrKind, Program, ValueId};

/// The graph the liveness flows through: the control flow edges, the spawn
/// edges, and the continuations of nodes without successors.
struct FlowView<'c> {
    cfg: &'c Cfg,
    predecessors: HashMap<NodeId, Vec<NodeId>>,
}

impl<'c> FlowView<'c> {
    fn new(cfg: &'c Cfg) -> Self {
        let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in cfg.node_ids() {
            for next in Self::outgoing(cfg, node) {
                predecessors.entry(next).or_default().push(node);
            }
        }
        Self { cfg, predecessors }
    }

    fn outgoing(cfg: &Cfg, id: NodeId) -> Vec<NodeId> {
        let node = cfg.node(id);
        node.successors()
            .iter()
            .chain(node.spawns())
            .copied()
            .chain(cfg.continuations(id).into_iter().filter(|_| node.successors().is_empty()))
            .filter(|&next| !cfg.is_removed(next))
            .unique()
            .collect()
    }
}

impl FlowGraph for FlowView<'_> {
    type Node = NodeId;

    fn roots(&self) -> Vec<NodeId> {
        self.cfg.roots()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.cfg.nodes()
    }

    fn flow_successors(&self, node: NodeId) -> Vec<NodeId> {
        Self::outgoing(self.cfg, node)
    }

    fn flow_predecessors(&self, node: NodeId) -> Vec<NodeId> {
        self.predecessors.get(&node).cloned().unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct LiveChannels {
    /// The channel allocations in the order of their bits.
    channels: Vec<ValueId>,
    index: HashMap<ValueId, usize>,
    live: HashMap<NodeId, BitSet>,
}

impl LiveChannels {
    pub fn analyze<P: PointerAnalysis>(
        cfg: &Cfg,
        program: &Program,
        pointer: &P,
        options: &Options,
    ) -> Self {
        let channels = cfg
            .node_ids()
            .filter_map(|id| make_chan(cfg, program, id))
            .sorted()
            .dedup()
            .collect_vec();
        let index: HashMap<ValueId, usize> =
            channels.iter().enumerate().map(|(i, &chan)| (chan, i)).collect();
        let ctx = BitSetTop(channels.len());

        let view = FlowView::new(cfg);
        let mut transfer =
            NodeTransfer::new(|node: NodeId, _: &FlowView, _: &BitSetTop, after: &BitSet| {
                let mut live = after.clone();
                if let Some(&own) = make_chan(cfg, program, node).and_then(|c| index.get(&c)) {
                    live.set(own, false);
                }
                for operand in operands(cfg, program, node) {
                    for chan in allocations(program, pointer, operand) {
                        if let Some(&bit) = index.get(&chan) {
                            live.insert(bit);
                        }
                    }
                }
                live
            });
        let solver = SolveMonotone {
            node_limit: options.node_limit,
        };
        let live = match solver.solve(&view, Direction::Backward, &ctx, &HashMap::new(), &mut transfer) {
            Some(states) => states,
            None => {
                warn!(
                    limit = options.node_limit,
                    "live channel analysis did not converge, every channel is live"
                );
                cfg.node_ids().map(|id| (id, BitSet::top(&ctx))).collect()
            }
        };
        debug!(channels = channels.len(), nodes = live.len(), "live channels");
        Self {
            channels,
            index,
            live,
        }
    }

    /// The channel allocations the analysis tracks.
    pub fn channels(&self) -> &[ValueId] {
        &self.channels
    }

    /// The channels that may be used at the node or after it.
    pub fn live_at(&self, node: NodeId) -> Vec<ValueId> {
        match self.live.get(&node) {
            Some(live) => live.ones().map(|bit| self.channels[bit]).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_live(&self, node: NodeId, chan: ValueId) -> bool {
        match (self.live.get(&node), self.index.get(&chan)) {
            (Some(live), Some(&bit)) => live.contains(bit),
            _ => false,
        }
    }
}

/// The channel created by a `make(chan)` node.
fn make_chan(cfg: &Cfg, program: &Program, id: NodeId) -> Option<ValueId> {
    let NodeKind::Ssa(at) = cfg.node(id).kind() else {
        return None;
    };
    let instr = program.instr(at);
    match instr.kind {
        InstrKind::MakeChan { .. } => instr.value,
        _ => None,
    }
}

/// The values a node reads. Select cases and calls see the operands of
/// their instruction.
fn operands(cfg: &Cfg, program: &Program, id: NodeId) -> Vec<ValueId> {
    match cfg.node(id).kind().instr() {
        Some(at) => program.instr(at).kind.operands(),
        None => Vec::new(),
    }
}

/// The channel allocations a value may refer to.
fn allocations<P: PointerAnalysis>(program: &Program, pointer: &P, value: ValueId) -> Vec<ValueId> {
    let direct = program
        .defining_instr(value)
        .filter(|(_, instr)| matches!(instr.kind, InstrKind::MakeChan { .. }))
        .map(|_| value);
    pointer
        .queries(value)
        .labels()
        .iter()
        .filter(|label| label.path.is_empty())
        .map(|label| label.value)
        .chain(direct)
        .collect()
}
