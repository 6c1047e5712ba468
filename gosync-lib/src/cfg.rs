//! The control flow graph of a whole program. Every node is either an SSA
//! instruction or a synthetic marker. Nodes live in an arena owned by the
//! [Cfg] and refer to each other by [NodeId]. The graph is only mutated by
//! the [builder] and by [compress], afterwards it is frozen.

use core::fmt::Display;
use std::collections::{BTreeSet, HashMap};

use analysis::cfg::FlowGraph;

use crate::error::{AnalysisError, Result};
use crate::ssa::{
    Builtin, Callee, FunctionId, InstrKind, InstrRef, Program, SyncKind, UnOpKind, ValueId,
};

pub mod builder;
pub mod comm;
pub mod compress;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Methods of the synchronization primitives that are modeled as single
/// nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConcOp {
    Lock,
    Unlock,
    RLock,
    RUnlock,
    Signal,
    Broadcast,
    Add,
    Done,
    Wait,
}

impl ConcOp {
    /// The modeled methods of a primitive.
    pub fn from_method(primitive: SyncKind, method: &str) -> Option<Self> {
        use ConcOp::*;
        Some(match (primitive, method) {
            (SyncKind::Mutex | SyncKind::RwMutex | SyncKind::Locker, "Lock") => Lock,
            (SyncKind::Mutex | SyncKind::RwMutex | SyncKind::Locker, "Unlock") => Unlock,
            (SyncKind::RwMutex, "RLock") => RLock,
            (SyncKind::RwMutex, "RUnlock") => RUnlock,
            (SyncKind::Cond, "Signal") => Signal,
            (SyncKind::Cond, "Broadcast") => Broadcast,
            (SyncKind::WaitGroup, "Add") => Add,
            (SyncKind::WaitGroup, "Done") => Done,
            (SyncKind::WaitGroup, "Wait") => Wait,
            _ => return None,
        })
    }
}

/// What a node stands for. The kind identifies the node: building the same
/// kind twice yields the same node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// An SSA instruction without special treatment.
    Ssa(InstrRef),
    FunctionEntry(FunctionId),
    FunctionExit(FunctionId),
    BlockEntry { function: FunctionId, block: usize },
    BlockExit { function: FunctionId, block: usize },
    /// The mirror of [NodeKind::BlockEntry] on the path running the
    /// deferred calls.
    BlockEntryDefer { function: FunctionId, block: usize },
    BlockExitDefer { function: FunctionId, block: usize },
    /// The start of the execution of a deferred call.
    PreDeferCall(InstrRef),
    PostDeferCall(InstrRef),
    /// Where the execution continues after the callees of a call return.
    PostCall(InstrRef),
    Select(InstrRef),
    SelectDefer(InstrRef),
    SelectSend { select: InstrRef, index: usize },
    SelectRecv { select: InstrRef, index: usize },
    SelectDefault(InstrRef),
    /// A call, `go` or `defer` of a builtin function.
    BuiltinCall { at: InstrRef, builtin: Builtin },
    /// A method call on a synchronization primitive.
    ConcBuiltin { at: InstrRef, op: ConcOp, primitive: SyncKind },
    /// `Cond.Wait` releasing the lock of the condition variable.
    Waiting(InstrRef),
    /// `Cond.Wait` reacquiring the lock after a wake up.
    Waking(InstrRef),
    /// The goroutine spawned by a `go` instruction, before it starts.
    PendingGo(InstrRef),
    /// The end of a goroutine running a builtin.
    GoExit(InstrRef),
    /// The goroutine blocks forever.
    TerminateGoroutine(InstrRef),
}

impl NodeKind {
    /// The instruction the node was built from.
    pub fn instr(&self) -> Option<InstrRef> {
        use NodeKind::*;
        match *self {
            Ssa(at) | PreDeferCall(at) | PostDeferCall(at) | PostCall(at) | Select(at)
            | SelectDefer(at) | SelectDefault(at) | Waiting(at) | Waking(at) | PendingGo(at)
            | GoExit(at) | TerminateGoroutine(at) => Some(at),
            SelectSend { select, .. } | SelectRecv { select, .. } => Some(select),
            BuiltinCall { at, .. } | ConcBuiltin { at, .. } => Some(at),
            FunctionEntry(_) | FunctionExit(_) | BlockEntry { .. } | BlockExit { .. }
            | BlockEntryDefer { .. } | BlockExitDefer { .. } => None,
        }
    }

    /// Synthetic nodes carrying no information that compression may remove.
    pub fn is_compressible(&self) -> bool {
        matches!(
            self,
            NodeKind::BlockEntry { .. }
                | NodeKind::BlockExit { .. }
                | NodeKind::BlockEntryDefer { .. }
                | NodeKind::BlockExitDefer { .. }
                | NodeKind::SelectDefer(_)
        )
    }

    /// Nodes on the paths running deferred calls. The function exit ends
    /// these paths.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            NodeKind::BlockEntryDefer { .. }
                | NodeKind::BlockExitDefer { .. }
                | NodeKind::SelectDefer(_)
                | NodeKind::PreDeferCall(_)
                | NodeKind::PostDeferCall(_)
                | NodeKind::FunctionExit(_)
        )
    }
}

/// The deterministic identifier of a node.
impl Display for NodeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use NodeKind::*;
        match self {
            Ssa(at) => write!(f, "Ssa:{at}"),
            FunctionEntry(func) => write!(f, "FunctionEntry:{func}"),
            FunctionExit(func) => write!(f, "FunctionExit:{func}"),
            BlockEntry { function, block } => write!(f, "BlockEntry:{function}:{block}"),
            BlockExit { function, block } => write!(f, "BlockExit:{function}:{block}"),
            BlockEntryDefer { function, block } => write!(f, "BlockEntryDefer:{function}:{block}"),
            BlockExitDefer { function, block } => write!(f, "BlockExitDefer:{function}:{block}"),
            PreDeferCall(at) => write!(f, "PreDeferCall:{at}"),
            PostDeferCall(at) => write!(f, "PostDeferCall:{at}"),
            PostCall(at) => write!(f, "PostCall:{at}"),
            Select(at) => write!(f, "Select:{at}"),
            SelectDefer(at) => write!(f, "SelectDefer:{at}"),
            SelectSend { select, index } => write!(f, "SelectSend:{select}:{index}"),
            SelectRecv { select, index } => write!(f, "SelectRecv:{select}:{index}"),
            SelectDefault(at) => write!(f, "SelectDefault:{at}"),
            BuiltinCall { at, builtin } => write!(f, "BuiltinCall:{at}:{}", builtin.name()),
            ConcBuiltin { at, op, .. } => write!(f, "ConcBuiltin:{at}:{op:?}"),
            Waiting(at) => write!(f, "Waiting:{at}"),
            Waking(at) => write!(f, "Waking:{at}"),
            PendingGo(at) => write!(f, "PendingGo:{at}"),
            GoExit(at) => write!(f, "GoExit:{at}"),
            TerminateGoroutine(at) => write!(f, "TerminateGoroutine:{at}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    kind: NodeKind,
    /// [None] for removed nodes.
    function: Option<FunctionId>,
    successors: BTreeSet<NodeId>,
    predecessors: BTreeSet<NodeId>,
    /// Entries of the goroutines spawned by the node.
    spawns: BTreeSet<NodeId>,
    /// The nodes whose panic continuation is this node.
    panickers: BTreeSet<NodeId>,
    defer_link: Option<NodeId>,
    panic_cont: Option<NodeId>,
    /// Pairs calls with the node where the execution continues after the
    /// call.
    call_relation: Option<NodeId>,
    removed: bool,
}

impl Node {
    fn new(kind: NodeKind, function: FunctionId) -> Self {
        Self {
            kind,
            function: Some(function),
            successors: BTreeSet::new(),
            predecessors: BTreeSet::new(),
            spawns: BTreeSet::new(),
            panickers: BTreeSet::new(),
            defer_link: None,
            panic_cont: None,
            call_relation: None,
            removed: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn function(&self) -> Option<FunctionId> {
        self.function
    }

    pub fn successors(&self) -> &BTreeSet<NodeId> {
        &self.successors
    }

    pub fn predecessors(&self) -> &BTreeSet<NodeId> {
        &self.predecessors
    }

    pub fn spawns(&self) -> &BTreeSet<NodeId> {
        &self.spawns
    }

    pub fn panickers(&self) -> &BTreeSet<NodeId> {
        &self.panickers
    }

    pub fn defer_link(&self) -> Option<NodeId> {
        self.defer_link
    }

    pub fn panic_cont(&self) -> Option<NodeId> {
        self.panic_cont
    }

    pub fn call_relation(&self) -> Option<NodeId> {
        self.call_relation
    }

    pub fn is_deferred(&self) -> bool {
        self.kind.is_deferred()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cfg {
    nodes: Vec<Node>,
    by_kind: HashMap<NodeKind, NodeId>,
    /// The live nodes by their synthetic identifier.
    by_id: HashMap<String, NodeId>,
    /// The entries of the functions the analysis starts from.
    entries: BTreeSet<NodeId>,
    functions: HashMap<FunctionId, (NodeId, NodeId)>,
}

impl Cfg {
    //////////////////
    // Construction //
    //////////////////

    /// Returns the node of the given kind, creating it when needed.
    fn node_of(&mut self, kind: NodeKind, function: FunctionId) -> NodeId {
        if let Some(&id) = self.by_kind.get(&kind) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, function));
        self.by_kind.insert(kind, id);
        self.by_id.insert(kind.to_string(), id);
        id
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.node_mut(from).successors.insert(to);
        self.node_mut(to).predecessors.insert(from);
        self
    }

    fn remove_edge(&mut self, from: NodeId, to: NodeId) {
        self.node_mut(from).successors.remove(&to);
        self.node_mut(to).predecessors.remove(&from);
    }

    fn add_spawn(&mut self, from: NodeId, entry: NodeId) {
        self.node_mut(from).spawns.insert(entry);
    }

    fn set_panic_cont(&mut self, node: NodeId, cont: Option<NodeId>) {
        if let Some(old) = self.node_mut(node).panic_cont.take() {
            self.node_mut(old).panickers.remove(&node);
        }
        if let Some(cont) = cont {
            self.node_mut(cont).panickers.insert(node);
        }
        self.node_mut(node).panic_cont = cont;
    }

    /// Pairs a node with its mirror in both directions.
    fn set_defer_link(&mut self, node: NodeId, mirror: NodeId) {
        self.node_mut(node).defer_link = Some(mirror);
        self.node_mut(mirror).defer_link = Some(node);
    }

    fn set_call_relation(&mut self, call: NodeId, post: NodeId) {
        self.node_mut(call).call_relation = Some(post);
        self.node_mut(post).call_relation = Some(call);
    }

    /// Detaches a node from the graph.
    fn remove_node(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        let successors = core::mem::take(&mut node.successors);
        let predecessors = core::mem::take(&mut node.predecessors);
        let panickers = core::mem::take(&mut node.panickers);
        let panic_cont = node.panic_cont.take();
        node.spawns.clear();
        node.function = None;
        node.removed = true;
        let kind = node.kind;
        for next in successors {
            self.node_mut(next).predecessors.remove(&id);
        }
        for prev in predecessors {
            self.node_mut(prev).successors.remove(&id);
        }
        for panicker in panickers {
            // Dangling continuations are resolved at the end of compression.
            self.node_mut(panicker).panic_cont = Some(id);
        }
        if let Some(cont) = panic_cont {
            self.node_mut(cont).panickers.remove(&id);
        }
        // Only pending goroutines are spawned.
        if matches!(kind, NodeKind::PendingGo(_)) {
            for node in &mut self.nodes {
                node.spawns.remove(&id);
            }
        }
        self.by_kind.remove(&kind);
        self.by_id.remove(&kind.to_string());
        self.entries.remove(&id);
    }

    ////////////////
    // Navigation //
    ////////////////

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn is_removed(&self, id: NodeId) -> bool {
        self.node(id).removed
    }

    pub fn lookup(&self, kind: NodeKind) -> Option<NodeId> {
        self.by_kind.get(&kind).copied()
    }

    /// Finds a node by its identifier, see the [Display] of [NodeKind].
    pub fn node_by_id(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    pub fn entries(&self) -> &BTreeSet<NodeId> {
        &self.entries
    }

    pub fn function_entry(&self, function: FunctionId) -> Option<NodeId> {
        self.functions.get(&function).map(|&(entry, _)| entry)
    }

    pub fn function_exit(&self, function: FunctionId) -> Option<NodeId> {
        self.functions.get(&function).map(|&(_, exit)| exit)
    }

    /// The live nodes in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.removed)
            .map(|(i, _)| NodeId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.node_ids().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Where the execution may go after the node: the successors, or for
    /// nodes without successors, the panic continuation and the defer link
    /// of nodes on the normal path.
    pub fn continuations(&self, id: NodeId) -> BTreeSet<NodeId> {
        let node = self.node(id);
        if !node.successors.is_empty() {
            return node.successors.clone();
        }
        let mut result = BTreeSet::new();
        result.extend(node.panic_cont);
        if !node.is_deferred() {
            result.extend(node.defer_link);
        }
        result
    }

    ///////////////////
    // Introspection //
    ///////////////////

    fn instruction<'p>(&self, program: &'p Program, id: NodeId) -> Option<&'p InstrKind> {
        self.node(id).kind.instr().map(|at| &program.instr(at).kind)
    }

    /// Channel operations: making a channel, send, receive, close and
    /// select.
    pub fn is_channel_op(&self, program: &Program, id: NodeId) -> bool {
        match self.node(id).kind {
            NodeKind::Select(_) => true,
            NodeKind::BuiltinCall { builtin, .. } => builtin == Builtin::Close,
            NodeKind::Ssa(_) => matches!(
                self.instruction(program, id),
                Some(InstrKind::MakeChan { .. })
                    | Some(InstrKind::Send { .. })
                    | Some(InstrKind::UnOp {
                        op: UnOpKind::Arrow,
                        ..
                    })
            ),
            _ => false,
        }
    }

    /// Nodes where goroutines interact: channel operations, operations on
    /// the synchronization primitives, spawns, and goroutines blocking
    /// forever.
    pub fn is_communication_node(&self, program: &Program, id: NodeId) -> bool {
        if self.is_channel_op(program, id) {
            return true;
        }
        match self.node(id).kind {
            NodeKind::ConcBuiltin { .. }
            | NodeKind::Waiting(_)
            | NodeKind::Waking(_)
            | NodeKind::PendingGo(_)
            | NodeKind::TerminateGoroutine(_) => true,
            NodeKind::Ssa(_) => matches!(self.instruction(program, id), Some(InstrKind::Go(_))),
            _ => false,
        }
    }

    /// The channel operand of a channel operation.
    pub fn channel_operand(&self, program: &Program, id: NodeId) -> Option<ValueId> {
        let node = self.node(id);
        let instr = self.instruction(program, id)?;
        match (node.kind, instr) {
            (NodeKind::Ssa(at), InstrKind::MakeChan { .. }) => program.instr(at).value,
            (NodeKind::Ssa(_), InstrKind::Send { chan, .. }) => Some(*chan),
            (
                NodeKind::Ssa(_),
                InstrKind::UnOp {
                    op: UnOpKind::Arrow,
                    x,
                    ..
                },
            ) => Some(*x),
            (
                NodeKind::BuiltinCall {
                    builtin: Builtin::Close,
                    ..
                },
                _,
            ) => instr.call_common()?.args.first().copied(),
            (
                NodeKind::SelectSend { index, .. } | NodeKind::SelectRecv { index, .. },
                InstrKind::Select { states, .. },
            ) => states.get(index).map(|state| state.chan),
            _ => None,
        }
    }

    /// The receiver of a method call on a synchronization primitive.
    fn receiver(&self, program: &Program, id: NodeId, primitives: &[SyncKind]) -> Option<ValueId> {
        let call = self.instruction(program, id)?.call_common()?;
        let receiver = match &call.callee {
            Callee::Invoke { recv, .. } => Some(*recv),
            Callee::Value(_) => call.args.first().copied(),
        };
        match self.node(id).kind {
            NodeKind::ConcBuiltin { primitive, .. } if primitives.contains(&primitive) => receiver,
            NodeKind::Waiting(_) | NodeKind::Waking(_) if primitives.contains(&SyncKind::Cond) => {
                receiver
            }
            _ => None,
        }
    }

    pub fn mutex_operand(&self, program: &Program, id: NodeId) -> Option<ValueId> {
        self.receiver(program, id, &[SyncKind::Mutex])
    }

    pub fn rw_mutex_operand(&self, program: &Program, id: NodeId) -> Option<ValueId> {
        self.receiver(program, id, &[SyncKind::RwMutex])
    }

    /// The `sync.Locker` interface value of `Lock` and `Unlock` calls.
    pub fn locker_operand(&self, program: &Program, id: NodeId) -> Option<ValueId> {
        self.receiver(program, id, &[SyncKind::Locker])
    }

    pub fn cond_operand(&self, program: &Program, id: NodeId) -> Option<ValueId> {
        self.receiver(program, id, &[SyncKind::Cond])
    }

    pub fn wait_group_operand(&self, program: &Program, id: NodeId) -> Option<ValueId> {
        self.receiver(program, id, &[SyncKind::WaitGroup])
    }

    fn expect_operand(&self, id: NodeId, what: &str, operand: Option<ValueId>) -> Result<ValueId> {
        operand.ok_or_else(|| {
            AnalysisError::UnsupportedOperation(format!(
                "{} has no {what} operand",
                self.node(id).kind
            ))
        })
    }

    pub fn channel(&self, program: &Program, id: NodeId) -> Result<ValueId> {
        self.expect_operand(id, "channel", self.channel_operand(program, id))
    }

    pub fn mutex(&self, program: &Program, id: NodeId) -> Result<ValueId> {
        self.expect_operand(id, "mutex", self.mutex_operand(program, id))
    }

    pub fn rw_mutex(&self, program: &Program, id: NodeId) -> Result<ValueId> {
        self.expect_operand(id, "rwmutex", self.rw_mutex_operand(program, id))
    }

    pub fn locker(&self, program: &Program, id: NodeId) -> Result<ValueId> {
        self.expect_operand(id, "locker", self.locker_operand(program, id))
    }

    pub fn cond(&self, program: &Program, id: NodeId) -> Result<ValueId> {
        self.expect_operand(id, "cond", self.cond_operand(program, id))
    }

    pub fn wait_group(&self, program: &Program, id: NodeId) -> Result<ValueId> {
        self.expect_operand(id, "waitgroup", self.wait_group_operand(program, id))
    }

    /// Renders the graph in the Graphviz dot format.
    pub fn to_dot(&self) -> String {
        analysis::cfg::print(self, |id| self.node(id).kind.to_string())
    }
}

impl FlowGraph for Cfg {
    type Node = NodeId;

    fn roots(&self) -> Vec<Self::Node> {
        self.entries.iter().copied().collect()
    }

    fn nodes(&self) -> Vec<Self::Node> {
        self.node_ids().collect()
    }

    fn flow_successors(&self, node: Self::Node) -> Vec<Self::Node> {
        self.node(node).successors.iter().copied().collect()
    }

    fn flow_predecessors(&self, node: Self::Node) -> Vec<Self::Node> {
        self.node(node).predecessors.iter().copied().collect()
    }
}


#[cfg(test)]
mod compress_tests;
