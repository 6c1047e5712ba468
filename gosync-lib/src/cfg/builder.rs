//! Lifts the SSA of the functions reachable from the roots into a [Cfg].
//!
//! Every basic block `b` gets four synthetic nodes: `BlockEntry(b)` and
//! `BlockExit(b)` delimiting the instructions of the block, and their
//! mirrors `BlockEntryDefer(b)` and `BlockExitDefer(b)` on the path running
//! the deferred calls. The deferred path goes backwards:
//!
//! ```text
//!   BlockExitDefer(b) -> latest PreDeferCall of b -> .. -> PostDeferCall
//!     -> earlier PreDeferCall -> .. -> BlockEntryDefer(b)
//!     -> BlockExitDefer(predecessors of b) -> .. -> FunctionExit
//! ```
//!
//! Returning blocks continue from `BlockExit` to `BlockExitDefer`, so the
//! deferred calls run before the function exits.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::cfg::compress::compress;
use crate::cfg::{Cfg, ConcOp, NodeId, NodeKind};
use crate::config::Options;
use crate::error::{AnalysisError, Result};
use crate::pointer::PointerAnalysis;
use crate::ssa::{
    BinOpKind, Builtin, CallCommon, Callee, ChanDir, FunctionId, InstrKind, InstrRef, Literal,
    Program, SyncKind, ValueId, ValueKind,
};

/// What a call may invoke.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    Functions(Vec<FunctionId>),
    Builtin(Builtin),
    Conc(ConcOp, SyncKind),
    CondWait,
}

/// The blocks the cases of a select continue in.
#[derive(Clone, Debug, Default)]
struct SelectBranches {
    cases: BTreeMap<usize, usize>,
    /// The block reached when no comparison of the select index holds. It
    /// is the default case of non-blocking selects.
    fallthrough: Option<usize>,
}

impl SelectBranches {
    fn targets(&self) -> impl Iterator<Item = usize> + '_ {
        self.cases.values().copied().chain(self.fallthrough)
    }
}

#[derive(Clone, Copy, Debug)]
struct BlockNodes {
    entry: NodeId,
    exit: NodeId,
    entry_defer: NodeId,
    exit_defer: NodeId,
}

pub struct CfgBuilder<'a, P: PointerAnalysis> {
    program: &'a Program,
    pointer: &'a P,
    options: &'a Options,
    cfg: Cfg,
    pending: VecDeque<FunctionId>,
}

impl<'a, P: PointerAnalysis> CfgBuilder<'a, P> {
    pub fn new(program: &'a Program, pointer: &'a P, options: &'a Options) -> Self {
        Self {
            program,
            pointer,
            options,
            cfg: Cfg::default(),
            pending: VecDeque::new(),
        }
    }

    /// Builds and compresses the graph of the functions reachable from the
    /// roots through calls and spawns.
    pub fn build(mut self, roots: &[FunctionId]) -> Result<Cfg> {
        for &root in roots {
            let (entry, _) = self.function(root);
            self.cfg.entries.insert(entry);
        }
        while let Some(function) = self.pending.pop_front() {
            self.build_function(function)?;
        }
        debug!(nodes = self.cfg.len(), "built CFG");
        compress(&mut self.cfg);
        Ok(self.cfg)
    }

    /// Builds the graph starting from the root of the call graph, or from
    /// the `init` and `main` functions of the `main` package.
    pub fn build_program(self) -> Result<Cfg> {
        let roots: Vec<FunctionId> = match self.pointer.root_function() {
            Some(root) => vec![root],
            None => self
                .program
                .functions()
                .filter(|(_, f)| &*f.package == "main" && matches!(&*f.name, "init" | "main"))
                .map(|(id, _)| id)
                .collect(),
        };
        self.build(&roots)
    }

    /// The entry and exit of a function. The body is built later.
    fn function(&mut self, function: FunctionId) -> (NodeId, NodeId) {
        if let Some(&nodes) = self.cfg.functions.get(&function) {
            return nodes;
        }
        let entry = self.cfg.node_of(NodeKind::FunctionEntry(function), function);
        let exit = self.cfg.node_of(NodeKind::FunctionExit(function), function);
        self.cfg.set_defer_link(entry, exit);
        self.cfg.functions.insert(function, (entry, exit));
        self.pending.push_back(function);
        (entry, exit)
    }

    fn block_nodes(&mut self, function: FunctionId, block: usize) -> BlockNodes {
        let cfg = &mut self.cfg;
        let nodes = BlockNodes {
            entry: cfg.node_of(NodeKind::BlockEntry { function, block }, function),
            exit: cfg.node_of(NodeKind::BlockExit { function, block }, function),
            entry_defer: cfg.node_of(NodeKind::BlockEntryDefer { function, block }, function),
            exit_defer: cfg.node_of(NodeKind::BlockExitDefer { function, block }, function),
        };
        cfg.set_defer_link(nodes.entry, nodes.entry_defer);
        cfg.set_defer_link(nodes.exit, nodes.exit_defer);
        nodes
    }

    fn build_function(&mut self, function: FunctionId) -> Result<()> {
        let program = self.program;
        let (entry, exit) = self.function(function);
        let body = program.function(function);
        if !body.has_body() {
            self.cfg.add_edge(entry, exit);
            trace!(function = %program.qualified_name(function), "external function");
            return Ok(());
        }

        // The case bodies of lowered selects continue the deferred path at
        // the select.
        let mut selects = HashMap::new();
        let mut case_targets = HashMap::new();
        for (b, block) in body.blocks.iter().enumerate() {
            for (index, instr) in block.instrs.iter().enumerate() {
                let InstrKind::Select { states, blocking } = &instr.kind else {
                    continue;
                };
                if states.is_empty() && *blocking {
                    continue;
                }
                let at = InstrRef {
                    function,
                    block: b,
                    index,
                };
                let branches = self.select_branches(at, states.len(), *blocking);
                let select_defer = self.cfg.node_of(NodeKind::SelectDefer(at), function);
                for target in branches.targets() {
                    case_targets.insert(target, select_defer);
                }
                selects.insert(at, branches);
            }
        }

        for block in 0..body.blocks.len() {
            self.build_block(function, block, &selects, &case_targets)?;
        }
        let first = self.block_nodes(function, 0);
        self.cfg.add_edge(entry, first.entry);
        self.cfg.add_edge(first.entry_defer, exit);
        debug!(
            function = %program.qualified_name(function),
            blocks = body.blocks.len(),
            "built function"
        );
        Ok(())
    }

    fn connect(&mut self, frontier: &[NodeId], to: NodeId) {
        for &from in frontier {
            self.cfg.add_edge(from, to);
        }
    }

    fn build_block(
        &mut self,
        function: FunctionId,
        b: usize,
        selects: &HashMap<InstrRef, SelectBranches>,
        case_targets: &HashMap<usize, NodeId>,
    ) -> Result<()> {
        let program = self.program;
        let block = program.block(function, b);
        let nodes = self.block_nodes(function, b);

        match case_targets.get(&b) {
            Some(&select_defer) => {
                self.cfg.add_edge(nodes.entry_defer, select_defer);
            }
            None => {
                for &pred in &block.preds {
                    let pred_defer = self.block_nodes(function, pred).exit_defer;
                    self.cfg.add_edge(nodes.entry_defer, pred_defer);
                }
            }
        }

        let mut frontier = vec![nodes.entry];
        let mut cursor = nodes.entry_defer;
        let mut terminated = false;
        for (index, instr) in block.instrs.iter().enumerate() {
            let at = InstrRef {
                function,
                block: b,
                index,
            };
            match &instr.kind {
                InstrKind::Call(call) => {
                    frontier = self.call(at, call, &frontier, nodes)?;
                    if frontier.is_empty() {
                        terminated = true;
                        break;
                    }
                }
                InstrKind::Go(call) => {
                    let node = self.cfg.node_of(NodeKind::Ssa(at), function);
                    self.connect(&frontier, node);
                    let pending = self.cfg.node_of(NodeKind::PendingGo(at), function);
                    self.cfg.add_spawn(node, pending);
                    self.spawn(at, call, pending)?;
                    frontier = vec![node];
                }
                InstrKind::Defer(call) => {
                    let node = self.cfg.node_of(NodeKind::Ssa(at), function);
                    self.connect(&frontier, node);
                    let pre = self.cfg.node_of(NodeKind::PreDeferCall(at), function);
                    let post = self.cfg.node_of(NodeKind::PostDeferCall(at), function);
                    self.cfg.set_defer_link(node, pre);
                    self.cfg.add_edge(post, cursor);
                    self.cfg.set_panic_cont(post, Some(cursor));
                    self.invoke(at, call, pre, post)?;
                    self.cfg.set_call_relation(pre, post);
                    cursor = pre;
                    frontier = vec![node];
                }
                InstrKind::Select { states, blocking } if states.is_empty() && *blocking => {
                    let node = self.cfg.node_of(NodeKind::TerminateGoroutine(at), function);
                    self.connect(&frontier, node);
                    terminated = true;
                    break;
                }
                InstrKind::Select { states, blocking } => {
                    let select = self.cfg.node_of(NodeKind::Select(at), function);
                    self.connect(&frontier, select);
                    let select_defer = self.cfg.node_of(NodeKind::SelectDefer(at), function);
                    self.cfg.set_defer_link(select, select_defer);
                    self.cfg.add_edge(select_defer, cursor);

                    let mut cases = Vec::new();
                    for (i, state) in states.iter().enumerate() {
                        let kind = match state.dir {
                            ChanDir::Send => NodeKind::SelectSend { select: at, index: i },
                            _ => NodeKind::SelectRecv { select: at, index: i },
                        };
                        cases.push((Some(i), self.cfg.node_of(kind, function)));
                    }
                    if !*blocking {
                        cases.push((None, self.cfg.node_of(NodeKind::SelectDefault(at), function)));
                    }
                    for &(_, case) in &cases {
                        self.cfg.add_edge(select, case);
                    }

                    let branches = selects.get(&at).cloned().unwrap_or_default();
                    if branches.cases.is_empty() && branches.fallthrough.is_none() {
                        // The index is not branched on, the cases join in the
                        // rest of the block.
                        frontier = cases.into_iter().map(|(_, case)| case).collect();
                        continue;
                    }
                    for (state, case) in cases {
                        let target = state
                            .and_then(|i| branches.cases.get(&i).copied())
                            .or(branches.fallthrough);
                        match target {
                            Some(target) => {
                                let entry = self.block_nodes(function, target).entry;
                                self.cfg.add_edge(case, entry);
                            }
                            None => trace!(select = %at, case = ?state, "select case without a branch"),
                        }
                    }
                    terminated = true;
                    break;
                }
                InstrKind::Return { .. } => {
                    let node = self.cfg.node_of(NodeKind::Ssa(at), function);
                    self.connect(&frontier, node);
                    self.cfg.add_edge(node, nodes.exit);
                    terminated = true;
                    break;
                }
                InstrKind::Panic { .. } => {
                    let node = self.cfg.node_of(NodeKind::Ssa(at), function);
                    self.connect(&frontier, node);
                    self.cfg.set_panic_cont(node, Some(nodes.exit));
                    terminated = true;
                    break;
                }
                _ => {
                    let node = self.cfg.node_of(NodeKind::Ssa(at), function);
                    self.connect(&frontier, node);
                    frontier = vec![node];
                }
            }
        }
        if !terminated {
            self.connect(&frontier, nodes.exit);
        }

        // Selects and calls that cannot return leave the exit unreached.
        let exit_reached = !self.cfg.node(nodes.exit).predecessors.is_empty();
        if exit_reached && block.succs.is_empty() {
            self.cfg.add_edge(nodes.exit, nodes.exit_defer);
        }
        for &succ in block.succs.iter().filter(|_| exit_reached) {
            let entry = self.block_nodes(function, succ).entry;
            self.cfg.add_edge(nodes.exit, entry);
        }
        self.cfg.add_edge(nodes.exit_defer, cursor);
        Ok(())
    }

    /// Adds the nodes of a call. Returns the nodes the execution continues
    /// from, none when the call cannot return.
    fn call(
        &mut self,
        at: InstrRef,
        call: &CallCommon,
        frontier: &[NodeId],
        nodes: BlockNodes,
    ) -> Result<Vec<NodeId>> {
        let function = at.function;
        match self.resolve(call)? {
            Target::Builtin(builtin) => {
                let node = self.cfg.node_of(NodeKind::BuiltinCall { at, builtin }, function);
                self.connect(frontier, node);
                self.cfg.set_call_relation(node, node);
                Ok(vec![node])
            }
            Target::Conc(op, primitive) => {
                let kind = NodeKind::ConcBuiltin { at, op, primitive };
                let node = self.cfg.node_of(kind, function);
                self.connect(frontier, node);
                self.cfg.set_call_relation(node, node);
                Ok(vec![node])
            }
            Target::CondWait => {
                let waiting = self.cfg.node_of(NodeKind::Waiting(at), function);
                let waking = self.cfg.node_of(NodeKind::Waking(at), function);
                self.connect(frontier, waiting);
                self.cfg.add_edge(waiting, waking);
                self.cfg.set_call_relation(waiting, waking);
                Ok(vec![waking])
            }
            Target::Functions(callees) => {
                let node = self.cfg.node_of(NodeKind::Ssa(at), function);
                self.connect(frontier, node);
                if callees.is_empty() {
                    // Calling nil panics, the deferred calls run next.
                    if self.options.verbose {
                        warn!(call = %at, "call without callees");
                    } else {
                        debug!(call = %at, "call without callees");
                    }
                    self.cfg.add_edge(node, nodes.exit_defer);
                    return Ok(Vec::new());
                }
                let post = self.cfg.node_of(NodeKind::PostCall(at), function);
                self.cfg.set_call_relation(node, post);
                for callee in callees {
                    let (entry, exit) = self.function(callee);
                    self.cfg.add_edge(node, entry);
                    self.cfg.add_edge(exit, post);
                }
                Ok(vec![post])
            }
        }
    }

    /// Wires the callees of a deferred or spawned call between `start` and
    /// `end`.
    fn invoke(&mut self, at: InstrRef, call: &CallCommon, start: NodeId, end: NodeId) -> Result<()> {
        let function = at.function;
        match self.resolve(call)? {
            Target::Builtin(builtin) => {
                let node = self.cfg.node_of(NodeKind::BuiltinCall { at, builtin }, function);
                self.cfg.add_edge(start, node).add_edge(node, end);
            }
            Target::Conc(op, primitive) => {
                let kind = NodeKind::ConcBuiltin { at, op, primitive };
                let node = self.cfg.node_of(kind, function);
                self.cfg.add_edge(start, node).add_edge(node, end);
            }
            Target::CondWait => {
                let waiting = self.cfg.node_of(NodeKind::Waiting(at), function);
                let waking = self.cfg.node_of(NodeKind::Waking(at), function);
                self.cfg
                    .add_edge(start, waiting)
                    .add_edge(waiting, waking)
                    .add_edge(waking, end);
                self.cfg.set_call_relation(waiting, waking);
            }
            Target::Functions(callees) if callees.is_empty() => {
                debug!(call = %at, "deferred call without callees");
                self.cfg.add_edge(start, end);
            }
            Target::Functions(callees) => {
                for callee in callees {
                    let (entry, exit) = self.function(callee);
                    self.cfg.add_edge(start, entry).add_edge(exit, end);
                }
            }
        }
        Ok(())
    }

    /// The pending goroutine of a `go` instruction continues in the entries
    /// of the callees. Builtins get a synthetic exit.
    fn spawn(&mut self, at: InstrRef, call: &CallCommon, pending: NodeId) -> Result<()> {
        match self.resolve(call)? {
            Target::Functions(callees) => {
                if callees.is_empty() {
                    debug!(go = %at, "go without callees");
                }
                for callee in callees {
                    let (entry, _) = self.function(callee);
                    self.cfg.add_edge(pending, entry);
                }
                Ok(())
            }
            _ => {
                let exit = self.cfg.node_of(NodeKind::GoExit(at), at.function);
                self.invoke(at, call, pending, exit)
            }
        }
    }

    ////////////////////////
    // Callee resolution. //
    ////////////////////////

    fn resolve(&self, call: &CallCommon) -> Result<Target> {
        let program = self.program;
        match &call.callee {
            Callee::Invoke { recv, method } => {
                if let Some(primitive) = program.sync_kind(program.type_of(*recv)) {
                    return sync_method(primitive, method);
                }
                let mut callees = BTreeSet::new();
                for label in self.pointer.queries(*recv).labels() {
                    let Some((_, instr)) = program.defining_instr(label.value) else {
                        continue;
                    };
                    if let InstrKind::MakeInterface { x } = instr.kind {
                        callees.extend(self.pointer.lookup_method(program.type_of(x), method));
                    }
                }
                Ok(Target::Functions(callees.into_iter().collect()))
            }
            Callee::Value(value) => match &program.value(*value).kind {
                ValueKind::Builtin(builtin) => Ok(Target::Builtin(*builtin)),
                ValueKind::Function(function) => self.static_target(*function),
                _ => {
                    if let Some(function) = self.closure_function(*value) {
                        return self.static_target(function);
                    }
                    let callees: BTreeSet<FunctionId> = self
                        .pointer
                        .queries(*value)
                        .labels()
                        .iter()
                        .filter_map(|label| self.function_of(label.value))
                        .collect();
                    Ok(Target::Functions(callees.into_iter().collect()))
                }
            },
        }
    }

    /// The function of a function value or of a closure.
    fn function_of(&self, value: ValueId) -> Option<FunctionId> {
        match self.program.value(value).kind {
            ValueKind::Function(function) => Some(function),
            _ => self.closure_function(value),
        }
    }

    fn closure_function(&self, value: ValueId) -> Option<FunctionId> {
        let (_, instr) = self.program.defining_instr(value)?;
        match instr.kind {
            InstrKind::MakeClosure { func, .. } => match self.program.value(func).kind {
                ValueKind::Function(function) => Some(function),
                _ => None,
            },
            _ => None,
        }
    }

    /// Methods of the synchronization primitives are modeled by dedicated
    /// nodes instead of their bodies.
    fn static_target(&self, function: FunctionId) -> Result<Target> {
        let program = self.program;
        let callee = program.function(function);
        if &*callee.package == "sync" {
            if let Some(receiver) = &callee.receiver {
                let receiver = program.pointee(receiver).unwrap_or(receiver);
                if let Some(primitive) = program.sync_kind(receiver) {
                    return sync_method(primitive, &callee.name);
                }
            }
        }
        Ok(Target::Functions(vec![function]))
    }

    ////////////////////
    // Select lowering //
    ////////////////////

    /// Finds the case bodies of a select. The front-end compares the
    /// selected index with each case number and branches on the result.
    fn select_branches(&self, at: InstrRef, states: usize, blocking: bool) -> SelectBranches {
        let program = self.program;
        let mut branches = SelectBranches::default();
        let Some(selected) = program.instr(at).value else {
            return branches;
        };
        let index = program.value(selected).referrers.iter().find_map(|&user| {
            let instr = program.instr(user);
            match instr.kind {
                InstrKind::Extract { tuple, index: 0 } if tuple == selected => instr.value,
                _ => None,
            }
        });

        let mut last: Option<(usize, usize)> = None;
        for &user in index.map(|i| &program.value(i).referrers).into_iter().flatten() {
            let instr = program.instr(user);
            let InstrKind::BinOp {
                op: BinOpKind::Eql,
                x,
                y,
            } = instr.kind
            else {
                continue;
            };
            let other = if Some(x) == index { y } else { x };
            let case = match &program.value(other).kind {
                ValueKind::Const(Literal::Int(k)) => usize::try_from(*k).ok(),
                _ => None,
            };
            let (Some(case), Some(compared)) = (case, instr.value) else {
                continue;
            };
            for &branch in &program.value(compared).referrers {
                if !matches!(program.instr(branch).kind, InstrKind::If { .. }) {
                    continue;
                }
                if let [then, otherwise] = program.block(at.function, branch.block).succs[..] {
                    branches.cases.insert(case, then);
                    if last.is_none_or(|(k, _)| case > k) {
                        last = Some((case, otherwise));
                    }
                }
            }
        }
        branches.fallthrough = last.map(|(_, otherwise)| otherwise);

        if branches.cases.is_empty() && states == 1 && !blocking {
            // Single state selects may branch without comparing the index.
            let block = program.block(at.function, at.block);
            let ends_in_if = matches!(
                block.instrs.last().map(|i| &i.kind),
                Some(InstrKind::If { .. })
            );
            if let ([then, otherwise], true) = (&block.succs[..], ends_in_if) {
                trace!(select = %at, "select branching without index comparison");
                branches.cases.insert(0, *then);
                branches.fallthrough = Some(*otherwise);
            }
        }
        branches
    }
}

fn sync_method(primitive: SyncKind, method: &str) -> Result<Target> {
    if primitive == SyncKind::Cond && method == "Wait" {
        return Ok(Target::CondWait);
    }
    ConcOp::from_method(primitive, method)
        .map(|op| Target::Conc(op, primitive))
        .ok_or_else(|| AnalysisError::BuiltinUnknown(format!("sync.{primitive:?}.{method}")))
}
