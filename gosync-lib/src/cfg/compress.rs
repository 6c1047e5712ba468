//! Removes the synthetic nodes that carry no information. Compression keeps
//! the paths between the remaining nodes, and running it twice changes
//! nothing.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::cfg::{Cfg, NodeId, NodeKind};

/// Compresses the graph in place and drops the nodes unreachable from the
/// entries.
pub fn compress(cfg: &mut Cfg) {
    let before = cfg.len();
    let mut compressor = Compressor {
        cfg: &mut *cfg,
        deferrers: HashMap::new(),
        compressed: 0,
    };
    let mut unreachable = 0;
    loop {
        compressor.pass();
        let (reached, detached) = reachable(compressor.cfg);
        let dropped: Vec<NodeId> = compressor
            .cfg
            .node_ids()
            .filter(|id| !reached.contains(id))
            .collect();
        if dropped.is_empty() && !detached {
            break;
        }
        unreachable += dropped.len();
        for id in dropped {
            compressor.cfg.remove_node(id);
        }
    }
    let compressed = compressor.compressed;
    resolve_dangling(cfg);
    debug!(
        before,
        compressed,
        unreachable,
        after = cfg.len(),
        "compressed CFG"
    );
}

struct Compressor<'c> {
    cfg: &'c mut Cfg,
    /// The nodes whose defer link was moved to a node that overtook a
    /// removed one.
    deferrers: HashMap<NodeId, BTreeSet<NodeId>>,
    compressed: usize,
}

impl Compressor<'_> {
    /// Compresses the nodes met by a sweep from the entries. Touched nodes
    /// are revisited.
    fn pass(&mut self) {
        let mut expanded = HashSet::new();
        let mut worklist: VecDeque<NodeId> = self.cfg.entries.iter().copied().collect();
        while let Some(id) = worklist.pop_front() {
            if self.cfg.is_removed(id) {
                continue;
            }
            if self.cfg.node(id).kind.is_compressible() {
                if let Some(touched) = self.compress_node(id) {
                    worklist.extend(touched);
                    continue;
                }
            }
            if expanded.insert(id) {
                let node = self.cfg.node(id);
                worklist.extend(node.successors.iter().copied());
                worklist.extend(node.spawns.iter().copied());
                worklist.extend(node.panic_cont);
            }
        }
    }

    /// Applies the first matching rule. Returns the nodes to revisit, or
    /// [None] when the node stays.
    fn compress_node(&mut self, id: NodeId) -> Option<Vec<NodeId>> {
        let node = self.cfg.node(id);
        if node.successors.contains(&id) {
            self.cfg.remove_edge(id, id);
            return Some(vec![id]);
        }
        let successors: Vec<NodeId> = node.successors.iter().copied().collect();
        let predecessors: Vec<NodeId> = node.predecessors.iter().copied().collect();
        match (&successors[..], &predecessors[..]) {
            ([], _) => {
                self.remove(id);
                Some(predecessors)
            }
            (&[next], _) => {
                for &prev in &predecessors {
                    self.cfg.add_edge(prev, next);
                }
                let panickers = self.cfg.node(id).panickers.clone();
                for panicker in panickers {
                    self.cfg.set_panic_cont(panicker, Some(next));
                }
                self.transfer_defer_links(id, next);
                self.remove(id);
                let mut touched = predecessors;
                touched.push(next);
                Some(touched)
            }
            (_, &[prev]) => {
                for &next in &successors {
                    self.cfg.add_edge(prev, next);
                }
                if self.cfg.node(prev).is_deferred() {
                    self.transfer_defer_links(id, prev);
                }
                self.remove(id);
                let mut touched = successors;
                touched.push(prev);
                Some(touched)
            }
            _ => None,
        }
    }

    fn remove(&mut self, id: NodeId) {
        self.deferrers.remove(&id);
        self.cfg.remove_node(id);
        self.compressed += 1;
    }

    /// The nodes linked to `removed` get linked to `overtaker`.
    fn transfer_defer_links(&mut self, removed: NodeId, overtaker: NodeId) {
        let mut linked = self.deferrers.remove(&removed).unwrap_or_default();
        let node = self.cfg.node(removed);
        if node.is_deferred() {
            linked.extend(node.defer_link);
        }
        for mirror in linked {
            if mirror == overtaker || self.cfg.is_removed(mirror) {
                continue;
            }
            self.cfg.node_mut(mirror).defer_link = Some(overtaker);
            self.deferrers.entry(overtaker).or_default().insert(mirror);
        }
    }
}

/// The nodes reachable from the entries over control flow, spawn and panic
/// edges. The exit of every reached function is kept even if it cannot be
/// reached, it stays the defer link of the entry. Such an exit loses its
/// outgoing edges. The flag tells whether any edge was removed.
fn reachable(cfg: &mut Cfg) -> (HashSet<NodeId>, bool) {
    let mut reached: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = cfg.entries.iter().copied().collect();
    while let Some(id) = stack.pop() {
        if !reached.insert(id) {
            continue;
        }
        let node = cfg.node(id);
        stack.extend(node.successors.iter().copied());
        stack.extend(node.spawns.iter().copied());
        stack.extend(node.panic_cont);
    }
    let exits: Vec<NodeId> = reached
        .iter()
        .filter_map(|&id| match cfg.node(id).kind {
            NodeKind::FunctionEntry(function) => cfg.function_exit(function),
            _ => None,
        })
        .filter(|exit| !reached.contains(exit))
        .collect();
    let mut detached = false;
    for exit in exits {
        let successors: Vec<NodeId> = cfg.node(exit).successors.iter().copied().collect();
        for next in successors {
            cfg.remove_edge(exit, next);
            detached = true;
        }
        reached.insert(exit);
    }
    (reached, detached)
}

/// Panic continuations into removed nodes go to the exit of the function,
/// defer links into removed nodes are dropped.
fn resolve_dangling(cfg: &mut Cfg) {
    let live: Vec<NodeId> = cfg.node_ids().collect();
    for id in live {
        let node = cfg.node(id);
        if let Some(cont) = node.panic_cont.filter(|&cont| cfg.is_removed(cont)) {
            let exit = node
                .function
                .and_then(|function| cfg.function_exit(function))
                .filter(|&exit| exit != cont && !cfg.is_removed(exit));
            cfg.node_mut(id).panic_cont = None;
            cfg.set_panic_cont(id, exit);
        }
        if cfg.node(id).defer_link.is_some_and(|link| cfg.is_removed(link)) {
            cfg.node_mut(id).defer_link = None;
        }
    }
}
