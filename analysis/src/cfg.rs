use core::cmp::Reverse;
use core::fmt::Debug;
use core::hash::Hash;
use std::collections::{HashMap, HashSet};

use priority_queue::PriorityQueue;

/// A graph of program points connected by control flow. Nodes are small
/// handles (usually indices into an arena owned by the graph).
pub trait FlowGraph {
    type Node: Copy + Eq + Hash + Ord + Debug;

    /// The nodes where the execution starts.
    fn roots(&self) -> Vec<Self::Node>;

    /// Every node of the graph.
    fn nodes(&self) -> Vec<Self::Node>;

    fn flow_successors(&self, node: Self::Node) -> Vec<Self::Node>;

    fn flow_predecessors(&self, node: Self::Node) -> Vec<Self::Node>;
}

/// Depth first traversal from the roots, and then from every node not
/// reached from a root. Successors are explored in reverse order so that
/// the reverse post-order lists them in the order they were given.
fn depth_first<G, F>(graph: &G, mut on_edge: F) -> Vec<G::Node>
where
    G: FlowGraph,
    F: FnMut(G::Node, G::Node, bool),
{
    let mut post_order = Vec::new();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut starts = graph.roots();
    starts.extend(graph.nodes());
    for start in starts {
        if !visited.insert(start) {
            continue;
        }
        on_stack.insert(start);
        let mut succs = graph.flow_successors(start);
        succs.reverse();
        let mut stack = vec![(start, succs, 0_usize)];
        loop {
            let Some(top) = stack.last_mut() else {
                break;
            };
            if top.2 < top.1.len() {
                let from = top.0;
                let next = top.1[top.2];
                top.2 += 1;
                on_edge(from, next, on_stack.contains(&next));
                if visited.insert(next) {
                    on_stack.insert(next);
                    let mut succs = graph.flow_successors(next);
                    succs.reverse();
                    stack.push((next, succs, 0));
                }
            } else {
                let node = top.0;
                on_stack.remove(&node);
                post_order.push(node);
                stack.pop();
            }
        }
    }
    post_order
}

/// Edges pointing back to a node that is on the depth first search stack.
/// In reducible graphs these are the edges going to loop heads.
pub fn get_back_edges<G: FlowGraph>(graph: &G) -> HashSet<(G::Node, G::Node)> {
    let mut back_edges = HashSet::new();
    depth_first(graph, |from, to, is_back_edge| {
        if is_back_edge {
            back_edges.insert((from, to));
        }
    });
    back_edges
}

/// A worklist that always returns the queued node that comes first in
/// reverse post-order.
pub struct RPOWorklist<N: Hash + Eq> {
    queue: PriorityQueue<N, Reverse<usize>>,
    rpo_order: HashMap<N, usize>,
}

impl<N: Copy + Eq + Hash + Ord + Debug> RPOWorklist<N> {
    pub fn new<G: FlowGraph<Node = N>>(graph: &G) -> Self {
        let post_order = depth_first(graph, |_, _, _| {});
        let rpo_order = post_order
            .iter()
            .rev()
            .enumerate()
            .map(|(order, &node)| (node, order))
            .collect();
        Self {
            queue: PriorityQueue::new(),
            rpo_order,
        }
    }

    pub fn get_rpo_order(&self, node: N) -> usize {
        self.rpo_order.get(&node).copied().unwrap_or(usize::MAX)
    }

    pub fn push(&mut self, node: N) {
        let order = self.get_rpo_order(node);
        self.queue.push(node, Reverse(order));
    }

    pub fn push_successors<G: FlowGraph<Node = N>>(&mut self, node: N, graph: &G) {
        for next in graph.flow_successors(node) {
            self.push(next);
        }
    }

    pub fn pop(&mut self) -> Option<N> {
        self.queue.pop().map(|(node, _)| node)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Renders the graph in the Graphviz dot format. Nodes are numbered in the
/// order [FlowGraph::nodes] returns them.
pub fn print<G, P>(graph: &G, printer: P) -> String
where
    G: FlowGraph,
    P: Fn(G::Node) -> String,
{
    let nodes = graph.nodes();
    let numbering: HashMap<G::Node, usize> = nodes
        .iter()
        .enumerate()
        .map(|(counter, &node)| (node, counter))
        .collect();
    let mut output = "digraph CFG {\n".to_owned();
    for (counter, &node) in nodes.iter().enumerate() {
        output.push_str(&format!("  Node_{counter}[label=\"{}\"]\n", printer(node)));
    }
    output.push('\n');
    for (counter, &node) in nodes.iter().enumerate() {
        for next in graph.flow_successors(node) {
            if let Some(target) = numbering.get(&next) {
                output.push_str(&format!("  Node_{counter} -> Node_{target}\n"));
            }
        }
    }
    output.push_str("}\n");
    output
}

/// Nodes reachable from the roots of the graph.
pub fn reachable<G: FlowGraph>(graph: &G) -> HashSet<G::Node> {
    let mut visited: HashSet<G::Node> = HashSet::new();
    let mut stack = graph.roots();
    while let Some(node) = stack.pop() {
        if visited.insert(node) {
            stack.extend(graph.flow_successors(node));
        }
    }
    visited
}
