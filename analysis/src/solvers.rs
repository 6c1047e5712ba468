use core::marker::PhantomData;
use std::collections::{HashMap, HashSet};

use super::cfg::{FlowGraph, RPOWorklist, get_back_edges};
use super::domains::JoinSemiLattice;

/// The direction the analysis states are propagated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// States flow from predecessors to successors.
    Forward,
    /// States flow from successors to predecessors, like in liveness
    /// analyses.
    Backward,
}

/// Transfer functions need to implement this trait. For the most common
/// cases creating a [`NodeTransfer`] from a closure should be sufficient.
pub trait TransferFunction<G, D>
where
    G: FlowGraph,
    D: JoinSemiLattice,
{
    /// Optional function to apply the effects of traversing an edge. The edge
    /// is given in the direction of the analysis. Returning [None] means the
    /// edge is infeasible.
    fn edge(
        &mut self,
        _from: G::Node,
        _to: G::Node,
        _graph: &G,
        _ctx: &D::LatticeContext,
        state: &D,
    ) -> Option<D> {
        Some(state.clone())
    }

    /// Apply the effects of a node to the state merged from its inputs.
    fn node(&mut self, node: G::Node, graph: &G, ctx: &D::LatticeContext, pre_state: &D) -> D;
}

/// Small utility so users do not need to create a new struct for every
/// transfer function.
pub struct NodeTransfer<F, G, D>
where
    G: FlowGraph,
    D: JoinSemiLattice,
    F: FnMut(G::Node, &G, &D::LatticeContext, &D) -> D,
{
    func: F,
    phantom: PhantomData<(G, D)>,
}

impl<F, G, D> NodeTransfer<F, G, D>
where
    G: FlowGraph,
    D: JoinSemiLattice,
    F: FnMut(G::Node, &G, &D::LatticeContext, &D) -> D,
{
    /// Create a new transfer function from a closure or function.
    pub fn new(func: F) -> Self {
        Self {
            func,
            phantom: PhantomData,
        }
    }
}

impl<F, G, D> TransferFunction<G, D> for NodeTransfer<F, G, D>
where
    G: FlowGraph,
    D: JoinSemiLattice,
    F: FnMut(G::Node, &G, &D::LatticeContext, &D) -> D,
{
    fn node(&mut self, node: G::Node, graph: &G, ctx: &D::LatticeContext, pre_state: &D) -> D {
        (self.func)(node, graph, ctx, pre_state)
    }
}

/// View of a graph with the edges pointing in the direction of the analysis.
struct Directed<'g, G> {
    graph: &'g G,
    direction: Direction,
}

impl<G: FlowGraph> FlowGraph for Directed<'_, G> {
    type Node = G::Node;

    fn roots(&self) -> Vec<Self::Node> {
        match self.direction {
            Direction::Forward => self.graph.roots(),
            Direction::Backward => self
                .graph
                .nodes()
                .into_iter()
                .filter(|&node| self.graph.flow_successors(node).is_empty())
                .collect(),
        }
    }

    fn nodes(&self) -> Vec<Self::Node> {
        self.graph.nodes()
    }

    fn flow_successors(&self, node: Self::Node) -> Vec<Self::Node> {
        match self.direction {
            Direction::Forward => self.graph.flow_successors(node),
            Direction::Backward => self.graph.flow_predecessors(node),
        }
    }

    fn flow_predecessors(&self, node: Self::Node) -> Vec<Self::Node> {
        match self.direction {
            Direction::Forward => self.graph.flow_predecessors(node),
            Direction::Backward => self.graph.flow_successors(node),
        }
    }
}

/// A basic solver for monotonic transfer functions. It is also doing
/// widening on loop heads. The solver is using a worklist that visits
/// the queued nodes in reverse post-order of the analysis direction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SolveMonotone {
    /// Set the approximate iteration limit per node. If the limit is reached
    /// (the analysis did not converge in the permitted number of steps),
    /// the solver terminates without a result. Zero means no limit.
    pub node_limit: usize,
}

impl Default for SolveMonotone {
    fn default() -> Self {
        Self { node_limit: 20 }
    }
}

impl SolveMonotone {
    /// Run the solver mutating the analysis states in place. The states are
    /// the ones after applying the transfer function of each node. The
    /// return value is false when the analysis did not converge.
    ///
    /// # Arguments
    ///
    /// * `seeds` - Extra input states joined into the input of some nodes,
    ///   e.g., the initial state at the entry of a function.
    /// * `post_states` - The analysis state after each node. Missing nodes
    ///   are considered bottom.
    /// * `transfer` - Function to apply the effects of nodes and edges.
    pub fn solve_in_place<G, D, F>(
        self,
        graph: &G,
        direction: Direction,
        lat_ctx: &D::LatticeContext,
        seeds: &HashMap<G::Node, D>,
        post_states: &mut HashMap<G::Node, D>,
        transfer: &mut F,
    ) -> bool
    where
        G: FlowGraph,
        D: JoinSemiLattice,
        F: TransferFunction<G, D>,
    {
        let directed = Directed { graph, direction };

        // Loop header dominates the whole loop, every back edge should point to a
        // loop header.
        let loop_heads: HashSet<_> = get_back_edges(&directed)
            .iter()
            .map(|&(_, target)| target)
            .collect();

        let nodes = directed.nodes();
        let node_num = nodes.len().max(1);
        let mut worklist = RPOWorklist::new(&directed);
        for &node in &nodes {
            worklist.push(node);
        }

        let mut visited = HashSet::new();
        let limit = self.node_limit * node_num;
        let mut processed_nodes = 0_usize;
        while let Some(current) = worklist.pop() {
            if limit > 0 && processed_nodes >= limit {
                return false;
            }

            let mut pre_state = seeds
                .get(&current)
                .cloned()
                .unwrap_or_else(|| D::bottom(lat_ctx));
            for input in directed.flow_predecessors(current) {
                let Some(input_state) = post_states.get(&input) else {
                    continue;
                };
                if let Some(transferred) = transfer.edge(input, current, graph, lat_ctx, input_state) {
                    pre_state = pre_state.join(&transferred, lat_ctx);
                }
            }
            let mut post_state = transfer.node(current, graph, lat_ctx, &pre_state);

            if loop_heads.contains(&current) {
                if let Some(previous) = post_states.get(&current) {
                    post_state = post_state.widen(previous, lat_ctx, processed_nodes / node_num);
                }
            }

            processed_nodes += 1;
            if visited.contains(&current) && post_states.get(&current) == Some(&post_state) {
                continue;
            }

            visited.insert(current);
            post_states.insert(current, post_state);
            worklist.push_successors(current, &directed);
        }
        true
    }

    /// Run the solver returning the analysis states after each node. Returns
    /// [None] when the analysis did not converge.
    pub fn solve<G, D, F>(
        self,
        graph: &G,
        direction: Direction,
        lat_ctx: &D::LatticeContext,
        seeds: &HashMap<G::Node, D>,
        transfer: &mut F,
    ) -> Option<HashMap<G::Node, D>>
    where
        G: FlowGraph,
        D: JoinSemiLattice,
        F: TransferFunction<G, D>,
    {
        let mut post_states = HashMap::new();
        self.solve_in_place(graph, direction, lat_ctx, seeds, &mut post_states, transfer)
            .then_some(post_states)
    }
}
