use std::collections::{BTreeSet, HashSet};

use crate::cfg::{Cfg, NodeId};
use crate::ssa::Program;

impl Cfg {
    /// The communication nodes reachable from `from` without passing
    /// through another communication node. A communication node reaches
    /// only itself.
    pub fn comm_transitive(&self, program: &Program, from: NodeId) -> BTreeSet<NodeId> {
        let mut result = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if self.is_communication_node(program, id) {
                result.insert(id);
                continue;
            }
            let node = self.node(id);
            if !node.successors.is_empty() {
                stack.extend(node.successors.iter().copied());
            } else if !node.is_deferred() {
                stack.extend(self.continuations(id));
            }
        }
        result
    }
}
