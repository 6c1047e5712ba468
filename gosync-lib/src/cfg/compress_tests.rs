use std::collections::BTreeSet;

use crate::cfg::builder::CfgBuilder;
use crate::cfg::compress::compress;
use crate::cfg::{Cfg, NodeId, NodeKind};
use crate::config::Options;
use crate::ssa::{FunctionId, InstrRef};
use crate::test_programs;

const F: FunctionId = FunctionId(0);

fn at(index: usize) -> InstrRef {
    InstrRef {
        function: F,
        block: 0,
        index,
    }
}

fn block_entry(block: usize) -> NodeKind {
    NodeKind::BlockEntry { function: F, block }
}

fn block_exit(block: usize) -> NodeKind {
    NodeKind::BlockExit { function: F, block }
}

/// Builds a graph from the edges between node kinds. The first node is the
/// entry.
fn graph(edges: &[(NodeKind, NodeKind)]) -> Cfg {
    let mut cfg = Cfg::default();
    for &(from, to) in edges {
        let from = cfg.node_of(from, F);
        let to = cfg.node_of(to, F);
        cfg.add_edge(from, to);
    }
    cfg.entries.insert(NodeId(0));
    cfg
}

fn successors(cfg: &Cfg, kind: NodeKind) -> BTreeSet<NodeKind> {
    let id = cfg.lookup(kind).unwrap();
    cfg.node(id)
        .successors()
        .iter()
        .map(|&next| cfg.node(next).kind())
        .collect()
}

#[test]
fn block_boundaries_are_removed() {
    let (entry, exit) = (NodeKind::FunctionEntry(F), NodeKind::FunctionExit(F));
    let instr = NodeKind::Ssa(at(0));
    let mut cfg = graph(&[
        (entry, block_entry(0)),
        (block_entry(0), instr),
        (instr, block_exit(0)),
        (block_exit(0), exit),
    ]);
    compress(&mut cfg);

    assert_eq!(cfg.len(), 3);
    assert_eq!(cfg.lookup(block_entry(0)), None);
    assert_eq!(cfg.lookup(block_exit(0)), None);
    assert_eq!(successors(&cfg, entry), BTreeSet::from([instr]));
    assert_eq!(successors(&cfg, instr), BTreeSet::from([exit]));
}

#[test]
fn self_loops_and_dead_ends_disappear() {
    let entry = NodeKind::FunctionEntry(F);
    let (a, b) = (NodeKind::Ssa(at(0)), NodeKind::Ssa(at(1)));
    let mut cfg = graph(&[
        (entry, block_entry(0)),
        (block_entry(0), block_entry(0)),
        (block_entry(0), a),
        (a, block_exit(0)),
        (a, b),
        (NodeKind::Ssa(at(2)), b),
    ]);
    compress(&mut cfg);

    assert_eq!(successors(&cfg, entry), BTreeSet::from([a]));
    // The exit without successors leads nowhere.
    assert_eq!(successors(&cfg, a), BTreeSet::from([b]));
    // Unreachable from the entry.
    assert_eq!(cfg.lookup(NodeKind::Ssa(at(2))), None);
    assert_eq!(cfg.node(cfg.lookup(b).unwrap()).predecessors().len(), 1);
}

#[test]
fn junctions_are_kept() {
    let entry = NodeKind::FunctionEntry(F);
    let (a, b, c, d) = (
        NodeKind::Ssa(at(0)),
        NodeKind::Ssa(at(1)),
        NodeKind::Ssa(at(2)),
        NodeKind::Ssa(at(3)),
    );
    let mut cfg = graph(&[
        (entry, a),
        (entry, b),
        (a, block_entry(1)),
        (b, block_entry(1)),
        (block_entry(1), c),
        (block_entry(1), d),
    ]);
    let before = cfg.clone();
    compress(&mut cfg);
    assert_eq!(cfg, before);
    assert_eq!(successors(&cfg, block_entry(1)), BTreeSet::from([c, d]));
}

#[test]
fn panic_continuations_follow_the_overtaking_node() {
    let (entry, exit) = (NodeKind::FunctionEntry(F), NodeKind::FunctionExit(F));
    let panic = NodeKind::Ssa(at(0));
    let post = NodeKind::PostDeferCall(at(1));
    let mut cfg = graph(&[
        (entry, panic),
        (block_exit(0), post),
        (post, exit),
    ]);
    let (panic_id, exit_id) = (cfg.lookup(panic).unwrap(), cfg.lookup(exit).unwrap());
    let block_exit_id = cfg.lookup(block_exit(0)).unwrap();
    cfg.set_panic_cont(panic_id, Some(block_exit_id));
    cfg.functions.insert(F, (NodeId(0), exit_id));
    compress(&mut cfg);

    let post_id = cfg.lookup(post).unwrap();
    assert_eq!(cfg.node(panic_id).panic_cont(), Some(post_id));
    assert_eq!(cfg.node(post_id).panickers(), &BTreeSet::from([panic_id]));
    assert!(cfg.is_removed(block_exit_id));
}

#[test]
fn compressing_twice_changes_nothing() {
    let options = Options::default();
    for fixture in [
        test_programs::send_to_closed(),
        test_programs::unbuffered_sync(),
        test_programs::select_with_default(),
        test_programs::mutex_with_defer(),
        test_programs::call_without_callees(),
    ] {
        let cfg = CfgBuilder::new(&fixture.program, &fixture.pointer, &options)
            .build(&[fixture.main])
            .unwrap();
        let mut again = cfg.clone();
        compress(&mut again);
        assert_eq!(again, cfg);
        // No synthetic block boundary with a single neighbor survives.
        for id in cfg.node_ids() {
            let node = cfg.node(id);
            if node.kind().is_compressible() {
                assert!(node.successors().len() > 1 && node.predecessors().len() > 1);
            }
        }
    }
}

/// Every live node is reachable from the entries, the exits of the reached
/// functions aside.
fn assert_all_reachable(cfg: &Cfg) {
    let mut reached = BTreeSet::new();
    let mut stack: Vec<NodeId> = cfg.entries().iter().copied().collect();
    while let Some(id) = stack.pop() {
        if reached.insert(id) {
            let node = cfg.node(id);
            stack.extend(node.successors().iter().copied());
            stack.extend(node.spawns().iter().copied());
            stack.extend(node.panic_cont());
        }
    }
    for id in cfg.node_ids() {
        let node = cfg.node(id);
        if matches!(node.kind(), NodeKind::FunctionExit(_)) {
            assert!(reached.contains(&node.defer_link().unwrap()));
            continue;
        }
        assert!(reached.contains(&id), "{} is unreachable", node.kind());
    }
}

#[test]
fn select_blocks_leave_no_unreachable_exit() {
    let fixture = test_programs::select_with_default();
    let options = Options::default();
    let cfg = CfgBuilder::new(&fixture.program, &fixture.pointer, &options)
        .build(&[fixture.main])
        .unwrap();
    assert_all_reachable(&cfg);
    // main, block 0:  ... select -> cases -> bodies
    let select_exit = NodeKind::BlockExit {
        function: fixture.main,
        block: 0,
    };
    assert_eq!(cfg.lookup(select_exit), None);
    let at = fixture.instr("select");
    let default = cfg.lookup(NodeKind::SelectDefault(at)).unwrap();
    for &next in cfg.node(default).successors() {
        assert_eq!(cfg.node(next).predecessors(), &BTreeSet::from([default]));
    }
}

#[test]
fn compressed_fixtures_are_reachable() {
    let options = Options::default();
    for fixture in [
        test_programs::send_to_closed(),
        test_programs::unbuffered_sync(),
        test_programs::mutex_with_defer(),
        test_programs::call_without_callees(),
    ] {
        let cfg = CfgBuilder::new(&fixture.program, &fixture.pointer, &options)
            .build(&[fixture.main])
            .unwrap();
        assert_all_reachable(&cfg);
    }
}

#[test]
fn exits_of_functions_that_never_return_are_kept() {
    let (entry, exit) = (NodeKind::FunctionEntry(F), NodeKind::FunctionExit(F));
    let (a, b) = (NodeKind::Ssa(at(0)), NodeKind::Ssa(at(1)));
    let after_call = NodeKind::PostCall(at(5));
    // entry -> a <-> b       exit -> after_call
    let mut cfg = graph(&[(entry, a), (a, b), (b, a), (exit, after_call)]);
    let (entry_id, exit_id) = (NodeId(0), cfg.lookup(exit).unwrap());
    cfg.set_defer_link(entry_id, exit_id);
    cfg.functions.insert(F, (entry_id, exit_id));
    let after_call_id = cfg.lookup(after_call).unwrap();
    compress(&mut cfg);

    assert!(!cfg.is_removed(exit_id));
    assert_eq!(cfg.node(entry_id).defer_link(), Some(exit_id));
    assert_eq!(cfg.node(exit_id).defer_link(), Some(entry_id));
    assert!(cfg.node(exit_id).successors().is_empty());
    assert!(cfg.is_removed(after_call_id));

    let again = cfg.clone();
    compress(&mut cfg);
    assert_eq!(cfg, again);
}

#[test]
fn removed_nodes_cannot_be_found_by_identifier() {
    let (entry, exit) = (NodeKind::FunctionEntry(F), NodeKind::FunctionExit(F));
    let instr = NodeKind::Ssa(at(0));
    let mut cfg = graph(&[(entry, block_entry(0)), (block_entry(0), instr), (instr, exit)]);
    let id = block_entry(0).to_string();
    assert_eq!(cfg.node_by_id(&id), cfg.lookup(block_entry(0)));
    compress(&mut cfg);
    assert_eq!(cfg.node_by_id(&id), None);
    assert_eq!(cfg.node_by_id(&instr.to_string()), cfg.lookup(instr));
}
