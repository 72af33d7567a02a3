//! CFG scope of a function: its entry block plus the continuations
//! reachable from it, arranged as a dominator tree.
//!
//! The SPIR-V emitter walks this tree parent-before-children so that every
//! block is defined before the blocks it dominates, which keeps the
//! structured control flow valid.

use fnv::FnvHashMap;
use petgraph::algo::dominators;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::ir::arena::IrArena;
use crate::ir::node::{Node, NodeKind};

/// One vertex of the scope: the function (entry) or a continuation, plus
/// the indices of the vertices it immediately dominates.
#[derive(Debug)]
pub struct CfNode {
    pub node: Node,
    pub dominates: Vec<usize>,
}

/// The scope of one function. `nodes[0]` is the entry.
#[derive(Debug)]
pub struct Scope {
    pub nodes: Vec<CfNode>,
}

impl Scope {
    pub fn entry(&self) -> &CfNode {
        &self.nodes[0]
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }
}

/// Build the dominator tree of `function`'s continuations. A continuation
/// A dominates B iff every branch chain from the entry to B passes
/// through A.
pub fn build_scope(arena: &IrArena, function: Node) -> Scope {
    assert!(
        matches!(arena.kind(function), NodeKind::Function { .. }),
        "build_scope expects a function"
    );

    // Discover vertices in DFS preorder; record edges along the way.
    let mut order: Vec<Node> = vec![function];
    let mut index_of: FnvHashMap<Node, usize> = FnvHashMap::default();
    index_of.insert(function, 0);
    let mut edges: Vec<(usize, usize)> = Vec::new();

    let mut stack = vec![function];
    while let Some(current) = stack.pop() {
        let from = index_of[&current];
        let block = match *arena.kind(current) {
            NodeKind::Function { block, .. } => block,
            _ => unreachable!(),
        };
        let Some(block) = block else { continue };

        let mut targets = Vec::new();
        collect_block_targets(arena, block, &mut targets);

        for target in targets {
            let to = *index_of.entry(target).or_insert_with(|| {
                order.push(target);
                stack.push(target);
                order.len() - 1
            });
            edges.push((from, to));
        }
    }

    // Dominator tree over the discovered graph.
    let mut graph: DiGraph<Node, ()> = DiGraph::new();
    let indices: Vec<NodeIndex> = order.iter().map(|&n| graph.add_node(n)).collect();
    for (from, to) in edges {
        graph.add_edge(indices[from], indices[to], ());
    }
    let doms = dominators::simple_fast(&graph, indices[0]);

    let mut nodes: Vec<CfNode> = order
        .iter()
        .map(|&n| CfNode {
            node: n,
            dominates: Vec::new(),
        })
        .collect();
    for (i, &idx) in indices.iter().enumerate().skip(1) {
        if let Some(idom) = doms.immediate_dominator(idx) {
            nodes[idom.index()].dominates.push(i);
        }
    }

    Scope { nodes }
}

/// Continuation targets referenced from a block, including blocks nested
/// inside structured instructions.
fn collect_block_targets(arena: &IrArena, block: Node, out: &mut Vec<Node>) {
    let (instructions, terminator) = match *arena.kind(block) {
        NodeKind::Block {
            instructions,
            terminator,
        } => (instructions, terminator),
        NodeKind::ParsedBlock {
            instructions,
            terminator,
            ..
        } => (instructions, terminator),
        ref other => panic!("not a block: {}", other.tag_name()),
    };

    for &instr in &arena.nodes(instructions).to_vec() {
        let mut instr = instr;
        if let NodeKind::Let { instruction, .. } = *arena.kind(instr) {
            instr = instruction;
        }
        match *arena.kind(instr) {
            NodeKind::If {
                if_true, if_false, ..
            } => {
                collect_block_targets(arena, if_true, out);
                if let Some(f) = if_false {
                    collect_block_targets(arena, f, out);
                }
            }
            NodeKind::Match {
                cases,
                default_case,
                ..
            } => {
                for &case in &arena.nodes(cases).to_vec() {
                    collect_block_targets(arena, case, out);
                }
                collect_block_targets(arena, default_case, out);
            }
            NodeKind::Loop { body, .. } => collect_block_targets(arena, body, out),
            _ => {}
        }
    }

    match *arena.kind(terminator) {
        NodeKind::Branch { mode, targets, .. } => {
            // Tailcall targets are first-class functions, not local CFG
            // edges.
            if !matches!(mode, crate::ir::node::BranchMode::Tailcall) {
                for &t in arena.nodes(targets) {
                    if is_continuation(arena, t) {
                        out.push(t);
                    }
                }
            }
        }
        NodeKind::Join {
            join_at,
            is_indirect: false,
            ..
        } => {
            if is_continuation(arena, join_at) {
                out.push(join_at);
            }
        }
        NodeKind::Callc {
            ret_cont,
            is_return_indirect: false,
            ..
        } => {
            if is_continuation(arena, ret_cont) {
                out.push(ret_cont);
            }
        }
        _ => {}
    }
}

fn is_continuation(arena: &IrArena, node: Node) -> bool {
    matches!(
        *arena.kind(node),
        NodeKind::Function {
            attrs: crate::ir::node::FnAttributes {
                is_continuation: true,
                ..
            },
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::build;
    use crate::ir::node::FnAttributes;

    /// entry → a → b, entry → b: only the entry dominates b.
    #[test]
    fn test_scope_diamond() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let bool_t = build::bool_type(&mut arena);
        let q = build::qualified(&mut arena, true, bool_t);
        let cond = build::var(&mut arena, Some(q), "c");

        let b = build::function(&mut arena, FnAttributes::continuation(), "b", &[], &[]);
        let ret = build::fn_ret(&mut arena, &[]);
        let b_body = build::block(&mut arena, &[], ret);
        build::set_function_body(&mut arena, b, b_body);

        let a = build::function(&mut arena, FnAttributes::continuation(), "a", &[], &[]);
        let jump_b = build::jump(&mut arena, b, &[]);
        let a_body = build::block(&mut arena, &[], jump_b);
        build::set_function_body(&mut arena, a, a_body);

        let f = build::function(&mut arena, FnAttributes::plain(), "f", &[cond], &[]);
        let br = build::branch(
            &mut arena,
            crate::ir::node::BranchMode::IfElse,
            Some(cond),
            &[a, b],
            &[],
        );
        let f_body = build::block(&mut arena, &[], br);
        build::set_function_body(&mut arena, f, f_body);

        let scope = build_scope(&arena, f);
        assert_eq!(scope.size(), 3);
        assert_eq!(scope.entry().node, f);

        // The entry immediately dominates both a and b; a dominates
        // nothing, because b is also reachable without passing through a.
        let entry_children: Vec<Node> = scope.entry()
            .dominates
            .iter()
            .map(|&i| scope.nodes[i].node)
            .collect();
        assert!(entry_children.contains(&a));
        assert!(entry_children.contains(&b));
        let a_idx = scope.nodes.iter().position(|n| n.node == a).unwrap();
        assert!(scope.nodes[a_idx].dominates.is_empty());
    }

    /// A straight chain is a straight dominator tree.
    #[test]
    fn test_scope_chain() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let b = build::function(&mut arena, FnAttributes::continuation(), "b", &[], &[]);
        let ret = build::fn_ret(&mut arena, &[]);
        let b_body = build::block(&mut arena, &[], ret);
        build::set_function_body(&mut arena, b, b_body);

        let a = build::function(&mut arena, FnAttributes::continuation(), "a", &[], &[]);
        let jump_b = build::jump(&mut arena, b, &[]);
        let a_body = build::block(&mut arena, &[], jump_b);
        build::set_function_body(&mut arena, a, a_body);

        let f = build::function(&mut arena, FnAttributes::plain(), "f", &[], &[]);
        let jump_a = build::jump(&mut arena, a, &[]);
        let f_body = build::block(&mut arena, &[], jump_a);
        build::set_function_body(&mut arena, f, f_body);

        let scope = build_scope(&arena, f);
        assert_eq!(scope.size(), 3);
        let a_idx = scope.entry().dominates[0];
        assert_eq!(scope.nodes[a_idx].node, a);
        let b_idx = scope.nodes[a_idx].dominates[0];
        assert_eq!(scope.nodes[b_idx].node, b);
    }

    #[test]
    fn test_scope_of_leaf_function_is_just_the_entry() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let f = build::function(&mut arena, FnAttributes::plain(), "f", &[], &[]);
        let ret = build::fn_ret(&mut arena, &[]);
        let body = build::block(&mut arena, &[], ret);
        build::set_function_body(&mut arena, f, body);

        let scope = build_scope(&arena, f);
        assert_eq!(scope.size(), 1);
        assert!(scope.entry().dominates.is_empty());
    }
}
