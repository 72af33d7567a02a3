//! Emulates indirect control transfers on targets that have none.
//!
//! SPIR-V has no indirect branches and no first-class function pointers,
//! but the source language has indirect tail calls, continuation joins,
//! and calls with explicit return continuations. This pass rewrites every
//! function into a *leaf* of signature `fn()` and routes all indirect
//! transfers through a top-level dispatcher:
//!
//! - each function gets a small integer token (its emulated address;
//!   0 is the reserved halt token),
//! - arguments travel on a per-invocation value stack (a private global
//!   array plus a stack pointer),
//! - a transfer stores the target token into the `next_fn` global and the
//!   resume mask into `next_mask`, then returns to the dispatcher,
//! - the dispatcher loops: `match load(next_fn) { 0 => break,
//!   token_i => { call leaf_i; continue }, _ => unreachable }`.
//!
//! Stack discipline: a caller pushes the return token first, then the
//! arguments right-to-left, so the callee pops parameters left-to-right
//! and its `return` pops the caller's token. Tail calls push no token;
//! they reuse the one below, which is exactly tail-call semantics. Entry
//! points get a wrapper that seeds the stack with the halt token, stores
//! the callee's token and the live mask, and runs the dispatcher.
//!
//! Only 32-bit integer words may cross an indirect transfer; anything
//! wider or non-integral must have been lowered to words beforehand.

use fnv::FnvHashMap;
use log::debug;

use crate::ir::arena::IrArena;
use crate::ir::build::{self, BlockBuilder};
use crate::ir::node::{
    AddressSpace, EntryPointKind, FnAttributes, IntWidth, MergeKind, Node, NodeKind, Op,
};
use crate::ir::ty;
use crate::rewrite::Rewriter;

/// Emulated-stack depth, in 32-bit words.
const STACK_WORDS: i64 = 1 << 20;

pub struct LowerCtx {
    fn_ptrs: FnvHashMap<Node, u32>,
    /// Token assignment order, for deterministic dispatcher cases.
    fn_ptr_order: Vec<Node>,
    /// Source top-level declarations; dispatched continuations that are
    /// not in here get hoisted into the new root.
    top_level: fnv::FnvHashSet<Node>,
    next_fn_ptr: u32,
    dispatcher: Node,
    next_fn_var: Node,
    next_mask_var: Node,
    stack_var: Node,
    stack_ptr_var: Node,
    new_decls: Vec<Node>,
}

/// Lower all indirect transfers in `root`, producing a program the SPIR-V
/// emitter accepts.
pub fn lower_tailcalls(src: &IrArena, dst: &mut IrArena, root: Node) -> Node {
    assert!(dst.config.check_types, "lowering needs a checking arena");

    // A program with only direct control flow needs no emulation machinery
    // at all; rebuild it unchanged.
    if !program_needs_lowering(src, root) {
        debug!("no indirect transfers; lowering is the identity");
        let mut rw = Rewriter::identity(src, dst, ());
        return rw.rewrite(root);
    }

    let i32_t = build::int32_type(dst);
    let mask_t = build::mask_type(dst);
    let stack_size = build::int_literal(dst, IntWidth::I32, STACK_WORDS);
    let stack_t = build::arr_type(dst, i32_t, Some(stack_size));

    let dispatcher = build::function(dst, FnAttributes::plain(), "top_dispatcher", &[], &[]);
    let next_fn_var = build::global_var(dst, i32_t, "next_fn", AddressSpace::PrivateLogical);
    let next_mask_var = build::global_var(dst, mask_t, "next_mask", AddressSpace::PrivateLogical);
    let stack_var = build::global_var(dst, stack_t, "rt_stack", AddressSpace::PrivateLogical);
    let stack_ptr_var =
        build::global_var(dst, i32_t, "rt_stack_ptr", AddressSpace::PrivateLogical);

    let top_level = match *src.kind(root) {
        NodeKind::Root { declarations } => src.nodes(declarations).iter().copied().collect(),
        ref other => panic!("lowering expects a root, found {}", other.tag_name()),
    };

    let ctx = LowerCtx {
        fn_ptrs: FnvHashMap::default(),
        fn_ptr_order: Vec::new(),
        top_level,
        next_fn_ptr: 1,
        dispatcher,
        next_fn_var,
        next_mask_var,
        stack_var,
        stack_ptr_var,
        new_decls: vec![dispatcher, next_fn_var, next_mask_var, stack_var, stack_ptr_var],
    };

    let mut rw = Rewriter::new(src, dst, ctx, lower_node);
    let rewritten = rw.rewrite(root);

    // Every top-level function is dispatchable.
    let old_decls = match *src.kind(root) {
        NodeKind::Root { declarations } => src.nodes(declarations).to_vec(),
        ref other => panic!("lowering expects a root, found {}", other.tag_name()),
    };
    for &decl in &old_decls {
        if matches!(src.kind(decl), NodeKind::Function { .. }) {
            assign_fn_ptr(&mut rw, decl);
        }
    }
    generate_dispatcher(&mut rw);

    let mut decls = match *rw.dst.kind(rewritten) {
        NodeKind::Root { declarations } => rw.dst.nodes(declarations).to_vec(),
        _ => unreachable!(),
    };
    decls.extend(rw.ctx.new_decls.iter().copied());
    build::set_root_declarations(rw.dst, rewritten, &decls);
    rewritten
}

type Rw<'s, 'd> = Rewriter<'s, 'd, LowerCtx>;

/// Whether any function makes an indirect transfer (tail call, call with
/// an explicit return continuation, join, or a first-class function
/// address).
fn program_needs_lowering(arena: &IrArena, root: Node) -> bool {
    let declarations = match *arena.kind(root) {
        NodeKind::Root { declarations } => arena.nodes(declarations).to_vec(),
        _ => return false,
    };
    let mut worklist: Vec<Node> = declarations;
    let mut seen = fnv::FnvHashSet::default();
    while let Some(node) = worklist.pop() {
        if !seen.insert(node) {
            continue;
        }
        match *arena.kind(node) {
            NodeKind::Branch {
                mode: crate::ir::node::BranchMode::Tailcall,
                ..
            }
            | NodeKind::Join { .. }
            | NodeKind::Callc { .. }
            | NodeKind::FnAddr { .. } => return true,
            NodeKind::Function { block, .. } => worklist.extend(block),
            NodeKind::Block {
                instructions,
                terminator,
            } => {
                worklist.extend(arena.nodes(instructions).iter().copied());
                worklist.push(terminator);
            }
            NodeKind::Let { instruction, .. } => worklist.push(instruction),
            NodeKind::If {
                if_true, if_false, ..
            } => {
                worklist.push(if_true);
                worklist.extend(if_false);
            }
            NodeKind::Match {
                cases,
                default_case,
                ..
            } => {
                worklist.extend(arena.nodes(cases).iter().copied());
                worklist.push(default_case);
            }
            NodeKind::Loop { body, .. } => worklist.push(body),
            NodeKind::Branch { targets, .. } => {
                worklist.extend(arena.nodes(targets).iter().copied());
            }
            _ => {}
        }
    }
    false
}

/// The token of a source function, assigned on first encounter.
fn assign_fn_ptr(rw: &mut Rw, function: Node) -> u32 {
    if let Some(&found) = rw.ctx.fn_ptrs.get(&function) {
        return found;
    }
    let token = rw.ctx.next_fn_ptr;
    rw.ctx.next_fn_ptr += 1;
    rw.ctx.fn_ptrs.insert(function, token);
    rw.ctx.fn_ptr_order.push(function);
    debug!("fn token {} assigned", token);
    token
}

fn fn_ptr_literal(rw: &mut Rw, function: Node) -> Node {
    let token = assign_fn_ptr(rw, function);
    build::int_literal(rw.dst, IntWidth::I32, i64::from(token))
}

/// The emulated-address value of a transfer target: a token literal for a
/// statically known function, or the rewritten `i32` value otherwise.
fn target_value(rw: &mut Rw, old_target: Node) -> Node {
    match *rw.src.kind(old_target) {
        NodeKind::Function { .. } => fn_ptr_literal(rw, old_target),
        NodeKind::FnAddr { function } => fn_ptr_literal(rw, function),
        _ => rw.rewrite(old_target),
    }
}

fn assert_stack_word(arena: &IrArena, value_ty: Node) {
    let unq = ty::without_qualifier(arena, value_ty);
    assert!(
        matches!(*arena.kind(unq), NodeKind::Int { width: IntWidth::I32 }),
        "only i32 words may cross an indirect transfer; lower {} first",
        arena.kind(unq).tag_name()
    );
}

/// stack[sp] = value; sp += 1
fn push_value(rw: &mut Rw, builder: &mut BlockBuilder, value: Node) {
    let value_ty = ty::value_type(rw.dst, value);
    assert_stack_word(rw.dst, value_ty);
    let sp = builder.add_load(rw.dst, rw.ctx.stack_ptr_var);
    let nothing = build::nothing(rw.dst);
    let slot = builder.add_primop(rw.dst, Op::Lea, &[rw.ctx.stack_var, nothing, sp])[0];
    builder.add_store(rw.dst, slot, value);
    let one = build::int_literal(rw.dst, IntWidth::I32, 1);
    let bumped = builder.add_primop(rw.dst, Op::Add, &[sp, one])[0];
    builder.add_store(rw.dst, rw.ctx.stack_ptr_var, bumped);
}

/// sp -= 1; yields stack[sp]
fn pop_value(rw: &mut Rw, builder: &mut BlockBuilder) -> Node {
    let sp = builder.add_load(rw.dst, rw.ctx.stack_ptr_var);
    let one = build::int_literal(rw.dst, IntWidth::I32, 1);
    let lowered = builder.add_primop(rw.dst, Op::Sub, &[sp, one])[0];
    builder.add_store(rw.dst, rw.ctx.stack_ptr_var, lowered);
    let nothing = build::nothing(rw.dst);
    let slot = builder.add_primop(rw.dst, Op::Lea, &[rw.ctx.stack_var, nothing, lowered])[0];
    builder.add_load(rw.dst, slot)
}

/// Push rewritten arguments right-to-left, so the callee pops them
/// left-to-right.
fn push_args(rw: &mut Rw, builder: &mut BlockBuilder, old_args: &[Node]) {
    let new_args: Vec<Node> = old_args.iter().map(|&a| rw.rewrite(a)).collect();
    for &arg in new_args.iter().rev() {
        push_value(rw, builder, arg);
    }
}

/// Store the transfer target and the resume mask, then fall back to the
/// dispatcher loop.
fn store_transfer(rw: &mut Rw, builder: &mut BlockBuilder, target: Node, mask: Node) -> Node {
    builder.add_store(rw.dst, rw.ctx.next_fn_var, target);
    builder.add_store(rw.dst, rw.ctx.next_mask_var, mask);
    build::fn_ret(rw.dst, &[])
}

/// Rewrite a block's straight-line code into `builder` and lower its
/// terminator.
fn rewrite_block_into(rw: &mut Rw, old_block: Node, mut builder: BlockBuilder) -> Node {
    let (instructions, old_terminator) = match *rw.src.kind(old_block) {
        NodeKind::Block {
            instructions,
            terminator,
        } => (instructions, terminator),
        ref other => panic!("lowering expects plain blocks, found {}", other.tag_name()),
    };
    for &instr in &rw.src.nodes(instructions).to_vec() {
        let rewritten = rw.rewrite(instr);
        builder.append(rewritten);
    }

    let terminator = match *rw.src.kind(old_terminator) {
        NodeKind::Branch {
            mode: crate::ir::node::BranchMode::Tailcall,
            targets,
            args,
            ..
        } => {
            // No new return token: a tail call resumes whoever the current
            // function would have returned to.
            let old_args = rw.src.nodes(args).to_vec();
            push_args(rw, &mut builder, &old_args);
            let old_target = rw.src.nodes(targets)[0];
            let target = target_value(rw, old_target);
            let mask = builder.add_primop(rw.dst, Op::SubgroupActiveMask, &[])[0];
            store_transfer(rw, &mut builder, target, mask)
        }
        NodeKind::Join {
            join_at,
            desired_mask,
            args,
            ..
        } => {
            let old_args = rw.src.nodes(args).to_vec();
            push_args(rw, &mut builder, &old_args);
            let target = target_value(rw, join_at);
            let mask = rw.rewrite(desired_mask);
            store_transfer(rw, &mut builder, target, mask)
        }
        NodeKind::Callc {
            ret_cont,
            callee,
            args,
            ..
        } => {
            // The return continuation's token goes below the arguments;
            // the callee's eventual return pops it.
            let ret_token = target_value(rw, ret_cont);
            push_value(rw, &mut builder, ret_token);
            let old_args = rw.src.nodes(args).to_vec();
            push_args(rw, &mut builder, &old_args);
            let target = target_value(rw, callee);
            let mask = builder.add_primop(rw.dst, Op::SubgroupActiveMask, &[])[0];
            store_transfer(rw, &mut builder, target, mask)
        }
        NodeKind::Return { values } => {
            // Indirect return: dispatch to whatever token the caller left
            // below our arguments, with the return values on the stack.
            let old_values = rw.src.nodes(values).to_vec();
            let ret_token = pop_value(rw, &mut builder);
            push_args(rw, &mut builder, &old_values);
            let mask = builder.add_primop(rw.dst, Op::SubgroupActiveMask, &[])[0];
            store_transfer(rw, &mut builder, ret_token, mask)
        }
        _ => rw.rewrite(old_terminator),
    };

    builder.finish(rw.dst, terminator)
}

fn lower_node(rw: &mut Rw, old: Node) -> Option<Node> {
    match *rw.src.kind(old) {
        NodeKind::Function {
            attrs,
            name,
            params,
            block,
            ..
        } => {
            let name = rw.src.str(name).to_string();
            let mut leaf_attrs = attrs;
            leaf_attrs.entry_point = EntryPointKind::NotAnEntryPoint;
            let leaf_name = if attrs.is_continuation {
                name.clone()
            } else {
                format!("{}_leaf", name)
            };

            let leaf = build::function(rw.dst, leaf_attrs, &leaf_name, &[], &[]);
            rw.register_processed(old, leaf);

            let old_params = rw.src.nodes(params).to_vec();

            if attrs.entry_point != EntryPointKind::NotAnEntryPoint {
                let wrapper = build_entry_wrapper(rw, old, &name, attrs, &old_params);
                rw.ctx.new_decls.push(wrapper);
            }

            // Parameters become stack pops.
            let mut builder = BlockBuilder::new();
            for &old_param in &old_params {
                let old_ty = rw
                    .src
                    .node(old_param)
                    .ty
                    .as_value()
                    .expect("parameters are typed after inference");
                let new_ty = rw.rewrite(old_ty);
                assert_stack_word(rw.dst, new_ty);
                let popped = pop_value(rw, &mut builder);
                rw.register_processed(old_param, popped);
            }
            let body = block.expect("functions have bodies by the time they are lowered");
            let body = rewrite_block_into(rw, body, builder);
            build::set_function_body(rw.dst, leaf, body);
            Some(leaf)
        }

        NodeKind::FnAddr { function } => Some(fn_ptr_literal(rw, function)),

        // The emulated function-pointer type.
        NodeKind::PtrType { pointee, .. }
            if matches!(rw.src.kind(pointee), NodeKind::FnType { .. }) =>
        {
            Some(build::int32_type(rw.dst))
        }

        NodeKind::Block { .. } => Some(rewrite_block_into(rw, old, BlockBuilder::new())),

        _ => None,
    }
}

/// The synthetic entry point: seed the stack with the halt token and the
/// arguments, aim the dispatcher at the real body, and run it.
fn build_entry_wrapper(
    rw: &mut Rw,
    old_fn: Node,
    name: &str,
    attrs: FnAttributes,
    old_params: &[Node],
) -> Node {
    let mut wrapper_params = Vec::with_capacity(old_params.len());
    for &old_param in old_params {
        let (param_name, param_ty) = match *rw.src.kind(old_param) {
            NodeKind::Var { name, .. } => (
                rw.src.str(name).to_string(),
                rw.src
                    .node(old_param)
                    .ty
                    .as_value()
                    .expect("parameters are typed after inference"),
            ),
            ref other => panic!("parameters are variables, found {}", other.tag_name()),
        };
        let param_ty = rw.rewrite(param_ty);
        wrapper_params.push(build::var(rw.dst, Some(param_ty), &param_name));
    }

    let wrapper = build::function(rw.dst, attrs, name, &wrapper_params, &[]);

    let mut builder = BlockBuilder::new();
    let halt = build::int_literal(rw.dst, IntWidth::I32, 0);
    push_value(rw, &mut builder, halt);
    for &param in wrapper_params.iter().rev() {
        push_value(rw, &mut builder, param);
    }
    let token = fn_ptr_literal(rw, old_fn);
    builder.add_store(rw.dst, rw.ctx.next_fn_var, token);
    let mask = builder.add_primop(rw.dst, Op::SubgroupActiveMask, &[])[0];
    builder.add_store(rw.dst, rw.ctx.next_mask_var, mask);
    let dispatcher = rw.ctx.dispatcher;
    builder.add_call(rw.dst, dispatcher, &[]);
    let ret = build::fn_ret(rw.dst, &[]);
    let body = builder.finish(rw.dst, ret);
    build::set_function_body(rw.dst, wrapper, body);
    wrapper
}

/// `loop { match load(next_fn) { 0 => break, token_i => { call leaf_i;
/// continue }, _ => unreachable } }`
fn generate_dispatcher(rw: &mut Rw) {
    let mut loop_body = BlockBuilder::new();
    let next_function = loop_body.add_load(rw.dst, rw.ctx.next_fn_var);

    let zero = build::int_literal(rw.dst, IntWidth::I32, 0);
    let break_out = build::merge_construct(rw.dst, MergeKind::Break, &[]);
    let halt_case = build::block(rw.dst, &[], break_out);

    let mut literals = vec![zero];
    let mut cases = vec![halt_case];

    for old_fn in rw.ctx.fn_ptr_order.clone() {
        let token = rw.ctx.fn_ptrs[&old_fn];
        let leaf = rw
            .find_processed(old_fn)
            .unwrap_or_else(|| rw.rewrite(old_fn));
        // A dispatched continuation must be callable, so it joins the
        // top level.
        if !rw.ctx.top_level.contains(&old_fn) {
            rw.ctx.new_decls.push(leaf);
        }
        let lit = build::int_literal(rw.dst, IntWidth::I32, i64::from(token));

        let mut case_builder = BlockBuilder::new();
        case_builder.add_call(rw.dst, leaf, &[]);
        let resume = build::merge_construct(rw.dst, MergeKind::Continue, &[]);
        let case = case_builder.finish(rw.dst, resume);

        literals.push(lit);
        cases.push(case);
    }

    let unreachable = build::unreachable(rw.dst);
    let default_case = build::block(rw.dst, &[], unreachable);
    let dispatch =
        build::match_instr(rw.dst, &[], next_function, &literals, &cases, default_case);
    loop_body.append(dispatch);
    let after_match = build::unreachable(rw.dst);
    let loop_block = loop_body.finish(rw.dst, after_match);

    let the_loop = build::loop_instr(rw.dst, &[], &[], &[], loop_block);
    let ret = build::fn_ret(rw.dst, &[]);
    let dispatcher = rw.ctx.dispatcher;
    let body = build::block(rw.dst, &[the_loop], ret);
    build::set_function_body(rw.dst, dispatcher, body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::print::print_node;

    fn checked() -> IrArena {
        IrArena::new(ArenaConfig::checked())
    }

    /// `fn @compute f() { tail_call k() }` and `fn k() { return; }`.
    fn tailcall_program(arena: &mut IrArena) -> Node {
        let k = build::function(arena, FnAttributes::plain(), "k", &[], &[]);
        let k_ret = build::fn_ret(arena, &[]);
        let k_body = build::block(arena, &[], k_ret);
        build::set_function_body(arena, k, k_body);

        let attrs = FnAttributes {
            is_continuation: false,
            entry_point: EntryPointKind::Compute,
        };
        let f = build::function(arena, attrs, "f", &[], &[]);
        let tc = build::tailcall(arena, k, &[]);
        let f_body = build::block(arena, &[], tc);
        build::set_function_body(arena, f, f_body);

        build::root(arena, &[f, k])
    }

    #[test]
    fn test_lowering_removes_tailcalls() {
        let mut src = checked();
        let root = tailcall_program(&mut src);

        let mut dst = checked();
        let new_root = lower_tailcalls(&src, &mut dst, root);
        let text = print_node(&dst, new_root);

        assert!(!text.contains("tail_call"), "got: {}", text);
        assert!(text.contains("top_dispatcher"), "got: {}", text);
        assert!(text.contains("next_fn"), "got: {}", text);
        assert!(text.contains("next_mask"), "got: {}", text);
    }

    #[test]
    fn test_lowering_keeps_entry_point() {
        let mut src = checked();
        let root = tailcall_program(&mut src);

        let mut dst = checked();
        let new_root = lower_tailcalls(&src, &mut dst, root);

        let decls = match *dst.kind(new_root) {
            NodeKind::Root { declarations } => dst.nodes(declarations).to_vec(),
            _ => unreachable!(),
        };
        let mut found_entry = false;
        for decl in decls {
            if let NodeKind::Function { attrs, name, .. } = *dst.kind(decl) {
                if dst.str(name) == "f" {
                    assert_eq!(attrs.entry_point, EntryPointKind::Compute);
                    found_entry = true;
                }
            }
        }
        assert!(found_entry, "the entry point survives under its own name");
    }

    #[test]
    fn test_dispatcher_has_a_case_per_function() {
        let mut src = checked();
        let root = tailcall_program(&mut src);

        let mut dst = checked();
        let new_root = lower_tailcalls(&src, &mut dst, root);

        let decls = match *dst.kind(new_root) {
            NodeKind::Root { declarations } => dst.nodes(declarations).to_vec(),
            _ => unreachable!(),
        };
        let dispatcher = decls
            .iter()
            .copied()
            .find(|&d| match *dst.kind(d) {
                NodeKind::Function { name, .. } => dst.str(name) == "top_dispatcher",
                _ => false,
            })
            .expect("the dispatcher exists");

        // dispatcher body: loop { match(load(next_fn)) { ... } }
        let body = match *dst.kind(dispatcher) {
            NodeKind::Function { block, .. } => block.unwrap(),
            _ => unreachable!(),
        };
        let instrs = match *dst.kind(body) {
            NodeKind::Block { instructions, .. } => dst.nodes(instructions).to_vec(),
            _ => unreachable!(),
        };
        let loop_body = match *dst.kind(instrs[0]) {
            NodeKind::Loop { body, .. } => body,
            _ => panic!("dispatcher body starts with a loop"),
        };
        let loop_instrs = match *dst.kind(loop_body) {
            NodeKind::Block { instructions, .. } => dst.nodes(instructions).to_vec(),
            _ => unreachable!(),
        };
        let literals = loop_instrs
            .iter()
            .find_map(|&i| match *dst.kind(i) {
                NodeKind::Match { literals, .. } => Some(dst.nodes(literals).to_vec()),
                _ => None,
            })
            .expect("the dispatcher switches on next_fn");

        // The halt case plus one case per original function.
        assert_eq!(literals.len(), 3);
    }
}
