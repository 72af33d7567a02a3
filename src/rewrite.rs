//! Generic IR-to-IR rewriting.
//!
//! A [`Rewriter`] reconstructs a node graph from a source arena into a
//! destination arena. A pass supplies a hook that overrides the cases it
//! cares about and returns `None` for everything else, which then goes
//! through [`Rewriter::recreate_node_identity`], a field-by-field rebuild
//! through the destination constructors.
//!
//! Declarations are rewritten in two phases: the header is created and
//! registered in the memo table before the body is visited, so self- and
//! mutual references never cycle.

use fnv::FnvHashMap;
use log::trace;

use crate::ir::arena::IrArena;
use crate::ir::build;
use crate::ir::node::{Node, NodeKind};

/// Pass override: return `Some(new)` to replace the default rewrite of
/// `old`, `None` to fall through to the identity reconstruction.
pub type RewriteFn<C> = fn(&mut Rewriter<'_, '_, C>, Node) -> Option<Node>;

pub struct Rewriter<'s, 'd, C> {
    pub src: &'s IrArena,
    pub dst: &'d mut IrArena,
    pub ctx: C,
    processed: FnvHashMap<Node, Node>,
    hook: RewriteFn<C>,
}

impl<'s, 'd, C> Rewriter<'s, 'd, C> {
    pub fn new(src: &'s IrArena, dst: &'d mut IrArena, ctx: C, hook: RewriteFn<C>) -> Self {
        Rewriter {
            src,
            dst,
            ctx,
            processed: FnvHashMap::default(),
            hook,
        }
    }

    /// Identity rewriter: no overrides.
    pub fn identity(src: &'s IrArena, dst: &'d mut IrArena, ctx: C) -> Self {
        Rewriter::new(src, dst, ctx, |_, _| None)
    }

    pub fn register_processed(&mut self, old: Node, new: Node) {
        self.processed.insert(old, new);
    }

    pub fn find_processed(&self, old: Node) -> Option<Node> {
        self.processed.get(&old).copied()
    }

    /// Rewrite one node: memo table first, then the pass hook, then the
    /// identity reconstruction.
    pub fn rewrite(&mut self, old: Node) -> Node {
        if let Some(found) = self.find_processed(old) {
            return found;
        }
        if let Some(new) = (self.hook)(self, old) {
            return new;
        }
        self.recreate_node_identity(old)
    }

    pub fn rewrite_opt(&mut self, old: Option<Node>) -> Option<Node> {
        old.map(|n| self.rewrite(n))
    }

    pub fn rewrite_slice(&mut self, old: &[Node]) -> Vec<Node> {
        old.iter().map(|&n| self.rewrite(n)).collect()
    }

    fn src_nodes(&self, list: crate::ir::arena::NodeList) -> Vec<Node> {
        self.src.nodes(list).to_vec()
    }

    /// Create the destination header for a declaration and register it, so
    /// references to the declaration resolve before its body exists.
    pub fn recreate_decl_header_identity(&mut self, old: Node) -> Node {
        let new = match *self.src.kind(old) {
            NodeKind::Constant { name, ty_hint, .. } => {
                let name = self.src.str(name).to_string();
                let ty_hint = self.rewrite_opt(ty_hint);
                build::constant(self.dst, &name, ty_hint)
            }
            NodeKind::GlobalVar {
                name, ty, space, ..
            } => {
                let name = self.src.str(name).to_string();
                let ty = self.rewrite(ty);
                build::global_var(self.dst, ty, &name, space)
            }
            NodeKind::Function {
                attrs,
                name,
                params,
                returns,
                ..
            } => {
                let name = self.src.str(name).to_string();
                let params = self.src_nodes(params);
                let params = self.rewrite_slice(&params);
                let returns = self.src_nodes(returns);
                let returns = self.rewrite_slice(&returns);
                build::function(self.dst, attrs, &name, &params, &returns)
            }
            ref other => panic!("not a declaration: {}", other.tag_name()),
        };
        trace!(
            "decl header {} -> {}",
            self.src.kind(old).tag_name(),
            new.index()
        );
        self.register_processed(old, new);
        new
    }

    /// Fill in the body of a declaration whose header already exists.
    pub fn recreate_decl_body_identity(&mut self, old: Node, new: Node) {
        match *self.src.kind(old) {
            NodeKind::Constant { value, .. } => {
                if let Some(value) = value {
                    let value = self.rewrite(value);
                    build::set_constant_value(self.dst, new, value);
                }
            }
            NodeKind::GlobalVar { init, .. } => {
                if let Some(init) = init {
                    let init = self.rewrite(init);
                    build::set_global_init(self.dst, new, init);
                }
            }
            NodeKind::Function { block, .. } => {
                if let Some(block) = block {
                    let block = self.rewrite(block);
                    build::set_function_body(self.dst, new, block);
                }
            }
            ref other => panic!("not a declaration: {}", other.tag_name()),
        }
    }

    /// Default reconstruction: rebuild `old` field by field in the
    /// destination arena. Declarations go through the two-phase path and
    /// variables keep their IDs, so the output of an un-overridden pass is
    /// structurally identical to its input.
    pub fn recreate_node_identity(&mut self, old: Node) -> Node {
        let kind = *self.src.kind(old);
        match kind {
            // ── Types ──
            NodeKind::Int { width } => build::int_type(self.dst, width),
            NodeKind::Bool => build::bool_type(self.dst),
            NodeKind::Float => build::float_type(self.dst),
            NodeKind::Mask => build::mask_type(self.dst),
            NodeKind::NoRet => build::noret_type(self.dst),
            NodeKind::Record { members } => {
                let members = self.src_nodes(members);
                let members = self.rewrite_slice(&members);
                build::record_type(self.dst, &members)
            }
            NodeKind::PtrType { space, pointee } => {
                let pointee = self.rewrite(pointee);
                build::ptr_type(self.dst, space, pointee)
            }
            NodeKind::ArrType { elem, size } => {
                let elem = self.rewrite(elem);
                let size = self.rewrite_opt(size);
                build::arr_type(self.dst, elem, size)
            }
            NodeKind::FnType {
                params,
                returns,
                is_continuation,
            } => {
                let params = self.src_nodes(params);
                let params = self.rewrite_slice(&params);
                let returns = self.src_nodes(returns);
                let returns = self.rewrite_slice(&returns);
                build::fn_type(self.dst, &params, &returns, is_continuation)
            }
            NodeKind::Qualified { uniform, ty } => {
                let ty = self.rewrite(ty);
                build::qualified(self.dst, uniform, ty)
            }

            // ── Values ──
            NodeKind::IntLit { width, value } => build::int_literal(self.dst, width, value),
            NodeKind::True => build::true_lit(self.dst),
            NodeKind::False => build::false_lit(self.dst),
            NodeKind::UntypedNumber { text } => {
                let text = self.src.str(text).to_string();
                build::untyped_number(self.dst, &text)
            }
            NodeKind::Var { name, id } => {
                let name = self.src.str(name).to_string();
                let ty = self.src.node(old).ty.as_value().map(|t| self.rewrite(t));
                let new = build::var_with_id(self.dst, ty, &name, id);
                self.register_processed(old, new);
                new
            }
            NodeKind::Unbound { name } => {
                let name = self.src.str(name).to_string();
                build::unbound(self.dst, &name)
            }
            NodeKind::FnAddr { function } => {
                let function = self.rewrite(function);
                build::fn_addr(self.dst, function)
            }
            NodeKind::Nothing => build::nothing(self.dst),

            // ── Declarations ──
            NodeKind::Constant { .. } | NodeKind::GlobalVar { .. } | NodeKind::Function { .. } => {
                let new = self.recreate_decl_header_identity(old);
                self.recreate_decl_body_identity(old, new);
                new
            }

            // ── Instructions ──
            NodeKind::Let {
                variables,
                instruction,
                is_mutable,
            } => {
                let instruction = self.rewrite(instruction);
                let variables = self.src_nodes(variables);
                let variables = self.rewrite_slice(&variables);
                build::let_with_vars(self.dst, instruction, &variables, is_mutable)
            }
            NodeKind::PrimOp { op, operands } => {
                let operands = self.src_nodes(operands);
                let operands = self.rewrite_slice(&operands);
                build::prim_op(self.dst, op, &operands)
            }
            NodeKind::Call { callee, args } => {
                let callee = self.rewrite(callee);
                let args = self.src_nodes(args);
                let args = self.rewrite_slice(&args);
                build::call(self.dst, callee, &args)
            }
            NodeKind::If {
                yield_types,
                condition,
                if_true,
                if_false,
            } => {
                let yield_types = self.src_nodes(yield_types);
                let yield_types = self.rewrite_slice(&yield_types);
                let condition = self.rewrite(condition);
                let if_true = self.rewrite(if_true);
                let if_false = self.rewrite_opt(if_false);
                build::if_instr(self.dst, &yield_types, condition, if_true, if_false)
            }
            NodeKind::Match {
                yield_types,
                inspect,
                literals,
                cases,
                default_case,
            } => {
                let yield_types = self.src_nodes(yield_types);
                let yield_types = self.rewrite_slice(&yield_types);
                let inspect = self.rewrite(inspect);
                let literals = self.src_nodes(literals);
                let literals = self.rewrite_slice(&literals);
                let cases = self.src_nodes(cases);
                let cases = self.rewrite_slice(&cases);
                let default_case = self.rewrite(default_case);
                build::match_instr(
                    self.dst,
                    &yield_types,
                    inspect,
                    &literals,
                    &cases,
                    default_case,
                )
            }
            NodeKind::Loop {
                yield_types,
                params,
                initial_args,
                body,
            } => {
                let yield_types = self.src_nodes(yield_types);
                let yield_types = self.rewrite_slice(&yield_types);
                let params = self.src_nodes(params);
                let params = self.rewrite_slice(&params);
                let initial_args = self.src_nodes(initial_args);
                let initial_args = self.rewrite_slice(&initial_args);
                let body = self.rewrite(body);
                build::loop_instr(self.dst, &yield_types, &params, &initial_args, body)
            }

            // ── Blocks ──
            NodeKind::Block {
                instructions,
                terminator,
            } => {
                let instructions = self.src_nodes(instructions);
                let instructions = self.rewrite_slice(&instructions);
                let terminator = self.rewrite(terminator);
                build::block(self.dst, &instructions, terminator)
            }
            NodeKind::ParsedBlock {
                instructions,
                terminator,
                continuations,
                continuation_vars,
            } => {
                let instructions = self.src_nodes(instructions);
                let instructions = self.rewrite_slice(&instructions);
                let terminator = self.rewrite(terminator);
                let continuations = self.src_nodes(continuations);
                let continuations = self.rewrite_slice(&continuations);
                let continuation_vars = self.src_nodes(continuation_vars);
                let continuation_vars = self.rewrite_slice(&continuation_vars);
                build::parsed_block(
                    self.dst,
                    &instructions,
                    terminator,
                    &continuations,
                    &continuation_vars,
                )
            }

            // ── Terminators ──
            NodeKind::Return { values } => {
                let values = self.src_nodes(values);
                let values = self.rewrite_slice(&values);
                build::fn_ret(self.dst, &values)
            }
            NodeKind::Branch {
                mode,
                condition,
                targets,
                args,
            } => {
                let condition = self.rewrite_opt(condition);
                let targets = self.src_nodes(targets);
                let targets = self.rewrite_slice(&targets);
                let args = self.src_nodes(args);
                let args = self.rewrite_slice(&args);
                build::branch(self.dst, mode, condition, &targets, &args)
            }
            NodeKind::Join {
                join_at,
                desired_mask,
                args,
                is_indirect,
            } => {
                let join_at = self.rewrite(join_at);
                let desired_mask = self.rewrite(desired_mask);
                let args = self.src_nodes(args);
                let args = self.rewrite_slice(&args);
                build::join(self.dst, join_at, desired_mask, &args, is_indirect)
            }
            NodeKind::Callc {
                ret_cont,
                callee,
                args,
                is_return_indirect,
            } => {
                let ret_cont = self.rewrite(ret_cont);
                let callee = self.rewrite(callee);
                let args = self.src_nodes(args);
                let args = self.rewrite_slice(&args);
                build::callc(self.dst, ret_cont, callee, &args, is_return_indirect)
            }
            NodeKind::Merge { kind, args } => {
                let args = self.src_nodes(args);
                let args = self.rewrite_slice(&args);
                build::merge_construct(self.dst, kind, &args)
            }
            NodeKind::Unreachable => build::unreachable(self.dst),

            // ── Top level ──
            NodeKind::Root { declarations } => {
                let decls = self.src_nodes(declarations);
                // Headers first so mutual references resolve, then bodies.
                let headers: Vec<Node> = decls
                    .iter()
                    .map(|&d| match self.find_processed(d) {
                        Some(h) => h,
                        None => self.rewrite_decl_two_phase(d),
                    })
                    .collect();
                build::root(self.dst, &headers)
            }
        }
    }

    /// Header, then body, through the pass hook where it applies.
    fn rewrite_decl_two_phase(&mut self, old: Node) -> Node {
        if let Some(new) = (self.hook)(self, old) {
            self.register_processed(old, new);
            return new;
        }
        let new = self.recreate_decl_header_identity(old);
        self.recreate_decl_body_identity(old, new);
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::node::{FnAttributes, IntWidth, Op};
    use crate::ir::print::print_node;

    fn sample_root(arena: &mut IrArena) -> Node {
        let i32_t = build::int32_type(arena);
        let q = build::qualified(arena, false, i32_t);
        let x = build::var(arena, Some(q), "x");
        let f = build::function(arena, FnAttributes::plain(), "f", &[x], &[i32_t]);
        let one = build::int_literal(arena, IntWidth::I32, 1);
        let sum = build::prim_op(arena, Op::Add, &[x, one]);
        let bound = build::let_instr(arena, sum, &["y"]);
        let vars = match *arena.kind(bound) {
            NodeKind::Let { variables, .. } => arena.nodes(variables).to_vec(),
            _ => unreachable!(),
        };
        let ret = build::fn_ret(arena, &[vars[0]]);
        let body = build::block(arena, &[bound], ret);
        build::set_function_body(arena, f, body);
        build::root(arena, &[f])
    }

    #[test]
    fn test_rewrite_identity_preserves_structure() {
        let mut src = IrArena::new(ArenaConfig::checked());
        let root = sample_root(&mut src);
        let before = print_node(&src, root);

        let mut dst = IrArena::new(ArenaConfig::checked());
        let mut rw = Rewriter::identity(&src, &mut dst, ());
        let new_root = rw.recreate_node_identity(root);
        let after = print_node(&dst, new_root);

        assert_eq!(before, after);
    }

    #[test]
    fn test_rewrite_memoizes_declarations() {
        let mut src = IrArena::new(ArenaConfig::checked());
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[]);
        let ret = build::fn_ret(&mut src, &[]);
        let body = build::block(&mut src, &[], ret);
        build::set_function_body(&mut src, f, body);

        let mut dst = IrArena::new(ArenaConfig::checked());
        let mut rw = Rewriter::identity(&src, &mut dst, ());
        let a = rw.rewrite(f);
        let b = rw.rewrite(f);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hook_overrides_case() {
        let mut src = IrArena::new(ArenaConfig::checked());
        let one = build::int_literal(&mut src, IntWidth::I32, 1);

        let mut dst = IrArena::new(ArenaConfig::checked());
        // Replace every i32 literal with 2.
        let mut rw = Rewriter::new(&src, &mut dst, (), |rw, old| match *rw.src.kind(old) {
            NodeKind::IntLit {
                width: IntWidth::I32,
                ..
            } => Some(build::int_literal(rw.dst, IntWidth::I32, 2)),
            _ => None,
        });
        let new = rw.rewrite(one);
        assert!(matches!(
            *rw.dst.kind(new),
            NodeKind::IntLit { value: 2, .. }
        ));
    }
}
