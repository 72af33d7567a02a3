//! Name resolution: replaces `Unbound` placeholders with the variable,
//! declaration, or continuation they lexically denote.
//!
//! A stack of name → node entries is threaded through the rewrite:
//! - top-level declarations are mutually visible across the whole root,
//! - function parameters scope over the function body,
//! - `let` bindings scope over the instructions and terminator that follow
//!   them in their block,
//! - continuations of a block are mutually visible, and their bodies also
//!   see everything bound in the parent block.
//!
//! Already-bound variables flow through the memo table, so rebinding a
//! bound program reproduces it.

use log::debug;

use crate::diagnostic::Diagnostic;
use crate::ir::arena::IrArena;
use crate::ir::build;
use crate::ir::node::{Node, NodeKind};
use crate::rewrite::Rewriter;

struct BindEntry {
    name: String,
    node: Node,
}

pub struct BindCtx {
    bound: Vec<BindEntry>,
    diagnostics: Vec<Diagnostic>,
}

/// Bind `root` from `src` into `dst`. Unresolved identifiers are reported
/// by name.
pub fn bind_program(src: &IrArena, dst: &mut IrArena, root: Node) -> Result<Node, Vec<Diagnostic>> {
    let ctx = BindCtx {
        bound: Vec::new(),
        diagnostics: Vec::new(),
    };
    let mut rw = Rewriter::new(src, dst, ctx, bind_node);
    let new_root = rw.rewrite(root);
    if rw.ctx.diagnostics.is_empty() {
        Ok(new_root)
    } else {
        Err(rw.ctx.diagnostics)
    }
}

fn resolve(rw: &mut Rewriter<'_, '_, BindCtx>, name: &str) -> Option<Node> {
    rw.ctx
        .bound
        .iter()
        .rev()
        .find(|entry| entry.name == name)
        .map(|entry| entry.node)
}

fn push_entry(rw: &mut Rewriter<'_, '_, BindCtx>, name: String, node: Node) {
    debug!("bound {}", name);
    rw.ctx.bound.push(BindEntry { name, node });
}

/// Rebind the variables of a `let`, keeping names and IDs, and bring them
/// into scope for the rest of the block.
fn rebind_let_vars(rw: &mut Rewriter<'_, '_, BindCtx>, old_vars: &[Node]) -> Vec<Node> {
    let mut new_vars = Vec::with_capacity(old_vars.len());
    for &old_var in old_vars {
        let (name, id) = match *rw.src.kind(old_var) {
            NodeKind::Var { name, id } => (rw.src.str(name).to_string(), id),
            ref other => panic!("let binds variables, found {}", other.tag_name()),
        };
        let ty = rw.src.node(old_var).ty.as_value().map(|t| rw.rewrite(t));
        let new_var = build::var_with_id(rw.dst, ty, &name, id);
        rw.register_processed(old_var, new_var);
        push_entry(rw, name, new_var);
        new_vars.push(new_var);
    }
    new_vars
}

/// Bring a function's parameters into scope. The parameters themselves
/// were already rewritten (and memoized) when the header was created.
fn push_params(rw: &mut Rewriter<'_, '_, BindCtx>, old_params: &[Node]) {
    for &old_param in old_params {
        let name = match *rw.src.kind(old_param) {
            NodeKind::Var { name, .. } => rw.src.str(name).to_string(),
            ref other => panic!("parameters are variables, found {}", other.tag_name()),
        };
        let new_param = rw.rewrite(old_param);
        push_entry(rw, name, new_param);
    }
}

fn bind_node(rw: &mut Rewriter<'_, '_, BindCtx>, old: Node) -> Option<Node> {
    match *rw.src.kind(old) {
        NodeKind::Unbound { name } => {
            let name = rw.src.str(name).to_string();
            match resolve(rw, &name) {
                Some(node) => Some(node),
                None => {
                    rw.ctx.diagnostics.push(Diagnostic::error(format!(
                        "unresolved identifier `{}`",
                        name
                    )));
                    Some(build::unbound(rw.dst, &name))
                }
            }
        }

        NodeKind::Let {
            variables,
            instruction,
            is_mutable,
        } => {
            // The instruction sees only what came before the let.
            let instruction = rw.rewrite(instruction);
            let old_vars = rw.src.nodes(variables).to_vec();
            let new_vars = rebind_let_vars(rw, &old_vars);
            Some(build::let_with_vars(
                rw.dst,
                instruction,
                &new_vars,
                is_mutable,
            ))
        }

        NodeKind::Loop {
            yield_types,
            params,
            initial_args,
            body,
        } => {
            let yield_types = rw.src.nodes(yield_types).to_vec();
            let yield_types = rw.rewrite_slice(&yield_types);
            // Initial arguments are evaluated outside the loop scope.
            let initial_args = rw.src.nodes(initial_args).to_vec();
            let initial_args = rw.rewrite_slice(&initial_args);

            let depth = rw.ctx.bound.len();
            let old_params = rw.src.nodes(params).to_vec();
            let new_params = rebind_let_vars(rw, &old_params);
            let body = rw.rewrite(body);
            rw.ctx.bound.truncate(depth);

            Some(build::loop_instr(
                rw.dst,
                &yield_types,
                &new_params,
                &initial_args,
                body,
            ))
        }

        // A plain block scopes its lets until its end.
        NodeKind::Block {
            instructions,
            terminator,
        } => {
            let depth = rw.ctx.bound.len();
            let instructions = rw.src.nodes(instructions).to_vec();
            let instructions = rw.rewrite_slice(&instructions);
            let terminator = rw.rewrite(terminator);
            rw.ctx.bound.truncate(depth);
            Some(build::block(rw.dst, &instructions, terminator))
        }

        // Parser blocks additionally carry continuations; those become
        // ordinary functions reachable from the terminators, and the
        // wrapper flattens to a plain block.
        NodeKind::ParsedBlock {
            instructions,
            terminator,
            continuations,
            ..
        } => {
            let depth = rw.ctx.bound.len();

            let old_conts = rw.src.nodes(continuations).to_vec();
            let mut new_conts = Vec::with_capacity(old_conts.len());
            for &cont in &old_conts {
                let header = rw.recreate_decl_header_identity(cont);
                let name = match *rw.src.kind(cont) {
                    NodeKind::Function { name, .. } => rw.src.str(name).to_string(),
                    ref other => panic!("continuations are functions, found {}", other.tag_name()),
                };
                push_entry(rw, name, header);
                new_conts.push(header);
            }

            let instructions = rw.src.nodes(instructions).to_vec();
            let instructions = rw.rewrite_slice(&instructions);
            let terminator = rw.rewrite(terminator);

            // Continuation bodies see the parent block's bindings and each
            // other.
            for (&old_cont, &new_cont) in old_conts.iter().zip(&new_conts) {
                let cont_depth = rw.ctx.bound.len();
                let old_params = match *rw.src.kind(old_cont) {
                    NodeKind::Function { params, .. } => rw.src.nodes(params).to_vec(),
                    _ => unreachable!(),
                };
                push_params(rw, &old_params);
                rw.recreate_decl_body_identity(old_cont, new_cont);
                rw.ctx.bound.truncate(cont_depth);
            }

            rw.ctx.bound.truncate(depth);
            Some(build::block(rw.dst, &instructions, terminator))
        }

        NodeKind::Root { declarations } => {
            let old_decls = rw.src.nodes(declarations).to_vec();

            // All top-level names are mutually visible.
            let mut headers = Vec::with_capacity(old_decls.len());
            for &decl in &old_decls {
                let header = rw.recreate_decl_header_identity(decl);
                let name = match *rw.src.kind(decl) {
                    NodeKind::Function { name, .. }
                    | NodeKind::GlobalVar { name, .. }
                    | NodeKind::Constant { name, .. } => rw.src.str(name).to_string(),
                    ref other => panic!("unnamed top-level node: {}", other.tag_name()),
                };
                push_entry(rw, name, header);
                headers.push(header);
            }

            for (&decl, &header) in old_decls.iter().zip(&headers) {
                let depth = rw.ctx.bound.len();
                if let NodeKind::Function { params, .. } = *rw.src.kind(decl) {
                    let old_params = rw.src.nodes(params).to_vec();
                    push_params(rw, &old_params);
                }
                rw.recreate_decl_body_identity(decl, header);
                rw.ctx.bound.truncate(depth);
            }

            Some(build::root(rw.dst, &headers))
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::node::{FnAttributes, IntWidth, Op};
    use crate::ir::print::print_node;

    fn unchecked() -> IrArena {
        IrArena::new(ArenaConfig::unchecked())
    }

    /// `fn f i32(i32 x) { return x; }` with `x` unbound in the body.
    fn unbound_identity_fn(arena: &mut IrArena) -> Node {
        let i32_t = build::int32_type(arena);
        let q = build::qualified(arena, false, i32_t);
        let x = build::var(arena, Some(q), "x");
        let f = build::function(arena, FnAttributes::plain(), "f", &[x], &[i32_t]);
        let x_ref = build::unbound(arena, "x");
        let ret = build::fn_ret(arena, &[x_ref]);
        let body = build::parsed_block(arena, &[], ret, &[], &[]);
        build::set_function_body(arena, f, body);
        build::root(arena, &[f])
    }

    #[test]
    fn test_bind_resolves_parameter() {
        let mut src = unchecked();
        let root = unbound_identity_fn(&mut src);

        let mut dst = unchecked();
        let new_root = bind_program(&src, &mut dst, root).unwrap();

        let text = print_node(&dst, new_root);
        assert!(!text.contains('`'), "no unbound nodes left: {}", text);
        assert!(text.contains("return (x_"), "got: {}", text);
    }

    #[test]
    fn test_bind_reports_unresolved() {
        let mut src = unchecked();
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[]);
        let ghost = build::unbound(&mut src, "ghost");
        let ret = build::fn_ret(&mut src, &[ghost]);
        let body = build::parsed_block(&mut src, &[], ret, &[], &[]);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let mut dst = unchecked();
        let errors = bind_program(&src, &mut dst, root).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("ghost"));
    }

    #[test]
    fn test_bind_let_scopes_forward() {
        let mut src = unchecked();
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[]);
        let one = build::untyped_number(&mut src, "1");
        let two = build::untyped_number(&mut src, "2");
        let sum = build::prim_op(&mut src, Op::Add, &[one, two]);
        let bound = build::let_instr(&mut src, sum, &["y"]);
        let y_ref = build::unbound(&mut src, "y");
        let ret = build::fn_ret(&mut src, &[y_ref]);
        let body = build::parsed_block(&mut src, &[bound], ret, &[], &[]);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let mut dst = unchecked();
        let new_root = bind_program(&src, &mut dst, root).unwrap();
        let text = print_node(&dst, new_root);
        assert!(text.contains("return (y_"), "got: {}", text);
    }

    #[test]
    fn test_bind_is_idempotent() {
        let mut src = unchecked();
        let root = unbound_identity_fn(&mut src);

        let mut once_arena = unchecked();
        let once = bind_program(&src, &mut once_arena, root).unwrap();
        let mut twice_arena = unchecked();
        let twice = bind_program(&once_arena, &mut twice_arena, once).unwrap();

        assert_eq!(
            print_node(&once_arena, once),
            print_node(&twice_arena, twice)
        );
    }

    #[test]
    fn test_bind_resolves_continuation_names() {
        let mut src = unchecked();
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[]);

        // Continuation `k` with an empty body.
        let k = build::function(&mut src, FnAttributes::continuation(), "k", &[], &[]);
        let k_ret = build::fn_ret(&mut src, &[]);
        let k_body = build::parsed_block(&mut src, &[], k_ret, &[], &[]);
        build::set_function_body(&mut src, k, k_body);

        let k_ref = build::unbound(&mut src, "k");
        let jump = build::jump(&mut src, k_ref, &[]);
        let body = build::parsed_block(&mut src, &[], jump, &[k], &[]);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let mut dst = unchecked();
        let new_root = bind_program(&src, &mut dst, root).unwrap();
        let text = print_node(&dst, new_root);
        assert!(text.contains("jump (k)"), "got: {}", text);
        assert!(!text.contains('`'), "got: {}", text);
    }
}
