//! The typing pass: rewrites a bound, untyped program into a checking
//! arena, resolving `UntypedNumber` literals from context and validating
//! operand types along the way.
//!
//! Every risky construction is validated here first, with a user
//! diagnostic on mismatch; the destination constructors then re-derive the
//! types. On error the pass substitutes a well-typed placeholder and keeps
//! going, so one mistake yields one primary diagnostic (plus possible
//! knock-on ones) instead of a hard stop.

use log::debug;

use crate::diagnostic::Diagnostic;
use crate::ir::arena::IrArena;
use crate::ir::build;
use crate::ir::node::{IntWidth, Node, NodeKind, Op};
use crate::ir::ty;
use crate::rewrite::Rewriter;

pub struct InferCtx {
    diagnostics: Vec<Diagnostic>,
    /// Return types (in the destination arena) of the function whose body
    /// is being rewritten. Continuations check against their parent's.
    return_types: Vec<Vec<Node>>,
    /// Instruction accumulators, one per block being rebuilt. Nested
    /// expressions are flattened here as synthetic lets.
    sinks: Vec<Vec<Node>>,
}

/// Type a bound program. `src` must contain no `Unbound` nodes.
pub fn infer_program(
    src: &IrArena,
    dst: &mut IrArena,
    root: Node,
) -> Result<Node, Vec<Diagnostic>> {
    assert!(dst.config.check_types, "infer needs a checking arena");
    let ctx = InferCtx {
        diagnostics: Vec::new(),
        return_types: Vec::new(),
        sinks: Vec::new(),
    };
    let mut rw = Rewriter::new(src, dst, ctx, infer_node);
    let new_root = rw.rewrite(root);
    if rw.ctx.diagnostics.is_empty() {
        Ok(new_root)
    } else {
        Err(rw.ctx.diagnostics)
    }
}

type Rw<'s, 'd> = Rewriter<'s, 'd, InferCtx>;

fn report(rw: &mut Rw, message: String) {
    debug!("type error: {}", message);
    rw.ctx.diagnostics.push(Diagnostic::error(message));
}

/// A well-typed stand-in value after an error.
fn poison_value(rw: &mut Rw, expected: Option<Node>) -> Node {
    match expected.map(|e| *rw.dst.kind(e)) {
        Some(NodeKind::Int { width }) => build::int_literal(rw.dst, width, 0),
        Some(NodeKind::Bool) => build::false_lit(rw.dst),
        _ => build::int_literal(rw.dst, IntWidth::I32, 0),
    }
}

/// A well-typed stand-in instruction after an error; yields one i32.
fn poison_instr(rw: &mut Rw) -> Node {
    let zero = build::int_literal(rw.dst, IntWidth::I32, 0);
    build::prim_op(rw.dst, Op::Add, &[zero, zero])
}

fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Rewrite a value position. `expected` is an unqualified type in the
/// destination arena; it types number literals and is checked against the
/// rewritten value's type.
fn rewrite_value(rw: &mut Rw, old: Node, expected: Option<Node>) -> Node {
    if let NodeKind::UntypedNumber { text } = *rw.src.kind(old) {
        let text = rw.src.str(text).to_string();
        let width = match expected.map(|e| *rw.dst.kind(e)) {
            Some(NodeKind::Int { width }) => width,
            None => IntWidth::I32,
            Some(_) => {
                report(rw, format!("numeric literal `{}` where a non-numeric value is expected", text));
                return poison_value(rw, expected);
            }
        };
        return match parse_number(&text) {
            Some(value) => build::int_literal(rw.dst, width, value),
            None => {
                report(rw, format!("cannot parse numeric literal `{}`", text));
                poison_value(rw, expected)
            }
        };
    }

    let mut new = rw.rewrite(old);

    // A nested expression is an instruction in a value position; flatten
    // it into a synthetic let and use the bound variable.
    if let Some(produced) = rw.dst.node(new).ty.as_multi() {
        let produced = rw.dst.nodes(produced).to_vec();
        if produced.len() != 1 {
            report(
                rw,
                format!("an expression here must produce one value, not {}", produced.len()),
            );
            return poison_value(rw, expected);
        }
        if rw.ctx.sinks.is_empty() {
            report(rw, "initializers must be simple values".to_string());
            return poison_value(rw, expected);
        }
        let name = rw.dst.unique_name("tmp");
        let name = rw.dst.str(name).to_string();
        let variable = build::var(rw.dst, Some(produced[0]), &name);
        let bound = build::let_with_vars(rw.dst, new, &[variable], false);
        rw.ctx.sinks.last_mut().unwrap().push(bound);
        new = variable;
    }

    if let Some(expected) = expected {
        let found = ty::value_type_unqualified(rw.dst, new);
        if found != expected {
            report(
                rw,
                format!(
                    "type mismatch: expected {}, found {}",
                    crate::ir::print::print_node(rw.dst, expected),
                    crate::ir::print::print_node(rw.dst, found)
                ),
            );
            return poison_value(rw, Some(expected));
        }
    }
    new
}

/// Rewrite two operands that must agree: the first typed one provides the
/// context for an untyped partner.
fn rewrite_pair(rw: &mut Rw, a: Node, b: Node) -> (Node, Node) {
    let a_untyped = matches!(*rw.src.kind(a), NodeKind::UntypedNumber { .. });
    let b_untyped = matches!(*rw.src.kind(b), NodeKind::UntypedNumber { .. });
    if a_untyped && !b_untyped {
        let new_b = rewrite_value(rw, b, None);
        let b_ty = ty::value_type_unqualified(rw.dst, new_b);
        let new_a = rewrite_value(rw, a, Some(b_ty));
        (new_a, new_b)
    } else {
        let new_a = rewrite_value(rw, a, None);
        let a_ty = ty::value_type_unqualified(rw.dst, new_a);
        let new_b = rewrite_value(rw, b, Some(a_ty));
        (new_a, new_b)
    }
}

/// Qualify a rewritten yield type as varying unless the source said
/// otherwise.
fn rewrite_yield_types(rw: &mut Rw, old: crate::ir::arena::NodeList) -> Vec<Node> {
    let old = rw.src.nodes(old).to_vec();
    old.iter()
        .map(|&t| {
            let t = rw.rewrite(t);
            build::maybe_qualified(rw.dst, false, t)
        })
        .collect()
}

fn infer_prim_op_node(rw: &mut Rw, op: Op, operands: &[Node]) -> Node {
    match op {
        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Mod
        | Op::Eq
        | Op::Neq
        | Op::Lt
        | Op::Lte
        | Op::Gt
        | Op::Gte
        | Op::And
        | Op::Or
        | Op::Xor => {
            if operands.len() != 2 {
                report(rw, format!("{} takes two operands", op.name()));
                return poison_instr(rw);
            }
            let (a, b) = rewrite_pair(rw, operands[0], operands[1]);
            let a_ty = ty::value_type(rw.dst, a);
            let b_ty = ty::value_type(rw.dst, b);
            let ordering = matches!(op, Op::Lt | Op::Lte | Op::Gt | Op::Gte);
            let arith = matches!(op, Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod);
            let numeric_ok = ty::is_numeric(rw.dst, a_ty) || !(arith || ordering);
            if !ty::same_unqualified(rw.dst, a_ty, b_ty) || !numeric_ok {
                report(
                    rw,
                    format!("operands of {} must be matching values", op.name()),
                );
                return poison_instr(rw);
            }
            build::prim_op(rw.dst, op, &[a, b])
        }
        Op::Neg | Op::Not => {
            if operands.len() != 1 {
                report(rw, format!("{} takes one operand", op.name()));
                return poison_instr(rw);
            }
            let a = rewrite_value(rw, operands[0], None);
            let a_ty = ty::value_type(rw.dst, a);
            let ok = match op {
                Op::Neg => ty::is_numeric(rw.dst, a_ty),
                _ => ty::is_logical(rw.dst, a_ty) || ty::is_numeric(rw.dst, a_ty),
            };
            if !ok {
                report(rw, format!("invalid operand of {}", op.name()));
                return poison_instr(rw);
            }
            build::prim_op(rw.dst, op, &[a])
        }
        Op::Convert | Op::Reinterpret => {
            if operands.len() != 2 || !rw.src.kind(operands[0]).is_type() {
                report(rw, format!("{} takes a target type and a value", op.name()));
                return poison_instr(rw);
            }
            let target = rw.rewrite(operands[0]);
            let value = rewrite_value(rw, operands[1], None);
            build::prim_op(rw.dst, op, &[target, value])
        }
        Op::Load => {
            if operands.len() != 1 {
                report(rw, "load takes a pointer".to_string());
                return poison_instr(rw);
            }
            let ptr = rewrite_value(rw, operands[0], None);
            let ptr_ty = ty::value_type(rw.dst, ptr);
            if ty::pointee(rw.dst, ptr_ty).is_none() {
                report(rw, "load operand is not a pointer".to_string());
                return poison_instr(rw);
            }
            build::prim_op(rw.dst, Op::Load, &[ptr])
        }
        Op::Store => {
            if operands.len() != 2 {
                report(rw, "store takes a pointer and a value".to_string());
                return poison_instr(rw);
            }
            let ptr = rewrite_value(rw, operands[0], None);
            let ptr_ty = ty::value_type(rw.dst, ptr);
            let Some((_, pointee)) = ty::pointee(rw.dst, ptr_ty) else {
                report(rw, "store destination is not a pointer".to_string());
                return poison_instr(rw);
            };
            let value = rewrite_value(rw, operands[1], Some(pointee));
            build::prim_op(rw.dst, Op::Store, &[ptr, value])
        }
        Op::Alloca => {
            if operands.len() != 1 || !rw.src.kind(operands[0]).is_type() {
                report(rw, "alloca takes an element type".to_string());
                return poison_instr(rw);
            }
            let elem = rw.rewrite(operands[0]);
            build::prim_op(rw.dst, Op::Alloca, &[elem])
        }
        Op::Lea => {
            if operands.len() < 2 {
                report(rw, "lea takes a base, an offset, and indices".to_string());
                return poison_instr(rw);
            }
            let base = rewrite_value(rw, operands[0], None);
            let base_ty = ty::value_type(rw.dst, base);
            let Some((_, pointee)) = ty::pointee(rw.dst, base_ty) else {
                report(rw, "lea base is not a pointer".to_string());
                return poison_instr(rw);
            };
            let offset = if matches!(*rw.src.kind(operands[1]), NodeKind::Nothing) {
                build::nothing(rw.dst)
            } else {
                let i32_t = build::int32_type(rw.dst);
                rewrite_value(rw, operands[1], Some(i32_t))
            };
            let mut new_operands = vec![base, offset];
            for &idx in &operands[2..] {
                let i32_t = build::int32_type(rw.dst);
                new_operands.push(rewrite_value(rw, idx, Some(i32_t)));
            }
            if ty::walk_lea_chain(rw.dst, pointee, &new_operands[2..]).is_none() {
                report(rw, "lea indices do not match the pointee shape".to_string());
                return poison_instr(rw);
            }
            build::prim_op(rw.dst, Op::Lea, &new_operands)
        }
        Op::Select => {
            if operands.len() != 3 {
                report(rw, "select takes condition, then, else".to_string());
                return poison_instr(rw);
            }
            let bool_t = build::bool_type(rw.dst);
            let cond = rewrite_value(rw, operands[0], Some(bool_t));
            let (a, b) = rewrite_pair(rw, operands[1], operands[2]);
            let a_ty = ty::value_type(rw.dst, a);
            let b_ty = ty::value_type(rw.dst, b);
            if !ty::same_unqualified(rw.dst, a_ty, b_ty) {
                report(rw, "select branches must have identical type".to_string());
                return poison_instr(rw);
            }
            build::prim_op(rw.dst, Op::Select, &[cond, a, b])
        }
        Op::SubgroupActiveMask => {
            if !operands.is_empty() {
                report(rw, "subgroup_active_mask takes no operands".to_string());
            }
            build::prim_op(rw.dst, Op::SubgroupActiveMask, &[])
        }
    }
}

fn infer_node(rw: &mut Rw, old: Node) -> Option<Node> {
    match *rw.src.kind(old) {
        NodeKind::Unbound { name } => {
            panic!(
                "unbound identifier `{}` reached the typing pass; bind first",
                rw.src.str(name)
            );
        }

        // A number with no context defaults to i32.
        NodeKind::UntypedNumber { .. } => Some(rewrite_value(rw, old, None)),

        NodeKind::PrimOp { op, operands } => {
            let operands = rw.src.nodes(operands).to_vec();
            Some(infer_prim_op_node(rw, op, &operands))
        }

        NodeKind::Call { callee, args } => {
            let callee = rw.rewrite(callee);
            let callee_ty = ty::value_type(rw.dst, callee);
            let Some((params, _)) = ty::callee_signature(rw.dst, callee_ty) else {
                report(rw, "call of a non-function value".to_string());
                return Some(poison_instr(rw));
            };
            let param_types = rw.dst.nodes(params).to_vec();
            let args = rw.src.nodes(args).to_vec();
            if args.len() != param_types.len() {
                report(
                    rw,
                    format!(
                        "call expects {} arguments, got {}",
                        param_types.len(),
                        args.len()
                    ),
                );
                return Some(poison_instr(rw));
            }
            let mut new_args = Vec::with_capacity(args.len());
            for (&arg, &pt) in args.iter().zip(&param_types) {
                let expected = ty::without_qualifier(rw.dst, pt);
                new_args.push(rewrite_value(rw, arg, Some(expected)));
            }
            Some(build::call(rw.dst, callee, &new_args))
        }

        NodeKind::Let {
            variables,
            instruction,
            is_mutable,
        } => {
            let instruction = rw.rewrite(instruction);
            let Some(produced) = rw.dst.node(instruction).ty.as_multi() else {
                report(rw, "let of something that is not an instruction".to_string());
                return Some(poison_instr(rw));
            };
            let produced = rw.dst.nodes(produced).to_vec();
            let old_vars = rw.src.nodes(variables).to_vec();
            if produced.len() != old_vars.len() {
                report(
                    rw,
                    format!(
                        "let binds {} variables but the instruction produces {} values",
                        old_vars.len(),
                        produced.len()
                    ),
                );
                return Some(poison_instr(rw));
            }
            let mut new_vars = Vec::new();
            for (&old_var, &produced_ty) in old_vars.iter().zip(&produced) {
                let (name, id) = match *rw.src.kind(old_var) {
                    NodeKind::Var { name, id } => (rw.src.str(name).to_string(), id),
                    ref other => panic!("let binds variables, found {}", other.tag_name()),
                };
                // A `var` annotation must agree with the inferred type.
                if is_mutable {
                    if let Some(annotated) = rw.src.node(old_var).ty.as_value() {
                        let annotated = rw.rewrite(annotated);
                        let annotated = ty::without_qualifier(rw.dst, annotated);
                        let inferred = ty::without_qualifier(rw.dst, produced_ty);
                        if annotated != inferred {
                            report(
                                rw,
                                format!("variable `{}` is declared with a different type than its initializer", name),
                            );
                        }
                    }
                }
                let new_var = build::var_with_id(rw.dst, Some(produced_ty), &name, id);
                rw.register_processed(old_var, new_var);
                new_vars.push(new_var);
            }
            Some(build::let_with_vars(
                rw.dst,
                instruction,
                &new_vars,
                is_mutable,
            ))
        }

        NodeKind::If {
            yield_types,
            condition,
            if_true,
            if_false,
        } => {
            let yield_types = rewrite_yield_types(rw, yield_types);
            let bool_t = build::bool_type(rw.dst);
            let condition = rewrite_value(rw, condition, Some(bool_t));
            let if_true = rw.rewrite(if_true);
            let if_false = rw.rewrite_opt(if_false);
            Some(build::if_instr(
                rw.dst,
                &yield_types,
                condition,
                if_true,
                if_false,
            ))
        }

        NodeKind::Match {
            yield_types,
            inspect,
            literals,
            cases,
            default_case,
        } => {
            let yield_types = rewrite_yield_types(rw, yield_types);
            let inspect = rewrite_value(rw, inspect, None);
            let inspect_ty = ty::value_type(rw.dst, inspect);
            let expected = ty::without_qualifier(rw.dst, inspect_ty);
            if !matches!(rw.dst.kind(expected), NodeKind::Int { .. }) {
                report(rw, "match inspects an integer value".to_string());
            }
            let literals = rw.src.nodes(literals).to_vec();
            let literals: Vec<Node> = literals
                .iter()
                .map(|&l| rewrite_value(rw, l, Some(expected)))
                .collect();
            let cases = rw.src.nodes(cases).to_vec();
            let cases = rw.rewrite_slice(&cases);
            let default_case = rw.rewrite(default_case);
            Some(build::match_instr(
                rw.dst,
                &yield_types,
                inspect,
                &literals,
                &cases,
                default_case,
            ))
        }

        NodeKind::Loop {
            yield_types,
            params,
            initial_args,
            body,
        } => {
            let yield_types = rewrite_yield_types(rw, yield_types);
            let params = rw.src.nodes(params).to_vec();
            let params = rw.rewrite_slice(&params);
            let old_args = rw.src.nodes(initial_args).to_vec();
            let mut args = Vec::with_capacity(old_args.len());
            for (i, &arg) in old_args.iter().enumerate() {
                let expected = params
                    .get(i)
                    .map(|&p| ty::value_type_unqualified(rw.dst, p));
                args.push(rewrite_value(rw, arg, expected));
            }
            let body = rw.rewrite(body);
            Some(build::loop_instr(rw.dst, &yield_types, &params, &args, body))
        }

        NodeKind::Return { values } => {
            let expected = rw.ctx.return_types.last().cloned().unwrap_or_default();
            let values = rw.src.nodes(values).to_vec();
            if values.len() != expected.len() {
                report(
                    rw,
                    format!(
                        "return of {} values from a function returning {}",
                        values.len(),
                        expected.len()
                    ),
                );
            }
            let mut new_values = Vec::with_capacity(values.len());
            for (i, &v) in values.iter().enumerate() {
                let exp = expected
                    .get(i)
                    .map(|&t| ty::without_qualifier(rw.dst, t));
                new_values.push(rewrite_value(rw, v, exp));
            }
            Some(build::fn_ret(rw.dst, &new_values))
        }

        NodeKind::Branch {
            mode: crate::ir::node::BranchMode::IfElse,
            condition,
            targets,
            args,
        } => {
            let bool_t = build::bool_type(rw.dst);
            let condition =
                rewrite_value(rw, condition.expect("conditional branch has a condition"), Some(bool_t));
            let targets = rw.src.nodes(targets).to_vec();
            let targets = rw.rewrite_slice(&targets);
            let args = rw.src.nodes(args).to_vec();
            let args = rw.rewrite_slice(&args);
            Some(build::branch(
                rw.dst,
                crate::ir::node::BranchMode::IfElse,
                Some(condition),
                &targets,
                &args,
            ))
        }

        // Continuations reached by reference: header, then body under the
        // parent's return types (a continuation returns from its parent).
        NodeKind::Function { attrs, .. } if attrs.is_continuation => {
            let header = rw.recreate_decl_header_identity(old);
            rw.recreate_decl_body_identity(old, header);
            Some(header)
        }

        // Blocks own an instruction accumulator, so operand flattening
        // can splice synthetic lets in evaluation order.
        NodeKind::Block {
            instructions,
            terminator,
        } => {
            rw.ctx.sinks.push(Vec::new());
            for &instruction in &rw.src.nodes(instructions).to_vec() {
                let new = rw.rewrite(instruction);
                rw.ctx.sinks.last_mut().unwrap().push(new);
            }
            let terminator = rw.rewrite(terminator);
            let instructions = rw.ctx.sinks.pop().unwrap();
            Some(build::block(rw.dst, &instructions, terminator))
        }

        NodeKind::Root { declarations } => {
            let old_decls = rw.src.nodes(declarations).to_vec();
            let mut headers = Vec::with_capacity(old_decls.len());
            for &decl in &old_decls {
                headers.push(rw.recreate_decl_header_identity(decl));
            }
            for (&decl, &header) in old_decls.iter().zip(&headers) {
                match *rw.src.kind(decl) {
                    NodeKind::Function { .. } => {
                        let returns = match *rw.dst.kind(header) {
                            NodeKind::Function { returns, .. } => {
                                rw.dst.nodes(returns).to_vec()
                            }
                            _ => unreachable!(),
                        };
                        rw.ctx.return_types.push(returns);
                        rw.recreate_decl_body_identity(decl, header);
                        rw.ctx.return_types.pop();
                    }
                    NodeKind::GlobalVar { ty, init, .. } => {
                        if let Some(init) = init {
                            let expected = rw.rewrite(ty);
                            let expected = ty::without_qualifier(rw.dst, expected);
                            let init = rewrite_value(rw, init, Some(expected));
                            build::set_global_init(rw.dst, header, init);
                        }
                    }
                    NodeKind::Constant { value, ty_hint, .. } => {
                        if let Some(value) = value {
                            let expected = ty_hint.map(|h| {
                                let h = rw.rewrite(h);
                                ty::without_qualifier(rw.dst, h)
                            });
                            let value = rewrite_value(rw, value, expected);
                            build::set_constant_value(rw.dst, header, value);
                        }
                    }
                    ref other => panic!("unnamed top-level node: {}", other.tag_name()),
                }
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
    use crate::ir::node::FnAttributes;
    use crate::ir::print::print_node;

    fn typed(src: &IrArena, root: Node) -> (IrArena, Result<Node, Vec<Diagnostic>>) {
        let mut dst = IrArena::new(ArenaConfig::checked());
        let result = infer_program(src, &mut dst, root);
        (dst, result)
    }

    /// `fn f i32(i32 x) { let y = add(x, 1); return y; }`, bound by hand.
    #[test]
    fn test_infer_types_untyped_literal_from_partner() {
        let mut src = IrArena::new(ArenaConfig::unchecked());
        let i32_t = build::int32_type(&mut src);
        let q = build::qualified(&mut src, false, i32_t);
        let x = build::var(&mut src, Some(q), "x");
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[x], &[i32_t]);
        let one = build::untyped_number(&mut src, "1");
        let sum = build::prim_op(&mut src, Op::Add, &[x, one]);
        let bound = build::let_instr(&mut src, sum, &["y"]);
        let vars = match *src.kind(bound) {
            NodeKind::Let { variables, .. } => src.nodes(variables).to_vec(),
            _ => unreachable!(),
        };
        let ret = build::fn_ret(&mut src, &[vars[0]]);
        let body = build::block(&mut src, &[bound], ret);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let (dst, result) = typed(&src, root);
        let new_root = result.unwrap();
        let text = print_node(&dst, new_root);
        assert!(text.contains("let varying i32 y_"), "got: {}", text);
    }

    #[test]
    fn test_infer_rejects_return_arity() {
        let mut src = IrArena::new(ArenaConfig::unchecked());
        let i32_t = build::int32_type(&mut src);
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[i32_t]);
        let ret = build::fn_ret(&mut src, &[]);
        let body = build::block(&mut src, &[], ret);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let (_, result) = typed(&src, root);
        let errors = result.unwrap_err();
        assert!(errors[0].message.contains("return"), "{:?}", errors);
    }

    #[test]
    fn test_infer_rejects_mismatched_operands() {
        let mut src = IrArena::new(ArenaConfig::unchecked());
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[]);
        let one = build::untyped_number(&mut src, "1");
        let t = build::true_lit(&mut src);
        let sum = build::prim_op(&mut src, Op::Add, &[t, one]);
        let bound = build::let_instr(&mut src, sum, &["y"]);
        let ret = build::fn_ret(&mut src, &[]);
        let body = build::block(&mut src, &[bound], ret);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let (_, result) = typed(&src, root);
        assert!(result.is_err());
    }

    #[test]
    fn test_infer_constant_uses_hint() {
        let mut src = IrArena::new(ArenaConfig::unchecked());
        let i64_t = build::int64_type(&mut src);
        let c = build::constant(&mut src, "BIG", Some(i64_t));
        let n = build::untyped_number(&mut src, "0x100000000");
        build::set_constant_value(&mut src, c, n);
        let root = build::root(&mut src, &[c]);

        let (dst, result) = typed(&src, root);
        let new_root = result.unwrap();
        let decls = match *dst.kind(new_root) {
            NodeKind::Root { declarations } => dst.nodes(declarations).to_vec(),
            _ => unreachable!(),
        };
        match *dst.kind(decls[0]) {
            NodeKind::Constant { value: Some(v), .. } => match *dst.kind(v) {
                NodeKind::IntLit { width, value } => {
                    assert_eq!(width, IntWidth::I64);
                    assert_eq!(value, 0x1_0000_0000);
                }
                _ => panic!("expected an int literal"),
            },
            _ => panic!("expected a constant with a value"),
        }
    }

    #[test]
    fn test_infer_if_condition_must_be_bool() {
        let mut src = IrArena::new(ArenaConfig::unchecked());
        let f = build::function(&mut src, FnAttributes::plain(), "f", &[], &[]);
        let one = build::untyped_number(&mut src, "1");
        let merge = build::merge_construct(&mut src, crate::ir::node::MergeKind::Selection, &[]);
        let true_block = build::block(&mut src, &[], merge);
        let cond_if = build::if_instr(&mut src, &[], one, true_block, None);
        let ret = build::fn_ret(&mut src, &[]);
        let body = build::block(&mut src, &[cond_if], ret);
        build::set_function_body(&mut src, f, body);
        let root = build::root(&mut src, &[f]);

        let (_, result) = typed(&src, root);
        assert!(result.is_err());
    }
}
