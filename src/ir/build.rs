//! Smart constructors.
//!
//! Every node is built through one of these: the constructor checks its
//! inputs, infers the result type, and interns the node. In an arena with
//! `check_types` off (parser output, pre-binding) no inference happens and
//! nodes carry no type.
//!
//! Type violations here are panics: user-facing type errors are caught by
//! the typing pass before it reconstructs nodes in a checking arena, so a
//! panic in a constructor is a pipeline bug.

use crate::ir::arena::{IrArena, NodeList};
use crate::ir::node::{
    AddressSpace, BranchMode, FnAttributes, InferredType, IntWidth, MergeKind, Node, NodeData,
    NodeKind, Op,
};
use crate::ir::ty;

// ─── Types ────────────────────────────────────────────────────────

pub fn int_type(arena: &mut IrArena, width: IntWidth) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::Int { width },
        ty: InferredType::None,
    })
}

pub fn int8_type(arena: &mut IrArena) -> Node {
    int_type(arena, IntWidth::I8)
}

pub fn int16_type(arena: &mut IrArena) -> Node {
    int_type(arena, IntWidth::I16)
}

pub fn int32_type(arena: &mut IrArena) -> Node {
    int_type(arena, IntWidth::I32)
}

pub fn int64_type(arena: &mut IrArena) -> Node {
    int_type(arena, IntWidth::I64)
}

pub fn bool_type(arena: &mut IrArena) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::Bool,
        ty: InferredType::None,
    })
}

pub fn float_type(arena: &mut IrArena) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::Float,
        ty: InferredType::None,
    })
}

pub fn mask_type(arena: &mut IrArena) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::Mask,
        ty: InferredType::None,
    })
}

pub fn noret_type(arena: &mut IrArena) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::NoRet,
        ty: InferredType::None,
    })
}

pub fn record_type(arena: &mut IrArena, members: &[Node]) -> Node {
    let members = arena.intern_nodes(members);
    arena.intern_node(NodeData {
        kind: NodeKind::Record { members },
        ty: InferredType::None,
    })
}

pub fn ptr_type(arena: &mut IrArena, space: AddressSpace, pointee: Node) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::PtrType { space, pointee },
        ty: InferredType::None,
    })
}

pub fn arr_type(arena: &mut IrArena, elem: Node, size: Option<Node>) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::ArrType { elem, size },
        ty: InferredType::None,
    })
}

pub fn fn_type(
    arena: &mut IrArena,
    params: &[Node],
    returns: &[Node],
    is_continuation: bool,
) -> Node {
    let params = arena.intern_nodes(params);
    let returns = arena.intern_nodes(returns);
    arena.intern_node(NodeData {
        kind: NodeKind::FnType {
            params,
            returns,
            is_continuation,
        },
        ty: InferredType::None,
    })
}

/// Wrap a type in a uniformity qualifier. Qualifiers do not nest.
pub fn qualified(arena: &mut IrArena, uniform: bool, ty: Node) -> Node {
    assert!(
        !matches!(arena.kind(ty), NodeKind::Qualified { .. }),
        "qualified types do not nest"
    );
    arena.intern_node(NodeData {
        kind: NodeKind::Qualified { uniform, ty },
        ty: InferredType::None,
    })
}

/// Qualify `ty` unless it already is qualified.
pub fn maybe_qualified(arena: &mut IrArena, uniform: bool, ty: Node) -> Node {
    if matches!(arena.kind(ty), NodeKind::Qualified { .. }) {
        ty
    } else {
        qualified(arena, uniform, ty)
    }
}

/// The function type a `Function` declaration denotes.
pub fn derive_fn_type(arena: &mut IrArena, function: Node) -> Node {
    let (attrs, params, returns) = match *arena.kind(function) {
        NodeKind::Function {
            attrs,
            params,
            returns,
            ..
        } => (attrs, params, returns),
        ref other => panic!("derive_fn_type on a {}", other.tag_name()),
    };
    let param_types: Vec<Node> = arena
        .nodes(params)
        .to_vec()
        .iter()
        .map(|&p| ty::value_type(arena, p))
        .collect();
    let return_types = arena.nodes(returns).to_vec();
    fn_type(arena, &param_types, &return_types, attrs.is_continuation)
}

// ─── Values ───────────────────────────────────────────────────────

pub fn int_literal(arena: &mut IrArena, width: IntWidth, value: i64) -> Node {
    let ty = if arena.config.check_types {
        let t = int_type(arena, width);
        InferredType::Value(qualified(arena, true, t))
    } else {
        InferredType::None
    };
    arena.intern_node(NodeData {
        kind: NodeKind::IntLit { width, value },
        ty,
    })
}

pub fn true_lit(arena: &mut IrArena) -> Node {
    let ty = bool_lit_type(arena);
    arena.intern_node(NodeData {
        kind: NodeKind::True,
        ty,
    })
}

pub fn false_lit(arena: &mut IrArena) -> Node {
    let ty = bool_lit_type(arena);
    arena.intern_node(NodeData {
        kind: NodeKind::False,
        ty,
    })
}

fn bool_lit_type(arena: &mut IrArena) -> InferredType {
    if arena.config.check_types {
        let t = bool_type(arena);
        InferredType::Value(qualified(arena, true, t))
    } else {
        InferredType::None
    }
}

pub fn untyped_number(arena: &mut IrArena, text: &str) -> Node {
    let text = arena.intern_string(text);
    arena.intern_node(NodeData {
        kind: NodeKind::UntypedNumber { text },
        ty: InferredType::None,
    })
}

/// A variable with a fresh ID. `ty`, when given, must be a qualified type.
pub fn var(arena: &mut IrArena, ty: Option<Node>, name: &str) -> Node {
    if let Some(t) = ty {
        assert!(
            matches!(arena.kind(t), NodeKind::Qualified { .. }),
            "variables carry qualified types"
        );
    }
    let name = arena.intern_string(name);
    let id = arena.fresh_id();
    arena.intern_node(NodeData {
        kind: NodeKind::Var { name, id },
        ty: ty.map(InferredType::Value).unwrap_or(InferredType::None),
    })
}

/// A variable carried over from another arena, keeping its ID. Rewrites
/// use this so an identity rewrite reproduces the input exactly; the
/// counter is bumped past `id` to keep later fresh IDs unique.
pub fn var_with_id(arena: &mut IrArena, ty: Option<Node>, name: &str, id: u32) -> Node {
    if let Some(t) = ty {
        assert!(
            matches!(arena.kind(t), NodeKind::Qualified { .. }),
            "variables carry qualified types"
        );
    }
    let name = arena.intern_string(name);
    arena.reserve_id(id);
    arena.intern_node(NodeData {
        kind: NodeKind::Var { name, id },
        ty: ty.map(InferredType::Value).unwrap_or(InferredType::None),
    })
}

pub fn unbound(arena: &mut IrArena, name: &str) -> Node {
    let name = arena.intern_string(name);
    arena.intern_node(NodeData {
        kind: NodeKind::Unbound { name },
        ty: InferredType::None,
    })
}

/// The address of a function, usable as a first-class value.
pub fn fn_addr(arena: &mut IrArena, function: Node) -> Node {
    let ty = if arena.config.check_types {
        let fnt = derive_fn_type(arena, function);
        let ptr = ptr_type(arena, AddressSpace::ProgramCode, fnt);
        InferredType::Value(qualified(arena, true, ptr))
    } else {
        InferredType::None
    };
    arena.intern_node(NodeData {
        kind: NodeKind::FnAddr { function },
        ty,
    })
}

pub fn nothing(arena: &mut IrArena) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::Nothing,
        ty: InferredType::None,
    })
}

// ─── Declarations (nominal, two-phase) ────────────────────────────

/// A constant declaration header; fill in the value with
/// [`set_constant_value`].
pub fn constant(arena: &mut IrArena, name: &str, ty_hint: Option<Node>) -> Node {
    let name = arena.intern_string(name);
    arena.alloc_node(NodeData {
        kind: NodeKind::Constant {
            name,
            value: None,
            ty_hint,
        },
        ty: InferredType::None,
    })
}

pub fn set_constant_value(arena: &mut IrArena, cnst: Node, value: Node) {
    let (name, ty_hint) = match *arena.kind(cnst) {
        NodeKind::Constant { name, ty_hint, .. } => (name, ty_hint),
        ref other => panic!("set_constant_value on a {}", other.tag_name()),
    };
    let ty = if arena.config.check_types {
        arena.node(value).ty
    } else {
        InferredType::None
    };
    arena.update_node(
        cnst,
        NodeData {
            kind: NodeKind::Constant {
                name,
                value: Some(value),
                ty_hint,
            },
            ty,
        },
    );
}

/// A global variable declaration header; the value of the node is a pointer
/// into `space`.
pub fn global_var(arena: &mut IrArena, ty: Node, name: &str, space: AddressSpace) -> Node {
    let name = arena.intern_string(name);
    let node_ty = if arena.config.check_types {
        let ptr = ptr_type(arena, space, ty);
        InferredType::Value(qualified(arena, true, ptr))
    } else {
        InferredType::None
    };
    arena.alloc_node(NodeData {
        kind: NodeKind::GlobalVar {
            name,
            ty,
            space,
            init: None,
        },
        ty: node_ty,
    })
}

pub fn set_global_init(arena: &mut IrArena, gvar: Node, init: Node) {
    let data = *arena.node(gvar);
    match data.kind {
        NodeKind::GlobalVar {
            name, ty, space, ..
        } => arena.update_node(
            gvar,
            NodeData {
                kind: NodeKind::GlobalVar {
                    name,
                    ty,
                    space,
                    init: Some(init),
                },
                ty: data.ty,
            },
        ),
        ref other => panic!("set_global_init on a {}", other.tag_name()),
    }
}

/// A function declaration header; attach the body with
/// [`set_function_body`]. `params` are variable nodes, `returns` are types.
pub fn function(
    arena: &mut IrArena,
    attrs: FnAttributes,
    name: &str,
    params: &[Node],
    returns: &[Node],
) -> Node {
    let name = arena.intern_string(name);
    let params = arena.intern_nodes(params);
    let returns = arena.intern_nodes(returns);
    let header = arena.alloc_node(NodeData {
        kind: NodeKind::Function {
            attrs,
            name,
            params,
            returns,
            block: None,
        },
        ty: InferredType::None,
    });
    if arena.config.check_types {
        let fnt = derive_fn_type(arena, header);
        let q = qualified(arena, true, fnt);
        let data = *arena.node(header);
        arena.update_node(
            header,
            NodeData {
                kind: data.kind,
                ty: InferredType::Value(q),
            },
        );
    }
    header
}

pub fn set_function_body(arena: &mut IrArena, function: Node, block: Node) {
    let data = *arena.node(function);
    match data.kind {
        NodeKind::Function {
            attrs,
            name,
            params,
            returns,
            ..
        } => arena.update_node(
            function,
            NodeData {
                kind: NodeKind::Function {
                    attrs,
                    name,
                    params,
                    returns,
                    block: Some(block),
                },
                ty: data.ty,
            },
        ),
        ref other => panic!("set_function_body on a {}", other.tag_name()),
    }
}

// ─── Instructions ─────────────────────────────────────────────────

pub fn prim_op(arena: &mut IrArena, op: Op, operands: &[Node]) -> Node {
    let ty = if arena.config.check_types {
        infer_prim_op(arena, op, operands)
    } else {
        InferredType::None
    };
    let operands = arena.intern_nodes(operands);
    arena.intern_node(NodeData {
        kind: NodeKind::PrimOp { op, operands },
        ty,
    })
}

pub fn call(arena: &mut IrArena, callee: Node, args: &[Node]) -> Node {
    let ty = if arena.config.check_types {
        let callee_ty = ty::value_type(arena, callee);
        let (params, returns) = ty::callee_signature(arena, callee_ty)
            .unwrap_or_else(|| panic!("call callee is not function-typed"));
        assert_eq!(
            arena.nodes(params).len(),
            args.len(),
            "call arity mismatch"
        );
        InferredType::Multi(returns)
    } else {
        InferredType::None
    };
    let args = arena.intern_nodes(args);
    arena.intern_node(NodeData {
        kind: NodeKind::Call { callee, args },
        ty,
    })
}

pub fn if_instr(
    arena: &mut IrArena,
    yield_types: &[Node],
    condition: Node,
    if_true: Node,
    if_false: Option<Node>,
) -> Node {
    if arena.config.check_types {
        let cond_ty = ty::value_type(arena, condition);
        assert!(
            ty::is_logical(arena, cond_ty),
            "if condition must be boolean"
        );
    }
    let yield_types = arena.intern_nodes(yield_types);
    arena.intern_node(NodeData {
        kind: NodeKind::If {
            yield_types,
            condition,
            if_true,
            if_false,
        },
        ty: instruction_yield(arena, yield_types),
    })
}

pub fn match_instr(
    arena: &mut IrArena,
    yield_types: &[Node],
    inspect: Node,
    literals: &[Node],
    cases: &[Node],
    default_case: Node,
) -> Node {
    assert_eq!(literals.len(), cases.len(), "one case per literal");
    let yield_types = arena.intern_nodes(yield_types);
    let literals = arena.intern_nodes(literals);
    let cases = arena.intern_nodes(cases);
    arena.intern_node(NodeData {
        kind: NodeKind::Match {
            yield_types,
            inspect,
            literals,
            cases,
            default_case,
        },
        ty: instruction_yield(arena, yield_types),
    })
}

pub fn loop_instr(
    arena: &mut IrArena,
    yield_types: &[Node],
    params: &[Node],
    initial_args: &[Node],
    body: Node,
) -> Node {
    assert_eq!(
        params.len(),
        initial_args.len(),
        "one initial argument per loop parameter"
    );
    let yield_types = arena.intern_nodes(yield_types);
    let params = arena.intern_nodes(params);
    let initial_args = arena.intern_nodes(initial_args);
    arena.intern_node(NodeData {
        kind: NodeKind::Loop {
            yield_types,
            params,
            initial_args,
            body,
        },
        ty: instruction_yield(arena, yield_types),
    })
}

fn instruction_yield(arena: &IrArena, yield_types: NodeList) -> InferredType {
    if arena.config.check_types {
        InferredType::Multi(yield_types)
    } else {
        InferredType::None
    }
}

/// Bind an instruction's results to pre-built variables.
pub fn let_with_vars(
    arena: &mut IrArena,
    instruction: Node,
    variables: &[Node],
    is_mutable: bool,
) -> Node {
    if arena.config.check_types {
        let produced = arena
            .node(instruction)
            .ty
            .as_multi()
            .unwrap_or_else(|| panic!("let of a non-instruction"));
        assert_eq!(
            arena.nodes(produced).len(),
            variables.len(),
            "let binds one variable per produced value"
        );
    }
    let variables = arena.intern_nodes(variables);
    arena.intern_node(NodeData {
        kind: NodeKind::Let {
            variables,
            instruction,
            is_mutable,
        },
        ty: InferredType::None,
    })
}

/// Bind an instruction's results to fresh variables named `names`. In a
/// checking arena the variables take the instruction's inferred types.
pub fn let_instr(arena: &mut IrArena, instruction: Node, names: &[&str]) -> Node {
    let mut vars = Vec::with_capacity(names.len());
    if arena.config.check_types {
        let produced = arena
            .node(instruction)
            .ty
            .as_multi()
            .unwrap_or_else(|| panic!("let of a non-instruction"));
        let produced = arena.nodes(produced).to_vec();
        assert_eq!(produced.len(), names.len());
        for (name, ty) in names.iter().zip(produced) {
            vars.push(var(arena, Some(ty), name));
        }
    } else {
        for name in names {
            vars.push(var(arena, None, name));
        }
    }
    let_with_vars(arena, instruction, &vars, false)
}

// ─── Blocks ───────────────────────────────────────────────────────

pub fn block(arena: &mut IrArena, instructions: &[Node], terminator: Node) -> Node {
    debug_assert!(
        arena.kind(terminator).is_terminator(),
        "blocks end with a terminator, got {}",
        arena.kind(terminator).tag_name()
    );
    let instructions = arena.intern_nodes(instructions);
    arena.intern_node(NodeData {
        kind: NodeKind::Block {
            instructions,
            terminator,
        },
        ty: InferredType::None,
    })
}

pub fn parsed_block(
    arena: &mut IrArena,
    instructions: &[Node],
    terminator: Node,
    continuations: &[Node],
    continuation_vars: &[Node],
) -> Node {
    let instructions = arena.intern_nodes(instructions);
    let continuations = arena.intern_nodes(continuations);
    let continuation_vars = arena.intern_nodes(continuation_vars);
    arena.intern_node(NodeData {
        kind: NodeKind::ParsedBlock {
            instructions,
            terminator,
            continuations,
            continuation_vars,
        },
        ty: InferredType::None,
    })
}

// ─── Terminators ──────────────────────────────────────────────────

pub fn fn_ret(arena: &mut IrArena, values: &[Node]) -> Node {
    let values = arena.intern_nodes(values);
    arena.intern_node(NodeData {
        kind: NodeKind::Return { values },
        ty: InferredType::None,
    })
}

pub fn branch(
    arena: &mut IrArena,
    mode: BranchMode,
    condition: Option<Node>,
    targets: &[Node],
    args: &[Node],
) -> Node {
    match mode {
        BranchMode::Jump | BranchMode::Tailcall => assert_eq!(targets.len(), 1),
        BranchMode::IfElse => {
            assert_eq!(targets.len(), 2);
            assert!(condition.is_some(), "conditional branch needs a condition");
        }
        BranchMode::Switch => assert!(!targets.is_empty()),
    }
    let targets = arena.intern_nodes(targets);
    let args = arena.intern_nodes(args);
    arena.intern_node(NodeData {
        kind: NodeKind::Branch {
            mode,
            condition,
            targets,
            args,
        },
        ty: InferredType::None,
    })
}

pub fn jump(arena: &mut IrArena, target: Node, args: &[Node]) -> Node {
    branch(arena, BranchMode::Jump, None, &[target], args)
}

pub fn tailcall(arena: &mut IrArena, target: Node, args: &[Node]) -> Node {
    branch(arena, BranchMode::Tailcall, None, &[target], args)
}

pub fn join(
    arena: &mut IrArena,
    join_at: Node,
    desired_mask: Node,
    args: &[Node],
    is_indirect: bool,
) -> Node {
    let args = arena.intern_nodes(args);
    arena.intern_node(NodeData {
        kind: NodeKind::Join {
            join_at,
            desired_mask,
            args,
            is_indirect,
        },
        ty: InferredType::None,
    })
}

pub fn callc(
    arena: &mut IrArena,
    ret_cont: Node,
    callee: Node,
    args: &[Node],
    is_return_indirect: bool,
) -> Node {
    let args = arena.intern_nodes(args);
    arena.intern_node(NodeData {
        kind: NodeKind::Callc {
            ret_cont,
            callee,
            args,
            is_return_indirect,
        },
        ty: InferredType::None,
    })
}

pub fn merge_construct(arena: &mut IrArena, kind: MergeKind, args: &[Node]) -> Node {
    let args = arena.intern_nodes(args);
    arena.intern_node(NodeData {
        kind: NodeKind::Merge { kind, args },
        ty: InferredType::None,
    })
}

pub fn unreachable(arena: &mut IrArena) -> Node {
    arena.intern_node(NodeData {
        kind: NodeKind::Unreachable,
        ty: InferredType::None,
    })
}

// ─── Top level ────────────────────────────────────────────────────

pub fn root(arena: &mut IrArena, declarations: &[Node]) -> Node {
    let declarations = arena.intern_nodes(declarations);
    arena.alloc_node(NodeData {
        kind: NodeKind::Root { declarations },
        ty: InferredType::None,
    })
}

pub fn set_root_declarations(arena: &mut IrArena, root: Node, declarations: &[Node]) {
    assert!(matches!(arena.kind(root), NodeKind::Root { .. }));
    let declarations = arena.intern_nodes(declarations);
    arena.update_node(
        root,
        NodeData {
            kind: NodeKind::Root { declarations },
            ty: InferredType::None,
        },
    );
}

// ─── PrimOp type inference ────────────────────────────────────────

fn infer_prim_op(arena: &mut IrArena, op: Op, operands: &[Node]) -> InferredType {
    let single = |arena: &mut IrArena, ty: Node| {
        let list = arena.intern_nodes(&[ty]);
        InferredType::Multi(list)
    };
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
            assert_eq!(operands.len(), 2, "{} takes two operands", op.name());
            let a = ty::value_type(arena, operands[0]);
            let b = ty::value_type(arena, operands[1]);
            assert!(
                ty::is_numeric(arena, a) && ty::same_unqualified(arena, a, b),
                "{} operands must be numeric and identical",
                op.name()
            );
            let result = ty::without_qualifier(arena, a);
            let uniform = ty::all_uniform(arena, operands);
            let q = qualified(arena, uniform, result);
            single(arena, q)
        }
        Op::Neg => {
            assert_eq!(operands.len(), 1);
            let a = ty::value_type(arena, operands[0]);
            assert!(ty::is_numeric(arena, a), "neg operand must be numeric");
            let result = ty::without_qualifier(arena, a);
            let uniform = ty::all_uniform(arena, operands);
            let q = qualified(arena, uniform, result);
            single(arena, q)
        }
        Op::Eq | Op::Neq | Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
            assert_eq!(operands.len(), 2, "{} takes two operands", op.name());
            let a = ty::value_type(arena, operands[0]);
            let b = ty::value_type(arena, operands[1]);
            assert!(
                ty::same_unqualified(arena, a, b),
                "{} operands must have identical type",
                op.name()
            );
            if matches!(op, Op::Lt | Op::Lte | Op::Gt | Op::Gte) {
                assert!(ty::is_numeric(arena, a), "ordering requires numeric operands");
            }
            let uniform = ty::all_uniform(arena, operands);
            let b_ty = bool_type(arena);
            let q = qualified(arena, uniform, b_ty);
            single(arena, q)
        }
        Op::Not => {
            assert_eq!(operands.len(), 1);
            let a = ty::value_type(arena, operands[0]);
            assert!(
                ty::is_logical(arena, a) || ty::is_numeric(arena, a),
                "not operand must be boolean or integer"
            );
            let result = ty::without_qualifier(arena, a);
            let uniform = ty::all_uniform(arena, operands);
            let q = qualified(arena, uniform, result);
            single(arena, q)
        }
        Op::And | Op::Or | Op::Xor => {
            assert_eq!(operands.len(), 2, "{} takes two operands", op.name());
            let a = ty::value_type(arena, operands[0]);
            let b = ty::value_type(arena, operands[1]);
            assert!(
                ty::same_unqualified(arena, a, b),
                "{} operands must have identical type",
                op.name()
            );
            let result = ty::without_qualifier(arena, a);
            let uniform = ty::all_uniform(arena, operands);
            let q = qualified(arena, uniform, result);
            single(arena, q)
        }
        Op::Convert | Op::Reinterpret => {
            assert_eq!(
                operands.len(),
                2,
                "{} takes a target type and a value",
                op.name()
            );
            assert!(
                arena.kind(operands[0]).is_type(),
                "{} target must be a type",
                op.name()
            );
            let target = operands[0];
            let value_ty = ty::value_type(arena, operands[1]);
            let uniform = ty::is_uniform(arena, value_ty);
            let q = qualified(arena, uniform, target);
            single(arena, q)
        }
        Op::Load => {
            assert_eq!(operands.len(), 1, "load takes a pointer");
            let ptr_ty = ty::value_type(arena, operands[0]);
            let (space, pointee) = ty::pointee(arena, ptr_ty)
                .unwrap_or_else(|| panic!("load operand must be a pointer"));
            let uniform =
                ty::is_uniform(arena, ptr_ty) && ty::is_addr_space_uniform(space);
            let q = qualified(arena, uniform, pointee);
            single(arena, q)
        }
        Op::Store => {
            assert_eq!(operands.len(), 2, "store takes a pointer and a value");
            let ptr_ty = ty::value_type(arena, operands[0]);
            let (_, pointee) = ty::pointee(arena, ptr_ty)
                .unwrap_or_else(|| panic!("store destination must be a pointer"));
            let value_ty = ty::value_type(arena, operands[1]);
            assert!(
                ty::same_unqualified(arena, pointee, value_ty),
                "store value must match the pointee type"
            );
            let empty = arena.empty_nodes();
            InferredType::Multi(empty)
        }
        Op::Alloca => {
            assert_eq!(operands.len(), 1, "alloca takes an element type");
            assert!(arena.kind(operands[0]).is_type());
            let ptr = ptr_type(arena, AddressSpace::FunctionLogical, operands[0]);
            let q = qualified(arena, false, ptr);
            single(arena, q)
        }
        Op::Lea => {
            assert!(
                operands.len() >= 2,
                "lea takes a base, an optional offset, and indices"
            );
            let base_ty = ty::value_type(arena, operands[0]);
            let (space, pointee) = ty::pointee(arena, base_ty)
                .unwrap_or_else(|| panic!("lea base must be a pointer"));
            let walked = ty::walk_lea_chain(arena, pointee, &operands[2..])
                .unwrap_or_else(|| panic!("lea indices do not match the pointee shape"));
            let ptr = ptr_type(arena, space, walked);
            let uniform = ty::is_uniform(arena, base_ty);
            let q = qualified(arena, uniform, ptr);
            single(arena, q)
        }
        Op::Select => {
            assert_eq!(operands.len(), 3, "select takes condition, then, else");
            let cond = ty::value_type(arena, operands[0]);
            assert!(ty::is_logical(arena, cond), "select condition must be boolean");
            let a = ty::value_type(arena, operands[1]);
            let b = ty::value_type(arena, operands[2]);
            assert!(
                ty::same_unqualified(arena, a, b),
                "select branches must have identical type"
            );
            let result = ty::without_qualifier(arena, a);
            let uniform = ty::all_uniform(arena, operands);
            let q = qualified(arena, uniform, result);
            single(arena, q)
        }
        Op::SubgroupActiveMask => {
            assert!(operands.is_empty());
            let m = mask_type(arena);
            let q = qualified(arena, true, m);
            single(arena, q)
        }
    }
}

// ─── Block builder ────────────────────────────────────────────────

/// Accumulates instructions for a block under construction. Used by the
/// passes when they synthesize code.
pub struct BlockBuilder {
    instructions: Vec<Node>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        BlockBuilder {
            instructions: Vec::new(),
        }
    }

    pub fn append(&mut self, instruction: Node) {
        self.instructions.push(instruction);
    }

    /// Emit a primop bound to fresh variables; returns the bound variables.
    pub fn add_primop(&mut self, arena: &mut IrArena, op: Op, operands: &[Node]) -> Vec<Node> {
        let instr = prim_op(arena, op, operands);
        self.bind(arena, instr, op.name())
    }

    /// Emit a call bound to fresh variables; returns the bound variables.
    pub fn add_call(&mut self, arena: &mut IrArena, callee: Node, args: &[Node]) -> Vec<Node> {
        let instr = call(arena, callee, args);
        self.bind(arena, instr, "ret")
    }

    pub fn add_load(&mut self, arena: &mut IrArena, ptr: Node) -> Node {
        self.add_primop(arena, Op::Load, &[ptr])[0]
    }

    pub fn add_store(&mut self, arena: &mut IrArena, ptr: Node, value: Node) {
        let instr = prim_op(arena, Op::Store, &[ptr, value]);
        self.append(instr);
    }

    fn bind(&mut self, arena: &mut IrArena, instr: Node, prefix: &str) -> Vec<Node> {
        let produced = match arena.node(instr).ty {
            InferredType::Multi(list) => arena.nodes(list).to_vec(),
            _ => Vec::new(),
        };
        if produced.is_empty() {
            self.append(instr);
            return Vec::new();
        }
        let mut vars = Vec::with_capacity(produced.len());
        for ty in produced {
            let name = arena.unique_name(prefix);
            let name = arena.str(name).to_string();
            vars.push(var(arena, Some(ty), &name));
        }
        let bound = let_with_vars(arena, instr, &vars, false);
        self.append(bound);
        vars
    }

    pub fn finish(self, arena: &mut IrArena, terminator: Node) -> Node {
        block(arena, &self.instructions, terminator)
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;

    fn checked() -> IrArena {
        IrArena::new(ArenaConfig::checked())
    }

    #[test]
    fn test_constructor_is_canonical() {
        let mut a = checked();
        let x = {
            let i = int32_type(&mut a);
            ptr_type(&mut a, AddressSpace::GlobalLogical, i)
        };
        let y = {
            let i = int32_type(&mut a);
            ptr_type(&mut a, AddressSpace::GlobalLogical, i)
        };
        assert_eq!(x, y);
    }

    #[test]
    fn test_arithmetic_inference() {
        let mut a = checked();
        let one = int_literal(&mut a, IntWidth::I32, 1);
        let two = int_literal(&mut a, IntWidth::I32, 2);
        let sum = prim_op(&mut a, Op::Add, &[one, two]);
        let produced = a.node(sum).ty.as_multi().unwrap();
        let tys = a.nodes(produced).to_vec();
        assert_eq!(tys.len(), 1);
        let i32_t = int32_type(&mut a);
        let expect = qualified(&mut a, true, i32_t);
        assert_eq!(tys[0], expect);
    }

    #[test]
    fn test_comparison_yields_bool() {
        let mut a = checked();
        let one = int_literal(&mut a, IntWidth::I32, 1);
        let two = int_literal(&mut a, IntWidth::I32, 2);
        let cmp = prim_op(&mut a, Op::Lt, &[one, two]);
        let produced = a.node(cmp).ty.as_multi().unwrap();
        let tys = a.nodes(produced).to_vec();
        let b = bool_type(&mut a);
        let expect = qualified(&mut a, true, b);
        assert_eq!(tys, vec![expect]);
    }

    #[test]
    fn test_varying_propagates() {
        let mut a = checked();
        let i32_t = int32_type(&mut a);
        let vt = qualified(&mut a, false, i32_t);
        let x = var(&mut a, Some(vt), "x");
        let one = int_literal(&mut a, IntWidth::I32, 1);
        let sum = prim_op(&mut a, Op::Add, &[x, one]);
        let produced = a.node(sum).ty.as_multi().unwrap();
        let tys = a.nodes(produced).to_vec();
        assert_eq!(tys[0], vt);
    }

    #[test]
    fn test_load_from_private_is_varying() {
        let mut a = checked();
        let i32_t = int32_type(&mut a);
        let gv = global_var(&mut a, i32_t, "counter", AddressSpace::PrivateLogical);
        let load = prim_op(&mut a, Op::Load, &[gv]);
        let produced = a.node(load).ty.as_multi().unwrap();
        let tys = a.nodes(produced).to_vec();
        let expect = qualified(&mut a, false, i32_t);
        assert_eq!(tys, vec![expect]);
    }

    #[test]
    fn test_alloca_yields_function_local_pointer() {
        let mut a = checked();
        let i32_t = int32_type(&mut a);
        let al = prim_op(&mut a, Op::Alloca, &[i32_t]);
        let produced = a.node(al).ty.as_multi().unwrap();
        let tys = a.nodes(produced).to_vec();
        let ptr = ptr_type(&mut a, AddressSpace::FunctionLogical, i32_t);
        let expect = qualified(&mut a, false, ptr);
        assert_eq!(tys, vec![expect]);
    }

    #[test]
    fn test_let_binds_typed_vars() {
        let mut a = checked();
        let one = int_literal(&mut a, IntWidth::I32, 1);
        let two = int_literal(&mut a, IntWidth::I32, 2);
        let sum = prim_op(&mut a, Op::Add, &[one, two]);
        let bound = let_instr(&mut a, sum, &["s"]);
        match *a.kind(bound) {
            NodeKind::Let {
                variables,
                instruction,
                is_mutable,
            } => {
                assert_eq!(instruction, sum);
                assert!(!is_mutable);
                let vars = a.nodes(variables).to_vec();
                assert_eq!(vars.len(), 1);
                let i32_t = int32_type(&mut a);
                let expect = qualified(&mut a, true, i32_t);
                assert_eq!(ty::value_type(&a, vars[0]), expect);
            }
            _ => panic!("expected a let"),
        }
    }

    #[test]
    fn test_two_phase_function() {
        let mut a = checked();
        let i32_t = int32_type(&mut a);
        let f = function(&mut a, FnAttributes::plain(), "f", &[], &[i32_t]);
        let forty_two = int_literal(&mut a, IntWidth::I32, 42);
        let ret = fn_ret(&mut a, &[forty_two]);
        let body = block(&mut a, &[], ret);
        set_function_body(&mut a, f, body);
        match *a.kind(f) {
            NodeKind::Function { block, .. } => assert_eq!(block, Some(body)),
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn test_functions_are_nominal() {
        let mut a = checked();
        let f = function(&mut a, FnAttributes::plain(), "f", &[], &[]);
        let g = function(&mut a, FnAttributes::plain(), "f", &[], &[]);
        assert_ne!(f, g);
    }
}
