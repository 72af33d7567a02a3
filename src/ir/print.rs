//! Human-readable IR dump, for debugging and golden tests.
//!
//! The printer is an observer: it never mutates the arena. For typed
//! functions it also lists the reachable continuations, ordered by the CFG
//! scope, so a dump shows the whole function body even though
//! continuations are only referenced from terminators.

use std::fmt::Write;

use crate::analysis::scope;
use crate::ir::arena::{IrArena, NodeList};
use crate::ir::node::{AddressSpace, BranchMode, EntryPointKind, Node, NodeKind};

#[derive(Clone, Copy, Debug, Default)]
pub struct PrintOptions {
    /// Prefix every node with its arena slot, for golden-trace tests.
    pub print_ptrs: bool,
}

pub fn print_node(arena: &IrArena, node: Node) -> String {
    print_node_with(arena, node, PrintOptions::default())
}

pub fn print_node_with(arena: &IrArena, node: Node, options: PrintOptions) -> String {
    let mut printer = Printer {
        arena,
        out: String::new(),
        indent: 0,
        print_ptrs: options.print_ptrs,
    };
    printer.node(node);
    printer.out
}

struct Printer<'a> {
    arena: &'a IrArena,
    out: String,
    indent: usize,
    print_ptrs: bool,
}

impl Printer<'_> {
    fn indent(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("   ");
        }
    }

    fn list(&mut self, nodes: NodeList, separator: &str) {
        let nodes = self.arena.nodes(nodes).to_vec();
        for (i, n) in nodes.iter().enumerate() {
            self.node(*n);
            if i + 1 < nodes.len() {
                self.out.push_str(separator);
            }
        }
    }

    /// Terminator argument list: ` (a, b)`, or nothing when empty, which
    /// is exactly the form the parser reads back.
    fn paren_args(&mut self, args: NodeList) {
        if self.arena.nodes(args).is_empty() {
            return;
        }
        self.out.push_str(" (");
        self.list(args, ", ");
        self.out.push(')');
    }

    fn yield_types(&mut self, types: NodeList) {
        for &t in &self.arena.nodes(types).to_vec() {
            self.out.push(' ');
            self.node(t);
        }
    }

    fn param_list(&mut self, params: NodeList, defaults: Option<NodeList>) {
        self.out.push('(');
        let params = self.arena.nodes(params).to_vec();
        let defaults = defaults.map(|d| self.arena.nodes(d).to_vec());
        for (i, &p) in params.iter().enumerate() {
            if self.print_ptrs {
                let _ = write!(self.out, "{}::", p.index());
            }
            if let Some(ty) = self.arena.node(p).ty.as_value() {
                self.node(ty);
                self.out.push(' ');
            }
            self.node(p);
            if let Some(ref defaults) = defaults {
                self.out.push_str(" = ");
                self.node(defaults[i]);
            }
            if i + 1 < params.len() {
                self.out.push_str(", ");
            }
        }
        self.out.push(')');
    }

    fn global_storage_name(space: AddressSpace) -> &'static str {
        match space {
            AddressSpace::Generic => "generic",
            AddressSpace::FunctionLogical => "l_function",
            AddressSpace::PrivateLogical => "private",
            AddressSpace::SharedLogical => "shared",
            AddressSpace::GlobalLogical => "global",
            AddressSpace::PrivatePhysical => "p_private",
            AddressSpace::SubgroupPhysical => "p_subgroup",
            AddressSpace::SharedPhysical => "p_shared",
            AddressSpace::GlobalPhysical => "p_global",
            AddressSpace::Input => "input",
            AddressSpace::Output => "output",
            AddressSpace::External => "external",
            AddressSpace::ProgramCode => "program_code",
        }
    }

    fn ptr_space_name(space: AddressSpace) -> &'static str {
        match space {
            AddressSpace::Generic => "generic",
            AddressSpace::FunctionLogical => "l_function",
            AddressSpace::PrivateLogical => "l_private",
            AddressSpace::SharedLogical => "l_shared",
            AddressSpace::GlobalLogical => "l_global",
            AddressSpace::PrivatePhysical => "private",
            AddressSpace::SubgroupPhysical => "subgroup",
            AddressSpace::SharedPhysical => "shared",
            AddressSpace::GlobalPhysical => "global",
            AddressSpace::Input => "input",
            AddressSpace::Output => "output",
            AddressSpace::External => "external",
            AddressSpace::ProgramCode => "program_code",
        }
    }

    /// Function signature, body, and the continuation listing.
    fn function_body(&mut self, function: Node) {
        let (params, returns, block, typed) = match *self.arena.kind(function) {
            NodeKind::Function {
                params,
                returns,
                block,
                ..
            } => (
                params,
                returns,
                block,
                self.arena.node(function).ty.as_value().is_some(),
            ),
            _ => unreachable!(),
        };
        self.yield_types(returns);
        self.param_list(params, None);
        self.out.push_str(" {\n");
        self.indent += 1;
        if let Some(block) = block {
            self.node(block);
        }

        if typed && block.is_some() {
            let scope = scope::build_scope(self.arena, function);
            let mut section_space = false;
            for cf_node in scope.nodes.iter().skip(1) {
                if !section_space {
                    self.out.push('\n');
                    section_space = true;
                }
                let cont = cf_node.node;
                let (cont_name, cont_params, cont_block) = match *self.arena.kind(cont) {
                    NodeKind::Function {
                        name,
                        params,
                        block,
                        ..
                    } => (name, params, block),
                    _ => unreachable!(),
                };
                self.indent();
                let _ = write!(self.out, "cont {} = ", self.arena.str(cont_name));
                self.param_list(cont_params, None);
                self.out.push_str(" {\n");
                self.indent += 1;
                if let Some(b) = cont_block {
                    self.node(b);
                }
                self.indent -= 1;
                self.indent();
                self.out.push_str("} \n");
            }
        }

        self.indent -= 1;
        self.indent();
        self.out.push('}');
    }

    fn node(&mut self, node: Node) {
        if self.print_ptrs {
            let _ = write!(self.out, "{}::", node.index());
        }

        match *self.arena.kind(node) {
            // ── Types ──
            NodeKind::Qualified { uniform, ty } => {
                self.out
                    .push_str(if uniform { "uniform " } else { "varying " });
                self.node(ty);
            }
            NodeKind::NoRet => self.out.push('!'),
            NodeKind::Int { width } => {
                let _ = write!(self.out, "i{}", width.bits());
            }
            NodeKind::Bool => self.out.push_str("bool"),
            NodeKind::Float => self.out.push_str("float"),
            NodeKind::Mask => self.out.push_str("mask"),
            NodeKind::Record { members } => {
                self.out.push_str("struct {");
                self.list(members, ", ");
                self.out.push('}');
            }
            NodeKind::FnType {
                params,
                returns,
                is_continuation,
            } => {
                if is_continuation {
                    self.out.push_str("cont");
                } else {
                    self.out.push_str("fn ");
                    self.list(returns, ", ");
                }
                self.out.push('(');
                self.list(params, ", ");
                self.out.push(')');
            }
            NodeKind::PtrType { space, pointee } => {
                self.out.push_str("ptr(");
                self.out.push_str(Self::ptr_space_name(space));
                self.out.push_str(", ");
                self.node(pointee);
                self.out.push(')');
            }
            NodeKind::ArrType { elem, size } => {
                self.out.push('[');
                self.node(elem);
                if let Some(size) = size {
                    self.out.push_str("; ");
                    self.node(size);
                }
                self.out.push(']');
            }

            // ── Top level ──
            NodeKind::Root { declarations } => {
                for &decl in &self.arena.nodes(declarations).to_vec() {
                    if self.print_ptrs {
                        let _ = write!(self.out, "{}::", decl.index());
                    }
                    match *self.arena.kind(decl) {
                        NodeKind::GlobalVar {
                            name,
                            ty,
                            space,
                            init,
                        } => {
                            self.out.push_str(Self::global_storage_name(space));
                            self.out.push(' ');
                            self.node(ty);
                            let _ = write!(self.out, " {}", self.arena.str(name));
                            if let Some(init) = init {
                                self.out.push_str(" = ");
                                self.node(init);
                            }
                            self.out.push_str(";\n");
                        }
                        NodeKind::Function { attrs, name, .. } => {
                            self.out.push_str("fn");
                            match attrs.entry_point {
                                EntryPointKind::Compute => self.out.push_str(" @compute"),
                                EntryPointKind::Fragment => self.out.push_str(" @fragment"),
                                EntryPointKind::Vertex => self.out.push_str(" @vertex"),
                                EntryPointKind::NotAnEntryPoint => {}
                            }
                            let _ = write!(self.out, " {}", self.arena.str(name));
                            self.function_body(decl);
                            self.out.push_str(";\n\n");
                        }
                        NodeKind::Constant {
                            name,
                            value,
                            ty_hint,
                        } => {
                            self.out.push_str("const ");
                            // Pre-typing constants only have their hint.
                            match self.arena.node(decl).ty.as_value() {
                                Some(ty) => {
                                    self.node(ty);
                                    self.out.push(' ');
                                }
                                None => {
                                    if let Some(hint) = ty_hint {
                                        self.node(hint);
                                        self.out.push(' ');
                                    }
                                }
                            }
                            let _ = write!(self.out, "{} = ", self.arena.str(name));
                            if let Some(value) = value {
                                self.node(value);
                            } else {
                                self.out.push('?');
                            }
                            self.out.push_str(";\n");
                        }
                        ref other => {
                            panic!("unnamed node at the top level: {}", other.tag_name())
                        }
                    }
                }
            }

            // ── Values ──
            NodeKind::Constant { name, .. } => {
                self.out.push_str(self.arena.str(name));
            }
            NodeKind::GlobalVar { name, .. } => {
                self.out.push_str(self.arena.str(name));
            }
            NodeKind::Var { name, id } => {
                let _ = write!(self.out, "{}_{}", self.arena.str(name), id);
            }
            NodeKind::Unbound { name } => {
                let _ = write!(self.out, "`{}`", self.arena.str(name));
            }
            NodeKind::FnAddr { function } => {
                self.out.push('&');
                self.node(function);
            }
            NodeKind::Function { name, .. } => {
                self.out.push_str(self.arena.str(name));
            }
            NodeKind::UntypedNumber { text } => {
                self.out.push_str(self.arena.str(text));
            }
            NodeKind::IntLit { value, .. } => {
                let _ = write!(self.out, "{}", value);
            }
            NodeKind::True => self.out.push_str("true"),
            NodeKind::False => self.out.push_str("false"),
            NodeKind::Nothing => self.out.push('_'),

            // ── Blocks ──
            NodeKind::Block {
                instructions,
                terminator,
            } => {
                for &instr in &self.arena.nodes(instructions).to_vec() {
                    self.indent();
                    self.node(instr);
                    self.out.push_str(";\n");
                }
                self.indent();
                self.node(terminator);
                self.out.push_str(";\n");
            }
            NodeKind::ParsedBlock {
                instructions,
                terminator,
                continuations,
                ..
            } => {
                for &instr in &self.arena.nodes(instructions).to_vec() {
                    self.indent();
                    self.node(instr);
                    self.out.push_str(";\n");
                }
                self.indent();
                self.node(terminator);
                self.out.push_str(";\n");

                let conts = self.arena.nodes(continuations).to_vec();
                if !conts.is_empty() {
                    self.out.push('\n');
                }
                for cont in conts {
                    self.indent();
                    let name = match *self.arena.kind(cont) {
                        NodeKind::Function { name, .. } => name,
                        _ => unreachable!(),
                    };
                    // Parser form, so a dumped program reads back in.
                    let _ = write!(self.out, "{}: ", self.arena.str(name));
                    self.function_body(cont);
                    self.out.push('\n');
                }
            }

            // ── Instructions ──
            NodeKind::Let {
                variables,
                instruction,
                is_mutable,
            } => {
                let vars = self.arena.nodes(variables).to_vec();
                if !vars.is_empty() {
                    self.out.push_str(if is_mutable { "var" } else { "let" });
                    for v in vars {
                        self.out.push(' ');
                        if let Some(ty) = self.arena.node(v).ty.as_value() {
                            self.node(ty);
                            self.out.push(' ');
                        }
                        self.node(v);
                    }
                    self.out.push_str(" = ");
                }
                self.node(instruction);
            }
            NodeKind::PrimOp { op, operands } => {
                let _ = write!(self.out, "{}(", op.name());
                self.list(operands, ", ");
                self.out.push(')');
            }
            NodeKind::Call { callee, args } => {
                self.out.push_str("call (");
                self.node(callee);
                self.out.push_str(") (");
                self.list(args, ", ");
                self.out.push(')');
            }
            NodeKind::If {
                yield_types,
                condition,
                if_true,
                if_false,
            } => {
                self.out.push_str("if");
                self.yield_types(yield_types);
                self.out.push('(');
                self.node(condition);
                self.out.push_str(") {\n");
                self.indent += 1;
                self.node(if_true);
                self.indent -= 1;
                if let Some(if_false) = if_false {
                    self.indent();
                    self.out.push_str("} else {\n");
                    self.indent += 1;
                    self.node(if_false);
                    self.indent -= 1;
                }
                self.indent();
                self.out.push('}');
            }
            NodeKind::Loop {
                yield_types,
                params,
                initial_args,
                body,
            } => {
                self.out.push_str("loop");
                self.yield_types(yield_types);
                self.param_list(params, Some(initial_args));
                self.out.push_str(" {\n");
                self.indent += 1;
                self.node(body);
                self.indent -= 1;
                self.indent();
                self.out.push('}');
            }
            NodeKind::Match {
                yield_types,
                inspect,
                literals,
                cases,
                default_case,
            } => {
                self.out.push_str("match");
                self.yield_types(yield_types);
                self.out.push('(');
                self.node(inspect);
                self.out.push_str(") {\n");
                self.indent += 1;
                let literals = self.arena.nodes(literals).to_vec();
                let cases = self.arena.nodes(cases).to_vec();
                for (lit, case) in literals.into_iter().zip(cases) {
                    self.indent();
                    self.out.push_str("case ");
                    self.node(lit);
                    self.out.push_str(": {\n");
                    self.indent += 1;
                    self.node(case);
                    self.indent -= 1;
                    self.indent();
                    self.out.push_str("}\n");
                }
                self.indent();
                self.out.push_str("default: {\n");
                self.indent += 1;
                self.node(default_case);
                self.indent -= 1;
                self.indent();
                self.out.push_str("}\n");
                self.indent -= 1;
                self.indent();
                self.out.push('}');
            }

            // ── Terminators ──
            NodeKind::Return { values } => {
                self.out.push_str("return");
                self.paren_args(values);
            }
            NodeKind::Branch {
                mode,
                condition,
                targets,
                args,
            } => {
                let targets = self.arena.nodes(targets).to_vec();
                match mode {
                    BranchMode::Tailcall => {
                        self.out.push_str("tail_call (");
                        self.node(targets[0]);
                        self.out.push(')');
                    }
                    BranchMode::Jump => {
                        self.out.push_str("jump (");
                        self.node(targets[0]);
                        self.out.push(')');
                    }
                    BranchMode::IfElse => {
                        self.out.push_str("branch (");
                        self.node(condition.expect("conditional branch has a condition"));
                        self.out.push_str(", ");
                        self.node(targets[0]);
                        self.out.push_str(", ");
                        self.node(targets[1]);
                        self.out.push(')');
                    }
                    BranchMode::Switch => {
                        self.out.push_str("br_switch ");
                        self.node(condition.expect("switch branch has an inspectee"));
                        self.out.push_str(" ? (");
                        for (i, &t) in targets.iter().enumerate() {
                            self.node(t);
                            if i + 1 < targets.len() {
                                self.out.push_str(", ");
                            }
                        }
                        self.out.push(')');
                    }
                }
                self.paren_args(args);
            }
            NodeKind::Join {
                join_at,
                desired_mask,
                args,
                is_indirect,
            } => {
                self.out
                    .push_str(if is_indirect { "join (" } else { "joinc (" });
                self.node(join_at);
                self.out.push_str(", ");
                self.node(desired_mask);
                self.out.push(')');
                self.paren_args(args);
            }
            NodeKind::Callc {
                ret_cont,
                callee,
                args,
                is_return_indirect,
            } => {
                self.out
                    .push_str(if is_return_indirect { "callf (" } else { "callc (" });
                self.node(ret_cont);
                self.out.push_str(", ");
                self.node(callee);
                self.out.push(')');
                self.paren_args(args);
            }
            NodeKind::Unreachable => self.out.push_str("unreachable"),
            NodeKind::Merge { kind, args } => {
                self.out.push_str(kind.name());
                self.paren_args(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::build;
    use crate::ir::node::{FnAttributes, IntWidth, Op};

    #[test]
    fn test_print_types() {
        let mut a = IrArena::new(ArenaConfig::checked());
        let i32_t = build::int32_type(&mut a);
        assert_eq!(print_node(&a, i32_t), "i32");
        let p = build::ptr_type(&mut a, crate::ir::node::AddressSpace::GlobalLogical, i32_t);
        assert_eq!(print_node(&a, p), "ptr(l_global, i32)");
        let q = build::qualified(&mut a, true, p);
        assert_eq!(print_node(&a, q), "uniform ptr(l_global, i32)");
        let arr = build::arr_type(&mut a, i32_t, None);
        assert_eq!(print_node(&a, arr), "[i32]");
    }

    #[test]
    fn test_print_let_and_primop() {
        let mut a = IrArena::new(ArenaConfig::checked());
        let one = build::int_literal(&mut a, IntWidth::I32, 1);
        let two = build::int_literal(&mut a, IntWidth::I32, 2);
        let sum = build::prim_op(&mut a, Op::Add, &[one, two]);
        let bound = build::let_instr(&mut a, sum, &["s"]);
        let text = print_node(&a, bound);
        assert!(text.starts_with("let uniform i32 s_"), "got: {}", text);
        assert!(text.ends_with("= add(1, 2)"), "got: {}", text);
    }

    #[test]
    fn test_print_function_snapshot() {
        let mut a = IrArena::new(ArenaConfig::checked());
        let i32_t = build::int32_type(&mut a);
        let f = build::function(&mut a, FnAttributes::plain(), "answer", &[], &[i32_t]);
        let value = build::int_literal(&mut a, IntWidth::I32, 42);
        let ret = build::fn_ret(&mut a, &[value]);
        let body = build::block(&mut a, &[], ret);
        build::set_function_body(&mut a, f, body);
        let root = build::root(&mut a, &[f]);

        insta::assert_snapshot!(print_node(&a, root).trim_end(), @r###"
        fn answer i32() {
           return (42);
        };
        "###);
    }

    #[test]
    fn test_print_ptrs_prefixes_slots() {
        let mut a = IrArena::new(ArenaConfig::checked());
        let t = build::bool_type(&mut a);
        let text = print_node_with(
            &a,
            t,
            PrintOptions { print_ptrs: true },
        );
        assert_eq!(text, format!("{}::bool", t.index()));
    }
}
