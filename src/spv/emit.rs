//! Typed-IR → SPIR-V emission.
//!
//! Walks a typed, lowered program and drives the word builder. Emission
//! assumes all `Tailcall`, `Callc`, and `Join` constructs are gone (the
//! dispatcher lowering removes them); finding one here is a pipeline bug
//! and panics.
//!
//! IDs: every emitted type, constant, global, function, parameter, and
//! instruction result is cached against its IR node, so interned nodes
//! emit exactly once and forward references resolve through pre-reserved
//! IDs. Basic blocks are emitted in dominator-tree order, parents first,
//! which keeps the structured constructs valid.

use fnv::FnvHashMap;
use log::{debug, info};
use spirv_headers as spirv;
use spirv_headers::Op as SpvOp;

use crate::analysis::scope::{self, Scope};
use crate::ir::arena::IrArena;
use crate::ir::build;
use crate::ir::node::{
    AddressSpace, BranchMode, EntryPointKind, IntWidth, MergeKind, Node, NodeKind, Op,
};
use crate::ir::ty;
use crate::spv::builder::{BasicBlockBuilder, FnBuilder, ModuleBuilder, SpvId};

/// Emit a whole program as a SPIR-V word stream.
pub fn emit_spirv(arena: &mut IrArena, root: Node) -> Vec<u32> {
    let mut builder = ModuleBuilder::new();

    builder.capability(spirv::Capability::Shader);
    builder.capability(spirv::Capability::Linkage);
    builder.capability(spirv::Capability::PhysicalStorageBufferAddresses);
    builder.capability(spirv::Capability::SubgroupBallotKHR);
    builder.extension("SPV_KHR_shader_ballot");
    builder.extension("SPV_KHR_physical_storage_buffer");
    builder.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
    let void_t = builder.type_void();

    let mut emitter = Emitter {
        arena,
        builder,
        node_ids: FnvHashMap::default(),
        void_t,
        u32_t: None,
    };

    let declarations = match *emitter.arena.kind(root) {
        NodeKind::Root { declarations } => emitter.arena.nodes(declarations).to_vec(),
        ref other => panic!("emission expects a root, found {}", other.tag_name()),
    };

    // Reserve IDs for every top-level declaration so forward references
    // work in a single pass.
    let mut decl_ids = Vec::with_capacity(declarations.len());
    for &decl in &declarations {
        let id = emitter.builder.fresh_id();
        emitter.node_ids.insert(decl, id);
        decl_ids.push(id);
    }

    for (&decl, &id) in declarations.iter().zip(&decl_ids) {
        match *emitter.arena.kind(decl) {
            NodeKind::GlobalVar {
                name, space, init, ..
            } => {
                let name = emitter.arena.str(name).to_string();
                let init = init.map(|i| emitter.emit_value(i, None));
                let ptr_ty = ty::value_type(emitter.arena, decl);
                let ptr_ty = emitter.emit_type(ptr_ty);
                let sc = storage_class(space);
                emitter.builder.global_variable(id, ptr_ty, sc, init);
                emitter.builder.name(id, &name);
            }
            NodeKind::Function { attrs, name, .. } => {
                let name = emitter.arena.str(name).to_string();
                emitter.emit_function(decl);
                emitter.builder.name(id, &name);
                match attrs.entry_point {
                    EntryPointKind::NotAnEntryPoint => {}
                    EntryPointKind::Compute => {
                        emitter.builder.entry_point(
                            spirv::ExecutionModel::GLCompute,
                            id,
                            &name,
                            &[],
                        );
                        emitter.builder.execution_mode(
                            id,
                            spirv::ExecutionMode::LocalSize,
                            &[64, 1, 1],
                        );
                    }
                    EntryPointKind::Vertex => {
                        emitter
                            .builder
                            .entry_point(spirv::ExecutionModel::Vertex, id, &name, &[]);
                    }
                    EntryPointKind::Fragment => {
                        emitter.builder.entry_point(
                            spirv::ExecutionModel::Fragment,
                            id,
                            &name,
                            &[],
                        );
                        emitter.builder.execution_mode(
                            id,
                            spirv::ExecutionMode::OriginUpperLeft,
                            &[],
                        );
                    }
                }
            }
            NodeKind::Constant { name, value, .. } => {
                let name = emitter.arena.str(name).to_string();
                let value = value.expect("constants have values after inference");
                emitter.emit_value(value, Some(id));
                emitter.builder.name(id, &name);
            }
            ref other => panic!("unhandled declaration kind: {}", other.tag_name()),
        }
    }

    info!("emitted {} declarations", declarations.len());
    emitter.builder.finish()
}

/// Address space → storage class. Physical spaces other than
/// `GlobalPhysical` must have been lowered away.
fn storage_class(space: AddressSpace) -> spirv::StorageClass {
    match space {
        AddressSpace::GlobalLogical => spirv::StorageClass::StorageBuffer,
        AddressSpace::SharedLogical => spirv::StorageClass::CrossWorkgroup,
        AddressSpace::PrivateLogical => spirv::StorageClass::Private,
        AddressSpace::FunctionLogical => spirv::StorageClass::Function,
        AddressSpace::GlobalPhysical => spirv::StorageClass::PhysicalStorageBuffer,
        AddressSpace::Input => spirv::StorageClass::Input,
        AddressSpace::Output => spirv::StorageClass::Output,
        AddressSpace::External => spirv::StorageClass::StorageBuffer,
        AddressSpace::Generic => panic!("generic address space is not implemented"),
        AddressSpace::SharedPhysical
        | AddressSpace::SubgroupPhysical
        | AddressSpace::PrivatePhysical
        | AddressSpace::ProgramCode => {
            panic!("address space should have been lowered before emission")
        }
    }
}

/// Merge-target IDs threaded through block emission; 0 means "no target
/// of this kind in scope".
#[derive(Clone, Copy, Default)]
struct MergeTargets {
    continue_target: SpvId,
    break_target: SpvId,
    join_target: SpvId,
}

// ── Instruction selection ──

#[derive(Clone, Copy, PartialEq, Eq)]
enum OperandKind {
    Signed,
    Unsigned,
    Float,
    Logical,
    Ptr,
}

const OPERAND_KINDS: usize = 5;

#[derive(Clone, Copy)]
enum IselCell {
    Op(SpvOp),
    /// No-op cell: the result is the operand itself.
    Identity,
    /// Boolean conversions have no single instruction; a pass must lower
    /// them first.
    BoolConv,
    Illegal,
}

enum IselEntry {
    Custom,
    /// Opcode chosen by the kind of the first operand.
    FirstOp {
        result: ResultKind,
        table: [IselCell; OPERAND_KINDS],
    },
    /// Opcode chosen by operand kind and result kind (conversions).
    FirstAndResult {
        table: [[IselCell; OPERAND_KINDS]; OPERAND_KINDS],
    },
}

#[derive(Clone, Copy)]
enum ResultKind {
    Same,
    Bool,
}

use IselCell::{BoolConv, Identity, Illegal};

fn cell(op: SpvOp) -> IselCell {
    IselCell::Op(op)
}

#[rustfmt::skip]
fn isel_entry(op: Op) -> IselEntry {
    use IselEntry::{Custom, FirstAndResult, FirstOp};
    use ResultKind::{Bool, Same};
    match op {
        Op::Add => FirstOp { result: Same, table: [cell(SpvOp::IAdd), cell(SpvOp::IAdd), cell(SpvOp::FAdd), Illegal, Illegal] },
        Op::Sub => FirstOp { result: Same, table: [cell(SpvOp::ISub), cell(SpvOp::ISub), cell(SpvOp::FSub), Illegal, Illegal] },
        Op::Mul => FirstOp { result: Same, table: [cell(SpvOp::IMul), cell(SpvOp::IMul), cell(SpvOp::FMul), Illegal, Illegal] },
        Op::Div => FirstOp { result: Same, table: [cell(SpvOp::SDiv), cell(SpvOp::UDiv), cell(SpvOp::FDiv), Illegal, Illegal] },
        Op::Mod => FirstOp { result: Same, table: [cell(SpvOp::SMod), cell(SpvOp::UMod), cell(SpvOp::FMod), Illegal, Illegal] },
        Op::Neg => FirstOp { result: Same, table: [cell(SpvOp::SNegate), cell(SpvOp::SNegate), cell(SpvOp::FNegate), Illegal, Illegal] },

        Op::Eq  => FirstOp { result: Bool, table: [cell(SpvOp::IEqual), cell(SpvOp::IEqual), cell(SpvOp::FOrdEqual), cell(SpvOp::LogicalEqual), Illegal] },
        Op::Neq => FirstOp { result: Bool, table: [cell(SpvOp::INotEqual), cell(SpvOp::INotEqual), cell(SpvOp::FOrdNotEqual), cell(SpvOp::LogicalNotEqual), Illegal] },
        Op::Lt  => FirstOp { result: Bool, table: [cell(SpvOp::SLessThan), cell(SpvOp::ULessThan), cell(SpvOp::FOrdLessThan), Illegal, Illegal] },
        Op::Lte => FirstOp { result: Bool, table: [cell(SpvOp::SLessThanEqual), cell(SpvOp::ULessThanEqual), cell(SpvOp::FOrdLessThanEqual), Illegal, Illegal] },
        Op::Gt  => FirstOp { result: Bool, table: [cell(SpvOp::SGreaterThan), cell(SpvOp::UGreaterThan), cell(SpvOp::FOrdGreaterThan), Illegal, Illegal] },
        Op::Gte => FirstOp { result: Bool, table: [cell(SpvOp::SGreaterThanEqual), cell(SpvOp::UGreaterThanEqual), cell(SpvOp::FOrdGreaterThanEqual), Illegal, Illegal] },

        Op::Not => FirstOp { result: Same, table: [cell(SpvOp::Not), cell(SpvOp::Not), Illegal, cell(SpvOp::LogicalNot), Illegal] },
        Op::And => FirstOp { result: Same, table: [cell(SpvOp::BitwiseAnd), cell(SpvOp::BitwiseAnd), Illegal, cell(SpvOp::LogicalAnd), Illegal] },
        Op::Or  => FirstOp { result: Same, table: [cell(SpvOp::BitwiseOr), cell(SpvOp::BitwiseOr), Illegal, cell(SpvOp::LogicalOr), Illegal] },
        Op::Xor => FirstOp { result: Same, table: [cell(SpvOp::BitwiseXor), cell(SpvOp::BitwiseXor), Illegal, cell(SpvOp::LogicalNotEqual), Illegal] },

        // [value kind][target kind]
        Op::Convert => FirstAndResult { table: [
            [cell(SpvOp::SConvert),    cell(SpvOp::UConvert),    cell(SpvOp::ConvertSToF), BoolConv, Illegal],
            [cell(SpvOp::SConvert),    cell(SpvOp::UConvert),    cell(SpvOp::ConvertUToF), BoolConv, Illegal],
            [cell(SpvOp::ConvertFToS), cell(SpvOp::ConvertFToU), cell(SpvOp::FConvert),    Illegal,  Illegal],
            [BoolConv,                 BoolConv,                 Illegal,                  Identity, Illegal],
            [Illegal,                  Illegal,                  Illegal,                  Illegal,  Illegal],
        ] },
        Op::Reinterpret => FirstAndResult { table: [
            [Identity,                  cell(SpvOp::Bitcast),       cell(SpvOp::Bitcast), Illegal,  cell(SpvOp::ConvertUToPtr)],
            [cell(SpvOp::Bitcast),      Identity,                   cell(SpvOp::Bitcast), Illegal,  cell(SpvOp::ConvertUToPtr)],
            [cell(SpvOp::Bitcast),      cell(SpvOp::Bitcast),       Identity,             Illegal,  Illegal],
            [Illegal,                   Illegal,                    Illegal,              Identity, Illegal],
            [cell(SpvOp::ConvertPtrToU), cell(SpvOp::ConvertPtrToU), Illegal,             Illegal,  Identity],
        ] },

        Op::Load
        | Op::Store
        | Op::Alloca
        | Op::Lea
        | Op::Select
        | Op::SubgroupActiveMask => Custom,
    }
}

struct Emitter<'a> {
    arena: &'a mut IrArena,
    builder: ModuleBuilder,
    node_ids: FnvHashMap<Node, SpvId>,
    void_t: SpvId,
    /// Unsigned 32-bit scalar, used only as the mask vector component.
    u32_t: Option<SpvId>,
}

impl Emitter<'_> {
    fn classify_operand(&self, operand: Node) -> OperandKind {
        let ty = if self.arena.kind(operand).is_type() {
            operand
        } else {
            ty::value_type(self.arena, operand)
        };
        match *self.arena.kind(ty::without_qualifier(self.arena, ty)) {
            NodeKind::Int { .. } => OperandKind::Signed,
            NodeKind::Bool => OperandKind::Logical,
            NodeKind::Float => OperandKind::Float,
            NodeKind::PtrType { .. } => OperandKind::Ptr,
            NodeKind::Mask => OperandKind::Unsigned,
            ref other => panic!("cannot classify a {} operand", other.tag_name()),
        }
    }

    fn register_result(&mut self, variable: Node, id: SpvId) {
        if let NodeKind::Var { name, .. } = *self.arena.kind(variable) {
            let name = self.arena.str(name).to_string();
            self.builder.name(id, &name);
        }
        self.node_ids.insert(variable, id);
    }

    // ── Types ──

    fn u32_type(&mut self) -> SpvId {
        if let Some(found) = self.u32_t {
            return found;
        }
        let id = self.builder.type_int(32, 0);
        self.u32_t = Some(id);
        id
    }

    fn emit_type(&mut self, node: Node) -> SpvId {
        if let Some(&found) = self.node_ids.get(&node) {
            return found;
        }
        let new = match *self.arena.kind(node) {
            NodeKind::Int { width } => self.builder.type_int(width.bits(), 1),
            NodeKind::Bool => self.builder.type_bool(),
            NodeKind::Float => self.builder.type_float(32),
            NodeKind::Mask => {
                let component = self.u32_type();
                self.builder.type_vector(component, 4)
            }
            NodeKind::PtrType { space, pointee } => {
                let pointee = self.emit_type(pointee);
                self.builder.type_pointer(storage_class(space), pointee)
            }
            NodeKind::Record { members } => {
                let members = self.arena.nodes(members).to_vec();
                let members: Vec<SpvId> = members.iter().map(|&m| self.emit_type(m)).collect();
                self.builder.type_struct(&members)
            }
            NodeKind::FnType {
                params, returns, ..
            } => {
                let params = self.arena.nodes(params).to_vec();
                let params: Vec<SpvId> = params.iter().map(|&p| self.emit_type(p)).collect();
                let returns = self.arena.nodes(returns).to_vec();
                let codom = self.nodes_to_codom(&returns);
                self.builder.type_function(codom, &params)
            }
            NodeKind::Qualified { ty, .. } => {
                // SPIR-V does not care about uniformity qualifiers.
                self.emit_type(ty)
            }
            NodeKind::ArrType { elem, size } => {
                let elem = self.emit_type(elem);
                match size {
                    Some(size) => {
                        let size = self.emit_value(size, None);
                        self.builder.type_array(elem, size)
                    }
                    None => self.builder.type_runtime_array(elem),
                }
            }
            ref other => panic!("cannot emit a {} as a type", other.tag_name()),
        };
        self.node_ids.insert(node, new);
        new
    }

    /// The SPIR-V return type of a function: void, the single type, or a
    /// synthesized record.
    fn nodes_to_codom(&mut self, return_types: &[Node]) -> SpvId {
        match return_types.len() {
            0 => self.void_t,
            1 => self.emit_type(return_types[0]),
            _ => {
                let record = build::record_type(self.arena, return_types);
                self.emit_type(record)
            }
        }
    }

    // ── Values ──

    fn emit_value(&mut self, node: Node, use_id: Option<SpvId>) -> SpvId {
        if use_id.is_none() {
            if let Some(&existing) = self.node_ids.get(&node) {
                return existing;
            }
        }
        let new = match use_id {
            Some(id) => id,
            None => self.builder.fresh_id(),
        };
        self.node_ids.insert(node, new);

        match *self.arena.kind(node) {
            NodeKind::IntLit { width, value } => {
                let value_ty = ty::value_type(self.arena, node);
                let ty = self.emit_type(value_ty);
                // 64-bit literals take two words, low word first.
                if width == IntWidth::I64 {
                    let bits = value as u64;
                    let words = [bits as u32, (bits >> 32) as u32];
                    self.builder.constant(new, ty, &words);
                } else {
                    self.builder.constant(new, ty, &[value as u32]);
                }
            }
            NodeKind::True => {
                let bool_ty = build::bool_type(self.arena);
                let ty = self.emit_type(bool_ty);
                self.builder.bool_constant(new, ty, true);
            }
            NodeKind::False => {
                let bool_ty = build::bool_type(self.arena);
                let ty = self.emit_type(bool_ty);
                self.builder.bool_constant(new, ty, false);
            }
            NodeKind::Constant { value, .. } => {
                let value = value.expect("constants have values after inference");
                self.emit_value(value, Some(new));
            }
            NodeKind::Var { .. } => {
                panic!("variable was never given a result; it should have been registered")
            }
            NodeKind::FnAddr { .. } => {
                panic!("function addresses must be lowered to tokens before emission")
            }
            ref other => panic!("cannot emit a {} as a value", other.tag_name()),
        }
        new
    }

    // ── Instructions ──

    fn emit_primop(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        instruction: Node,
        variables: &[Node],
    ) {
        let (op, operands) = match *self.arena.kind(instruction) {
            NodeKind::PrimOp { op, operands } => (op, self.arena.nodes(operands).to_vec()),
            _ => unreachable!(),
        };

        match isel_entry(op) {
            IselEntry::FirstOp { result, table } => {
                let ids: Vec<SpvId> = operands
                    .iter()
                    .map(|&o| {
                        if self.arena.kind(o).is_type() {
                            self.emit_type(o)
                        } else {
                            self.emit_value(o, None)
                        }
                    })
                    .collect();
                let kind = self.classify_operand(operands[0]);
                let opcode = self.expect_cell(op, table[kind as usize], ids[0], variables);
                let Some(opcode) = opcode else { return };

                let result_ty = match result {
                    ResultKind::Same => {
                        ty::value_type_unqualified(self.arena, operands[0])
                    }
                    ResultKind::Bool => build::bool_type(self.arena),
                };
                let result_ty = self.emit_type(result_ty);
                let result_id = self.builder.fresh_id();
                match ids.len() {
                    1 => bb.unop(opcode, result_ty, result_id, ids[0]),
                    2 => bb.binop(opcode, result_ty, result_id, ids[0], ids[1]),
                    n => panic!("no instruction selection for {} operands", n),
                }
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, result_id);
                }
            }
            IselEntry::FirstAndResult { table } => {
                let target = operands[0];
                let value = operands[1];
                let value_id = self.emit_value(value, None);
                let value_kind = self.classify_operand(value);
                let target_kind = self.classify_operand(target);
                let opcode = self.expect_cell(
                    op,
                    table[value_kind as usize][target_kind as usize],
                    value_id,
                    variables,
                );
                let Some(opcode) = opcode else { return };
                let result_ty = self.emit_type(target);
                let result_id = self.builder.fresh_id();
                bb.unop(opcode, result_ty, result_id, value_id);
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, result_id);
                }
            }
            IselEntry::Custom => self.emit_custom_primop(fnb, bb, op, &operands, variables),
        }
    }

    /// Resolve a table cell. `Identity` registers the operand itself and
    /// yields no opcode; the sentinel cells abort with the reason.
    fn expect_cell(
        &mut self,
        op: Op,
        cell: IselCell,
        first_operand: SpvId,
        variables: &[Node],
    ) -> Option<SpvOp> {
        match cell {
            IselCell::Op(opcode) => Some(opcode),
            IselCell::Identity => {
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, first_operand);
                }
                None
            }
            IselCell::BoolConv => panic!(
                "{} between booleans and other types requires a lowering pass first",
                op.name()
            ),
            IselCell::Illegal => panic!("no instruction selection for this use of {}", op.name()),
        }
    }

    fn emit_custom_primop(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        op: Op,
        operands: &[Node],
        variables: &[Node],
    ) {
        match op {
            Op::Load => {
                let ptr_ty = ty::value_type(self.arena, operands[0]);
                let (_, pointee) =
                    ty::pointee(self.arena, ptr_ty).expect("load takes a pointer");
                let elem_ty = self.emit_type(pointee);
                let ptr = self.emit_value(operands[0], None);
                let result = self.builder.fresh_id();
                bb.load(elem_ty, result, ptr);
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, result);
                }
            }
            Op::Store => {
                let ptr = self.emit_value(operands[0], None);
                let value = self.emit_value(operands[1], None);
                bb.store(ptr, value);
            }
            Op::Alloca => {
                let elem = operands[0];
                let ptr_node =
                    build::ptr_type(self.arena, AddressSpace::FunctionLogical, elem);
                let ptr_ty = self.emit_type(ptr_node);
                let result = self.builder.fresh_id();
                fnb.local_variable(result, ptr_ty);
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, result);
                }
            }
            Op::Lea => {
                let base = self.emit_value(operands[0], None);
                let offset = operands[1];
                let indices: Vec<SpvId> = operands[2..]
                    .iter()
                    .map(|&i| self.emit_value(i, None))
                    .collect();

                let result_ty = match self.arena.node(
                    *variables
                        .first()
                        .expect("lea results are always bound"),
                ).ty.as_value() {
                    Some(t) => t,
                    None => panic!("lea result variable is untyped"),
                };
                let result_ty = self.emit_type(result_ty);
                let result = self.builder.fresh_id();

                if matches!(self.arena.kind(offset), NodeKind::Nothing) {
                    bb.access_chain(result_ty, result, base, &indices);
                } else {
                    let element = self.emit_value(offset, None);
                    bb.ptr_access_chain(result_ty, result, base, element, &indices);
                }
                self.register_result(variables[0], result);
            }
            Op::Select => {
                let cond = self.emit_value(operands[0], None);
                let on_true = self.emit_value(operands[1], None);
                let on_false = self.emit_value(operands[2], None);
                let result_ty = ty::value_type_unqualified(self.arena, operands[1]);
                let result_ty = self.emit_type(result_ty);
                let result = self.builder.fresh_id();
                bb.select(result_ty, result, cond, on_true, on_false);
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, result);
                }
            }
            Op::SubgroupActiveMask => {
                let mask_node = build::mask_type(self.arena);
                let mask_ty = self.emit_type(mask_node);
                let true_node = build::true_lit(self.arena);
                let predicate = self.emit_value(true_node, None);
                let result = self.builder.fresh_id();
                bb.subgroup_ballot(mask_ty, result, predicate);
                if let Some(&variable) = variables.first() {
                    self.register_result(variable, result);
                }
            }
            _ => unreachable!("custom path for a table op"),
        }
    }

    fn emit_call(
        &mut self,
        bb: &mut BasicBlockBuilder,
        callee: Node,
        args: &[Node],
        variables: &[Node],
    ) {
        let callee_ty = ty::value_type(self.arena, callee);
        let (_, returns) = ty::callee_signature(self.arena, callee_ty)
            .expect("call callee is function-typed");
        let returns = self.arena.nodes(returns).to_vec();
        let return_type = self.nodes_to_codom(&returns);
        let callee_id = self.emit_value(callee, None);
        let arg_ids: Vec<SpvId> = args.iter().map(|&a| self.emit_value(a, None)).collect();
        let result = self.builder.fresh_id();
        bb.call(return_type, result, callee_id, &arg_ids);

        match variables.len() {
            0 => {}
            1 => self.register_result(variables[0], result),
            _ => {
                for (i, &variable) in variables.iter().enumerate() {
                    let var_ty = ty::value_type(self.arena, variable);
                    let var_ty = self.emit_type(var_ty);
                    let component = self.builder.fresh_id();
                    bb.composite_extract(var_ty, component, result, i as u32);
                    self.register_result(variable, component);
                }
            }
        }
    }

    fn emit_if(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        merge_targets: MergeTargets,
        condition: Node,
        if_true: Node,
        if_false: Option<Node>,
    ) {
        let next_id = self.builder.fresh_id();
        let true_id = self.builder.fresh_id();
        let false_id = match if_false {
            Some(_) => self.builder.fresh_id(),
            None => next_id,
        };

        bb.selection_merge(next_id);
        let condition = self.emit_value(condition, None);
        let finished = std::mem::replace(bb, BasicBlockBuilder::new(next_id));
        fnb.consume(
            finished,
            BasicBlockBuilder::branch_conditional(condition, true_id, false_id),
        );

        let mut branch_targets = merge_targets;
        branch_targets.join_target = next_id;

        let mut true_bb = BasicBlockBuilder::new(true_id);
        self.emit_block(fnb, &mut true_bb, branch_targets, if_true);
        if let Some(if_false) = if_false {
            let mut false_bb = BasicBlockBuilder::new(false_id);
            self.emit_block(fnb, &mut false_bb, branch_targets, if_false);
        }
    }

    fn emit_match(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        merge_targets: MergeTargets,
        inspect: Node,
        literals: &[Node],
        cases: &[Node],
        default_case: Node,
    ) {
        let next_id = self.builder.fresh_id();
        let default_id = self.builder.fresh_id();

        // Literal constants double as the switch's literal operands, so
        // they get pre-assigned IDs.
        let mut literals_and_labels = Vec::with_capacity(literals.len() * 2);
        let mut case_ids = Vec::with_capacity(cases.len());
        for &literal in literals {
            let value = match *self.arena.kind(literal) {
                NodeKind::IntLit { value, .. } => value as u32,
                ref other => panic!("switch literals are integers, found {}", other.tag_name()),
            };
            let case_id = self.builder.fresh_id();
            self.emit_value(literal, None);
            literals_and_labels.push(value);
            literals_and_labels.push(case_id);
            case_ids.push(case_id);
        }

        bb.selection_merge(next_id);
        let inspectee = self.emit_value(inspect, None);
        let finished = std::mem::replace(bb, BasicBlockBuilder::new(next_id));
        fnb.consume(
            finished,
            BasicBlockBuilder::switch(inspectee, default_id, &literals_and_labels),
        );

        let mut branch_targets = merge_targets;
        branch_targets.join_target = next_id;

        for (&case, &case_id) in cases.iter().zip(&case_ids) {
            let mut case_bb = BasicBlockBuilder::new(case_id);
            self.emit_block(fnb, &mut case_bb, branch_targets, case);
        }
        let mut default_bb = BasicBlockBuilder::new(default_id);
        self.emit_block(fnb, &mut default_bb, branch_targets, default_case);
    }

    fn emit_loop(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        merge_targets: MergeTargets,
        body: Node,
    ) {
        let header_id = self.builder.fresh_id();
        let body_id = self.builder.fresh_id();
        let continue_id = self.builder.fresh_id();
        let next_id = self.builder.fresh_id();

        // The current block jumps to the header (it cannot be the header
        // itself).
        let finished = std::mem::replace(bb, BasicBlockBuilder::new(next_id));
        fnb.consume(finished, BasicBlockBuilder::branch(header_id));

        // The header carries the loop-merge annotation.
        let mut header = BasicBlockBuilder::new(header_id);
        header.loop_merge(next_id, continue_id);
        fnb.consume(header, BasicBlockBuilder::branch(body_id));
        self.builder.name(header_id, "loop_header");

        let mut body_targets = merge_targets;
        body_targets.continue_target = continue_id;
        body_targets.break_target = next_id;
        let mut body_bb = BasicBlockBuilder::new(body_id);
        self.emit_block(fnb, &mut body_bb, body_targets, body);
        self.builder.name(body_id, "loop_body");

        // The continue block jumps back into the header.
        let continue_bb = BasicBlockBuilder::new(continue_id);
        fnb.consume(continue_bb, BasicBlockBuilder::branch(header_id));
        self.builder.name(continue_id, "loop_continue");

        self.builder.name(next_id, "loop_next");
    }

    fn emit_instruction(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        merge_targets: MergeTargets,
        instruction: Node,
    ) {
        let mut variables: Vec<Node> = Vec::new();
        let mut instruction = instruction;
        if let NodeKind::Let {
            variables: bound,
            instruction: inner,
            ..
        } = *self.arena.kind(instruction)
        {
            variables = self.arena.nodes(bound).to_vec();
            instruction = inner;
        }

        match *self.arena.kind(instruction) {
            NodeKind::PrimOp { .. } => self.emit_primop(fnb, bb, instruction, &variables),
            NodeKind::Call { callee, args } => {
                let args = self.arena.nodes(args).to_vec();
                self.emit_call(bb, callee, &args, &variables)
            }
            NodeKind::If {
                yield_types,
                condition,
                if_true,
                if_false,
            } => {
                assert!(
                    self.arena.nodes(yield_types).is_empty(),
                    "yielding constructs need phi support; lower them first"
                );
                self.emit_if(fnb, bb, merge_targets, condition, if_true, if_false)
            }
            NodeKind::Match {
                yield_types,
                inspect,
                literals,
                cases,
                default_case,
            } => {
                assert!(
                    self.arena.nodes(yield_types).is_empty(),
                    "yielding constructs need phi support; lower them first"
                );
                let literals = self.arena.nodes(literals).to_vec();
                let cases = self.arena.nodes(cases).to_vec();
                self.emit_match(
                    fnb,
                    bb,
                    merge_targets,
                    inspect,
                    &literals,
                    &cases,
                    default_case,
                )
            }
            NodeKind::Loop {
                yield_types,
                params,
                body,
                ..
            } => {
                assert!(
                    self.arena.nodes(yield_types).is_empty()
                        && self.arena.nodes(params).is_empty(),
                    "loop values need phi support; lower them first"
                );
                self.emit_loop(fnb, bb, merge_targets, body)
            }
            ref other => panic!("unrecognised instruction: {}", other.tag_name()),
        }
    }

    fn find_reserved_id(&self, node: Node) -> SpvId {
        *self
            .node_ids
            .get(&node)
            .unwrap_or_else(|| panic!("no reserved id for {}", self.arena.kind(node).tag_name()))
    }

    fn emit_terminator(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        merge_targets: MergeTargets,
        terminator: Node,
    ) {
        let instruction = match *self.arena.kind(terminator) {
            NodeKind::Return { values } => {
                let values = self.arena.nodes(values).to_vec();
                match values.len() {
                    0 => BasicBlockBuilder::return_void(),
                    1 => {
                        let value = self.emit_value(values[0], None);
                        BasicBlockBuilder::return_value(value)
                    }
                    _ => {
                        let ids: Vec<SpvId> =
                            values.iter().map(|&v| self.emit_value(v, None)).collect();
                        let composite = self.builder.fresh_id();
                        bb.composite_construct(fnb.return_type_id(), composite, &ids);
                        BasicBlockBuilder::return_value(composite)
                    }
                }
            }
            NodeKind::Branch {
                mode,
                condition,
                targets,
                args,
            } => {
                assert!(
                    self.arena.nodes(args).is_empty(),
                    "branch arguments need phi support; lower them first"
                );
                let targets = self.arena.nodes(targets).to_vec();
                match mode {
                    BranchMode::Jump => {
                        BasicBlockBuilder::branch(self.find_reserved_id(targets[0]))
                    }
                    BranchMode::IfElse => {
                        let condition = self
                            .emit_value(condition.expect("conditional branch has a condition"), None);
                        BasicBlockBuilder::branch_conditional(
                            condition,
                            self.find_reserved_id(targets[0]),
                            self.find_reserved_id(targets[1]),
                        )
                    }
                    BranchMode::Switch => panic!("switch branches are not supported yet"),
                    BranchMode::Tailcall => {
                        panic!("tail calls must be lowered before emission")
                    }
                }
            }
            NodeKind::Join { .. } => panic!("joins must be lowered before emission"),
            NodeKind::Callc { .. } => {
                panic!("calls with explicit continuations must be lowered before emission")
            }
            NodeKind::Merge { kind, args } => {
                assert!(
                    self.arena.nodes(args).is_empty(),
                    "merge arguments need phi support; lower them first"
                );
                let target = match kind {
                    MergeKind::Selection => merge_targets.join_target,
                    MergeKind::Continue => merge_targets.continue_target,
                    MergeKind::Break => merge_targets.break_target,
                };
                assert!(target != 0, "{} outside of a matching construct", kind.name());
                BasicBlockBuilder::branch(target)
            }
            NodeKind::Unreachable => BasicBlockBuilder::unreachable(),
            ref other => panic!("cannot emit terminator: {}", other.tag_name()),
        };

        let finished = std::mem::replace(bb, BasicBlockBuilder::new(0));
        fnb.consume(finished, instruction);
    }

    fn emit_block(
        &mut self,
        fnb: &mut FnBuilder,
        bb: &mut BasicBlockBuilder,
        merge_targets: MergeTargets,
        block: Node,
    ) {
        let (instructions, terminator) = match *self.arena.kind(block) {
            NodeKind::Block {
                instructions,
                terminator,
            } => (instructions, terminator),
            ref other => panic!("emission expects plain blocks, found {}", other.tag_name()),
        };
        for &instruction in &self.arena.nodes(instructions).to_vec() {
            self.emit_instruction(fnb, bb, merge_targets, instruction);
        }
        self.emit_terminator(fnb, bb, merge_targets, terminator);
    }

    /// One basic block of the dominator tree, then its children.
    fn emit_scope_block(&mut self, fnb: &mut FnBuilder, scope: &Scope, index: usize, is_entry: bool) {
        let node = scope.nodes[index].node;
        let bb_id = if is_entry {
            self.builder.fresh_id()
        } else {
            self.find_reserved_id(node)
        };
        let (name, block) = match *self.arena.kind(node) {
            NodeKind::Function { name, block, .. } => (
                self.arena.str(name).to_string(),
                block.expect("reachable blocks have bodies"),
            ),
            _ => unreachable!(),
        };
        self.builder.name(bb_id, &name);

        let mut bb = BasicBlockBuilder::new(bb_id);
        self.emit_block(fnb, &mut bb, MergeTargets::default(), block);

        for &child in &scope.nodes[index].dominates.clone() {
            self.emit_scope_block(fnb, scope, child, false);
        }
    }

    fn emit_function(&mut self, node: Node) {
        let fn_id = self.find_reserved_id(node);
        let fn_type_node = ty::value_type_unqualified(self.arena, node);
        let fn_type = self.emit_type(fn_type_node);
        let (params, returns) = match *self.arena.kind(node) {
            NodeKind::Function {
                params, returns, ..
            } => (
                self.arena.nodes(params).to_vec(),
                self.arena.nodes(returns).to_vec(),
            ),
            ref other => panic!("not a function: {}", other.tag_name()),
        };
        let codom = self.nodes_to_codom(&returns);
        let mut fnb = self.builder.begin_fn(fn_id, fn_type, codom);

        for &param in &params {
            let param_ty = ty::value_type(self.arena, param);
            let param_ty = self.emit_type(param_ty);
            let param_id = self.builder.fresh_id();
            fnb.parameter(param_id, param_ty);
            self.node_ids.insert(param, param_id);
        }

        let scope = scope::build_scope(self.arena, node);
        debug!("function has {} basic blocks", scope.size());
        // Continuations get their labels up front so forward branches
        // resolve.
        for cf_node in scope.nodes.iter().skip(1) {
            if !self.node_ids.contains_key(&cf_node.node) {
                let id = self.builder.fresh_id();
                self.node_ids.insert(cf_node.node, id);
            }
        }

        self.emit_scope_block(&mut fnb, &scope, 0, true);
        self.builder.define_function(fnb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::node::FnAttributes;

    fn opcodes(words: &[u32]) -> Vec<(u32, Vec<u32>)> {
        let mut out = Vec::new();
        let mut i = 5;
        while i < words.len() {
            let word_count = (words[i] >> 16) as usize;
            assert!(word_count > 0, "zero-length instruction");
            out.push((words[i] & 0xffff, words[i + 1..i + word_count].to_vec()));
            i += word_count;
        }
        out
    }

    fn has_op(ops: &[(u32, Vec<u32>)], op: SpvOp) -> bool {
        ops.iter().any(|(o, _)| *o == op as u32)
    }

    #[test]
    fn test_emit_trivial_return() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let i32_t = build::int32_type(&mut arena);
        let f = build::function(&mut arena, FnAttributes::plain(), "main", &[], &[i32_t]);
        let forty_two = build::int_literal(&mut arena, IntWidth::I32, 42);
        let ret = build::fn_ret(&mut arena, &[forty_two]);
        let body = build::block(&mut arena, &[], ret);
        build::set_function_body(&mut arena, f, body);
        let root = build::root(&mut arena, &[f]);

        let words = emit_spirv(&mut arena, root);
        assert_eq!(words[0], spirv::MAGIC_NUMBER);
        let ops = opcodes(&words);

        assert!(ops
            .iter()
            .any(|(o, rest)| *o == SpvOp::TypeInt as u32 && rest[1..] == [32, 1]));
        assert!(ops
            .iter()
            .any(|(o, rest)| *o == SpvOp::Constant as u32 && rest[2] == 42));
        assert!(has_op(&ops, SpvOp::ReturnValue));
        assert!(has_op(&ops, SpvOp::FunctionEnd));
    }

    #[test]
    fn test_emit_types_once() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let i32_t = build::int32_type(&mut arena);
        let f = build::function(&mut arena, FnAttributes::plain(), "f", &[], &[i32_t]);
        let one = build::int_literal(&mut arena, IntWidth::I32, 1);
        let two = build::int_literal(&mut arena, IntWidth::I32, 2);
        let sum = build::prim_op(&mut arena, Op::Add, &[one, two]);
        let bound = build::let_instr(&mut arena, sum, &["s"]);
        let vars = match *arena.kind(bound) {
            NodeKind::Let { variables, .. } => arena.nodes(variables).to_vec(),
            _ => unreachable!(),
        };
        let ret = build::fn_ret(&mut arena, &[vars[0]]);
        let body = build::block(&mut arena, &[bound], ret);
        build::set_function_body(&mut arena, f, body);
        let root = build::root(&mut arena, &[f]);

        let words = emit_spirv(&mut arena, root);
        let ops = opcodes(&words);
        let int_types = ops
            .iter()
            .filter(|(o, rest)| *o == SpvOp::TypeInt as u32 && rest[1..] == [32, 1])
            .count();
        assert_eq!(int_types, 1, "interned types emit exactly once");
        assert!(has_op(&ops, SpvOp::IAdd));
    }

    #[test]
    fn test_emit_if_without_else() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let bool_t = build::bool_type(&mut arena);
        let q = build::qualified(&mut arena, false, bool_t);
        let c = build::var(&mut arena, Some(q), "c");
        let f = build::function(&mut arena, FnAttributes::plain(), "g", &[c], &[]);

        let one = build::int_literal(&mut arena, IntWidth::I32, 1);
        let zero = build::int_literal(&mut arena, IntWidth::I32, 0);
        let sum = build::prim_op(&mut arena, Op::Add, &[one, zero]);
        let bound = build::let_instr(&mut arena, sum, &["x"]);
        let merge = build::merge_construct(&mut arena, MergeKind::Selection, &[]);
        let true_block = build::block(&mut arena, &[bound], merge);
        let if_instr = build::if_instr(&mut arena, &[], c, true_block, None);

        let ret = build::fn_ret(&mut arena, &[]);
        let body = build::block(&mut arena, &[if_instr], ret);
        build::set_function_body(&mut arena, f, body);
        let root = build::root(&mut arena, &[f]);

        let words = emit_spirv(&mut arena, root);
        let ops = opcodes(&words);

        assert!(has_op(&ops, SpvOp::SelectionMerge));
        assert!(has_op(&ops, SpvOp::BranchConditional));

        // The true block branches to the same label the merge names.
        let merge_label = ops
            .iter()
            .find(|(o, _)| *o == SpvOp::SelectionMerge as u32)
            .map(|(_, rest)| rest[0])
            .unwrap();
        assert!(ops
            .iter()
            .any(|(o, rest)| *o == SpvOp::Branch as u32 && rest == &vec![merge_label]));
    }

    #[test]
    fn test_emit_loop_with_break() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let f = build::function(&mut arena, FnAttributes::plain(), "h", &[], &[]);
        let brk = build::merge_construct(&mut arena, MergeKind::Break, &[]);
        let loop_body = build::block(&mut arena, &[], brk);
        let the_loop = build::loop_instr(&mut arena, &[], &[], &[], loop_body);
        let ret = build::fn_ret(&mut arena, &[]);
        let body = build::block(&mut arena, &[the_loop], ret);
        build::set_function_body(&mut arena, f, body);
        let root = build::root(&mut arena, &[f]);

        let words = emit_spirv(&mut arena, root);
        let ops = opcodes(&words);

        let (merge_target, continue_target) = ops
            .iter()
            .find(|(o, _)| *o == SpvOp::LoopMerge as u32)
            .map(|(_, rest)| (rest[0], rest[1]))
            .unwrap();
        // body → next (the break), continue → header
        assert!(ops
            .iter()
            .any(|(o, rest)| *o == SpvOp::Branch as u32 && rest == &vec![merge_target]));
        assert!(ops
            .iter()
            .any(|(o, rest)| *o == SpvOp::Label as u32 && rest == &vec![continue_target]));
    }

    #[test]
    #[should_panic(expected = "lowered before emission")]
    fn test_emit_rejects_unlowered_tailcall() {
        let mut arena = IrArena::new(ArenaConfig::checked());
        let k = build::function(&mut arena, FnAttributes::plain(), "k", &[], &[]);
        let k_ret = build::fn_ret(&mut arena, &[]);
        let k_body = build::block(&mut arena, &[], k_ret);
        build::set_function_body(&mut arena, k, k_body);

        let f = build::function(&mut arena, FnAttributes::plain(), "f", &[], &[]);
        let tc = build::tailcall(&mut arena, k, &[]);
        let f_body = build::block(&mut arena, &[], tc);
        build::set_function_body(&mut arena, f, f_body);
        let root = build::root(&mut arena, &[f, k]);

        emit_spirv(&mut arena, root);
    }
}
