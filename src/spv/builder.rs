//! Word-level SPIR-V module builder.
//!
//! A thin API over the binary form: it allocates result IDs, buffers
//! instructions per logical section, and assembles the final word stream
//! (5-word header, then the sections in specification order). It knows
//! nothing about the IR; the emitter drives it.

use spirv_headers as spirv;
use spirv_headers::Op;

pub type SpvId = spirv::Word;

const GENERATOR_MAGIC: u32 = 0;

/// One instruction under construction. `word 0` of the encoding is
/// `(word_count << 16) | opcode`.
pub struct Instruction {
    op: Op,
    type_id: Option<SpvId>,
    result_id: Option<SpvId>,
    operands: Vec<u32>,
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Instruction {
            op,
            type_id: None,
            result_id: None,
            operands: Vec::new(),
        }
    }

    pub fn set_type(mut self, type_id: SpvId) -> Self {
        self.type_id = Some(type_id);
        self
    }

    pub fn set_result(mut self, result_id: SpvId) -> Self {
        self.result_id = Some(result_id);
        self
    }

    pub fn operand(mut self, word: u32) -> Self {
        self.operands.push(word);
        self
    }

    pub fn operands(mut self, words: &[u32]) -> Self {
        self.operands.extend_from_slice(words);
        self
    }

    /// A string literal: UTF-8 bytes, NUL-terminated, packed little-endian
    /// into words.
    pub fn string(mut self, text: &str) -> Self {
        let bytes = text.as_bytes();
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.operands.push(u32::from_le_bytes(word));
        }
        if bytes.len() % 4 == 0 {
            self.operands.push(0);
        }
        self
    }

    fn write(&self, out: &mut Vec<u32>) {
        let word_count = 1
            + self.type_id.is_some() as u32
            + self.result_id.is_some() as u32
            + self.operands.len() as u32;
        out.push((word_count << 16) | self.op as u32);
        if let Some(type_id) = self.type_id {
            out.push(type_id);
        }
        if let Some(result_id) = self.result_id {
            out.push(result_id);
        }
        out.extend_from_slice(&self.operands);
    }
}

/// A finished basic block: label, body, one terminator.
struct BasicBlock {
    label: SpvId,
    body: Vec<Instruction>,
    terminator: Instruction,
}

/// A basic block under construction.
pub struct BasicBlockBuilder {
    pub label: SpvId,
    body: Vec<Instruction>,
}

impl BasicBlockBuilder {
    pub fn new(label: SpvId) -> Self {
        BasicBlockBuilder {
            label,
            body: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.body.push(instruction);
    }

    pub fn unop(&mut self, op: Op, result_type: SpvId, result: SpvId, x: SpvId) {
        self.push(
            Instruction::new(op)
                .set_type(result_type)
                .set_result(result)
                .operand(x),
        );
    }

    pub fn binop(&mut self, op: Op, result_type: SpvId, result: SpvId, x: SpvId, y: SpvId) {
        self.push(
            Instruction::new(op)
                .set_type(result_type)
                .set_result(result)
                .operand(x)
                .operand(y),
        );
    }

    pub fn load(&mut self, result_type: SpvId, result: SpvId, pointer: SpvId) {
        self.push(
            Instruction::new(Op::Load)
                .set_type(result_type)
                .set_result(result)
                .operand(pointer),
        );
    }

    pub fn store(&mut self, pointer: SpvId, value: SpvId) {
        self.push(Instruction::new(Op::Store).operand(pointer).operand(value));
    }

    pub fn access_chain(
        &mut self,
        result_type: SpvId,
        result: SpvId,
        base: SpvId,
        indices: &[SpvId],
    ) {
        self.push(
            Instruction::new(Op::AccessChain)
                .set_type(result_type)
                .set_result(result)
                .operand(base)
                .operands(indices),
        );
    }

    pub fn ptr_access_chain(
        &mut self,
        result_type: SpvId,
        result: SpvId,
        base: SpvId,
        element: SpvId,
        indices: &[SpvId],
    ) {
        self.push(
            Instruction::new(Op::PtrAccessChain)
                .set_type(result_type)
                .set_result(result)
                .operand(base)
                .operand(element)
                .operands(indices),
        );
    }

    pub fn select(
        &mut self,
        result_type: SpvId,
        result: SpvId,
        condition: SpvId,
        on_true: SpvId,
        on_false: SpvId,
    ) {
        self.push(
            Instruction::new(Op::Select)
                .set_type(result_type)
                .set_result(result)
                .operands(&[condition, on_true, on_false]),
        );
    }

    pub fn composite_extract(
        &mut self,
        result_type: SpvId,
        result: SpvId,
        composite: SpvId,
        index: u32,
    ) {
        self.push(
            Instruction::new(Op::CompositeExtract)
                .set_type(result_type)
                .set_result(result)
                .operand(composite)
                .operand(index),
        );
    }

    pub fn composite_construct(
        &mut self,
        result_type: SpvId,
        result: SpvId,
        components: &[SpvId],
    ) {
        self.push(
            Instruction::new(Op::CompositeConstruct)
                .set_type(result_type)
                .set_result(result)
                .operands(components),
        );
    }

    pub fn call(&mut self, result_type: SpvId, result: SpvId, callee: SpvId, args: &[SpvId]) {
        self.push(
            Instruction::new(Op::FunctionCall)
                .set_type(result_type)
                .set_result(result)
                .operand(callee)
                .operands(args),
        );
    }

    pub fn subgroup_ballot(&mut self, result_type: SpvId, result: SpvId, predicate: SpvId) {
        self.push(
            Instruction::new(Op::SubgroupBallotKHR)
                .set_type(result_type)
                .set_result(result)
                .operand(predicate),
        );
    }

    pub fn selection_merge(&mut self, merge: SpvId) {
        self.push(Instruction::new(Op::SelectionMerge).operand(merge).operand(0));
    }

    pub fn loop_merge(&mut self, merge: SpvId, continue_target: SpvId) {
        self.push(
            Instruction::new(Op::LoopMerge)
                .operand(merge)
                .operand(continue_target)
                .operand(0),
        );
    }

    // ── Terminators (returned, not pushed; the function consumes them) ──

    pub fn branch(target: SpvId) -> Instruction {
        Instruction::new(Op::Branch).operand(target)
    }

    pub fn branch_conditional(condition: SpvId, on_true: SpvId, on_false: SpvId) -> Instruction {
        Instruction::new(Op::BranchConditional).operands(&[condition, on_true, on_false])
    }

    pub fn switch(inspect: SpvId, default: SpvId, literals_and_labels: &[u32]) -> Instruction {
        Instruction::new(Op::Switch)
            .operand(inspect)
            .operand(default)
            .operands(literals_and_labels)
    }

    pub fn return_void() -> Instruction {
        Instruction::new(Op::Return)
    }

    pub fn return_value(value: SpvId) -> Instruction {
        Instruction::new(Op::ReturnValue).operand(value)
    }

    pub fn unreachable() -> Instruction {
        Instruction::new(Op::Unreachable)
    }
}

/// A function under construction: signature, parameters, locals, blocks.
pub struct FnBuilder {
    function_id: SpvId,
    fn_type_id: SpvId,
    return_type_id: SpvId,
    parameters: Vec<Instruction>,
    locals: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
}

impl FnBuilder {
    pub fn return_type_id(&self) -> SpvId {
        self.return_type_id
    }

    pub fn parameter(&mut self, result: SpvId, type_id: SpvId) {
        self.parameters.push(
            Instruction::new(Op::FunctionParameter)
                .set_type(type_id)
                .set_result(result),
        );
    }

    /// A function-storage local; SPIR-V wants these at the top of the
    /// entry block.
    pub fn local_variable(&mut self, result: SpvId, ptr_type_id: SpvId) {
        self.locals.push(
            Instruction::new(Op::Variable)
                .set_type(ptr_type_id)
                .set_result(result)
                .operand(spirv::StorageClass::Function as u32),
        );
    }

    /// Finish a basic block with its terminator.
    pub fn consume(&mut self, block: BasicBlockBuilder, terminator: Instruction) {
        self.blocks.push(BasicBlock {
            label: block.label,
            body: block.body,
            terminator,
        });
    }
}

pub struct ModuleBuilder {
    bound: SpvId,
    capabilities: Vec<u32>,
    extensions: Vec<u32>,
    memory_model: Vec<u32>,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    debug_names: Vec<u32>,
    annotations: Vec<u32>,
    declarations: Vec<u32>,
    function_definitions: Vec<u32>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder {
            bound: 0,
            capabilities: Vec::new(),
            extensions: Vec::new(),
            memory_model: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            debug_names: Vec::new(),
            annotations: Vec::new(),
            declarations: Vec::new(),
            function_definitions: Vec::new(),
        }
    }

    pub fn fresh_id(&mut self) -> SpvId {
        self.bound += 1;
        self.bound
    }

    pub fn capability(&mut self, capability: spirv::Capability) {
        Instruction::new(Op::Capability)
            .operand(capability as u32)
            .write(&mut self.capabilities);
    }

    pub fn extension(&mut self, name: &str) {
        Instruction::new(Op::Extension)
            .string(name)
            .write(&mut self.extensions);
    }

    pub fn memory_model(
        &mut self,
        addressing: spirv::AddressingModel,
        memory: spirv::MemoryModel,
    ) {
        Instruction::new(Op::MemoryModel)
            .operand(addressing as u32)
            .operand(memory as u32)
            .write(&mut self.memory_model);
    }

    pub fn entry_point(
        &mut self,
        execution_model: spirv::ExecutionModel,
        function: SpvId,
        name: &str,
        interface: &[SpvId],
    ) {
        Instruction::new(Op::EntryPoint)
            .operand(execution_model as u32)
            .operand(function)
            .string(name)
            .operands(interface)
            .write(&mut self.entry_points);
    }

    pub fn execution_mode(
        &mut self,
        function: SpvId,
        mode: spirv::ExecutionMode,
        literals: &[u32],
    ) {
        Instruction::new(Op::ExecutionMode)
            .operand(function)
            .operand(mode as u32)
            .operands(literals)
            .write(&mut self.execution_modes);
    }

    pub fn name(&mut self, id: SpvId, name: &str) {
        Instruction::new(Op::Name)
            .operand(id)
            .string(name)
            .write(&mut self.debug_names);
    }

    // ── Types, constants, globals ──

    pub fn type_void(&mut self) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeVoid)
            .set_result(id)
            .write(&mut self.declarations);
        id
    }

    pub fn type_bool(&mut self) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeBool)
            .set_result(id)
            .write(&mut self.declarations);
        id
    }

    pub fn type_int(&mut self, width: u32, signedness: u32) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeInt)
            .set_result(id)
            .operand(width)
            .operand(signedness)
            .write(&mut self.declarations);
        id
    }

    pub fn type_float(&mut self, width: u32) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeFloat)
            .set_result(id)
            .operand(width)
            .write(&mut self.declarations);
        id
    }

    pub fn type_vector(&mut self, component: SpvId, count: u32) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeVector)
            .set_result(id)
            .operand(component)
            .operand(count)
            .write(&mut self.declarations);
        id
    }

    pub fn type_pointer(&mut self, storage_class: spirv::StorageClass, pointee: SpvId) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypePointer)
            .set_result(id)
            .operand(storage_class as u32)
            .operand(pointee)
            .write(&mut self.declarations);
        id
    }

    pub fn type_struct(&mut self, members: &[SpvId]) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeStruct)
            .set_result(id)
            .operands(members)
            .write(&mut self.declarations);
        id
    }

    pub fn type_array(&mut self, element: SpvId, length_constant: SpvId) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeArray)
            .set_result(id)
            .operand(element)
            .operand(length_constant)
            .write(&mut self.declarations);
        id
    }

    pub fn type_runtime_array(&mut self, element: SpvId) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeRuntimeArray)
            .set_result(id)
            .operand(element)
            .write(&mut self.declarations);
        id
    }

    pub fn type_function(&mut self, return_type: SpvId, parameters: &[SpvId]) -> SpvId {
        let id = self.fresh_id();
        Instruction::new(Op::TypeFunction)
            .set_result(id)
            .operand(return_type)
            .operands(parameters)
            .write(&mut self.declarations);
        id
    }

    /// An integer/float constant with pre-encoded literal words (low word
    /// first for 64-bit values).
    pub fn constant(&mut self, result: SpvId, result_type: SpvId, words: &[u32]) {
        Instruction::new(Op::Constant)
            .set_type(result_type)
            .set_result(result)
            .operands(words)
            .write(&mut self.declarations);
    }

    pub fn bool_constant(&mut self, result: SpvId, result_type: SpvId, value: bool) {
        let op = if value { Op::ConstantTrue } else { Op::ConstantFalse };
        Instruction::new(op)
            .set_type(result_type)
            .set_result(result)
            .write(&mut self.declarations);
    }

    pub fn global_variable(
        &mut self,
        result: SpvId,
        ptr_type_id: SpvId,
        storage_class: spirv::StorageClass,
        init: Option<SpvId>,
    ) {
        let mut instruction = Instruction::new(Op::Variable)
            .set_type(ptr_type_id)
            .set_result(result)
            .operand(storage_class as u32);
        if let Some(init) = init {
            instruction = instruction.operand(init);
        }
        instruction.write(&mut self.declarations);
    }

    // ── Functions ──

    pub fn begin_fn(
        &mut self,
        function_id: SpvId,
        fn_type_id: SpvId,
        return_type_id: SpvId,
    ) -> FnBuilder {
        FnBuilder {
            function_id,
            fn_type_id,
            return_type_id,
            parameters: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn define_function(&mut self, function: FnBuilder) {
        Instruction::new(Op::Function)
            .set_type(function.return_type_id)
            .set_result(function.function_id)
            .operand(spirv::FunctionControl::NONE.bits())
            .operand(function.fn_type_id)
            .write(&mut self.function_definitions);
        for parameter in &function.parameters {
            parameter.write(&mut self.function_definitions);
        }
        for (i, block) in function.blocks.iter().enumerate() {
            Instruction::new(Op::Label)
                .set_result(block.label)
                .write(&mut self.function_definitions);
            if i == 0 {
                for local in &function.locals {
                    local.write(&mut self.function_definitions);
                }
            }
            for instruction in &block.body {
                instruction.write(&mut self.function_definitions);
            }
            block.terminator.write(&mut self.function_definitions);
        }
        Instruction::new(Op::FunctionEnd).write(&mut self.function_definitions);
    }

    /// Assemble the module: 5-word header, then the sections in order.
    pub fn finish(self) -> Vec<u32> {
        let mut words = Vec::new();
        words.push(spirv::MAGIC_NUMBER);
        words.push((u32::from(spirv::MAJOR_VERSION) << 16) | (u32::from(spirv::MINOR_VERSION) << 8));
        words.push(GENERATOR_MAGIC);
        words.push(self.bound + 1);
        words.push(0);
        words.extend_from_slice(&self.capabilities);
        words.extend_from_slice(&self.extensions);
        words.extend_from_slice(&self.memory_model);
        words.extend_from_slice(&self.entry_points);
        words.extend_from_slice(&self.execution_modes);
        words.extend_from_slice(&self.debug_names);
        words.extend_from_slice(&self.annotations);
        words.extend_from_slice(&self.declarations);
        words.extend_from_slice(&self.function_definitions);
        words
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_shape() {
        let mut builder = ModuleBuilder::new();
        builder.capability(spirv::Capability::Shader);
        let words = builder.finish();
        assert_eq!(words[0], spirv::MAGIC_NUMBER);
        assert_eq!(words[4], 0);
        // OpCapability Shader is two words.
        assert_eq!(words[5] >> 16, 2);
        assert_eq!(words[5] & 0xffff, Op::Capability as u32);
        assert_eq!(words[6], spirv::Capability::Shader as u32);
    }

    #[test]
    fn test_instruction_encoding() {
        let mut out = Vec::new();
        Instruction::new(Op::IAdd)
            .set_type(1)
            .set_result(2)
            .operand(3)
            .operand(4)
            .write(&mut out);
        assert_eq!(out, vec![(5 << 16) | Op::IAdd as u32, 1, 2, 3, 4]);
    }

    #[test]
    fn test_string_operand_nul_termination() {
        let mut out = Vec::new();
        Instruction::new(Op::Name).operand(7).string("main").write(&mut out);
        // "main" fills a word exactly, so an extra NUL word follows.
        assert_eq!(out.len(), 1 + 1 + 2);
        assert_eq!(out[2], u32::from_le_bytes(*b"main"));
        assert_eq!(out[3], 0);
    }

    #[test]
    fn test_function_layout() {
        let mut builder = ModuleBuilder::new();
        let void_t = builder.type_void();
        let fn_t = builder.type_function(void_t, &[]);
        let fn_id = builder.fresh_id();
        let mut f = builder.begin_fn(fn_id, fn_t, void_t);
        let entry = builder.fresh_id();
        let bb = BasicBlockBuilder::new(entry);
        f.consume(bb, BasicBlockBuilder::return_void());
        builder.define_function(f);
        let words = builder.finish();

        let ops: Vec<u32> = collect_opcodes(&words);
        assert!(ops.contains(&(Op::Function as u32)));
        assert!(ops.contains(&(Op::Label as u32)));
        assert!(ops.contains(&(Op::Return as u32)));
        assert!(ops.contains(&(Op::FunctionEnd as u32)));
    }

    fn collect_opcodes(words: &[u32]) -> Vec<u32> {
        let mut ops = Vec::new();
        let mut i = 5;
        while i < words.len() {
            let word_count = (words[i] >> 16) as usize;
            ops.push(words[i] & 0xffff);
            assert!(word_count > 0);
            i += word_count;
        }
        ops
    }
}
