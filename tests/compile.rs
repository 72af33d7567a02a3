//! End-to-end pipeline tests: source text in, SPIR-V words (or lowered
//! IR text) out.

use spirv_headers::Op;

use prism::{compile, dump_ir, CompileOptions, Stage};

/// Split a word stream into (opcode, operand words) pairs, skipping the
/// 5-word header.
fn opcodes(words: &[u32]) -> Vec<(u32, Vec<u32>)> {
    assert_eq!(words[0], spirv_headers::MAGIC_NUMBER);
    let mut out = Vec::new();
    let mut i = 5;
    while i < words.len() {
        let word_count = (words[i] >> 16) as usize;
        assert!(word_count > 0, "zero-length instruction at word {}", i);
        out.push((words[i] & 0xffff, words[i + 1..i + word_count].to_vec()));
        i += word_count;
    }
    assert_eq!(i, words.len(), "stream ends on an instruction boundary");
    out
}

fn count_op(ops: &[(u32, Vec<u32>)], op: Op) -> usize {
    ops.iter().filter(|(o, _)| *o == op as u32).count()
}

fn has_op(ops: &[(u32, Vec<u32>)], op: Op) -> bool {
    count_op(ops, op) > 0
}

fn build(source: &str) -> Vec<(u32, Vec<u32>)> {
    let words = compile(source, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("compile failed: {:?}", e));
    opcodes(&words)
}

#[test]
fn test_trivial_return() {
    let ops = build("fn main i32() { return (42); };");

    assert_eq!(
        ops.iter()
            .filter(|(o, rest)| *o == Op::TypeInt as u32 && rest[1..] == [32, 1])
            .count(),
        1
    );
    assert!(ops
        .iter()
        .any(|(o, rest)| *o == Op::Constant as u32 && rest[2] == 42));
    assert_eq!(count_op(&ops, Op::Function), 1);
    assert_eq!(count_op(&ops, Op::Label), 1);
    assert_eq!(count_op(&ops, Op::ReturnValue), 1);
}

#[test]
fn test_arithmetic() {
    let ops = build("fn f i32(varying i32 x) { return (x + 1); };");

    assert!(has_op(&ops, Op::FunctionParameter));
    let add = ops
        .iter()
        .find(|(o, _)| *o == Op::IAdd as u32)
        .expect("an OpIAdd");
    // One operand is the parameter, the other the constant 1.
    let param_id = ops
        .iter()
        .find(|(o, _)| *o == Op::FunctionParameter as u32)
        .map(|(_, rest)| rest[1])
        .unwrap();
    let one_id = ops
        .iter()
        .find(|(o, rest)| *o == Op::Constant as u32 && rest[2] == 1)
        .map(|(_, rest)| rest[1])
        .unwrap();
    assert!(add.1[2..].contains(&param_id));
    assert!(add.1[2..].contains(&one_id));
}

#[test]
fn test_if_without_else() {
    let ops = build("fn g(varying bool c) { if (c) { let x = add(1, 0); }; return; };");

    let merge_id = ops
        .iter()
        .find(|(o, _)| *o == Op::SelectionMerge as u32)
        .map(|(_, rest)| rest[0])
        .expect("an OpSelectionMerge");
    let cond_branch = ops
        .iter()
        .find(|(o, _)| *o == Op::BranchConditional as u32)
        .expect("an OpBranchConditional");
    // No else: the false edge goes straight to the merge block.
    assert_eq!(cond_branch.1[2], merge_id);
    // The true block falls through to the merge block.
    assert!(ops
        .iter()
        .any(|(o, rest)| *o == Op::Branch as u32 && rest == &vec![merge_id]));
}

#[test]
fn test_loop_with_break() {
    let ops = build("fn h() { loop () { break; }; return; };");

    let (merge_id, continue_id) = ops
        .iter()
        .find(|(o, _)| *o == Op::LoopMerge as u32)
        .map(|(_, rest)| (rest[0], rest[1]))
        .expect("an OpLoopMerge");
    // Four loop blocks exist: the labels for merge and continue are among
    // them, and the body breaks straight to the merge target.
    assert!(ops
        .iter()
        .any(|(o, rest)| *o == Op::Label as u32 && rest == &vec![merge_id]));
    assert!(ops
        .iter()
        .any(|(o, rest)| *o == Op::Label as u32 && rest == &vec![continue_id]));
    assert!(ops
        .iter()
        .any(|(o, rest)| *o == Op::Branch as u32 && rest == &vec![merge_id]));
}

#[test]
fn test_indirect_tail_call_lowering() {
    let source = "fn @compute f() { tail_call (k); };\n\
                  fn k() { return; };";

    let text = dump_ir(source, &CompileOptions::default(), Stage::Lowered, false)
        .unwrap_or_else(|e| panic!("lowering failed: {:?}", e));

    assert!(!text.contains("tail_call"), "got:\n{}", text);
    assert!(text.contains("top_dispatcher"), "got:\n{}", text);
    assert!(text.contains("private i32 next_fn"), "got:\n{}", text);
    assert!(text.contains("private mask next_mask"), "got:\n{}", text);
    // The dispatcher switch has the halt case plus one per function.
    assert_eq!(text.matches("case ").count(), 3, "got:\n{}", text);

    // And the lowered program still makes it through emission.
    let ops = build(source);
    assert!(has_op(&ops, Op::Switch));
    assert!(has_op(&ops, Op::LoopMerge));
    assert!(has_op(&ops, Op::EntryPoint));
}

#[test]
fn test_entry_point_survives_lowering() {
    let source = "fn @compute f() { tail_call (k); };\n\
                  fn k() { return; };";
    let text = dump_ir(source, &CompileOptions::default(), Stage::Lowered, false).unwrap();
    assert!(text.contains("fn @compute f"), "got:\n{}", text);
}

#[test]
fn test_unresolved_identifier_is_reported() {
    let result = compile("fn f i32() { return (ghost); };", &CompileOptions::default());
    let errors = result.unwrap_err();
    assert!(errors[0].message.contains("ghost"), "{:?}", errors);
}

#[test]
fn test_type_mismatch_is_reported() {
    let result = compile(
        "fn f i32() { let y = add(true, 1); return (y); };",
        &CompileOptions::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_global_variable_emission() {
    let ops = build(
        "private i32 counter = 0;\n\
         fn bump() { store(counter, load(counter) + 1); return; };",
    );
    assert!(has_op(&ops, Op::Variable));
    assert!(has_op(&ops, Op::Load));
    assert!(has_op(&ops, Op::Store));
}

#[test]
fn test_constant_declaration() {
    let ops = build(
        "const i32 ANSWER = 42;\n\
         fn f i32() { return (ANSWER); };",
    );
    assert!(ops
        .iter()
        .any(|(o, rest)| *o == Op::Constant as u32 && rest[2] == 42));
}

#[test]
fn test_dump_stages() {
    let source = "fn f i32(varying i32 x) { return (x + 1); };";
    let parsed = dump_ir(source, &CompileOptions::default(), Stage::Parsed, false).unwrap();
    assert!(parsed.contains("`x`"), "placeholders survive parsing: {}", parsed);

    let bound = dump_ir(source, &CompileOptions::default(), Stage::Bound, false).unwrap();
    assert!(!bound.contains('`'), "binding resolves placeholders: {}", bound);

    let typed = dump_ir(source, &CompileOptions::default(), Stage::Typed, false).unwrap();
    assert!(typed.contains("varying i32"), "types appear: {}", typed);
}

#[test]
fn test_word_stream_writes_as_little_endian_bytes() {
    let words = compile("fn main i32() { return (42); };", &CompileOptions::default()).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, bytemuck::cast_slice(&words)).unwrap();
    let bytes = std::fs::read(file.path()).unwrap();

    assert_eq!(bytes.len(), words.len() * 4);
    // The magic number leads the file in little-endian byte order.
    assert_eq!(&bytes[..4], &spirv_headers::MAGIC_NUMBER.to_le_bytes());
}

/// Erase `_<digits>` suffix chains so two prints that differ only in
/// fresh variable IDs compare equal.
fn strip_var_ids(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && (j == bytes.len() || !bytes[j].is_ascii_alphabetic()) {
                i = j;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[test]
fn test_print_parse_round_trip_up_to_renaming() {
    let source = "const i32 LIMIT = 16;\n\
                  private i32 counter = 0;\n\
                  fn @compute main(varying i32 x) {\n\
                     let y = add(x, 1);\n\
                     if (lt(y, LIMIT)) {\n\
                        loop () {\n\
                           break;\n\
                        };\n\
                        merge;\n\
                     };\n\
                     tail_call (k);\n\
                  };\n\
                  fn k() {\n\
                     jump (exit);\n\
                     exit: () {\n\
                        return;\n\
                     }\n\
                  };\n";
    let options = CompileOptions::default();

    let printed = dump_ir(source, &options, Stage::Parsed, false).unwrap();
    let reprinted = dump_ir(&printed, &options, Stage::Parsed, false)
        .unwrap_or_else(|e| panic!("printed program failed to reparse: {:?}\n{}", e, printed));

    assert_eq!(
        strip_var_ids(&printed),
        strip_var_ids(&reprinted),
        "printed:\n{}\nreprinted:\n{}",
        printed,
        reprinted
    );
}
