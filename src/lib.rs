//! prism: a shading-language compiler with first-class continuations,
//! lowered to structured SPIR-V.
//!
//! Pipeline:
//! ```text
//! source → parse → bind → infer → lower_tailcalls → emit_spirv → words
//! ```
//! Every stage builds into a fresh arena; the previous arena is dropped
//! once the stage completes.

pub mod analysis;
pub mod diagnostic;
pub mod ir;
pub mod pass;
pub mod rewrite;
pub mod span;
pub mod spv;
pub mod syntax;

use log::info;

use diagnostic::Diagnostic;
use ir::arena::{ArenaConfig, IrArena};
use ir::print::{print_node_with, PrintOptions};
use ir::Node;
use syntax::parser::{self, ParserConfig};

/// Options controlling compilation.
#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Parse the surface grammar rather than the explicit IR subset.
    pub front_end: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { front_end: true }
    }
}

/// How far to run the pipeline before dumping the IR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Parsed,
    Bound,
    Typed,
    Lowered,
}

fn parser_config(options: &CompileOptions) -> ParserConfig {
    ParserConfig {
        front_end: options.front_end,
    }
}

/// Run the pipeline up to the typed program.
fn prepare(
    source: &str,
    options: &CompileOptions,
) -> Result<(IrArena, Node), Vec<Diagnostic>> {
    let mut parse_arena = IrArena::new(ArenaConfig::unchecked());
    let parsed = parser::parse(parser_config(options), source, &mut parse_arena)?;
    info!("parsed {} nodes", parse_arena.node_count());

    let mut bound_arena = IrArena::new(ArenaConfig::unchecked());
    let bound = pass::bind::bind_program(&parse_arena, &mut bound_arena, parsed)?;
    drop(parse_arena);

    let mut typed_arena = IrArena::new(ArenaConfig::checked());
    let typed = pass::infer::infer_program(&bound_arena, &mut typed_arena, bound)?;
    Ok((typed_arena, typed))
}

/// Compile a source string to a SPIR-V word stream.
pub fn compile(source: &str, options: &CompileOptions) -> Result<Vec<u32>, Vec<Diagnostic>> {
    let (typed_arena, typed) = prepare(source, options)?;

    let mut lowered_arena = IrArena::new(ArenaConfig::checked());
    let lowered = pass::lower_tailcalls::lower_tailcalls(&typed_arena, &mut lowered_arena, typed);
    drop(typed_arena);

    Ok(spv::emit_spirv(&mut lowered_arena, lowered))
}

/// Parse, bind, and type-check without emitting anything.
pub fn check(source: &str, options: &CompileOptions) -> Result<(), Vec<Diagnostic>> {
    prepare(source, options).map(|_| ())
}

/// Print the IR after the given pipeline stage.
pub fn dump_ir(
    source: &str,
    options: &CompileOptions,
    stage: Stage,
    print_ptrs: bool,
) -> Result<String, Vec<Diagnostic>> {
    let print_options = PrintOptions { print_ptrs };

    let mut parse_arena = IrArena::new(ArenaConfig::unchecked());
    let parsed = parser::parse(parser_config(options), source, &mut parse_arena)?;
    if stage == Stage::Parsed {
        return Ok(print_node_with(&parse_arena, parsed, print_options));
    }

    let mut bound_arena = IrArena::new(ArenaConfig::unchecked());
    let bound = pass::bind::bind_program(&parse_arena, &mut bound_arena, parsed)?;
    if stage == Stage::Bound {
        return Ok(print_node_with(&bound_arena, bound, print_options));
    }

    let mut typed_arena = IrArena::new(ArenaConfig::checked());
    let typed = pass::infer::infer_program(&bound_arena, &mut typed_arena, bound)?;
    if stage == Stage::Typed {
        return Ok(print_node_with(&typed_arena, typed, print_options));
    }

    let mut lowered_arena = IrArena::new(ArenaConfig::checked());
    let lowered = pass::lower_tailcalls::lower_tailcalls(&typed_arena, &mut lowered_arena, typed);
    Ok(print_node_with(&lowered_arena, lowered, print_options))
}
