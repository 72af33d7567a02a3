use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use prism::diagnostic::emit_all;
use prism::{CompileOptions, Stage};

#[derive(Parser)]
#[command(
    name = "prism",
    version,
    about = "prism compiler — structured SPIR-V from a continuation-based shading language"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source file to a SPIR-V binary
    Build(BuildArgs),
    /// Parse, bind, and type-check without emitting
    Check(CheckArgs),
    /// Print the IR after a pipeline stage
    Dump(DumpArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Input source file
    input: PathBuf,
    /// Output file (defaults to the input with a .spv extension)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Parse the explicit IR subset instead of the surface grammar
    #[arg(long)]
    no_front_end: bool,
}

#[derive(clap::Args)]
struct CheckArgs {
    input: PathBuf,
    #[arg(long)]
    no_front_end: bool,
}

#[derive(clap::Args)]
struct DumpArgs {
    input: PathBuf,
    /// Pipeline stage to dump after: parsed, bound, typed, or lowered
    #[arg(long, default_value = "lowered")]
    stage: String,
    /// Prefix each node with its arena slot
    #[arg(long)]
    ptrs: bool,
    #[arg(long)]
    no_front_end: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build(args) => cmd_build(args),
        Command::Check(args) => cmd_check(args),
        Command::Dump(args) => cmd_dump(args),
    }
}

fn read_source(path: &PathBuf) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("error: cannot read {}: {}", path.display(), e);
        ExitCode::FAILURE
    })
}

fn options(no_front_end: bool) -> CompileOptions {
    CompileOptions {
        front_end: !no_front_end,
    }
}

fn cmd_build(args: BuildArgs) -> ExitCode {
    let source = match read_source(&args.input) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let filename = args.input.display().to_string();

    match prism::compile(&source, &options(args.no_front_end)) {
        Ok(words) => {
            let output = args
                .output
                .unwrap_or_else(|| args.input.with_extension("spv"));
            let bytes: &[u8] = bytemuck::cast_slice(&words);
            if let Err(e) = std::fs::write(&output, bytes) {
                eprintln!("error: cannot write {}: {}", output.display(), e);
                return ExitCode::FAILURE;
            }
            println!("wrote {} ({} words)", output.display(), words.len());
            ExitCode::SUCCESS
        }
        Err(diagnostics) => {
            emit_all(&diagnostics, &filename, &source);
            ExitCode::FAILURE
        }
    }
}

fn cmd_check(args: CheckArgs) -> ExitCode {
    let source = match read_source(&args.input) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let filename = args.input.display().to_string();

    match prism::check(&source, &options(args.no_front_end)) {
        Ok(()) => {
            println!("ok");
            ExitCode::SUCCESS
        }
        Err(diagnostics) => {
            emit_all(&diagnostics, &filename, &source);
            ExitCode::FAILURE
        }
    }
}

fn cmd_dump(args: DumpArgs) -> ExitCode {
    let source = match read_source(&args.input) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let filename = args.input.display().to_string();

    let stage = match args.stage.as_str() {
        "parsed" => Stage::Parsed,
        "bound" => Stage::Bound,
        "typed" => Stage::Typed,
        "lowered" => Stage::Lowered,
        other => {
            eprintln!("error: unknown stage `{}` (expected parsed, bound, typed, or lowered)", other);
            return ExitCode::FAILURE;
        }
    };

    match prism::dump_ir(&source, &options(args.no_front_end), stage, args.ptrs) {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(diagnostics) => {
            emit_all(&diagnostics, &filename, &source);
            ExitCode::FAILURE
        }
    }
}
