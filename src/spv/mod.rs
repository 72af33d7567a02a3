//! SPIR-V backend: a word-level module builder and the IR emitter that
//! drives it.

pub mod builder;
pub mod emit;

pub use emit::emit_spirv;
