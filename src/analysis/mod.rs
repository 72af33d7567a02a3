//! IR analyses. Currently just the CFG scope of a function, which orders
//! basic-block emission for structured SPIR-V.

pub mod scope;
