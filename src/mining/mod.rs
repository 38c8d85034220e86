//! Mining module - block assembly and proof-of-work search

mod assembler;
mod miner;

pub use assembler::*;
pub use miner::*;
