//! Consensus module - blocks, parameters, difficulty, rewards and the rule pipeline

mod block;
mod context;
mod difficulty;
mod engine;
mod error;
mod fee_split;
mod params;
mod rewards;
mod rules;

pub use block::*;
pub use context::*;
pub use difficulty::*;
pub use engine::*;
pub use error::*;
pub use fee_split::*;
pub use params::*;
pub use rewards::*;
pub use rules::*;
