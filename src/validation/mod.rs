//! Validation module - amounts, scripts, transactions and their context-free checks

mod amount;
mod checks;
mod script;
mod transaction;

pub use amount::*;
pub use checks::*;
pub use script::*;
pub use transaction::*;
