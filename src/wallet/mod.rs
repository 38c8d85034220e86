//! Wallet module - keys, coin selection and transaction building

mod builder;
mod coin_selection;
mod wallet;

pub use builder::*;
pub use coin_selection::*;
pub use wallet::*;
