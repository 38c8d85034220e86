//! Storage module - unspent outputs, coin views, backing stores and chain state

mod db;
mod state;
mod store;
mod utxo;
mod view;

pub use db::*;
pub use state::*;
pub use store::*;
pub use utxo::*;
pub use view::*;
