//! Mempool - unconfirmed transactions and their admission

mod broadcaster;
mod entry;
mod error;
mod persistence;
mod pool;
mod settings;
mod validator;
mod view;

pub use broadcaster::*;
pub use entry::*;
pub use error::*;
pub use persistence::*;
pub use pool::*;
pub use settings::*;
pub use validator::*;
pub(crate) use view::load_view;
