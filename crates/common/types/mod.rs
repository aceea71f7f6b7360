mod account;
mod block;
mod receipt;
mod transaction;
mod tx_status;

pub use account::*;
pub use block::*;
pub use receipt::*;
pub use transaction::*;
pub use tx_status::*;
