mod block;
mod transaction;

pub use block::*;
pub use transaction::*;
