pub mod chain;
pub mod crypt;
pub mod handshake;
pub mod pool;

pub use chain::*;
pub use crypt::*;
pub use handshake::*;
pub use pool::*;
