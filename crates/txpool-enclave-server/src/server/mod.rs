pub mod engine;
pub mod provision;
#[allow(clippy::module_inception)]
pub mod server;

pub use engine::TrustedPoolEngine;
pub use provision::provision_from_holder;
pub use server::{init_tracing, TrustedPoolServer, TrustedPoolServerBuilder};
