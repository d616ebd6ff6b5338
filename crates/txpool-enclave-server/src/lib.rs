pub mod attestation;
pub mod blockfill;
pub mod chain;
pub mod config;
pub mod key_manager;
pub mod keystore;
pub mod node;
pub mod pool;
pub mod server;
