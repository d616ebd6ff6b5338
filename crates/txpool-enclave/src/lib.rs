#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod crypto;
pub mod errors;
pub mod request_types;
pub mod rpc;

pub use crypto::*;
pub use errors::*;
pub use request_types::*;

pub use secp256k1::{PublicKey, SecretKey};

use std::net::{IpAddr, Ipv4Addr};

/// Default ip for the node's JSON-RPC endpoint
pub const POOL_DEFAULT_ENDPOINT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));
/// Default port for the node's JSON-RPC endpoint
pub const POOL_DEFAULT_ENDPOINT_PORT: u16 = 3802;
