use serde::{Deserialize, Serialize};

/// Encrypt arbitrary data under the fleet public key.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CryptRequest {
    pub data: Vec<u8>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CryptResponse {
    pub crypted: Vec<u8>,
}

/// Decrypt a fleet-key envelope.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DecryptRequest {
    pub data: Vec<u8>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DecryptResponse {
    pub decrypted: Vec<u8>,
}
