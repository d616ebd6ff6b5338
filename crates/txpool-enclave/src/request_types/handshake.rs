use serde::{Deserialize, Serialize};

// The four-round handshake travels over two request/response pairs:
// round 1 up, round 2 back; round 3 up, round 4 back. The node receiving
// these requests is the Holder side of the exchange.

/// Round 1: the Seeker's auth report. The response carries the Holder's
/// round 2 verify report.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyAuthRequest {
    /// Stable identifier of the calling peer, matched case-insensitively.
    pub peer_id: String,
    /// Opaque attestation report over the Seeker's round 1 nonce.
    pub report: Vec<u8>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyAuthResponse {
    pub report: Vec<u8>,
}

/// Round 3: the Seeker's key request report. The response carries the
/// Holder's round 4 report embedding the encrypted-in-attestation fleet key.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyRequestRequest {
    pub peer_id: String,
    pub report: Vec<u8>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyRequestResponse {
    pub report: Vec<u8>,
}

/// Operator trigger: drive the full Seeker sequence against a Holder node.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProvisionKeyRequest {
    /// JSON-RPC endpoint of the Holder, e.g. `http://10.0.0.5:3802`.
    pub holder_url: String,
    /// Peer identifier the Holder is known by.
    pub holder_peer_id: String,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProvisionKeyResponse {}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceReadyResponse {
    pub ready: bool,
}
