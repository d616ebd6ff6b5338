use anyhow::Error;

/// Convert a handshake ordering/validation failure into a JSON-RPC error response.
///
/// Deliberately carries no detail beyond "invalid operation"; the handshake
/// collapses all chain and shape failures into one kind.
pub fn rpc_invalid_operation_error() -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObject::owned(
        jsonrpsee::types::error::INVALID_PARAMS_CODE,
        "Invalid operation",
        None::<()>,
    )
}

/// Convert an attestation backend rejection into a JSON-RPC error response
pub fn rpc_attestation_error(e: Error) -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObject::owned(
        jsonrpsee::types::error::INVALID_PARAMS_CODE,
        format!("Attestation failure: {:?}", e),
        None::<()>,
    )
}

/// Convert a missing-fleet-key condition into a JSON-RPC error response
pub fn rpc_key_absent_error() -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObject::owned(
        jsonrpsee::types::error::INVALID_PARAMS_CODE,
        "Secret key not yet available",
        None::<()>,
    )
}

/// Convert a bad argument error into a JSON-RPC error response
pub fn rpc_bad_argument_error(e: Error) -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObject::owned(
        jsonrpsee::types::error::INVALID_PARAMS_CODE,
        format!("Invalid Argument: {:?}", e),
        None::<()>,
    )
}

// Convert a generic error into a JSON-RPC error response
pub fn rpc_internal_server_error(e: Error) -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObject::owned(
        jsonrpsee::types::error::INTERNAL_ERROR_CODE,
        format!("Internal server error: {}", e),
        None::<()>,
    )
}
