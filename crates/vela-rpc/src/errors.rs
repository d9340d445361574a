//! Starknet API error templates.
//!
//! Codes follow the Starknet JSON-RPC specification. Call sites clone a
//! template with [`ErrorObject::with_data`] to attach diagnostics.

use vela_jsonrpc::ErrorObject;

pub fn block_not_found() -> ErrorObject {
    ErrorObject::new(24, "Block not found")
}

pub fn transaction_hash_not_found() -> ErrorObject {
    ErrorObject::new(29, "Transaction hash not found")
}

pub fn too_many_keys_in_filter() -> ErrorObject {
    ErrorObject::new(34, "Too many keys provided in a filter")
}

pub fn invalid_subscription_id() -> ErrorObject {
    ErrorObject::new(66, "Invalid subscription id")
}

pub fn too_many_addresses_in_filter() -> ErrorObject {
    ErrorObject::new(67, "Too many addresses in filter sender_address filter")
}

pub fn too_many_blocks_back() -> ErrorObject {
    ErrorObject::new(68, "Cannot go back more than 1024 blocks")
}
