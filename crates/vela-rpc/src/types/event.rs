//! Contract events as filtered from storage and emitted to subscribers.

use serde::{Deserialize, Serialize};
use starknet_types_core::felt::Felt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub from_address: Felt,
    pub keys: Vec<Felt>,
    pub data: Vec<Felt>,
}

/// Payload of `starknet_subscriptionEvents`. The block fields stay absent
/// while the event only exists in the pending block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub transaction_hash: Felt,
    #[serde(flatten)]
    pub event: Event,
}

/// An event as the chain's filter iterator yields it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredEvent {
    pub block_number: Option<u64>,
    /// `None` while the containing block is still pending.
    pub block_hash: Option<Felt>,
    pub transaction_hash: Felt,
    pub event_index: usize,
    pub event: Event,
}

/// Identity of an already-emitted event. Transaction ordering is
/// deterministic, so `(transaction hash, event index)` pins one event across
/// its pending and confirmed sightings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentEvent {
    pub transaction_hash: Felt,
    pub event_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pending_events_omit_block_fields() {
        let emitted = EmittedEvent {
            block_hash: None,
            block_number: None,
            transaction_hash: Felt::ONE,
            event: Event {
                from_address: Felt::TWO,
                keys: vec![Felt::THREE],
                data: vec![],
            },
        };
        let wire = serde_json::to_value(&emitted).unwrap();
        assert!(wire.get("block_hash").is_none());
        assert!(wire.get("block_number").is_none());
        assert_eq!(wire["keys"], json!(["0x3"]));
    }

    #[test]
    fn confirmed_events_carry_their_block() {
        let emitted = EmittedEvent {
            block_hash: Some(Felt::ONE),
            block_number: Some(12),
            transaction_hash: Felt::TWO,
            event: Event {
                from_address: Felt::THREE,
                keys: vec![],
                data: vec![],
            },
        };
        let wire = serde_json::to_value(&emitted).unwrap();
        assert_eq!(wire["block_number"], json!(12));
    }
}
