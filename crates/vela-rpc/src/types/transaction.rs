//! Transactions, statuses and receipts.

use serde::{Deserialize, Serialize};
use starknet_types_core::felt::Felt;

/// Transaction body, tagged by kind on the wire. Only the fields the
/// subscription surface needs are carried here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    #[serde(rename = "INVOKE")]
    Invoke {
        transaction_hash: Felt,
        sender_address: Felt,
        calldata: Vec<Felt>,
    },
    #[serde(rename = "DECLARE")]
    Declare {
        transaction_hash: Felt,
        sender_address: Felt,
        class_hash: Felt,
    },
    #[serde(rename = "DEPLOY_ACCOUNT")]
    DeployAccount {
        transaction_hash: Felt,
        class_hash: Felt,
    },
    #[serde(rename = "L1_HANDLER")]
    L1Handler {
        transaction_hash: Felt,
        contract_address: Felt,
    },
    #[serde(rename = "DEPLOY")]
    Deploy {
        transaction_hash: Felt,
        class_hash: Felt,
    },
}

impl Transaction {
    pub fn hash(&self) -> &Felt {
        match self {
            Transaction::Invoke {
                transaction_hash, ..
            }
            | Transaction::Declare {
                transaction_hash, ..
            }
            | Transaction::DeployAccount {
                transaction_hash, ..
            }
            | Transaction::L1Handler {
                transaction_hash, ..
            }
            | Transaction::Deploy {
                transaction_hash, ..
            } => transaction_hash,
        }
    }

    /// The account that signed the transaction. Only invoke and declare
    /// transactions carry one; the other kinds cannot be matched by a
    /// sender-address filter.
    pub fn sender_address(&self) -> Option<&Felt> {
        match self {
            Transaction::Invoke { sender_address, .. }
            | Transaction::Declare { sender_address, .. } => Some(sender_address),
            _ => None,
        }
    }
}

/// Finality ladder. Declaration order gives the strict ordering the status
/// stream relies on: updates are emitted only when finality increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxnFinality {
    #[serde(rename = "RECEIVED")]
    Received,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "ACCEPTED_ON_L2")]
    AcceptedOnL2,
    #[serde(rename = "ACCEPTED_ON_L1")]
    AcceptedOnL1,
}

impl TxnFinality {
    /// Final states never transition again; reaching one ends a status
    /// subscription.
    pub fn is_final(&self) -> bool {
        matches!(self, TxnFinality::Rejected | TxnFinality::AcceptedOnL1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "REVERTED")]
    Reverted,
}

/// Status payload emitted on `starknet_subscriptionTransactionsStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    #[serde(rename = "finality_status")]
    pub finality: TxnFinality,
    #[serde(rename = "execution_status", default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// The slice of a receipt the L1 finality check needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: Felt,
    pub finality_status: TxnFinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finality_is_strictly_ordered() {
        assert!(TxnFinality::Received < TxnFinality::Rejected);
        assert!(TxnFinality::Rejected < TxnFinality::AcceptedOnL2);
        assert!(TxnFinality::AcceptedOnL2 < TxnFinality::AcceptedOnL1);
    }

    #[test]
    fn terminal_states() {
        assert!(TxnFinality::Rejected.is_final());
        assert!(TxnFinality::AcceptedOnL1.is_final());
        assert!(!TxnFinality::Received.is_final());
        assert!(!TxnFinality::AcceptedOnL2.is_final());
    }

    #[test]
    fn transactions_tag_by_kind() {
        let tx = Transaction::Invoke {
            transaction_hash: Felt::ONE,
            sender_address: Felt::TWO,
            calldata: vec![],
        };
        let wire = serde_json::to_value(&tx).unwrap();
        assert_eq!(wire["type"], json!("INVOKE"));
        assert_eq!(tx.sender_address(), Some(&Felt::TWO));

        let tx = Transaction::L1Handler {
            transaction_hash: Felt::ONE,
            contract_address: Felt::TWO,
        };
        assert_eq!(tx.sender_address(), None);
    }

    #[test]
    fn status_omits_empty_fields() {
        let status = TransactionStatus {
            finality: TxnFinality::Received,
            execution: None,
            failure_reason: None,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"finality_status":"RECEIVED"}"#
        );
    }
}
