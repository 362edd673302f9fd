//! Decoded feed events.
//!
//! Integer fields are `Option<i64>`: `None` marks a field that was missing or
//! not numeric in the frame. Consumers must tolerate it.

use serde::{Deserialize, Serialize};

/// A single decoded feed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Activity on a watched address.
    Address(AddressEvent),
    /// A newly seen transaction.
    Transaction(TransactionEvent),
    TransactionTrytes(TransactionTrytesEvent),
    LatestMilestoneIndex(MilestoneIndexEvent),
    LatestSolidMilestoneIndex(MilestoneIndexEvent),
    LatestMilestoneHash(MilestoneHashEvent),
    ConfirmedTransaction(ConfirmedTransactionEvent),
    /// Receive and broadcast queue sizes (`rstat`).
    ReceiveStats(ReceiveStatsEvent),
    /// Node-internal counters (`hmr`, `mctn`).
    NodeStat(NodeStatEvent),
    Peer(PeerEvent),
    DnsCheck(DnsCheckEvent),
}

impl FeedEvent {
    /// Short discriminant name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Transaction(_) => "transaction",
            Self::TransactionTrytes(_) => "transaction_trytes",
            Self::LatestMilestoneIndex(_) => "latest_milestone_index",
            Self::LatestSolidMilestoneIndex(_) => "latest_solid_milestone_index",
            Self::LatestMilestoneHash(_) => "latest_milestone_hash",
            Self::ConfirmedTransaction(_) => "confirmed_transaction",
            Self::ReceiveStats(_) => "receive_stats",
            Self::NodeStat(_) => "node_stat",
            Self::Peer(_) => "peer",
            Self::DnsCheck(_) => "dns_check",
        }
    }

    /// `(hash, value)` for events that carry a transaction. Only full
    /// transactions know their value.
    pub fn transaction(&self) -> Option<(&str, Option<i64>)> {
        match self {
            Self::Transaction(tx) => Some((&tx.hash, tx.value)),
            Self::TransactionTrytes(tx) => Some((&tx.hash, None)),
            Self::ConfirmedTransaction(tx) => Some((&tx.hash, None)),
            _ => None,
        }
    }
}

/// Frame published on an address topic: `<address> <tx hash> <milestone index>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEvent {
    pub address: String,
    pub transaction_hash: String,
    pub milestone_index: Option<i64>,
}

/// Full transaction, twelve positional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub hash: String,
    pub address: String,
    /// Signed value in base units.
    pub value: Option<i64>,
    pub obsolete_tag: String,
    /// Issuance timestamp (seconds).
    pub timestamp: Option<i64>,
    pub current_index: Option<i64>,
    pub last_index: Option<i64>,
    pub bundle: String,
    pub trunk: String,
    pub branch: String,
    /// Time the node received the transaction.
    pub arrival_time: Option<i64>,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTrytesEvent {
    pub trytes: String,
    pub hash: String,
}

/// Index change for `lmi` / `lmsi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneIndexEvent {
    pub previous: Option<i64>,
    pub latest: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneHashEvent {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedTransactionEvent {
    pub milestone_index: Option<i64>,
    pub hash: String,
    pub address: String,
    pub trunk: String,
    pub branch: String,
    pub bundle: String,
}

/// Queue sizes reported by `rstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStatsEvent {
    pub to_process: Option<i64>,
    pub to_broadcast: Option<i64>,
    pub to_request: Option<i64>,
    pub to_reply: Option<i64>,
    pub total_transactions: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatKind {
    /// `hmr <hits>/<misses>`: transaction request cache hits and misses.
    HitMiss,
    /// `mctn <count>`: transactions walked by the last milestone check.
    MilestoneTransactions,
}

/// One node counter. Fields that do not apply to `stat` are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatEvent {
    pub stat: NodeStatKind,
    pub hits: Option<i64>,
    pub misses: Option<i64>,
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerChange {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub change: PeerChange,
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsOutcome {
    Validated,
    Changed,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsCheckEvent {
    pub outcome: DnsOutcome,
    pub hostname: String,
    pub ip: String,
}
