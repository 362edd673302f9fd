//! Frame decoder.
//!
//! A frame is `<topic> <f1> <f2> ... <fN>`. Field boundaries are purely
//! positional: fields are split on single spaces and never unescaped.
//! Decoding is total; it never fails and never performs I/O.

use crate::event::{
    AddressEvent, ConfirmedTransactionEvent, DnsCheckEvent, DnsOutcome, FeedEvent,
    MilestoneHashEvent, MilestoneIndexEvent, NodeStatEvent, NodeStatKind, PeerChange, PeerEvent,
    ReceiveStatsEvent, TransactionEvent, TransactionTrytesEvent,
};
use crate::topic;

/// Split a raw frame into its topic key and positional fields.
///
/// Returns `None` for a blank frame.
pub fn split_frame(raw: &str) -> Option<(&str, Vec<&str>)> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let mut parts = line.split(' ');
    let topic = parts.next().filter(|t| !t.is_empty())?;
    Some((topic, parts.collect()))
}

/// Decode a whole frame.
pub fn decode_frame(raw: &str) -> Option<FeedEvent> {
    let (topic, fields) = split_frame(raw)?;
    decode(topic, &fields)
}

/// Decode the fields published under `topic`.
///
/// Returns `None` when `topic` is neither a known tag nor an address.
pub fn decode(topic: &str, fields: &[&str]) -> Option<FeedEvent> {
    let f = Fields(fields);
    let event = match topic {
        topic::TRANSACTION => FeedEvent::Transaction(TransactionEvent {
            hash: f.text(0),
            address: f.text(1),
            value: f.int(2),
            obsolete_tag: f.text(3),
            timestamp: f.int(4),
            current_index: f.int(5),
            last_index: f.int(6),
            bundle: f.text(7),
            trunk: f.text(8),
            branch: f.text(9),
            arrival_time: f.int(10),
            tag: f.text(11),
        }),
        topic::TRANSACTION_TRYTES => FeedEvent::TransactionTrytes(TransactionTrytesEvent {
            trytes: f.text(0),
            hash: f.text(1),
        }),
        topic::LATEST_MILESTONE_INDEX => FeedEvent::LatestMilestoneIndex(f.index_change()),
        topic::LATEST_SOLID_MILESTONE_INDEX => {
            FeedEvent::LatestSolidMilestoneIndex(f.index_change())
        }
        topic::LATEST_MILESTONE_HASH => {
            FeedEvent::LatestMilestoneHash(MilestoneHashEvent { hash: f.text(0) })
        }
        topic::CONFIRMED_TRANSACTION => FeedEvent::ConfirmedTransaction(ConfirmedTransactionEvent {
            milestone_index: f.int(0),
            hash: f.text(1),
            address: f.text(2),
            trunk: f.text(3),
            branch: f.text(4),
            bundle: f.text(5),
        }),
        topic::RECEIVE_STATS => FeedEvent::ReceiveStats(ReceiveStatsEvent {
            to_process: f.int(0),
            to_broadcast: f.int(1),
            to_request: f.int(2),
            to_reply: f.int(3),
            total_transactions: f.int(4),
        }),
        topic::HIT_MISS => {
            let (hits, misses) = f.ratio(0);
            FeedEvent::NodeStat(NodeStatEvent {
                stat: NodeStatKind::HitMiss,
                hits,
                misses,
                count: None,
            })
        }
        topic::MILESTONE_TRANSACTION_COUNT => FeedEvent::NodeStat(NodeStatEvent {
            stat: NodeStatKind::MilestoneTransactions,
            hits: None,
            misses: None,
            count: f.int(0),
        }),
        topic::PEER_ADDED => f.peer(PeerChange::Added),
        topic::PEER_REMOVED => f.peer(PeerChange::Removed),
        topic::DNS_VALIDATED => f.dns(DnsOutcome::Validated),
        topic::DNS_CHANGED => f.dns(DnsOutcome::Changed),
        topic::DNS_UPDATED => f.dns(DnsOutcome::Updated),
        address if topic::is_address(address) => FeedEvent::Address(AddressEvent {
            address: address.to_string(),
            transaction_hash: f.text(0),
            milestone_index: f.int(1),
        }),
        _ => return None,
    };
    Some(event)
}

struct Fields<'a>(&'a [&'a str]);

impl Fields<'_> {
    fn text(&self, i: usize) -> String {
        self.0.get(i).map(|s| s.to_string()).unwrap_or_default()
    }

    /// Missing or non-numeric → `None`.
    fn int(&self, i: usize) -> Option<i64> {
        self.0.get(i)?.parse().ok()
    }

    /// `a/b` → `(a, b)`, each side parsed like `int`.
    fn ratio(&self, i: usize) -> (Option<i64>, Option<i64>) {
        let Some(raw) = self.0.get(i) else {
            return (None, None);
        };
        match raw.split_once('/') {
            Some((a, b)) => (a.parse().ok(), b.parse().ok()),
            None => (raw.parse().ok(), None),
        }
    }

    fn index_change(&self) -> MilestoneIndexEvent {
        MilestoneIndexEvent {
            previous: self.int(0),
            latest: self.int(1),
        }
    }

    fn peer(&self, change: PeerChange) -> FeedEvent {
        FeedEvent::Peer(PeerEvent {
            change,
            uri: self.text(0),
        })
    }

    fn dns(&self, outcome: DnsOutcome) -> FeedEvent {
        FeedEvent::DnsCheck(DnsCheckEvent {
            outcome,
            hostname: self.text(0),
            ip: self.text(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(c: char) -> String {
        std::iter::repeat(c).take(81).collect()
    }

    #[test]
    fn decode_transaction() {
        let frame = format!(
            "tx HASH {} -42 OBS 1700000000 0 3 BUNDLE TRUNK BRANCH 1700000005 TAG\n",
            addr('A')
        );
        let Some(FeedEvent::Transaction(tx)) = decode_frame(&frame) else {
            panic!("expected transaction");
        };
        assert_eq!(tx.hash, "HASH");
        assert_eq!(tx.address, addr('A'));
        assert_eq!(tx.value, Some(-42));
        assert_eq!(tx.timestamp, Some(1_700_000_000));
        assert_eq!(tx.last_index, Some(3));
        assert_eq!(tx.bundle, "BUNDLE");
        assert_eq!(tx.branch, "BRANCH");
        assert_eq!(tx.arrival_time, Some(1_700_000_005));
        assert_eq!(tx.tag, "TAG");
    }

    #[test]
    fn malformed_integer_is_none() {
        let event = decode("lmi", &["12", "abc"]).unwrap();
        assert_eq!(
            event,
            FeedEvent::LatestMilestoneIndex(MilestoneIndexEvent {
                previous: Some(12),
                latest: None,
            })
        );
    }

    #[test]
    fn short_frame_fills_defaults() {
        let Some(FeedEvent::Transaction(tx)) = decode("tx", &["HASH"]) else {
            panic!("expected transaction");
        };
        assert_eq!(tx.hash, "HASH");
        assert_eq!(tx.address, "");
        assert_eq!(tx.value, None);
    }

    #[test]
    fn address_topic() {
        let a = addr('9');
        let event = decode(&a, &["TXHASH", "1234"]).unwrap();
        assert_eq!(
            event,
            FeedEvent::Address(AddressEvent {
                address: a,
                transaction_hash: "TXHASH".into(),
                milestone_index: Some(1234),
            })
        );
    }

    #[test]
    fn unknown_topic_decodes_to_nothing() {
        assert!(decode("hmrx", &["1/2"]).is_none());
        assert!(decode("SHORTADDRESS", &["x", "1"]).is_none());
    }

    #[test]
    fn receive_and_node_stats_are_distinct() {
        let Some(FeedEvent::ReceiveStats(rstat)) = decode_frame("rstat 3 1 0 2 15000") else {
            panic!("expected receive stats");
        };
        assert_eq!(rstat.to_process, Some(3));
        assert_eq!(rstat.total_transactions, Some(15_000));

        assert_eq!(
            decode_frame("hmr 10/2"),
            Some(FeedEvent::NodeStat(NodeStatEvent {
                stat: NodeStatKind::HitMiss,
                hits: Some(10),
                misses: Some(2),
                count: None,
            }))
        );
        assert_eq!(
            decode_frame("mctn 412"),
            Some(FeedEvent::NodeStat(NodeStatEvent {
                stat: NodeStatKind::MilestoneTransactions,
                hits: None,
                misses: None,
                count: Some(412),
            }))
        );

        let Some(FeedEvent::NodeStat(bad)) = decode_frame("hmr 10") else {
            panic!("expected node stat");
        };
        assert_eq!((bad.hits, bad.misses), (Some(10), None));
    }

    #[test]
    fn blank_frame() {
        assert!(split_frame("").is_none());
        assert!(split_frame("\n").is_none());
    }

    #[test]
    fn fields_are_positional() {
        let (topic, fields) = split_frame("sn 7  HASH").unwrap();
        assert_eq!(topic, "sn");
        assert_eq!(fields, vec!["7", "", "HASH"]);
        let Some(FeedEvent::ConfirmedTransaction(sn)) = decode(topic, &fields) else {
            panic!("expected confirmation");
        };
        assert_eq!(sn.milestone_index, Some(7));
        assert_eq!(sn.hash, "");
        assert_eq!(sn.address, "HASH");
    }

    #[test]
    fn peer_and_dns() {
        assert_eq!(
            decode_frame("rntn tcp://1.2.3.4:15600 8"),
            Some(FeedEvent::Peer(PeerEvent {
                change: PeerChange::Removed,
                uri: "tcp://1.2.3.4:15600".into(),
            }))
        );
        let Some(FeedEvent::DnsCheck(dns)) = decode_frame("dnscu node.example 10.0.0.1") else {
            panic!("expected dns check");
        };
        assert_eq!(dns.outcome, DnsOutcome::Updated);
        assert_eq!(dns.ip, "10.0.0.1");
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = decode_frame("lmhs MILESTONE").unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "latest_milestone_hash");
        assert_eq!(json["hash"], "MILESTONE");
    }
}
