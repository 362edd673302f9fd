//! Topic names and validation.
//!
//! A topic is the first token of every feed frame. It is either one of the
//! fixed lowercase tags below or an 81-character tryte address, in which case
//! the feed delivers address-watch events for that address.

use crate::error::FeedError;

/// Length of a tryte address (without checksum).
pub const ADDRESS_LENGTH: usize = 81;

/// Full transaction.
pub const TRANSACTION: &str = "tx";
/// Raw transaction trytes.
pub const TRANSACTION_TRYTES: &str = "tx_trytes";
/// Latest milestone index changed.
pub const LATEST_MILESTONE_INDEX: &str = "lmi";
/// Latest solid milestone index changed.
pub const LATEST_SOLID_MILESTONE_INDEX: &str = "lmsi";
/// Latest milestone hash.
pub const LATEST_MILESTONE_HASH: &str = "lmhs";
/// Transaction confirmed by a milestone.
pub const CONFIRMED_TRANSACTION: &str = "sn";
/// Node receive / broadcast queue statistics.
pub const RECEIVE_STATS: &str = "rstat";
/// Request cache hits and misses.
pub const HIT_MISS: &str = "hmr";
/// Transactions walked during the last milestone check.
pub const MILESTONE_TRANSACTION_COUNT: &str = "mctn";
/// Peer added.
pub const PEER_ADDED: &str = "antn";
/// Peer removed.
pub const PEER_REMOVED: &str = "rntn";
/// Peer DNS validated.
pub const DNS_VALIDATED: &str = "dnscv";
/// Peer DNS changed.
pub const DNS_CHANGED: &str = "dnscc";
/// Peer DNS updated.
pub const DNS_UPDATED: &str = "dnscu";

/// Every tag the decoder understands, apart from address topics.
pub const WELL_KNOWN: &[&str] = &[
    TRANSACTION,
    TRANSACTION_TRYTES,
    LATEST_MILESTONE_INDEX,
    LATEST_SOLID_MILESTONE_INDEX,
    LATEST_MILESTONE_HASH,
    CONFIRMED_TRANSACTION,
    RECEIVE_STATS,
    HIT_MISS,
    MILESTONE_TRANSACTION_COUNT,
    PEER_ADDED,
    PEER_REMOVED,
    DNS_VALIDATED,
    DNS_CHANGED,
    DNS_UPDATED,
];

/// Tags whose events carry a transaction hash. Only these can feed the
/// aggregation engine.
pub const TRANSACTION_TOPICS: &[&str] = &[TRANSACTION, TRANSACTION_TRYTES, CONFIRMED_TRANSACTION];

pub fn is_transaction_topic(topic: &str) -> bool {
    TRANSACTION_TOPICS.contains(&topic)
}

fn is_tryte(b: u8) -> bool {
    b == b'9' || b.is_ascii_uppercase()
}

/// Returns `true` if `s` is exactly 81 characters from `A-Z` and `9`.
pub fn is_address(s: &str) -> bool {
    s.len() == ADDRESS_LENGTH && s.bytes().all(is_tryte)
}

/// Returns `true` if `topic` is one of the fixed tags.
pub fn is_well_known(topic: &str) -> bool {
    WELL_KNOWN.contains(&topic)
}

/// Validate a topic before it is registered with a transport.
///
/// Accepted: any non-empty run of printable ASCII without whitespace. Tokens
/// made only of tryte characters are treated as addresses and must be exactly
/// 81 long. Unknown lowercase tags pass validation; frames for them decode to
/// nothing.
pub fn validate_topic(topic: &str) -> Result<(), FeedError> {
    let invalid = || FeedError::InvalidTopic {
        topic: topic.to_string(),
    };

    if topic.is_empty() || !topic.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(invalid());
    }
    if topic.bytes().all(is_tryte) && topic.len() != ADDRESS_LENGTH {
        return Err(invalid());
    }
    Ok(())
}

/// Validate an address before subscribing to its watch topic.
pub fn validate_address(address: &str) -> Result<(), FeedError> {
    if is_address(address) {
        Ok(())
    } else {
        Err(FeedError::InvalidAddress {
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_shape() {
        assert!(is_address(&"A".repeat(81)));
        assert!(is_address(&"9".repeat(81)));
        assert!(!is_address(&"A".repeat(80)));
        assert!(!is_address(&"a".repeat(81)));
        assert!(!is_address("short"));
    }

    #[test]
    fn well_known_tags_are_valid_topics() {
        for tag in WELL_KNOWN {
            assert!(validate_topic(tag).is_ok(), "{tag}");
        }
    }

    #[test]
    fn rejects_bad_topics() {
        assert!(validate_topic("").is_err());
        assert!(validate_topic("tx lmi").is_err());
        assert!(validate_topic("ABC").is_err());
        assert!(validate_topic(&"B".repeat(82)).is_err());
    }

    #[test]
    fn transaction_topics() {
        assert!(is_transaction_topic("tx"));
        assert!(is_transaction_topic("tx_trytes"));
        assert!(is_transaction_topic("sn"));
        assert!(!is_transaction_topic("lmi"));
        assert!(!is_transaction_topic("tx_confirmed"));
    }

    #[test]
    fn unknown_lowercase_tag_is_accepted() {
        assert!(validate_topic("ntp").is_ok());
        assert!(!is_well_known("ntp"));
        assert!(is_well_known("hmr"));
        assert!(is_well_known("mctn"));
    }

    #[test]
    fn address_validation() {
        assert!(matches!(
            validate_address("short"),
            Err(FeedError::InvalidAddress { .. })
        ));
        assert!(validate_address(&"A".repeat(81)).is_ok());
    }
}
