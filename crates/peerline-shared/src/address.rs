//! Peer addresses and conversation keys.
//!
//! Addresses are opaque strings to the core. Every comparison goes through
//! the ASCII-lowercased form so `0xAbC...` and `0xabc...` are the same peer.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::constants::{ADDRESS_HEX_LEN, ADDRESS_PREFIX, CONVERSATION_TOPIC_PREFIX};

/// A peer address, compared case-insensitively.
///
/// The original spelling is kept for display; [`Address::normalized`] is what
/// equality, hashing and ordering use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The address as it was supplied.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for every comparison.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Whether `raw` looks like a wallet address: `0x` followed by exactly
    /// 40 hex digits. Validation is left to callers; the core never rejects
    /// an address on this basis.
    pub fn is_wallet_format(raw: &str) -> bool {
        match raw.strip_prefix(ADDRESS_PREFIX) {
            Some(digits) => {
                digits.len() == ADDRESS_HEX_LEN && digits.bytes().all(|b| b.is_ascii_hexdigit())
            }
            None => false,
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a one-to-one conversation by the unordered pair of its
/// participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: &Address, b: &Address) -> Self {
        let (a, b) = (a.normalized(), b.normalized());
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Whether `address` is one of the two participants.
    pub fn involves(&self, address: &Address) -> bool {
        let n = address.normalized();
        self.low == n || self.high == n
    }

    pub fn to_topic(&self) -> String {
        format!("{}:{}:{}", CONVERSATION_TOPIC_PREFIX, self.low, self.high)
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_insensitive_equality() {
        let a = Address::from("0xABCDEF0000000000000000000000000000000001");
        let b = Address::from("0xabcdef0000000000000000000000000000000001");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_eq!(b.as_str(), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn test_wallet_format() {
        assert!(Address::is_wallet_format(
            "0x52908400098527886E0F7030069857D2E4169EE7"
        ));
        assert!(!Address::is_wallet_format("0x1234"));
        assert!(!Address::is_wallet_format(
            "52908400098527886E0F7030069857D2E4169EE7"
        ));
        assert!(!Address::is_wallet_format(
            "0xZZ908400098527886E0F7030069857D2E4169EE7"
        ));
    }

    #[test]
    fn test_conversation_key_is_unordered() {
        let me = Address::from("0xAAA");
        let peer = Address::from("0xBbB");
        let k1 = ConversationKey::new(&me, &peer);
        let k2 = ConversationKey::new(&Address::from("0xbbb"), &Address::from("0xaaa"));
        assert_eq!(k1, k2);
        assert_eq!(k1.to_topic(), "dm:0xaaa:0xbbb");
        assert!(k1.involves(&Address::from("0XBBB")));
        assert!(!k1.involves(&Address::from("0xccc")));
    }
}
