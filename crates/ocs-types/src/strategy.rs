use std::fmt;

use serde::{Deserialize, Serialize};

/// Payloads strictly larger than this many bytes are stored chunked.
///
/// This is the single boundary consulted on both upload and download. It is
/// not configurable: changing it would strand objects written under the old
/// value on the wrong read path.
pub const INLINE_THRESHOLD: u64 = 16_000_000;

/// Concrete persistence strategy for one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Single document with an embedded binary field.
    Inline,
    /// Sequence of chunk documents under a bucket.
    Chunked,
    /// Pre-built document inserted verbatim.
    Raw,
}

impl Strategy {
    /// Pick between inline and chunked storage for a payload of `length` bytes.
    pub fn for_length(length: u64) -> Self {
        if length > INLINE_THRESHOLD {
            Self::Chunked
        } else {
            Self::Inline
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Chunked => write!(f, "chunked"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Metadata read back before a payload on download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMetadata {
    /// Logical name the object was uploaded under.
    pub name: String,
    /// Payload length in bytes.
    pub length: u64,
}

impl StoredMetadata {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }

    /// The strategy the uploader took for this object's length.
    pub fn strategy(&self) -> Strategy {
        Strategy::for_length(self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use super::Strategy;

    #[test]
    fn threshold_is_inline() {
        assert_eq!(Strategy::for_length(INLINE_THRESHOLD), Strategy::Inline);
    }

    #[test]
    fn one_past_threshold_is_chunked() {
        assert_eq!(Strategy::for_length(INLINE_THRESHOLD + 1), Strategy::Chunked);
    }

    #[test]
    fn empty_payload_is_inline() {
        assert_eq!(Strategy::for_length(0), Strategy::Inline);
    }

    #[test]
    fn metadata_strategy_uses_length() {
        assert_eq!(StoredMetadata::new("a.txt", 10).strategy(), Strategy::Inline);
        assert_eq!(
            StoredMetadata::new("big.bin", 16_000_001).strategy(),
            Strategy::Chunked
        );
    }

    #[test]
    fn strategy_display() {
        assert_eq!(Strategy::Inline.to_string(), "inline");
        assert_eq!(Strategy::Chunked.to_string(), "chunked");
        assert_eq!(Strategy::Raw.to_string(), "raw");
    }

    proptest! {
        #[test]
        fn for_length_is_strict_greater_than(length in any::<u64>()) {
            let chunked = Strategy::for_length(length) == Strategy::Chunked;
            prop_assert_eq!(chunked, length > INLINE_THRESHOLD);
        }

        #[test]
        fn for_length_is_monotonic(a in any::<u64>(), b in any::<u64>()) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            if Strategy::for_length(lo) == Strategy::Chunked {
                prop_assert_eq!(Strategy::for_length(hi), Strategy::Chunked);
            }
        }
    }
}
