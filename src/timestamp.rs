//! Packed hybrid timestamps and the pure ordering/arithmetic operations
//! defined on them. The clock itself lives in [`crate::clock`].

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TimestampParseError;

/// Bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 16;

const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Largest physical component a timestamp can carry (48 bits of ms).
pub const PHYSICAL_MAX_MS: u64 = (1 << 48) - 1;

/// A hybrid logical clock timestamp.
///
/// The most significant 48 bits are the physical component (milliseconds
/// since the UNIX epoch) and the least significant 16 bits are the logical
/// component. The packed `u64` is what travels between nodes in message
/// headers, so the bit layout is a cross-node compatibility contract:
/// serde serializes the bare integer, nothing else.
///
/// Comparing two timestamps is unsigned comparison of the packed values.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HlcTimestamp(u64);

impl HlcTimestamp {
    /// Sentinel below every issuable timestamp.
    pub const ZERO: HlcTimestamp = HlcTimestamp(0);

    /// Packs a physical and a logical component into one timestamp.
    ///
    /// Panics if `physical_ms` does not fit in 48 bits. That is a
    /// programming error, not a runtime condition: a wall clock within a
    /// few thousand years of the epoch always fits.
    pub fn new(physical_ms: u64, logical: u16) -> Self {
        assert!(
            physical_ms <= PHYSICAL_MAX_MS,
            "physical component {physical_ms} ms does not fit in 48 bits"
        );
        Self((physical_ms << LOGICAL_BITS) | u64::from(logical))
    }

    /// Reinterprets a wire value as a timestamp. Every `u64` is a valid
    /// encoding, so this cannot fail.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The packed wire value.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// The physical component: milliseconds since the UNIX epoch.
    ///
    /// This doubles as the approximate wall-time reading of the node that
    /// issued the timestamp.
    pub const fn physical_ms(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// The logical component: the event counter within one millisecond.
    pub const fn logical(self) -> u16 {
        (self.0 & LOGICAL_MASK) as u16
    }

    /// The physical component as a `SystemTime`.
    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.physical_ms())
    }

    /// Difference of the physical components, `self - other`, in ms.
    ///
    /// This is an estimate, not an elapsed-time measurement: the physical
    /// component jumps non-linearly on logical-counter overflow and on
    /// merges driven by a remote node's clock. Safe for "at least N ms"
    /// lower-bound checks; do not use it for interval statistics or
    /// "at most N ms" upper-bound checks.
    pub const fn diff_ms(self, other: Self) -> i64 {
        self.physical_ms() as i64 - other.physical_ms() as i64
    }

    /// Moves the physical component `ms` milliseconds into the past,
    /// clamping at the epoch. The logical component is zeroed: the result
    /// is a deadline or threshold marker, not an event timestamp.
    pub fn subtract_ms(self, ms: u64) -> Self {
        Self::new(self.physical_ms().saturating_sub(ms), 0)
    }

    /// Orders two timestamps issued by the same node.
    ///
    /// Equal values yield [`CausalOrder::Indeterminate`]: a correctly
    /// functioning clock never issues duplicates, so equality means the
    /// caller compared a timestamp against itself or a stored copy.
    pub fn ordering(self, other: Self) -> CausalOrder {
        match self.0.cmp(&other.0) {
            std::cmp::Ordering::Less => CausalOrder::HappensBefore,
            std::cmp::Ordering::Greater => CausalOrder::HappensAfter,
            std::cmp::Ordering::Equal => CausalOrder::Indeterminate,
        }
    }

    /// Orders a local event against the send event recorded in a receipt
    /// pair.
    ///
    /// The receive timestamp was generated causally after both the send and
    /// everything local at receipt time, so anything at or past it is after
    /// the send. Anything before the send timestamp is before it. A local
    /// timestamp falling inside `[send, recv)` sits in the causal window
    /// opened by the message exchange and cannot be ordered from these
    /// inputs alone; callers break such ties with other data, typically
    /// node identity.
    pub fn send_ordering(self, msg: &MsgTimestamp) -> CausalOrder {
        if self >= msg.recv {
            CausalOrder::HappensAfter
        } else if self < msg.send {
            CausalOrder::HappensBefore
        } else {
            CausalOrder::Indeterminate
        }
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.physical_ms(), self.logical())
    }
}

impl fmt::Debug for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HlcTimestamp({}:{})", self.physical_ms(), self.logical())
    }
}

impl FromStr for HlcTimestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (physical, logical) = s
            .split_once(':')
            .ok_or_else(|| TimestampParseError::Format(s.to_string()))?;

        let physical_ms: u64 = physical
            .parse()
            .map_err(TimestampParseError::InvalidPhysical)?;
        let logical: u16 = logical.parse().map_err(TimestampParseError::InvalidLogical)?;

        if physical_ms > PHYSICAL_MAX_MS {
            return Err(TimestampParseError::PhysicalOutOfRange(physical_ms));
        }

        Ok(Self::new(physical_ms, logical))
    }
}

/// Send and receive timestamps recorded for one received message.
///
/// `send` is copied verbatim from the remote message; `recv` is generated
/// locally by [`crate::clock::HybridClock::update`], which guarantees
/// `recv > send`. That inequality is the causal "send happens-before
/// receipt" edge the rest of the system builds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTimestamp {
    pub send: HlcTimestamp,
    pub recv: HlcTimestamp,
}

/// Outcome of ordering two timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// The first event happened before the second.
    HappensBefore,
    /// The first event happened after the second.
    HappensAfter,
    /// The order cannot be established from the inputs alone.
    Indeterminate,
}

impl fmt::Display for CausalOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CausalOrder::HappensBefore => "happens-before",
            CausalOrder::HappensAfter => "happens-after",
            CausalOrder::Indeterminate => "indeterminate",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_components() {
        let ts = HlcTimestamp::new(1_700_000_000_123, 42);
        assert_eq!(ts.physical_ms(), 1_700_000_000_123);
        assert_eq!(ts.logical(), 42);
    }

    #[test]
    fn pack_accepts_extremes_of_both_ranges() {
        let ts = HlcTimestamp::new(PHYSICAL_MAX_MS, u16::MAX);
        assert_eq!(ts.physical_ms(), PHYSICAL_MAX_MS);
        assert_eq!(ts.logical(), u16::MAX);
        assert_eq!(ts.as_raw(), u64::MAX);

        assert_eq!(HlcTimestamp::new(0, 0), HlcTimestamp::ZERO);
    }

    #[test]
    #[should_panic(expected = "does not fit in 48 bits")]
    fn pack_rejects_oversized_physical() {
        let _ = HlcTimestamp::new(PHYSICAL_MAX_MS + 1, 0);
    }

    #[test]
    fn raw_round_trip() {
        let ts = HlcTimestamp::new(1_000, 7);
        assert_eq!(HlcTimestamp::from_raw(ts.as_raw()), ts);
        assert_eq!(ts.as_raw(), (1_000 << LOGICAL_BITS) | 7);
    }

    #[test]
    fn comparison_is_unsigned_compare_of_packed_value() {
        let a = HlcTimestamp::new(1_000, 2);
        let b = HlcTimestamp::new(1_000, 3);
        let c = HlcTimestamp::new(1_001, 0);

        assert!(a < b);
        assert!(b < c);
        assert!(a.as_raw() < b.as_raw());
        assert!(b.as_raw() < c.as_raw());
    }

    #[test]
    fn ordering_is_a_trichotomy() {
        let a = HlcTimestamp::new(1_000, 1);
        let b = HlcTimestamp::new(1_000, 2);

        assert_eq!(a.ordering(b), CausalOrder::HappensBefore);
        assert_eq!(b.ordering(a), CausalOrder::HappensAfter);
        assert_eq!(a.ordering(a), CausalOrder::Indeterminate);
    }

    #[test]
    fn send_ordering_classifies_the_causal_window() {
        let msg = MsgTimestamp {
            send: HlcTimestamp::new(1_005, 0),
            recv: HlcTimestamp::new(1_005, 1),
        };

        // Before the send.
        assert_eq!(
            HlcTimestamp::new(1_004, 9).send_ordering(&msg),
            CausalOrder::HappensBefore
        );
        // At or past the receive.
        assert_eq!(
            HlcTimestamp::new(1_005, 1).send_ordering(&msg),
            CausalOrder::HappensAfter
        );
        assert_eq!(
            HlcTimestamp::new(1_006, 0).send_ordering(&msg),
            CausalOrder::HappensAfter
        );
        // Inside [send, recv).
        assert_eq!(
            HlcTimestamp::new(1_005, 0).send_ordering(&msg),
            CausalOrder::Indeterminate
        );
    }

    #[test]
    fn send_ordering_window_widens_with_recv() {
        let msg = MsgTimestamp {
            send: HlcTimestamp::new(2_000, 3),
            recv: HlcTimestamp::new(2_010, 0),
        };

        assert_eq!(
            HlcTimestamp::new(2_000, 3).send_ordering(&msg),
            CausalOrder::Indeterminate
        );
        assert_eq!(
            HlcTimestamp::new(2_009, 65_535).send_ordering(&msg),
            CausalOrder::Indeterminate
        );
        assert_eq!(
            HlcTimestamp::new(2_010, 0).send_ordering(&msg),
            CausalOrder::HappensAfter
        );
    }

    #[test]
    fn diff_ms_is_antisymmetric_and_ignores_logical() {
        let a = HlcTimestamp::new(5_000, 65_000);
        let b = HlcTimestamp::new(4_000, 1);

        assert_eq!(a.diff_ms(b), 1_000);
        assert_eq!(b.diff_ms(a), -1_000);
        assert_eq!(a.diff_ms(a), 0);
    }

    #[test]
    fn subtract_ms_clamps_at_epoch_and_zeroes_logical() {
        let ts = HlcTimestamp::new(1_000, 55);

        let back = ts.subtract_ms(400);
        assert_eq!(back.physical_ms(), 600);
        assert_eq!(back.logical(), 0);

        let clamped = ts.subtract_ms(5_000);
        assert_eq!(clamped.physical_ms(), 0);
        assert_eq!(clamped.logical(), 0);

        // Subtracting nothing keeps the physical component.
        assert_eq!(ts.subtract_ms(0).physical_ms(), ts.physical_ms());
    }

    #[test]
    fn to_system_time_reflects_physical_component() {
        let ts = HlcTimestamp::new(1_234, 9);
        assert_eq!(ts.to_system_time(), UNIX_EPOCH + Duration::from_millis(1_234));
    }

    #[test]
    fn display_and_parse_round_trip() {
        let ts = HlcTimestamp::new(1_699_999_000_001, 513);
        assert_eq!(ts.to_string(), "1699999000001:513");
        assert_eq!("1699999000001:513".parse::<HlcTimestamp>().unwrap(), ts);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(matches!(
            "1000".parse::<HlcTimestamp>(),
            Err(TimestampParseError::Format(_))
        ));
        assert!(matches!(
            "abc:0".parse::<HlcTimestamp>(),
            Err(TimestampParseError::InvalidPhysical(_))
        ));
        assert!(matches!(
            "1000:70000".parse::<HlcTimestamp>(),
            Err(TimestampParseError::InvalidLogical(_))
        ));
        assert!(matches!(
            "281474976710656:0".parse::<HlcTimestamp>(),
            Err(TimestampParseError::PhysicalOutOfRange(_))
        ));
    }

    #[test]
    fn parse_errors_name_the_offending_component() {
        let err = "abc:0".parse::<HlcTimestamp>().unwrap_err();
        assert!(err.to_string().contains("physical"));

        let err = "1000:xyz".parse::<HlcTimestamp>().unwrap_err();
        assert!(err.to_string().contains("logical"));
    }

    #[test]
    fn serde_wire_shape_is_the_bare_u64() {
        let ts = HlcTimestamp::new(1_000, 2);
        let encoded = bincode::serde::encode_to_vec(ts, bincode::config::standard()).unwrap();
        let raw_encoded =
            bincode::serde::encode_to_vec(ts.as_raw(), bincode::config::standard()).unwrap();
        assert_eq!(encoded, raw_encoded);

        let (decoded, _): (HlcTimestamp, usize) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(decoded, ts);
    }
}
