//! Hybrid logical clock for distributed clusters: 64-bit timestamps that
//! order events causally across nodes while tracking wall time.

pub mod clock;
pub mod error;
pub mod timestamp;
pub mod wall;

// Public exports
pub use clock::{ClockStatsSnapshot, HybridClock, NodeId};
pub use error::TimestampParseError;
pub use timestamp::{CausalOrder, HlcTimestamp, MsgTimestamp};
pub use wall::{ManualClock, SystemClock, WallClock};
