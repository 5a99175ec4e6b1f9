//! The per-node hybrid logical clock.
//!
//! One [`HybridClock`] instance is shared by every thread on a node; all
//! mutation funnels through a single packed `AtomicU64` register holding
//! the last issued timestamp, committed with a compare-and-exchange loop
//! so no lock ever spans the wall-clock read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::timestamp::{HlcTimestamp, MsgTimestamp};
use crate::wall::{SystemClock, WallClock};

/// Opaque node identifier supplied by the membership layer. Only used to
/// attribute clock updates in diagnostics; it never affects the computed
/// timestamp.
pub type NodeId = u64;

#[derive(Debug, Default)]
struct ClockStats {
    local_advances: AtomicU64,
    merges: AtomicU64,
    overflow_bumps: AtomicU64,
    cas_retries: AtomicU64,
    remote_drift_events: AtomicU64,
    max_remote_drift_ms: AtomicU64,
    last_update_source: AtomicU64,
}

/// Point-in-time copy of a clock's diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockStatsSnapshot {
    /// Timestamps issued for local events.
    pub local_advances: u64,
    /// Timestamps issued for message receipts.
    pub merges: u64,
    /// Times the logical counter wrapped and pushed the physical
    /// component one ms ahead of the wall clock.
    pub overflow_bumps: u64,
    /// Commit races lost to a concurrent advance.
    pub cas_retries: u64,
    /// Merges whose send timestamp was ahead of the local wall reading.
    pub remote_drift_events: u64,
    /// Largest observed lead of a remote send timestamp over the local
    /// wall reading, in ms.
    pub max_remote_drift_ms: u64,
    /// Source of the most recent merge, if any merge happened.
    pub last_update_source: Option<NodeId>,
}

/// A node's hybrid logical clock.
///
/// Timestamps issued by one instance are strictly increasing across all
/// threads, and a timestamp issued for a message receipt is always greater
/// than the received send timestamp. Each process wires exactly one
/// instance per node; tests construct as many independent clocks as they
/// need, usually over a [`crate::wall::ManualClock`].
pub struct HybridClock {
    last: AtomicU64,
    wall: Arc<dyn WallClock>,
    stats: ClockStats,
}

impl HybridClock {
    /// Clock over the system wall clock. The first issued timestamp adopts
    /// the current wall reading with a zero logical component.
    pub fn new() -> Self {
        Self::with_wall(Arc::new(SystemClock))
    }

    /// Clock over an injected wall-clock source.
    pub fn with_wall(wall: Arc<dyn WallClock>) -> Self {
        Self {
            // Seeded below every issuable value so the first advance
            // adopts the wall reading as (wall, 0).
            last: AtomicU64::new(HlcTimestamp::ZERO.as_raw()),
            wall,
            stats: ClockStats::default(),
        }
    }

    /// Issues a timestamp for a local event.
    ///
    /// The result is strictly greater than every timestamp previously
    /// issued by this clock, including by concurrently racing callers, and
    /// its physical component is at least the current wall reading.
    pub fn now(&self) -> HlcTimestamp {
        let next = loop {
            let last_raw = self.last.load(Ordering::Acquire);
            let wall_ms = self.wall.now_ms();
            let last = HlcTimestamp::from_raw(last_raw);
            let next = advance_local(last, wall_ms);

            match self.last.compare_exchange_weak(
                last_raw,
                next.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if next.physical_ms() > last.physical_ms().max(wall_ms) {
                        self.stats.overflow_bumps.fetch_add(1, Ordering::Relaxed);
                    }
                    break next;
                }
                Err(_) => {
                    self.stats.cas_retries.fetch_add(1, Ordering::Relaxed);
                }
            }
        };

        self.stats.local_advances.fetch_add(1, Ordering::Relaxed);
        next
    }

    /// Merges a received send timestamp into the clock and issues the
    /// matching receive timestamp.
    ///
    /// The returned pair satisfies `recv > send` and `recv` is strictly
    /// greater than everything this clock issued before the call, which is
    /// the causal "send happens-before receipt" guarantee. `source` feeds
    /// diagnostics only.
    pub fn update(&self, source: NodeId, send_ts: HlcTimestamp) -> MsgTimestamp {
        let recv = loop {
            let last_raw = self.last.load(Ordering::Acquire);
            let wall_ms = self.wall.now_ms();
            let last = HlcTimestamp::from_raw(last_raw);
            let next = merge_remote(last, send_ts, wall_ms);

            match self.last.compare_exchange_weak(
                last_raw,
                next.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let ceiling = last
                        .physical_ms()
                        .max(send_ts.physical_ms())
                        .max(wall_ms);
                    if next.physical_ms() > ceiling {
                        self.stats.overflow_bumps.fetch_add(1, Ordering::Relaxed);
                    }

                    let drift_ms = send_ts.physical_ms().saturating_sub(wall_ms);
                    if drift_ms > 0 {
                        self.stats.remote_drift_events.fetch_add(1, Ordering::Relaxed);
                        self.stats
                            .max_remote_drift_ms
                            .fetch_max(drift_ms, Ordering::Relaxed);
                        log::debug!(
                            "hlc: merge from node {source} leads the local wall clock by {drift_ms} ms"
                        );
                    }
                    break next;
                }
                Err(_) => {
                    self.stats.cas_retries.fetch_add(1, Ordering::Relaxed);
                }
            }
        };

        self.stats
            .last_update_source
            .store(source, Ordering::Relaxed);
        self.stats.merges.fetch_add(1, Ordering::Relaxed);

        MsgTimestamp {
            send: send_ts,
            recv,
        }
    }

    /// Reads the last issued timestamp without advancing the clock. A
    /// clock that has issued nothing yet reads as [`HlcTimestamp::ZERO`].
    pub fn current(&self) -> HlcTimestamp {
        HlcTimestamp::from_raw(self.last.load(Ordering::Acquire))
    }

    /// Snapshot of the diagnostic counters.
    pub fn stats(&self) -> ClockStatsSnapshot {
        let merges = self.stats.merges.load(Ordering::Relaxed);
        ClockStatsSnapshot {
            local_advances: self.stats.local_advances.load(Ordering::Relaxed),
            merges,
            overflow_bumps: self.stats.overflow_bumps.load(Ordering::Relaxed),
            cas_retries: self.stats.cas_retries.load(Ordering::Relaxed),
            remote_drift_events: self.stats.remote_drift_events.load(Ordering::Relaxed),
            max_remote_drift_ms: self.stats.max_remote_drift_ms.load(Ordering::Relaxed),
            last_update_source: (merges > 0)
                .then(|| self.stats.last_update_source.load(Ordering::Relaxed)),
        }
    }

    /// Writes the current state to the log sink; `verbose` adds the
    /// internal counters. Has no effect on clock semantics.
    pub fn dump(&self, verbose: bool) {
        let now = self.current();
        log::info!(
            "hlc state: {now} (physical {} ms, logical {})",
            now.physical_ms(),
            now.logical()
        );

        if verbose {
            let stats = self.stats();
            log::info!(
                "hlc counters: local_advances={} merges={} overflow_bumps={} cas_retries={}",
                stats.local_advances,
                stats.merges,
                stats.overflow_bumps,
                stats.cas_retries
            );
            log::info!(
                "hlc remote: drift_events={} max_drift_ms={} last_update_source={:?}",
                stats.remote_drift_events,
                stats.max_remote_drift_ms,
                stats.last_update_source
            );
        }
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Next timestamp for a local event: the physical component never goes
/// backward, same-millisecond events count up the logical component, and a
/// wrapped logical counter pushes the physical component one ms ahead so
/// the result is always strictly greater than `last`.
fn advance_local(last: HlcTimestamp, wall_ms: u64) -> HlcTimestamp {
    let physical = last.physical_ms().max(wall_ms);
    if physical == last.physical_ms() {
        match last.logical().checked_add(1) {
            Some(logical) => HlcTimestamp::new(physical, logical),
            None => HlcTimestamp::new(physical + 1, 0),
        }
    } else {
        HlcTimestamp::new(physical, 0)
    }
}

/// Receive timestamp for a message carrying `send`: the classic hybrid
/// logical clock merge. The candidate physical component is the max of the
/// local state, the sender's, and the wall reading; the logical component
/// continues whichever counter that maximum ties with, or resets when the
/// wall clock alone drives it forward.
fn merge_remote(last: HlcTimestamp, send: HlcTimestamp, wall_ms: u64) -> HlcTimestamp {
    let physical = last.physical_ms().max(send.physical_ms()).max(wall_ms);

    let logical = if physical == last.physical_ms() && physical == send.physical_ms() {
        last.logical().max(send.logical()).checked_add(1)
    } else if physical == last.physical_ms() {
        last.logical().checked_add(1)
    } else if physical == send.physical_ms() {
        send.logical().checked_add(1)
    } else {
        Some(0)
    };

    match logical {
        Some(logical) => HlcTimestamp::new(physical, logical),
        None => HlcTimestamp::new(physical + 1, 0),
    }
}
