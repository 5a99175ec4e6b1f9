use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::{Deserialize, Serialize};

use tempo::{HlcTimestamp, HybridClock, ManualClock, NodeId};

/// Wall reading used by `stress --frozen`; an arbitrary late-2023 instant.
const FROZEN_BASE_MS: u64 = 1_700_000_000_000;

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Inspect and exercise hybrid logical clock timestamps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a timestamp into its physical and logical components
    Decode {
        /// Timestamp as a raw wire value or "<physical_ms>:<logical>"
        ts: String,

        /// Emit JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Estimate the difference between two timestamps in milliseconds
    Diff { ts1: String, ts2: String },

    /// Order two timestamps issued by the same node
    Order { ts1: String, ts2: String },

    /// Run two simulated nodes exchanging stamped messages, then dump both clocks
    Stress {
        /// Worker threads per node
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Events issued per worker thread
        #[arg(long, default_value_t = 100_000)]
        events: usize,

        /// Percentage of events that send a message to the peer node
        #[arg(long, default_value_t = 20)]
        send_pct: u8,

        /// Freeze the wall clock to maximize logical-counter churn
        #[arg(long)]
        frozen: bool,

        /// Emit per-node results and counters as JSON
        #[arg(long)]
        json: bool,
    },
}

/// A stamped message as the fabric layer would put it on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FabricMsg {
    source: NodeId,
    send_ts: HlcTimestamp,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn parse_timestamp(s: &str) -> Result<HlcTimestamp> {
    // Raw wire values and the display form are both accepted.
    if let Ok(raw) = s.parse::<u64>() {
        return Ok(HlcTimestamp::from_raw(raw));
    }
    s.parse::<HlcTimestamp>()
        .with_context(|| format!("cannot parse timestamp '{s}'"))
}

fn make_clock(frozen: bool) -> Arc<HybridClock> {
    if frozen {
        Arc::new(HybridClock::with_wall(Arc::new(ManualClock::new(
            FROZEN_BASE_MS,
        ))))
    } else {
        Arc::new(HybridClock::new())
    }
}

fn spawn_workers(
    node_id: NodeId,
    clock: &Arc<HybridClock>,
    peer_tx: &mpsc::Sender<Vec<u8>>,
    threads: usize,
    events: usize,
    send_pct: u8,
) -> Vec<thread::JoinHandle<Vec<u64>>> {
    (0..threads)
        .map(|_| {
            let clock = Arc::clone(clock);
            let peer_tx = peer_tx.clone();
            thread::spawn(move || {
                let mut rng = rand::rng();
                let mut issued = Vec::with_capacity(events);
                for _ in 0..events {
                    let ts = clock.now();
                    issued.push(ts.as_raw());

                    if rng.random_range(0u8..100) < send_pct {
                        let msg = FabricMsg {
                            source: node_id,
                            send_ts: ts,
                        };
                        let bytes = bincode::serde::encode_to_vec(msg, bincode::config::standard())
                            .expect("encode fabric message");
                        // The peer receiver may already be gone on shutdown.
                        let _ = peer_tx.send(bytes);
                    }
                }
                issued
            })
        })
        .collect()
}

fn spawn_receiver(
    clock: &Arc<HybridClock>,
    rx: mpsc::Receiver<Vec<u8>>,
    violations: &Arc<AtomicU64>,
) -> thread::JoinHandle<Vec<u64>> {
    let clock = Arc::clone(clock);
    let violations = Arc::clone(violations);
    thread::spawn(move || {
        let mut issued = Vec::new();
        while let Ok(bytes) = rx.recv() {
            let (msg, _): (FabricMsg, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .expect("decode fabric message");

            let pair = clock.update(msg.source, msg.send_ts);
            if pair.recv <= pair.send {
                violations.fetch_add(1, Ordering::Relaxed);
            }
            issued.push(pair.recv.as_raw());
        }
        issued
    })
}

/// Joins a node's threads, checks per-thread monotonicity, and returns
/// every timestamp the node issued for the uniqueness check.
fn collect_node_timestamps(
    workers: Vec<thread::JoinHandle<Vec<u64>>>,
    receiver: thread::JoinHandle<Vec<u64>>,
) -> Result<Vec<u64>> {
    let mut all = Vec::new();
    for handle in workers {
        let issued = handle.join().expect("worker thread panicked");
        if !issued.windows(2).all(|w| w[0] < w[1]) {
            bail!("a worker thread observed non-increasing timestamps");
        }
        all.extend(issued);
    }
    all.extend(receiver.join().expect("receiver thread panicked"));
    Ok(all)
}

fn run_stress(threads: usize, events: usize, send_pct: u8, frozen: bool, json: bool) -> Result<()> {
    if send_pct > 100 {
        bail!("--send-pct must be between 0 and 100");
    }

    let node_a = make_clock(frozen);
    let node_b = make_clock(frozen);

    let (tx_to_a, rx_a) = mpsc::channel::<Vec<u8>>();
    let (tx_to_b, rx_b) = mpsc::channel::<Vec<u8>>();
    let violations = Arc::new(AtomicU64::new(0));

    let workers_a = spawn_workers(1, &node_a, &tx_to_b, threads, events, send_pct);
    let workers_b = spawn_workers(2, &node_b, &tx_to_a, threads, events, send_pct);
    drop(tx_to_a);
    drop(tx_to_b);

    let recv_a = spawn_receiver(&node_a, rx_a, &violations);
    let recv_b = spawn_receiver(&node_b, rx_b, &violations);

    for (name, clock, workers, receiver) in [
        ("node 1", &node_a, workers_a, recv_a),
        ("node 2", &node_b, workers_b, recv_b),
    ] {
        let mut issued = collect_node_timestamps(workers, receiver)?;
        let total = issued.len();
        issued.sort_unstable();
        issued.dedup();
        if issued.len() != total {
            bail!(
                "{name} issued {} duplicate timestamps out of {total}",
                total - issued.len()
            );
        }

        if json {
            let payload = serde_json::json!({
                "node": name,
                "timestamps": total,
                "state": clock.current().to_string(),
                "stats": clock.stats(),
            });
            println!("{payload}");
        } else {
            println!("{name}: {total} timestamps issued, all unique");
            clock.dump(true);
        }
    }

    let violations = violations.load(Ordering::Relaxed);
    if violations > 0 {
        bail!("{violations} message receipts were not ordered after their send");
    }
    println!("no causal violations observed");
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Decode { ts, json } => {
            let ts = parse_timestamp(&ts)?;
            if json {
                let payload = serde_json::json!({
                    "raw": ts.as_raw(),
                    "physical_ms": ts.physical_ms(),
                    "logical": ts.logical(),
                });
                println!("{payload}");
            } else {
                println!(
                    "raw {}  physical {} ms  logical {}",
                    ts.as_raw(),
                    ts.physical_ms(),
                    ts.logical()
                );
            }
        }
        Command::Diff { ts1, ts2 } => {
            let ts1 = parse_timestamp(&ts1)?;
            let ts2 = parse_timestamp(&ts2)?;
            println!("{} ms", ts1.diff_ms(ts2));
        }
        Command::Order { ts1, ts2 } => {
            let ts1 = parse_timestamp(&ts1)?;
            let ts2 = parse_timestamp(&ts2)?;
            println!("{}", ts1.ordering(ts2));
        }
        Command::Stress {
            threads,
            events,
            send_pct,
            frozen,
            json,
        } => run_stress(threads, events, send_pct, frozen, json)?,
    }

    Ok(())
}
