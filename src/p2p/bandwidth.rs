//! Byte accounting for the transport, sampled by telemetry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[allow(deprecated)]
use libp2p::bandwidth::BandwidthSinks;

/// Protocol id gossipsub traffic is accounted under.
pub const GOSSIPSUB_PROTOCOL: &str = "/meshsub/1.1.0";

#[derive(Debug, Default)]
struct Counters {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl Counters {
    fn totals(&self) -> BandwidthTotals {
        BandwidthTotals {
            total_in: self.inbound.load(Ordering::Relaxed),
            total_out: self.outbound.load(Ordering::Relaxed),
        }
    }
}

/// Where the aggregate figure comes from.
#[allow(deprecated)]
enum WireMeter {
    /// libp2p's muxer wrapper; sees every byte of every substream.
    Muxer(Arc<BandwidthSinks>),
    /// Fed through [`BandwidthCounter::log_wire_recv`] and
    /// [`BandwidthCounter::log_wire_sent`].
    Counted(Counters),
}

#[allow(deprecated)]
impl WireMeter {
    fn totals(&self) -> BandwidthTotals {
        match self {
            WireMeter::Muxer(sinks) => BandwidthTotals {
                total_in: sinks.total_inbound(),
                total_out: sinks.total_outbound(),
            },
            WireMeter::Counted(counters) => counters.totals(),
        }
    }
}

/// Cumulative byte counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthTotals {
    pub total_in: u64,
    pub total_out: u64,
}

/// Aggregate transport bytes plus per-protocol payload counters.
///
/// The aggregate covers all traffic the transport carries, including
/// protocol chatter and messages relayed for other peers. Protocol counters
/// only see what the node itself publishes or receives.
pub struct BandwidthCounter {
    wire: WireMeter,
    protocols: RwLock<HashMap<String, Arc<Counters>>>,
}

impl Default for BandwidthCounter {
    fn default() -> Self {
        Self {
            wire: WireMeter::Counted(Counters::default()),
            protocols: RwLock::default(),
        }
    }
}

impl fmt::Debug for BandwidthCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandwidthCounter")
            .field("totals", &self.totals())
            .finish_non_exhaustive()
    }
}

impl BandwidthCounter {
    /// A counter whose aggregate is fed by hand.
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter whose aggregate is read from a libp2p transport wrapped
    /// with bandwidth logging.
    #[allow(deprecated)]
    pub fn from_transport(sinks: Arc<BandwidthSinks>) -> Self {
        Self {
            wire: WireMeter::Muxer(sinks),
            protocols: RwLock::default(),
        }
    }

    /// No-op when the aggregate comes from the transport.
    pub fn log_wire_recv(&self, bytes: usize) {
        if let WireMeter::Counted(c) = &self.wire {
            c.inbound.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    /// No-op when the aggregate comes from the transport.
    pub fn log_wire_sent(&self, bytes: usize) {
        if let WireMeter::Counted(c) = &self.wire {
            c.outbound.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn log_recv(&self, protocol: &str, bytes: usize) {
        self.counters(protocol)
            .inbound
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn log_sent(&self, protocol: &str, bytes: usize) {
        self.counters(protocol)
            .outbound
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Everything the transport has carried.
    pub fn totals(&self) -> BandwidthTotals {
        self.wire.totals()
    }

    pub fn totals_for(&self, protocol: &str) -> BandwidthTotals {
        let protocols = self
            .protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        protocols
            .get(protocol)
            .map(|c| c.totals())
            .unwrap_or_default()
    }

    fn counters(&self, protocol: &str) -> Arc<Counters> {
        if let Some(c) = self
            .protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(protocol)
        {
            return c.clone();
        }
        self.protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(protocol.to_string())
            .or_default()
            .clone()
    }
}

/// Totals plus rates in bytes per second since the previous sample.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BandwidthStats {
    pub total_in: u64,
    pub total_out: u64,
    pub rate_in: f64,
    pub rate_out: f64,
}

impl fmt::Display for BandwidthStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={}B ({:.1}B/s) out={}B ({:.1}B/s)",
            self.total_in, self.rate_in, self.total_out, self.rate_out
        )
    }
}

/// Turns successive totals into rates. Owned by the sampling task.
#[derive(Debug, Default)]
pub struct RateSampler {
    previous: HashMap<String, (Instant, BandwidthTotals)>,
}

impl RateSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, key: &str, now: Instant, totals: BandwidthTotals) -> BandwidthStats {
        let mut stats = BandwidthStats {
            total_in: totals.total_in,
            total_out: totals.total_out,
            ..Default::default()
        };
        if let Some((then, before)) = self.previous.get(key) {
            let elapsed = now.saturating_duration_since(*then).as_secs_f64();
            if elapsed > 0.0 {
                stats.rate_in = totals.total_in.saturating_sub(before.total_in) as f64 / elapsed;
                stats.rate_out =
                    totals.total_out.saturating_sub(before.total_out) as f64 / elapsed;
            }
        }
        self.previous.insert(key.to_string(), (now, totals));
        stats
    }
}
