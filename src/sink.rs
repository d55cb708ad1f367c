//! Observability sinks.
//!
//! Components receive an [`EventSink`] at construction and report notable
//! events to it as [`Observation`]s. Diagnostics still go through `tracing`;
//! the sink carries the events a front end or a log file wants to show.

use libp2p::PeerId;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::p2p::telemetry::NodeStats;

/// A notable event emitted by a component.
#[derive(Debug, Clone)]
pub enum Observation {
    PeerDiscovered {
        peer: PeerId,
        source: &'static str,
    },
    PeerConnected {
        peer: PeerId,
        source: &'static str,
    },
    /// Every connection attempt for an announcement failed.
    PeerAbandoned {
        peer: PeerId,
        attempts: u32,
        error: String,
    },
    /// A discovery queue was full and the peer was discarded.
    PeerDropped {
        peer: PeerId,
        source: &'static str,
    },
    MessageReceived {
        room: String,
        nick: String,
    },
    Telemetry(NodeStats),
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::PeerDiscovered { peer, source } => {
                write!(f, "{source}: discovered peer {peer}")
            }
            Observation::PeerConnected { peer, source } => {
                write!(f, "{source}: connected to peer {peer}")
            }
            Observation::PeerAbandoned {
                peer,
                attempts,
                error,
            } => write!(
                f,
                "gave up on peer {peer} after {attempts} attempts: {error}"
            ),
            Observation::PeerDropped { peer, source } => {
                write!(f, "{source}: peer queue full, dropped {peer}")
            }
            Observation::MessageReceived { room, nick } => {
                write!(f, "room {room}: message from {nick}")
            }
            Observation::Telemetry(stats) => write!(f, "node {} stats: {stats}", stats.peer_id),
        }
    }
}

/// Receives observations from any task; implementations serialize their own writes.
pub trait EventSink: Send + Sync {
    fn emit(&self, observation: &Observation);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Forwards observations to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, observation: &Observation) {
        match observation {
            Observation::PeerAbandoned { .. } => tracing::error!("{observation}"),
            Observation::PeerDropped { .. } => tracing::warn!("{observation}"),
            Observation::MessageReceived { .. } => tracing::debug!("{observation}"),
            _ => tracing::info!("{observation}"),
        }
    }
}

/// Writes one line per observation into a shared writer (UI pane, file, buffer).
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriterSink<File> {
    /// Appends to `path`, creating it if needed.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> EventSink for WriterSink<W> {
    fn emit(&self, observation: &Observation) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{observation}").and_then(|_| writer.flush()) {
            tracing::debug!("sink write failed: {e}");
        }
    }
}

/// Fans each observation out to several sinks.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<SharedSink>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for CompositeSink {
    fn emit(&self, observation: &Observation) {
        for sink in &self.sinks {
            sink.emit(observation);
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _observation: &Observation) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_sink_writes_lines() {
        let sink = WriterSink::new(Vec::new());
        let peer = PeerId::random();
        sink.emit(&Observation::PeerDropped {
            peer,
            source: "mdns",
        });
        sink.emit(&Observation::MessageReceived {
            room: "general".to_string(),
            nick: "alice".to_string(),
        });

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("mdns: peer queue full, dropped {peer}"));
        assert_eq!(lines[1], "room general: message from alice");
    }

    #[test]
    fn test_composite_sink_fans_out() {
        let first = Arc::new(WriterSink::new(Vec::new()));
        let second = Arc::new(WriterSink::new(Vec::new()));
        let composite = CompositeSink::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(NullSink));
        assert_eq!(composite.len(), 3);

        composite.emit(&Observation::PeerConnected {
            peer: PeerId::random(),
            source: "dht",
        });
        drop(composite);

        for sink in [first, second] {
            let sink = Arc::try_unwrap(sink).ok().unwrap();
            let out = String::from_utf8(sink.into_inner()).unwrap();
            assert!(out.starts_with("dht: connected to peer"));
        }
    }
}
