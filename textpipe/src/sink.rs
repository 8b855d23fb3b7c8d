//! Downstream consumers of a writer's output
//!
//! A [`Sink`] receives what a [`crate::BufferingWriter`] commits, in order:
//! one [`Emission::Chunk`] per non-empty flush and a single
//! [`Emission::Closed`] when the writer closes. Any `FnMut(Emission)` closure
//! is a sink.

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Encoding;

/// One committed unit of writer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Text accumulated since the previous flush, never empty
    Chunk(String),
    /// End of stream, delivered exactly once
    Closed,
}

/// Receiver of writer output
///
/// Called from the writer's actor task, never concurrently.
pub trait Sink: Send + 'static {
    fn emit(&mut self, emission: Emission);
}

impl<F> Sink for F
where
    F: FnMut(Emission) + Send + 'static,
{
    fn emit(&mut self, emission: Emission) {
        self(emission);
    }
}

// ============================================================================
// ChannelSink
// ============================================================================

/// Forwards emissions into a tokio channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Emission>,
}

impl ChannelSink {
    /// Create the sink together with the receiving end of its channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Emission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn emit(&mut self, emission: Emission) {
        if let Err(e) = self.tx.send(emission) {
            debug!(emission = ?e.0, "channel sink receiver dropped");
        }
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// Records emissions in memory
///
/// Clones share the same record, so keep one clone to inspect what a writer
/// emitted.
#[derive(Clone, Default)]
pub struct MemorySink {
    emissions: Arc<Mutex<Vec<Emission>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    #[must_use]
    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions.lock().clone()
    }

    /// Concatenation of all chunks
    #[must_use]
    pub fn text(&self) -> String {
        self.emissions
            .lock()
            .iter()
            .filter_map(|e| match e {
                Emission::Chunk(text) => Some(text.as_str()),
                Emission::Closed => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.emissions.lock().contains(&Emission::Closed)
    }
}

impl Sink for MemorySink {
    fn emit(&mut self, emission: Emission) {
        self.emissions.lock().push(emission);
    }
}

impl fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let emissions = self.emissions.lock();
        write!(f, "MemorySink(emissions={})", emissions.len())
    }
}

// ============================================================================
// IoSink
// ============================================================================

/// Writes each chunk, encoded, to a byte writer and flushes it on close
///
/// Typical targets are `std::io::stdout()` or a child process pipe. The
/// first I/O error is logged and the sink goes inert: the writer side has no
/// channel to report downstream failures.
pub struct IoSink<W> {
    out: W,
    encoding: Encoding,
    failed: bool,
    debug_hint: String,
}

impl<W: io::Write + Send + 'static> IoSink<W> {
    #[must_use]
    pub fn new(out: W, encoding: Encoding, debug_hint: &str) -> Self {
        Self {
            out,
            encoding,
            failed: false,
            debug_hint: debug_hint.to_string(),
        }
    }

    fn try_emit(&mut self, emission: Emission) -> io::Result<()> {
        match emission {
            Emission::Chunk(text) => self.out.write_all(&self.encoding.encode(&text)),
            Emission::Closed => self.out.flush(),
        }
    }
}

impl<W: io::Write + Send + 'static> Sink for IoSink<W> {
    fn emit(&mut self, emission: Emission) {
        if self.failed {
            return;
        }
        if let Err(e) = self.try_emit(emission) {
            warn!(sink = %self.debug_hint, error = %e, "io sink failed, dropping further output");
            self.failed = true;
        }
    }
}

impl<W> fmt::Debug for IoSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoSink(hint={}, encoding={}, failed={})",
            self.debug_hint,
            self.encoding.label(),
            self.failed
        )
    }
}
