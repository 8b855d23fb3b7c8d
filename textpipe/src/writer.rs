//! Buffering text writer
//!
//! Coalesces many small writes into few downstream emissions:
//! - `write` / `write_line` append to an in-memory buffer
//! - `flush` (explicit or from the periodic timer) emits the buffer as one chunk
//! - `close` flushes, then emits the end-of-stream marker exactly once
//!
//! All requests go through the writer's mailbox, so a timer flush can never
//! race with an application write.

use std::fmt;
use std::mem;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::BufferConfig;
use crate::mailbox::{self, Actor, Flow, Mailbox, WeakMailbox};
use crate::sink::{Emission, Sink};

/// Request processed by the writer actor
pub enum TextMessage {
    Close,
    Flush,
    Write(String),
    WriteLine(String),
}

impl fmt::Debug for TextMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close => write!(f, "Close"),
            Self::Flush => write!(f, "Flush"),
            Self::Write(text) => write!(f, "Write(chars={})", text.chars().count()),
            Self::WriteLine(text) => write!(f, "WriteLine(chars={})", text.chars().count()),
        }
    }
}

// ============================================================================
// Actor state
// ============================================================================

/// State owned by the writer's dispatch loop
struct WriterCore<S> {
    config: BufferConfig,
    buffer: String,
    closed: bool,
    sink: S,
    debug_hint: String,
}

impl<S: Sink> WriterCore<S> {
    fn new(config: BufferConfig, sink: S, debug_hint: &str) -> Self {
        Self {
            buffer: String::with_capacity(config.buffer_size()),
            config,
            closed: false,
            sink,
            debug_hint: debug_hint.to_string(),
        }
    }

    /// Emit the buffered text, if any, and start a fresh buffer
    fn emit_pending(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let chunk = mem::replace(
            &mut self.buffer,
            String::with_capacity(self.config.buffer_size()),
        );
        trace!(writer = %self.debug_hint, bytes = chunk.len(), "emitting chunk");
        self.sink.emit(Emission::Chunk(chunk));
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.emit_pending();
        self.closed = true;
        debug!(writer = %self.debug_hint, "writer closed");
        self.sink.emit(Emission::Closed);
    }
}

impl<S: Sink> Actor for WriterCore<S> {
    type Message = TextMessage;

    fn handle(&mut self, message: TextMessage) -> Flow {
        if self.closed {
            warn!(writer = %self.debug_hint, ?message, "writer is closed, request ignored");
            return Flow::Stop;
        }

        match message {
            TextMessage::Write(text) => self.buffer.push_str(&text),
            TextMessage::WriteLine(text) => {
                self.buffer.push_str(&text);
                self.buffer.push_str(self.config.line_terminator());
            }
            TextMessage::Flush => self.emit_pending(),
            TextMessage::Close => {
                self.shutdown();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Dropping every writer handle without `close` still ends the stream
    fn stopped(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to a buffering writer
///
/// # Thread Safety
///
/// The handle is cheap to clone and every method takes `&self`, so any number
/// of threads or tasks may write concurrently. No method ever blocks: requests
/// are queued and applied by the writer's actor in the order they were
/// enqueued. There is no backpressure; a producer that outpaces the sink
/// grows memory without bound.
///
/// Once closed, `write`, `write_line`, `flush` and `close` are silent no-ops.
#[derive(Clone)]
pub struct BufferingWriter {
    mailbox: Mailbox<TextMessage>,
}

impl BufferingWriter {
    /// Start a writer that emits into `sink`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn new(config: BufferConfig, sink: impl Sink, debug_hint: &str) -> Self {
        let flush_interval = config.flush_interval();
        let core = WriterCore::new(config, sink, debug_hint);
        let mailbox = mailbox::spawn(&format!("writer {debug_hint}"), core);

        if flush_interval.is_zero() {
            debug!(writer = %debug_hint, "flush timer disabled");
        } else {
            tokio::spawn(flush_timer(mailbox.downgrade(), flush_interval));
        }

        Self { mailbox }
    }

    /// Append `text` to the buffer
    pub fn write(&self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.mailbox.post(TextMessage::Write(text));
    }

    /// Append `text` followed by the configured line terminator
    pub fn write_line(&self, text: impl Into<String>) {
        self.mailbox.post(TextMessage::WriteLine(text.into()));
    }

    /// Emit the buffered text as one chunk. Nothing is emitted if the buffer is empty.
    pub fn flush(&self) {
        self.mailbox.post(TextMessage::Flush);
    }

    /// Flush and emit the end-of-stream marker. Can be called multiple times.
    pub fn close(&self) {
        if !self.mailbox.post(TextMessage::Close) {
            trace!(writer = %self.mailbox.name(), "close on already closed writer");
        }
    }

    /// Whether the writer's actor has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Resolves once the writer has closed and delivered its last emission
    pub async fn closed(&self) {
        self.mailbox.closed().await;
    }
}

impl fmt::Write for BufferingWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        BufferingWriter::write(self, s);
        Ok(())
    }
}

impl fmt::Debug for BufferingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferingWriter({:?})", self.mailbox)
    }
}

/// Post `Flush` every `period` until the writer goes away
async fn flush_timer(mailbox: WeakMailbox<TextMessage>, period: time::Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(mailbox) = mailbox.upgrade() else {
            break;
        };
        if !mailbox.post(TextMessage::Flush) {
            break;
        }
    }
    trace!("flush timer stopped");
}
