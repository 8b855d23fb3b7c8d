//! In-memory text pipe with a single pending reader
//!
//! Implements a point-to-point pipe where:
//! - A [`BufferingWriter`] pushes committed chunks into the pipe actor
//! - One [`PipeReader`] pulls text out, suspending while the pipe is empty
//! - Coordination is done by the pipe actor's message order, not by locks
//!
//! # State machine
//!
//! ```text
//!   state          | write(text)                     | read(request)
//!   ---------------+---------------------------------+------------------------------
//!   Empty          | Full(text)                      | WaitingReader(request)
//!   Full(buf)      | Full(buf + text)                | serve, Empty or Full(rest)
//!   WaitingReader  | serve, Empty or Full(leftover)  | reject with ConcurrentRead
//! ```
//!
//! End-of-stream is tracked by a separate `ended` flag: once set, a read on a
//! drained pipe resolves to an empty chunk immediately.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, Stream};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::config::BufferConfig;
use crate::error::PipeError;
use crate::mailbox::{self, Actor, Flow, Mailbox};
use crate::sink::{Emission, Sink};
use crate::writer::BufferingWriter;

// ============================================================================
// Messages
// ============================================================================

/// A read waiting to be served
///
/// Completed with at most `capacity` characters; an empty chunk means
/// end-of-stream.
pub struct ReadRequest {
    capacity: usize,
    reply: oneshot::Sender<Result<String, PipeError>>,
}

impl ReadRequest {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, oneshot::Receiver<Result<String, PipeError>>) {
        let (reply, rx) = oneshot::channel();
        (Self { capacity, reply }, rx)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The caller stopped waiting (its read future was dropped)
    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Deliver `text`. Gives the text back if nobody is listening anymore.
    fn complete(self, text: String) -> Result<(), String> {
        self.reply
            .send(Ok(text))
            .map_err(|returned| returned.unwrap_or_default())
    }

    fn reject(self, err: PipeError) {
        let _ = self.reply.send(Err(err));
    }
}

impl fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadRequest(capacity={}, abandoned={})",
            self.capacity,
            self.is_abandoned()
        )
    }
}

/// Request processed by the pipe actor
#[derive(Debug)]
pub enum PipeMessage {
    /// Committed writer output. Empty text is the end-of-stream signal.
    Write(String),
    Read(ReadRequest),
    /// No further writes will occur
    Done,
    /// The reader side is closed: resolve any pending read and stop
    CloseReader,
}

// ============================================================================
// Actor state
// ============================================================================

#[derive(Debug, Default)]
enum PipeState {
    /// No buffered data, no pending reader
    #[default]
    Empty,
    /// Buffered data, no pending reader
    Full(String),
    /// A reader waits, no data available
    WaitingReader(ReadRequest),
}

/// Split off the first `capacity` characters of `text`, leaving the rest in place
fn take_prefix(text: &mut String, capacity: usize) -> String {
    let split = text
        .char_indices()
        .nth(capacity)
        .map_or(text.len(), |(index, _)| index);
    let rest = text.split_off(split);
    mem::replace(text, rest)
}

/// Put text that a reader did not take back in front of `buffer`
fn restore_state(returned: String, mut buffer: String) -> PipeState {
    buffer.insert_str(0, &returned);
    if buffer.is_empty() {
        PipeState::Empty
    } else {
        PipeState::Full(buffer)
    }
}

struct PipeCore {
    state: PipeState,
    ended: bool,
    debug_hint: String,
}

impl PipeCore {
    fn new(debug_hint: &str) -> Self {
        Self {
            state: PipeState::Empty,
            ended: false,
            debug_hint: debug_hint.to_string(),
        }
    }

    fn on_write(&mut self, text: String) {
        if self.ended {
            warn!(pipe = %self.debug_hint, chars = text.chars().count(), "write after end-of-stream ignored");
            return;
        }

        self.state = match mem::take(&mut self.state) {
            PipeState::Empty => PipeState::Full(text),
            PipeState::Full(mut buffer) => {
                buffer.push_str(&text);
                PipeState::Full(buffer)
            }
            PipeState::WaitingReader(request) => {
                let mut rest = text;
                let chunk = take_prefix(&mut rest, request.capacity);
                match request.complete(chunk) {
                    Ok(()) => {
                        trace!(pipe = %self.debug_hint, leftover = rest.len(), "pending read served");
                        restore_state(String::new(), rest)
                    }
                    Err(returned) => {
                        debug!(pipe = %self.debug_hint, "pending read abandoned, buffering");
                        restore_state(returned, rest)
                    }
                }
            }
        };
    }

    fn on_read(&mut self, request: ReadRequest) {
        if request.capacity == 0 {
            let _ = request.complete(String::new());
            return;
        }

        self.state = match mem::take(&mut self.state) {
            PipeState::Empty if self.ended => {
                let _ = request.complete(String::new());
                PipeState::Empty
            }
            PipeState::Empty => {
                trace!(pipe = %self.debug_hint, "no data, reader waits");
                PipeState::WaitingReader(request)
            }
            PipeState::Full(mut buffer) => {
                let chunk = take_prefix(&mut buffer, request.capacity);
                match request.complete(chunk) {
                    Ok(()) => restore_state(String::new(), buffer),
                    Err(returned) => restore_state(returned, buffer),
                }
            }
            PipeState::WaitingReader(pending) if pending.is_abandoned() => {
                debug!(pipe = %self.debug_hint, "replacing abandoned read");
                self.on_read(request);
                return;
            }
            PipeState::WaitingReader(pending) => {
                error!(pipe = %self.debug_hint, "concurrent read rejected: a read is already pending");
                request.reject(PipeError::ConcurrentRead(self.debug_hint.clone()));
                PipeState::WaitingReader(pending)
            }
        };
    }

    fn on_done(&mut self) {
        if self.ended {
            debug!(pipe = %self.debug_hint, "end-of-stream already signalled");
            return;
        }
        self.ended = true;
        debug!(pipe = %self.debug_hint, "end-of-stream");

        self.state = match mem::take(&mut self.state) {
            PipeState::WaitingReader(request) => {
                let _ = request.complete(String::new());
                PipeState::Empty
            }
            other => other,
        };
    }

    fn on_close_reader(&mut self) {
        match mem::take(&mut self.state) {
            PipeState::WaitingReader(request) => {
                let _ = request.complete(String::new());
            }
            PipeState::Full(buffer) => {
                debug!(pipe = %self.debug_hint, chars = buffer.chars().count(), "reader closed, discarding unread text");
            }
            PipeState::Empty => {}
        }
        debug!(pipe = %self.debug_hint, "reader closed");
    }
}

impl Actor for PipeCore {
    type Message = PipeMessage;

    fn handle(&mut self, message: PipeMessage) -> Flow {
        match message {
            PipeMessage::Write(text) if text.is_empty() => self.on_done(),
            PipeMessage::Write(text) => self.on_write(text),
            PipeMessage::Read(request) => self.on_read(request),
            PipeMessage::Done => self.on_done(),
            PipeMessage::CloseReader => {
                self.on_close_reader();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

// ============================================================================
// Writer side
// ============================================================================

/// Sink that feeds a writer's emissions into the pipe actor
struct PipeFeed {
    mailbox: Mailbox<PipeMessage>,
}

impl Sink for PipeFeed {
    fn emit(&mut self, emission: Emission) {
        let message = match emission {
            Emission::Chunk(text) => PipeMessage::Write(text),
            Emission::Closed => PipeMessage::Done,
        };
        // A closed reader has stopped the pipe actor; the output is discarded.
        self.mailbox.post(message);
    }
}

// ============================================================================
// Reader side
// ============================================================================

/// Reader side of the pipe
///
/// # Thread Safety
///
/// Only one read may be outstanding at a time. Reads take `&self`, so two
/// reads can be polled concurrently; the second one is rejected with
/// [`PipeError::ConcurrentRead`] instead of being queued. A read suspends the
/// calling task, never the thread.
pub struct PipeReader {
    mailbox: Mailbox<PipeMessage>,
    read_size: usize,
    closed: AtomicBool,
}

impl PipeReader {
    fn new(mailbox: Mailbox<PipeMessage>, read_size: usize) -> Self {
        Self {
            mailbox,
            read_size: read_size.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Read up to `capacity` characters.
    ///
    /// Waits until data is available. An empty string means end-of-stream
    /// (or that the reader was closed).
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::ConcurrentRead`] if another read is pending.
    pub async fn read(&self, capacity: usize) -> Result<String, PipeError> {
        if self.is_closed() {
            return Ok(String::new());
        }

        let (request, response) = ReadRequest::new(capacity);
        if !self.mailbox.post(PipeMessage::Read(request)) {
            return Ok(String::new());
        }
        // A dropped reply means the pipe actor is gone: treat as end-of-stream
        response.await.unwrap_or_else(|_| Ok(String::new()))
    }

    /// Read up to `capacity` characters, appending them to `dest`.
    ///
    /// Returns the number of characters copied; 0 means end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::ConcurrentRead`] if another read is pending.
    pub async fn read_into(&self, dest: &mut String, capacity: usize) -> Result<usize, PipeError> {
        let chunk = self.read(capacity).await?;
        dest.push_str(&chunk);
        Ok(chunk.chars().count())
    }

    /// Read until end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::ConcurrentRead`] if another read is pending.
    pub async fn read_to_string(&self) -> Result<String, PipeError> {
        let mut text = String::new();
        while self.read_into(&mut text, self.read_size).await? > 0 {}
        Ok(text)
    }

    /// Consume the reader as a stream of chunks, ending at end-of-stream
    pub fn into_stream(self) -> impl Stream<Item = Result<String, PipeError>> {
        stream::unfold(Some(self), |reader| async move {
            let reader = reader?;
            let result = reader.read(reader.read_size).await;
            match result {
                Ok(chunk) if chunk.is_empty() => None,
                Ok(chunk) => Some((Ok(chunk), Some(reader))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Close the reader. Any in-flight read resolves to end-of-stream and no
    /// further reads are served. Can be called multiple times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!(pipe = %self.mailbox.name(), "PipeReader::close() called on already closed reader");
            return;
        }
        self.mailbox.post(PipeMessage::CloseReader);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipeReader(closed={}, read_size={}, {:?})",
            self.is_closed(),
            self.read_size,
            self.mailbox
        )
    }
}

// ============================================================================
// Pipe
// ============================================================================

/// Writer + reader pair over one pipe actor
pub struct Pipe {
    writer: BufferingWriter,
    reader: PipeReader,
}

impl Pipe {
    /// Create a pipe whose writer flushes according to `config`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn new(config: BufferConfig, debug_hint: &str) -> Self {
        let mailbox = mailbox::spawn(&format!("pipe {debug_hint}"), PipeCore::new(debug_hint));
        let read_size = config.buffer_size();
        let feed = PipeFeed {
            mailbox: mailbox.clone(),
        };
        Self {
            writer: BufferingWriter::new(config, feed, debug_hint),
            reader: PipeReader::new(mailbox, read_size),
        }
    }

    #[must_use]
    pub fn writer(&self) -> &BufferingWriter {
        &self.writer
    }

    #[must_use]
    pub fn reader(&self) -> &PipeReader {
        &self.reader
    }

    #[must_use]
    pub fn into_parts(self) -> (BufferingWriter, PipeReader) {
        (self.writer, self.reader)
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipe(writer={:?}, reader={:?})", self.writer, self.reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    fn read(core: &mut PipeCore, capacity: usize) -> oneshot::Receiver<Result<String, PipeError>> {
        let (request, rx) = ReadRequest::new(capacity);
        core.handle(PipeMessage::Read(request));
        rx
    }

    fn chunk(rx: &mut oneshot::Receiver<Result<String, PipeError>>) -> String {
        rx.try_recv().unwrap().unwrap()
    }

    #[test]
    fn test_take_prefix_counts_chars() {
        let mut text = "héllo".to_string();
        assert_eq!(take_prefix(&mut text, 2), "hé");
        assert_eq!(text, "llo");
        assert_eq!(take_prefix(&mut text, 10), "llo");
        assert_eq!(text, "");
    }

    #[test]
    fn test_write_then_partial_reads() {
        let mut core = PipeCore::new("test");
        core.handle(PipeMessage::Write("ab".into()));
        core.handle(PipeMessage::Write("cd".into()));
        assert!(matches!(core.state, PipeState::Full(ref b) if b == "abcd"));

        assert_eq!(chunk(&mut read(&mut core, 3)), "abc");
        assert!(matches!(core.state, PipeState::Full(ref b) if b == "d"));

        assert_eq!(chunk(&mut read(&mut core, 1)), "d");
        assert!(matches!(core.state, PipeState::Empty));

        core.handle(PipeMessage::Done);
        assert_eq!(chunk(&mut read(&mut core, 1)), "");
    }

    #[test]
    fn test_pending_read_served_by_write_with_leftover() {
        let mut core = PipeCore::new("test");
        let mut rx = read(&mut core, 2);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(core.state, PipeState::WaitingReader(_)));

        core.handle(PipeMessage::Write("xyz".into()));
        assert_eq!(chunk(&mut rx), "xy");
        assert!(matches!(core.state, PipeState::Full(ref b) if b == "z"));
    }

    #[test]
    fn test_pending_read_served_exactly() {
        let mut core = PipeCore::new("test");
        let mut rx = read(&mut core, 8);
        core.handle(PipeMessage::Write("xyz".into()));
        assert_eq!(chunk(&mut rx), "xyz");
        assert!(matches!(core.state, PipeState::Empty));
    }

    #[test]
    fn test_second_read_is_rejected() {
        let mut core = PipeCore::new("test");
        let mut first = read(&mut core, 4);
        let mut second = read(&mut core, 4);

        assert!(matches!(
            second.try_recv(),
            Ok(Err(PipeError::ConcurrentRead(_)))
        ));
        // The first reader is still served
        core.handle(PipeMessage::Write("data".into()));
        assert_eq!(chunk(&mut first), "data");
    }

    #[test]
    fn test_abandoned_read_is_replaced() {
        let mut core = PipeCore::new("test");
        drop(read(&mut core, 4));
        let mut rx = read(&mut core, 4);
        core.handle(PipeMessage::Write("ok".into()));
        assert_eq!(chunk(&mut rx), "ok");
    }

    #[test]
    fn test_abandoned_read_keeps_data() {
        let mut core = PipeCore::new("test");
        drop(read(&mut core, 4));
        core.handle(PipeMessage::Write("kept".into()));
        assert!(matches!(core.state, PipeState::Full(ref b) if b == "kept"));
    }

    #[test]
    fn test_done_resolves_pending_reader() {
        let mut core = PipeCore::new("test");
        let mut rx = read(&mut core, 4);
        core.handle(PipeMessage::Write(String::new()));
        assert_eq!(chunk(&mut rx), "");
        assert!(core.ended);
    }

    #[test]
    fn test_done_keeps_buffered_data_readable() {
        let mut core = PipeCore::new("test");
        core.handle(PipeMessage::Write("tail".into()));
        core.handle(PipeMessage::Done);
        core.handle(PipeMessage::Write("late".into()));
        assert_eq!(chunk(&mut read(&mut core, 100)), "tail");
        assert_eq!(chunk(&mut read(&mut core, 100)), "");
    }

    #[test]
    fn test_zero_capacity_read() {
        let mut core = PipeCore::new("test");
        core.handle(PipeMessage::Write("abc".into()));
        assert_eq!(chunk(&mut read(&mut core, 0)), "");
        assert!(matches!(core.state, PipeState::Full(ref b) if b == "abc"));
    }

    #[test]
    fn test_close_reader_resolves_pending_and_stops() {
        let mut core = PipeCore::new("test");
        let mut rx = read(&mut core, 4);
        assert_eq!(core.handle(PipeMessage::CloseReader), Flow::Stop);
        assert_eq!(chunk(&mut rx), "");
    }
}
