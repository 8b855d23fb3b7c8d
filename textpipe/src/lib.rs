pub mod config;
pub mod error;
pub mod mailbox;
pub mod pipe;
pub mod sink;
pub mod writer;

// Re-export configuration types for convenience
pub use config::{BufferConfig, Encoding};

// Re-export error types for convenience
pub use error::{ConfigError, PipeError};

// Re-export the actor engine
pub use mailbox::{Actor, Flow, Mailbox, WeakMailbox};

// Re-export pipe types for convenience
pub use pipe::{Pipe, PipeMessage, PipeReader, ReadRequest};

// Re-export sinks
pub use sink::{ChannelSink, Emission, IoSink, MemorySink, Sink};

// Re-export writer types
pub use writer::{BufferingWriter, TextMessage};
