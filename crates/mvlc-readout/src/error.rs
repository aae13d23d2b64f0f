use mvlc_command::{CommandError, ParseError};
use mvlc_frame::FrameError;

/// Errors raised while setting up or running a readout.
///
/// Stream anomalies found while parsing are never errors; they are counted
/// in [`ParserCounters`](crate::ParserCounters).
#[derive(Debug, thiserror::Error)]
pub enum ReadoutError {
    /// Reading from the data pipe failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A module group may contain at most one block read.
    #[error("event {event}: group '{group}' contains more than one block read")]
    MultipleBlockReads { event: usize, group: String },

    #[error("{count} readout stacks configured, at most {max} are available")]
    TooManyStacks { count: usize, max: usize },

    #[error("stack '{stack}' group '{group}' command {index}: {source}")]
    Command {
        stack: String,
        group: String,
        index: usize,
        #[source]
        source: ParseError,
    },

    #[error("stack '{stack}' group '{group}': '{command}' is not a stack command")]
    NotAStackCommand {
        stack: String,
        group: String,
        command: String,
    },

    #[error(transparent)]
    Builder(#[from] CommandError),

    #[error("invalid readout config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn readout worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("readout worker thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, ReadoutError>;
