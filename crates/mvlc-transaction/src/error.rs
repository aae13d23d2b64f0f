use mvlc_command::CommandError;
use mvlc_frame::{FrameFlags, FrameHeader};
use mvlc_transport::TransportError;

/// Errors that can occur during a command pipe transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// Writing the request or reading the response failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every read attempt timed out.
    #[error("no response after {attempts} read attempts")]
    Timeout { attempts: u32 },

    /// An echoed word differs from the one sent.
    #[error("mirror mismatch at word {index}: sent 0x{expected:08x}, received 0x{actual:08x}")]
    MirrorMismatch { index: usize, expected: u32, actual: u32 },

    /// The echo is shorter or longer than the request.
    #[error("mirror response has {actual} words, expected {expected}")]
    MirrorLength { expected: usize, actual: usize },

    /// A stack response does not start with the transaction's marker.
    #[error("stack response reference 0x{actual:08x} does not match 0x{expected:08x}")]
    StackReferenceMismatch { expected: u32, actual: u32 },

    /// The stack frame reports a VME timeout, bus error or syntax error.
    #[error("stack execution failed: {flags}")]
    StackExecution { flags: FrameFlags },

    /// A frame of a type not valid at this point of the exchange.
    #[error("unexpected response frame: {0}")]
    UnexpectedFrame(FrameHeader),

    #[error("unexpected response size: expected {expected} words, got {actual}")]
    UnexpectedResponseSize { expected: usize, actual: usize },

    #[error("response exceeds {max} words")]
    ResponseTooLarge { max: usize },

    /// The request could not be built.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A previous holder of the pipe lock panicked.
    #[error("command pipe lock poisoned")]
    Poisoned,
}

impl TransactionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransactionError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;
