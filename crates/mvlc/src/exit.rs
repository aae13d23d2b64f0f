use std::fmt;
use std::io;

use mvlc_frame::FrameError;
use mvlc_readout::ReadoutError;
use mvlc_transaction::TransactionError;
use mvlc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(&err), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn transaction_error(context: &str, err: TransactionError) -> CliError {
    let code = match err {
        TransactionError::Transport(inner) => return transport_error(context, inner),
        TransactionError::Timeout { .. } => TIMEOUT,
        TransactionError::MirrorMismatch { .. }
        | TransactionError::MirrorLength { .. }
        | TransactionError::StackReferenceMismatch { .. }
        | TransactionError::UnexpectedFrame(_)
        | TransactionError::UnexpectedResponseSize { .. }
        | TransactionError::ResponseTooLarge { .. } => DATA_INVALID,
        TransactionError::StackExecution { .. } => FAILURE,
        TransactionError::Command(_) => USAGE,
        TransactionError::Poisoned => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn readout_error(context: &str, err: ReadoutError) -> CliError {
    let code = match err {
        ReadoutError::Frame(FrameError::Transport(inner)) => return transport_error(context, inner),
        ReadoutError::Frame(FrameError::ResidueOverflow { .. }) => DATA_INVALID,
        ReadoutError::Io { ref source, .. } => io_code(source),
        ReadoutError::MultipleBlockReads { .. }
        | ReadoutError::TooManyStacks { .. }
        | ReadoutError::Command { .. }
        | ReadoutError::NotAStackCommand { .. }
        | ReadoutError::Builder(_)
        | ReadoutError::Config(_) => DATA_INVALID,
        ReadoutError::Spawn(_) | ReadoutError::WorkerPanicked => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
