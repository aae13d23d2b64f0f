/// Errors raised while building command lists.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    /// Adding the command would push the list past its word budget.
    #[error("command list would grow to {words} words, limit is {max}")]
    BudgetExceeded { words: usize, max: usize },

    /// The address modifier does not fit the requested transfer kind.
    #[error("address modifier 0x{amod:02x} cannot be used for {operation}")]
    InvalidAddressModifier { amod: u8, operation: &'static str },

    /// A value does not fit into the command's argument field.
    #[error("{field} value 0x{value:x} exceeds 0x{max:x}")]
    ValueOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    /// Stack id outside of the controller's stack range.
    #[error("stack id {0} is out of range")]
    InvalidStackId(u8),
}

/// Errors raised while decoding an encoded command buffer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("command buffer is empty")]
    Empty,

    /// First word is neither a super buffer start nor a stack start marker.
    #[error("missing start marker, found 0x{0:08x}")]
    MissingStartMarker(u32),

    /// The buffer ended without the matching end marker.
    #[error("missing end marker")]
    MissingEndMarker,

    #[error("unknown command word 0x{word:08x} at offset {offset}")]
    UnknownCommand { word: u32, offset: usize },

    /// A multi-word command was cut short.
    #[error("command at offset {offset} needs {needed} words, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Words following the end marker.
    #[error("{0} words after the end marker")]
    TrailingWords(usize),

    #[error("invalid data width {width} at offset {offset}")]
    InvalidDataWidth { width: u16, offset: usize },
}

/// Errors raised while parsing the textual command form.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// An operand is present but malformed.
    #[error("{verb}: bad {operand} '{token}'")]
    BadOperand {
        verb: String,
        operand: &'static str,
        token: String,
    },

    #[error("{verb}: missing {operand}")]
    MissingOperand { verb: String, operand: &'static str },

    #[error("{verb}: unexpected operand '{token}'")]
    UnexpectedOperand { verb: String, token: String },

    /// The line parsed but describes an invalid command.
    #[error(transparent)]
    Invalid(#[from] CommandError),
}

pub type Result<T> = std::result::Result<T, CommandError>;
