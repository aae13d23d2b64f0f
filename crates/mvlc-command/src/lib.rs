//! Command model for MVLC controllers.
//!
//! Two dialects share one wire format of 32-bit words:
//! - [`SuperCommand`]s address the controller's own registers and are sent
//!   between `CmdBufferStart`/`CmdBufferEnd` markers
//! - [`StackCommand`]s address the VME bus; they are stored in controller
//!   stack memory between `StackStart`/`StackEnd` and run when triggered
//!
//! [`CommandList`] encodes and decodes whole buffers. The builders enforce
//! word budgets, and [`parse_command_line`] reads the text form.

pub mod builder;
pub mod codec;
pub mod error;
pub mod registers;
pub mod stack_cmd;
pub mod stacks;
pub mod super_cmd;
pub mod text;
pub mod vme;

pub use builder::{
    StackCommandBuilder, StackGroup, SuperCommandBuilder, MIRROR_TRANSACTION_MAX_CONTENTS_WORDS,
    MIRROR_TRANSACTION_MAX_WORDS,
};
pub use codec::{decode_stack, decode_super, encode_stack, encode_super, CommandList};
pub use error::{CommandError, DecodeError, ParseError, Result};
pub use stack_cmd::StackCommand;
pub use stacks::stack_upload_commands;
pub use super_cmd::SuperCommand;
pub use text::{parse_command_line, parse_command_text, Command, ParsedLine};
pub use vme::{amods, DataWidth};
