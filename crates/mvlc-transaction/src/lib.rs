//! Request/response transactions on the MVLC command pipe.
//!
//! A super transaction sends register commands tagged with a reference word
//! and checks the controller's echo word by word. A stack transaction uploads
//! commands as the immediate stack, triggers it and returns the produced
//! words. Both are serialized by [`CommandPipe`], so one pipe can be shared
//! between threads. [`CommandPipe::execute_commands`] runs command lists too
//! long for the immediate stack as a series of stack transactions.
//!
//! Reads that time out are retried up to
//! [`TransactionConfig::max_read_attempts`] times. Other failures, mirror
//! mismatches included, are returned at once.

pub mod error;
pub mod executor;
pub mod mirror;
mod ops;
pub mod pipe;

#[cfg(test)]
mod mock;

pub use error::{Result, TransactionError};
pub use executor::{
    split_commands, split_response, CommandOutcome, CommandResult, ExecOptions, ExecReport,
    GroupResults, PartResult,
};
pub use mirror::check_mirror;
pub use pipe::{
    CommandPipe, StackResponse, SuperResponse, TransactionConfig, TransactionStats,
    DEFAULT_MAX_READ_ATTEMPTS, DEFAULT_MAX_RESPONSE_WORDS, ETH_UPLOAD_PART_WORDS,
    USB_UPLOAD_PART_WORDS,
};
