//! Readout data parsing for MVLC controllers.
//!
//! A readout stack's output for one trigger is a stack frame (0xF3, possibly
//! continued by 0xF9 frames) holding each module's words in turn. Module
//! layout is derived from the stack commands: fixed words before the block
//! read form the prefix, the block read's 0xF5 frames form the dynamic part,
//! and fixed words after it form the suffix.
//!
//! - [`ReadoutStructure`] describes the expected layout per event
//! - [`ReadoutParser`] consumes [`ReadoutBuffer`](mvlc_frame::ReadoutBuffer)s
//!   and calls a [`ReadoutSink`] per completed event
//! - [`ReadoutWorker`] runs the reader on its own thread
//! - [`ReadoutConfig`] loads stack definitions from JSON

pub mod config;
pub mod counters;
pub mod error;
pub mod parser;
pub mod sink;
pub mod structure;
pub mod worker;

pub use config::{GroupConfig, ReadoutConfig, StackConfig};
pub use counters::{AnomalyKind, ParserCounters};
pub use error::{ReadoutError, Result};
pub use parser::{ParserConfig, ReadoutParser, DEFAULT_MAX_EVENT_WORDS};
pub use sink::{EventCounter, EventRecorder, EventStats, ModuleStats, ParserEvent, PartKind, ReadoutSink};
pub use structure::{ModuleReadoutStructure, ReadoutStructure};
pub use worker::{ReadoutWorker, StopHandle, WorkerConfig};

pub use mvlc_frame::{StackErrorCounters, StackErrorInfo};
