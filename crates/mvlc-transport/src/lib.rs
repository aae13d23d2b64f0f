//! Blocking pipe abstraction for MVLC VME controllers.
//!
//! Every controller connection exposes two logical pipes, `Command` and
//! `Data`. Each is a blocking read/write endpoint with a per-call timeout:
//! - [`EthPipe`]: a connected UDP socket (one per pipe)
//! - [`StreamPipe`]: any byte stream carrying USB framing, e.g. a device node
//!   or a recorded capture
//!
//! This is the lowest layer. Framing, commands and parsing build on [`Pipe`].

pub mod error;
pub mod stream;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use stream::StreamPipe;
pub use traits::{ConnectionType, Pipe, PipeKind};
pub use udp::{
    connect_eth, EthConfig, EthPipe, PipeCloser, COMMAND_PORT, DATA_PORT, JUMBO_FRAME_MAX_SIZE,
};
