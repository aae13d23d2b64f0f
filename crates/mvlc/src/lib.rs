//! Protocol stack for Mesytec MVLC VME controllers.
//!
//! # Crate Structure
//!
//! - [`transport`]: blocking command/data pipes (UDP, byte streams)
//! - [`frame`]: frame headers, Ethernet packet headers, buffer reassembly
//! - [`command`]: super and stack commands, builders, text form
//! - [`readout`]: readout structure, parser and worker thread (behind `readout` feature)
//! - [`transaction`]: serialized command pipe transactions (behind `transaction` feature)

/// Re-export transport types.
pub mod transport {
    pub use mvlc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mvlc_frame::*;
}

/// Re-export command types.
pub mod command {
    pub use mvlc_command::*;
}

/// Re-export readout types (requires `readout` feature).
#[cfg(feature = "readout")]
pub mod readout {
    pub use mvlc_readout::*;
}

/// Re-export transaction types (requires `transaction` feature).
#[cfg(feature = "transaction")]
pub mod transaction {
    pub use mvlc_transaction::*;
}
