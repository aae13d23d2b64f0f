/// Errors that can occur while reading and reassembling readout data.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The data pipe failed with something other than a timeout.
    #[error("transport error: {0}")]
    Transport(#[from] mvlc_transport::TransportError),

    /// A partial frame filled the slot so that no further read fits.
    #[error("partial frame of {size} bytes does not fit a {capacity} byte buffer")]
    ResidueOverflow { size: usize, capacity: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
