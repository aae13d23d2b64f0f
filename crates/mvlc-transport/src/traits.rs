use std::fmt;

use crate::error::Result;

/// Physical link to the controller. Framing rules differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Usb,
    Eth,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Usb => "usb",
            ConnectionType::Eth => "eth",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two logical pipes every controller connection provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeKind {
    Command,
    Data,
}

impl PipeKind {
    /// Pipe number as used in stack output selection.
    pub fn number(self) -> u8 {
        match self {
            PipeKind::Command => 0,
            PipeKind::Data => 1,
        }
    }
}

/// A blocking, timeout-bounded pipe to the controller.
///
/// `read` returning `Ok(0)` means end-of-stream. A call that sees no data
/// within the configured timeout returns [`TransportError::Timeout`].
///
/// [`TransportError::Timeout`]: crate::TransportError::Timeout
pub trait Pipe: Send {
    /// Read whatever is available into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// The link type this pipe belongs to.
    fn connection_type(&self) -> ConnectionType;

    /// Write the complete buffer, looping over short writes.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(crate::TransportError::Disconnected),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

impl<P: Pipe + ?Sized> Pipe for Box<P> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn connection_type(&self) -> ConnectionType {
        (**self).connection_type()
    }
}

impl<P: Pipe + ?Sized> Pipe for &mut P {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn connection_type(&self) -> ConnectionType {
        (**self).connection_type()
    }
}
