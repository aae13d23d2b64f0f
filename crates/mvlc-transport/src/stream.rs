use std::io::{ErrorKind, Read, Write};

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{ConnectionType, Pipe};

/// Adapts a byte stream (USB device node, socket, capture file) to [`Pipe`].
///
/// The stream is expected to carry controller framing for the given
/// connection type. Interrupted reads and writes are retried.
pub struct StreamPipe<T> {
    inner: T,
    connection_type: ConnectionType,
}

impl<T: Read + Write + Send> StreamPipe<T> {
    pub fn new(inner: T, connection_type: ConnectionType) -> Self {
        Self {
            inner,
            connection_type,
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the pipe and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write + Send> Pipe for StreamPipe<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => {
                    trace!(bytes = n, "stream read");
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_io(err)),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.inner.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_io(err)),
            }
        }
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}

impl<T> std::fmt::Debug for StreamPipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipe")
            .field("connection_type", &self.connection_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_until_end_of_stream() {
        let mut pipe = StreamPipe::new(Cursor::new(vec![1u8, 2, 3]), ConnectionType::Usb);
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(pipe.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn interrupted_read_retries() {
        let mut pipe = StreamPipe::new(
            InterruptedThenData {
                interrupted: false,
                data: vec![9, 9],
            },
            ConnectionType::Eth,
        );
        let mut buf = [0u8; 4];
        assert_eq!(pipe.read(&mut buf).unwrap(), 2);
        assert_eq!(pipe.connection_type(), ConnectionType::Eth);
    }

    #[test]
    fn would_block_maps_to_timeout() {
        let mut pipe = StreamPipe::new(AlwaysWouldBlock, ConnectionType::Usb);
        let err = pipe.read(&mut [0u8; 4]).unwrap_err();
        assert!(err.is_timeout());
        let err = pipe.write(&[1, 2]).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn writes_reach_inner_stream() {
        let mut pipe = StreamPipe::new(Cursor::new(Vec::new()), ConnectionType::Usb);
        pipe.write_all(&[0xAA, 0xBB]).unwrap();
        assert_eq!(pipe.into_inner().into_inner(), vec![0xAA, 0xBB]);
    }

    struct InterruptedThenData {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
    }

    impl Write for InterruptedThenData {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct AlwaysWouldBlock;

    impl Read for AlwaysWouldBlock {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }

    impl Write for AlwaysWouldBlock {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
