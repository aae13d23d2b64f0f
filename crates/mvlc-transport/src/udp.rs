use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{ConnectionType, Pipe, PipeKind};

/// UDP port of the command pipe.
pub const COMMAND_PORT: u16 = 0x8000;
/// UDP port of the data pipe.
pub const DATA_PORT: u16 = 0x8001;
/// Largest datagram the controller sends (jumbo frames).
pub const JUMBO_FRAME_MAX_SIZE: usize = 9000;

/// Configuration for an Ethernet connection.
#[derive(Debug, Clone)]
pub struct EthConfig {
    /// Controller hostname or IP address.
    pub host: String,
    pub command_port: u16,
    pub data_port: u16,
    /// Per-call read timeout.
    pub read_timeout: Option<Duration>,
    /// Per-call write timeout.
    pub write_timeout: Option<Duration>,
    /// Requested kernel receive buffer size for the data socket.
    pub data_receive_buffer: Option<usize>,
}

impl Default for EthConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            command_port: COMMAND_PORT,
            data_port: DATA_PORT,
            read_timeout: Some(Duration::from_millis(500)),
            write_timeout: Some(Duration::from_millis(500)),
            data_receive_buffer: Some(10 * 1024 * 1024),
        }
    }
}

impl EthConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }
}

/// One UDP pipe to the controller: a socket connected to a single port.
#[derive(Debug)]
pub struct EthPipe {
    socket: UdpSocket,
    kind: PipeKind,
    closed: Arc<AtomicBool>,
}

impl EthPipe {
    /// Bind an ephemeral local socket and connect it to `addr`.
    pub fn connect(addr: SocketAddr, kind: PipeKind) -> Result<Self> {
        let local: SocketAddr = if addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).map_err(|e| TransportError::Bind {
            addr: local.to_string(),
            source: e,
        })?;
        socket.connect(addr).map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        debug!(%addr, ?kind, "connected udp pipe");
        Ok(Self {
            socket,
            kind,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Logical pipe this socket serves.
    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// Set the per-call read timeout.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set the per-call write timeout.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Request a kernel receive buffer of `size` bytes. Returns the size in effect.
    #[cfg(unix)]
    pub fn set_receive_buffer_size(&self, size: usize) -> Result<usize> {
        use std::os::fd::AsRawFd;

        let fd = self.socket.as_raw_fd();
        let requested = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

        // SAFETY: `fd` is an open socket owned by `self.socket`; the option value
        // points to a live c_int of the advertised length.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                (&requested as *const libc::c_int).cast::<libc::c_void>(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }

        let mut actual: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: `actual` and `len` are valid writable pointers for the provided sizes.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                (&mut actual as *mut libc::c_int).cast::<libc::c_void>(),
                &mut len,
            )
        };
        if rc != 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        Ok(usize::try_from(actual).unwrap_or(0))
    }

    /// Receive buffer sizing is only supported on unix targets.
    #[cfg(not(unix))]
    pub fn set_receive_buffer_size(&self, _size: usize) -> Result<usize> {
        Ok(0)
    }

    /// Handle that closes this pipe from another thread.
    pub fn closer(&self) -> Result<PipeCloser> {
        Ok(PipeCloser {
            socket: self.socket.try_clone()?,
            closed: Arc::clone(&self.closed),
        })
    }

    /// True once [`PipeCloser::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }
}

impl Pipe for EthPipe {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        match self.socket.recv(buf) {
            Ok(0) if self.is_closed() => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(_) if self.is_closed() => Err(TransportError::Disconnected),
            Err(err) => Err(TransportError::from_io(err)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        self.socket.send(buf).map_err(TransportError::from_io)
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Eth
    }
}

/// Closes an [`EthPipe`] so that blocked and future calls fail with
/// [`TransportError::Disconnected`].
#[derive(Debug)]
pub struct PipeCloser {
    socket: UdpSocket,
    closed: Arc<AtomicBool>,
}

impl PipeCloser {
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shutdown_socket(&self.socket);
        debug!("udp pipe closed");
    }
}

#[cfg(unix)]
fn shutdown_socket(socket: &UdpSocket) {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor belongs to a socket kept alive by `socket`.
    // shutdown() on a connected datagram socket wakes a thread blocked in recv().
    let rc = unsafe { libc::shutdown(socket.as_raw_fd(), libc::SHUT_RDWR) };
    if rc != 0 {
        debug!(err = %std::io::Error::last_os_error(), "udp shutdown not supported, relying on read timeout");
    }
}

#[cfg(not(unix))]
fn shutdown_socket(_socket: &UdpSocket) {}

/// Connect both pipes of an Ethernet controller.
pub fn connect_eth(config: &EthConfig) -> Result<(EthPipe, EthPipe)> {
    let command_addr = resolve(&config.host, config.command_port)?;
    let data_addr = resolve(&config.host, config.data_port)?;

    let command = EthPipe::connect(command_addr, PipeKind::Command)?;
    let data = EthPipe::connect(data_addr, PipeKind::Data)?;

    for pipe in [&command, &data] {
        pipe.set_read_timeout(config.read_timeout)?;
        pipe.set_write_timeout(config.write_timeout)?;
    }

    if let Some(size) = config.data_receive_buffer {
        let actual = data.set_receive_buffer_size(size)?;
        if actual < size {
            warn!(
                requested = size,
                actual, "data pipe receive buffer smaller than requested"
            );
        }
    }

    info!(host = %config.host, "connected to controller via ethernet");
    Ok((command, data))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addr = format!("{host}:{port}");
    addr.to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: addr.clone(),
            source: e,
        })?
        .next()
        .ok_or_else(|| TransportError::Connect {
            addr: addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "host did not resolve"),
        })
}
