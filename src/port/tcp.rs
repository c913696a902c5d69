//! TCP channel collaborators over `std::net`
//!
//! [`TcpServer`] listens and serves one peer connection at a time, accepting
//! the next connection after the current peer disconnects. [`TcpClient`]
//! holds one outbound connection to a remote slave. Both expose the same
//! byte-stream [`TcpChannel`](super::TcpChannel) interface; MBAP framing is
//! layered on top by the TCP transport FSMs.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};

use super::TcpChannel;

fn read_exact_stream(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Duration,
) -> std::io::Result<bool> {
    // Bounded wait for the first byte, then finish the fixed-size read
    stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(std::io::Error::from(ErrorKind::ConnectionAborted)),
            Ok(n) => filled += n,
            Err(e)
                if filled == 0
                    && (e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock) =>
            {
                return Ok(false)
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Listening-side TCP channel for the slave engine
pub struct TcpServer {
    listener: TcpListener,
    peer: Option<TcpStream>,
}

impl TcpServer {
    /// Bind the listen socket. Fatal at init time on failure.
    pub fn listen(port: u16) -> ModbusResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| ModbusError::Port(format!("bind port {port}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ModbusError::Port(e.to_string()))?;
        debug!(port, "modbus tcp listener bound");
        Ok(Self {
            listener,
            peer: None,
        })
    }

    fn poll_accept(&mut self) -> ModbusResult<()> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "tcp peer connected");
                stream
                    .set_nonblocking(false)
                    .map_err(|e| ModbusError::Io(e.to_string()))?;
                self.peer = Some(stream);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(ModbusError::Io(e.to_string())),
        }
    }
}

impl TcpChannel for TcpServer {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> ModbusResult<bool> {
        if self.peer.is_none() {
            self.poll_accept()?;
        }
        let Some(stream) = self.peer.as_mut() else {
            return Ok(false);
        };
        match read_exact_stream(stream, buf, timeout) {
            Ok(got) => Ok(got),
            Err(e) => {
                warn!(error = %e, "tcp peer dropped");
                self.peer = None;
                Ok(false)
            }
        }
    }

    fn write_all(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let Some(stream) = self.peer.as_mut() else {
            return Err(ModbusError::IllegalState("no tcp peer connected"));
        };
        if let Err(e) = stream.write_all(frame) {
            self.peer = None;
            return Err(ModbusError::Io(e.to_string()));
        }
        Ok(())
    }

    fn reset_peer(&mut self) {
        self.peer = None;
    }

    fn close(&mut self) {
        self.peer = None;
    }
}

/// Outbound TCP channel for the master engine
pub struct TcpClient {
    stream: TcpStream,
}

impl TcpClient {
    /// Connect to the remote slave. Fatal at init time on failure.
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(peer: A) -> ModbusResult<Self> {
        let stream = TcpStream::connect(&peer)
            .map_err(|e| ModbusError::Port(format!("connect {peer:?}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ModbusError::Port(e.to_string()))?;
        debug!(peer = ?peer, "connected to modbus tcp slave");
        Ok(Self { stream })
    }
}

impl TcpChannel for TcpClient {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> ModbusResult<bool> {
        read_exact_stream(&mut self.stream, buf, timeout).map_err(|e| ModbusError::Io(e.to_string()))
    }

    fn write_all(&mut self, frame: &[u8]) -> ModbusResult<()> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    fn reset_peer(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
