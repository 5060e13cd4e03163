//! Line transport underneath the client
//!
//! [`Transport`] is the seam tests substitute: a TCP connection in
//! production, a simulated device or a mock in tests.

use super::reply::LINE_TERMINATOR;
use crate::error::{DeviceError, DeviceResult};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Write one request. The line terminator is appended by the transport.
    fn send_line(&mut self, line: &str) -> DeviceResult<()>;

    /// Block until one reply line arrives, returned without its terminator.
    /// `context` names the request being answered, for error reporting.
    fn receive_line(&mut self, context: &str) -> DeviceResult<String>;
}

/// Persistent TCP session to one device endpoint
pub struct TcpTransport {
    endpoint: String,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpTransport {
    /// Connect to `address:port`, trying every resolved address in turn.
    /// `timeout` bounds the connect and every later read and write.
    pub fn connect(address: &str, port: u16, timeout: Duration) -> DeviceResult<Self> {
        let endpoint = format!("{}:{}", address, port);
        let connection_error = |source: io::Error| DeviceError::Connection {
            endpoint: endpoint.clone(),
            source,
        };

        let addrs = (address, port).to_socket_addrs().map_err(connection_error)?;

        let mut last_error =
            io::Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(timeout))
                        .map_err(connection_error)?;
                    stream
                        .set_write_timeout(Some(timeout))
                        .map_err(connection_error)?;
                    stream.set_nodelay(true).map_err(connection_error)?;
                    let writer = stream.try_clone().map_err(connection_error)?;

                    tracing::info!(endpoint = %endpoint, peer = %addr, "Connected to device");
                    return Ok(Self {
                        endpoint,
                        reader: BufReader::new(stream),
                        writer,
                    });
                }
                Err(e) => {
                    tracing::debug!(peer = %addr, "Connect failed: {}", e);
                    last_error = e;
                }
            }
        }

        Err(connection_error(last_error))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Shut the socket down; a call blocked on it elsewhere fails with a
    /// connection error
    pub fn close(&self) -> DeviceResult<()> {
        self.writer
            .shutdown(Shutdown::Both)
            .map_err(|source| self.connection_error(source))
    }

    fn connection_error(&self, source: io::Error) -> DeviceError {
        DeviceError::Connection {
            endpoint: self.endpoint.clone(),
            source,
        }
    }
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl Transport for TcpTransport {
    fn send_line(&mut self, line: &str) -> DeviceResult<()> {
        tracing::debug!(endpoint = %self.endpoint, "send: {}", line);
        let mut request = String::with_capacity(line.len() + LINE_TERMINATOR.len());
        request.push_str(line);
        request.push_str(LINE_TERMINATOR);

        match self
            .writer
            .write_all(request.as_bytes())
            .and_then(|_| self.writer.flush())
        {
            Ok(()) => Ok(()),
            Err(e) if is_timeout(e.kind()) => Err(DeviceError::Timeout {
                command: line.to_string(),
            }),
            Err(e) => Err(self.connection_error(e)),
        }
    }

    fn receive_line(&mut self, context: &str) -> DeviceResult<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Err(self.connection_error(io::Error::new(
                ErrorKind::UnexpectedEof,
                "device closed the connection",
            ))),
            Ok(_) => {
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                tracing::trace!(endpoint = %self.endpoint, "recv: {}", line);
                Ok(line)
            }
            Err(e) if is_timeout(e.kind()) => Err(DeviceError::Timeout {
                command: context.to_string(),
            }),
            Err(e) => Err(self.connection_error(e)),
        }
    }
}
