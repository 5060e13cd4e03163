use super::acceptance::{self, AcceptanceSet};
use super::reply::{Reply, REPLY_TERMINATOR};
use super::transport::{TcpTransport, Transport};
use crate::error::{DeviceError, DeviceResult};
use std::time::Duration;

/// Owns the connection to one device and turns request lines into validated
/// replies.
///
/// One request (or one batch) is in flight at a time: every call writes and
/// then blocks until the matching reply line is read.
pub struct Client<T: Transport = TcpTransport> {
    transport: T,
}

impl Client<TcpTransport> {
    /// Open a TCP session to the device. `timeout` bounds the connect and
    /// every subsequent reply.
    pub fn connect(address: &str, port: u16, timeout: Duration) -> DeviceResult<Self> {
        Ok(Self::new(TcpTransport::connect(address, port, timeout)?))
    }

    /// Close the session; an operation blocked on it elsewhere fails with a
    /// connection error.
    pub fn close(&self) -> DeviceResult<()> {
        self.transport.close()
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one request and accept the reply statuses in [`acceptance::DEFAULT`]
    pub fn query(&mut self, command: &str) -> DeviceResult<Reply> {
        self.query_with(command, acceptance::DEFAULT)
    }

    /// Send one request; fail with a protocol error unless the reply status
    /// is in `accept`
    pub fn query_with(&mut self, command: &str, accept: AcceptanceSet) -> DeviceResult<Reply> {
        self.transport.send_line(command)?;
        let line = self.transport.receive_line(command)?;
        let reply = Reply::parse(&line);
        check(command, &reply, accept)?;
        Ok(reply)
    }

    /// Send several requests in one write and demultiplex the single reply
    /// line. The device executes them back to back, so no other session can
    /// interpose between them.
    ///
    /// A segment count different from the number of requests means the
    /// session is out of step with the device and is reported as a protocol
    /// error.
    pub fn query_batch(&mut self, commands: &[(&str, AcceptanceSet)]) -> DeviceResult<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let line: String = commands
            .iter()
            .map(|(command, _)| *command)
            .collect::<Vec<_>>()
            .join(&REPLY_TERMINATOR.to_string());

        self.transport.send_line(&line)?;
        let received = self.transport.receive_line(&line)?;

        let mut segments: Vec<&str> = received.split(REPLY_TERMINATOR).collect();
        if segments.last().map(|s| s.trim().is_empty()).unwrap_or(false) {
            segments.pop();
        }

        if segments.len() != commands.len() {
            return Err(DeviceError::malformed(
                &line,
                &received,
                format!(
                    "batch of {} requests got {} replies",
                    commands.len(),
                    segments.len()
                ),
            ));
        }

        commands
            .iter()
            .zip(segments)
            .map(|((command, accept), segment)| {
                let reply = Reply::parse(segment);
                check(command, &reply, *accept)?;
                Ok(reply)
            })
            .collect()
    }
}

fn check(command: &str, reply: &Reply, accept: AcceptanceSet) -> DeviceResult<()> {
    match reply.status() {
        None => Err(DeviceError::malformed(
            command,
            reply.raw(),
            "reply has no status field",
        )),
        Some(status) if !accept.accepts(status) => {
            tracing::debug!(command, status, accepted = %accept, "Reply status rejected");
            Err(DeviceError::rejected(command, reply.raw(), status))
        }
        Some(_) => Ok(()),
    }
}
