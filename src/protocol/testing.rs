//! Scripted transport for unit tests
//!
//! Each entry is one expected request line and the reply the device sends
//! back. A request that does not match the next entry fails the test.

use super::transport::Transport;
use crate::error::{DeviceError, DeviceResult};
use std::collections::VecDeque;

pub struct ScriptedTransport {
    script: VecDeque<(String, String)>,
    pending: Option<String>,
    sent: Vec<String>,
}

impl ScriptedTransport {
    pub fn new(script: &[(&str, &str)]) -> Self {
        Self {
            script: script
                .iter()
                .map(|(request, reply)| (request.to_string(), reply.to_string()))
                .collect(),
            pending: None,
            sent: Vec::new(),
        }
    }

    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn assert_done(&self) {
        assert!(
            self.script.is_empty(),
            "unsent requests left in script: {:?}",
            self.script
        );
    }
}

impl Transport for ScriptedTransport {
    fn send_line(&mut self, line: &str) -> DeviceResult<()> {
        let (expected, reply) = self
            .script
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request '{}' after end of script", line));
        assert_eq!(line, expected, "request out of order");
        self.sent.push(line.to_string());
        self.pending = Some(reply);
        Ok(())
    }

    fn receive_line(&mut self, context: &str) -> DeviceResult<String> {
        self.pending.take().ok_or_else(|| DeviceError::Timeout {
            command: context.to_string(),
        })
    }
}
