//! Reply parsing and request formatting
//!
//! A reply looks like `!bank_set? 0 : A : EVN+0012 : B : JIV-0007 ;`. Field 0
//! is the echoed command including its `!`, field 1 the status code, the rest
//! is payload.

use std::fmt;

/// Separator between payload fields in a reply
pub const FIELD_DELIMITER: &str = ": ";

/// Terminates a single reply and separates the segments of a batched reply
pub const REPLY_TERMINATOR: char = ';';

/// Appended to every request written to the device
pub const LINE_TERMINATOR: &str = "\r\n";

/// One parsed reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    fields: Vec<String>,
    raw: String,
}

impl Reply {
    /// Parse one raw reply line. Never fails: input without a `=` or `?`
    /// separator degrades to a single field.
    pub fn parse(line: &str) -> Self {
        let raw = line.trim().to_string();

        let body = match raw.rfind(REPLY_TERMINATOR) {
            Some(end) => &raw[..end],
            None => raw.as_str(),
        };

        let fields = match body.find(['=', '?']) {
            None => vec![body.trim().to_string()],
            Some(separator) => {
                let mut fields = vec![body[..separator].trim().to_string()];
                fields.extend(
                    body[separator + 1..]
                        .split(FIELD_DELIMITER)
                        .map(|field| field.trim().to_string()),
                );
                fields
            }
        };

        Self { fields, raw }
    }

    /// The echoed command, e.g. `!dir_info`
    pub fn command(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn status(&self) -> Option<&str> {
        self.field(1)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Payload fields, i.e. everything after the status code
    pub fn payload(&self) -> &[String] {
        self.fields.get(2..).unwrap_or(&[])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The line as received, surrounding whitespace removed
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Build `<command>=<arg>[:<arg>]*`, or `<command>=` when `args` is empty
pub fn command(keyword: &str, args: &[&str]) -> String {
    format!("{}={}", keyword, args.join(":"))
}

/// Build `<command>?`
pub fn query(keyword: &str) -> String {
    format!("{}?", keyword)
}
