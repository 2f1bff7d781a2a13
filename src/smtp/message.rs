//! Message data structures and functionality

use std::borrow::Cow;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::smtp::error::SmtpError;

/// A single header of a received message, in the order it was sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    /// Unfolded value with RFC 2047 encoded words decoded
    pub value: String,
    /// Value exactly as sent, folding included
    #[serde(with = "serde_bytes")]
    pub raw_value: Vec<u8>,
}

/// One SMTP transaction.
///
/// Created by `MAIL`, completed by `RCPT` and `DATA`. Consumers only ever
/// see a finished message and can read it but not change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    received_at: DateTime<Utc>,
    greet_domain: String,
    mail_from: String,
    rcpt_to: Option<String>,
    remote_addr: SocketAddr,
    headers: Vec<Header>,
    #[serde(with = "serde_bytes")]
    body: Vec<u8>,
}

impl Message {
    /// Start a new transaction for `mail_from`
    pub(crate) fn new(greet_domain: &str, mail_from: String, remote_addr: SocketAddr) -> Self {
        Self {
            received_at: Utc::now(),
            greet_domain: greet_domain.to_owned(),
            mail_from,
            rcpt_to: None,
            remote_addr,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn set_recipient(&mut self, rcpt_to: String) {
        self.rcpt_to = Some(rcpt_to);
    }

    /// Fill in headers and body from the dot-decoded `DATA` section.
    pub(crate) fn set_content(&mut self, data: &[u8]) -> Result<(), SmtpError> {
        let (headers, body) = parse_document(data)?;
        self.headers = headers;
        self.body = body;
        Ok(())
    }

    /// When the transaction started
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Domain the client announced in `EHLO`/`HELO`, empty if it never did
    pub fn greet_domain(&self) -> &str {
        &self.greet_domain
    }

    /// Lower-cased sender address; empty for the null reverse-path
    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    /// Lower-cased recipient address, once a `RCPT` was accepted
    pub fn rcpt_to(&self) -> Option<&str> {
        self.rcpt_to.as_deref()
    }

    pub fn has_recipient(&self) -> bool {
        self.rcpt_to.is_some()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Everything after the blank line that ends the headers, byte for byte.
    ///
    /// Lines end in a bare LF.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// First header called `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Get the subject line from the message headers (if present)
    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }
}

/// Split a mail document into its headers and body.
///
/// Headers run up to the first empty line. Each one has to be
/// `name ":" value`, or a folded continuation starting with whitespace.
fn parse_document(data: &[u8]) -> Result<(Vec<Header>, Vec<u8>), SmtpError> {
    if data.is_empty() {
        return Err(SmtpError::MalformedMessage("empty message".to_string()));
    }

    let (head, body) = if let Some(rest) = data.strip_prefix(b"\n") {
        (&[][..], rest)
    } else {
        match data.windows(2).position(|pair| pair == b"\n\n") {
            Some(end) => (&data[..=end], &data[end + 2..]),
            None => (data, &[][..]),
        }
    };

    for (number, line) in head.split_inclusive(|&byte| byte == b'\n').enumerate() {
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            if number == 0 {
                return Err(SmtpError::MalformedMessage(
                    "continuation line before the first header".to_string(),
                ));
            }
            continue;
        }

        let name = line
            .iter()
            .position(|&byte| byte == b':')
            .map(|colon| &line[..colon]);
        match name {
            Some(name) if !name.is_empty() && !name.iter().any(u8::is_ascii_whitespace) => {}
            _ => {
                return Err(SmtpError::MalformedMessage(format!(
                    "malformed header line {}",
                    number + 1
                )));
            }
        }
    }

    if head.is_empty() {
        return Ok((Vec::new(), body.to_vec()));
    }

    let mut block = head.to_vec();
    if !block.ends_with(b"\n") {
        block.push(b'\n');
    }
    block.push(b'\n');

    let (parsed, _) = mailparse::parse_headers(&block)
        .map_err(|err| SmtpError::MalformedMessage(err.to_string()))?;

    let headers = parsed
        .iter()
        .map(|header| Header {
            name: header.get_key(),
            value: header.get_value(),
            raw_value: header.get_value_raw().to_vec(),
        })
        .collect();

    Ok((headers, body.to_vec()))
}
