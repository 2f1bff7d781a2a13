//! SMTP response handling

use crate::smtp::error::{SmtpError, SmtpLimits};

/// Represents an SMTP response that can be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Continuation lines, used by the EHLO reply
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    /// Create a new multiline SMTP response
    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    /// Create a success response (250 OK)
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// Create the connection greeting (220)
    pub fn greeting(domain: &str) -> Self {
        Self::new("220", &format!("{domain} ready"))
    }

    /// Create a HELO response (250)
    pub fn helo(domain: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{domain} greets {client_domain}"))
    }

    /// Create an EHLO response (250) with capabilities
    pub fn ehlo(domain: &str, client_domain: &str) -> Self {
        let capabilities = vec!["8BITMIME".to_owned(), "HELP".to_owned()];
        Self::new_multiline(
            "250",
            &format!("{domain} greets {client_domain}"),
            capabilities,
        )
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::new("354", "Start mail input; end with <CRLF>.<CRLF>")
    }

    /// Create the closing response sent on QUIT and on a rejected sender (221)
    pub fn closing(domain: &str) -> Self {
        Self::new(
            "221",
            &format!("{domain} Service closing transmission channel"),
        )
    }

    /// Create the response sent before the server drops a connection (421)
    pub fn service_unavailable(domain: &str) -> Self {
        Self::new(
            "421",
            &format!("{domain} Service not available, closing transmission channel"),
        )
    }

    /// Create an error response from an error
    pub fn error(code: &str, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Format the response for sending over the wire.
    ///
    /// A line longer than `SmtpLimits::REPLY_LINE_MAX_LENGTH` has its text
    /// cut so that the line fits; the other lines are sent as they are.
    pub fn format(&self) -> String {
        let mut result = String::new();
        match self.multiline {
            Some(ref lines) if !lines.is_empty() => {
                push_reply_line(&mut result, &self.code, '-', &self.message);
                for (i, line) in lines.iter().enumerate() {
                    // Last line uses space instead of dash
                    let separator = if i == lines.len() - 1 { ' ' } else { '-' };
                    push_reply_line(&mut result, &self.code, separator, line);
                }
            }
            _ => push_reply_line(&mut result, &self.code, ' ', &self.message),
        }
        result
    }
}

fn push_reply_line(out: &mut String, code: &str, separator: char, text: &str) {
    let room = SmtpLimits::REPLY_LINE_MAX_LENGTH.saturating_sub(code.len() + 3);
    let mut end = text.len().min(room);
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    out.push_str(code);
    out.push(separator);
    out.push_str(&text[..end]);
    out.push_str("\r\n");
}

impl From<&SmtpError> for SmtpResponse {
    fn from(err: &SmtpError) -> Self {
        Self::error(err.to_response_code(), err.to_response_message())
    }
}
