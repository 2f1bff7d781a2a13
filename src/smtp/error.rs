//! Error types for the SMTP server

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Command not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid state for command: {0}")]
    InvalidState(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Mailbox unavailable: {0}")]
    MailboxUnavailable(String),

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Inbox is full")]
    InboxFull,

    #[error("Inbox has no consumer")]
    InboxClosed,

    #[error("Service shutting down")]
    ServiceUnavailable,
}

/// SMTP size limits as defined in RFC 821
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;

    /// Maximum total size of the data section of one message
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024; // 10MB
}

/// Maps SMTP errors to appropriate response codes
impl SmtpError {
    pub fn to_response_code(&self) -> &'static str {
        match self {
            SmtpError::Io(_) => "421",
            SmtpError::InvalidCommand => "500",
            SmtpError::NotImplemented(_) => "502",
            SmtpError::InvalidState(_) => "503",
            SmtpError::InvalidSyntax(_) => "501",
            SmtpError::LineTooLong { .. } => "500",
            SmtpError::MailboxUnavailable(_) => "550",
            SmtpError::TooMuchData { .. } => "552",
            SmtpError::MalformedMessage(_) => "451",
            SmtpError::InboxFull => "452",
            SmtpError::InboxClosed => "451",
            SmtpError::ServiceUnavailable => "421",
        }
    }

    /// Text sent to the peer. Never carries internal detail: the variant
    /// payloads only go to the log.
    pub fn to_response_message(&self) -> &'static str {
        match self {
            SmtpError::Io(_) | SmtpError::ServiceUnavailable => {
                "Service not available, closing transmission channel"
            }
            SmtpError::InvalidCommand | SmtpError::LineTooLong { .. } => {
                "Syntax error, command unrecognized"
            }
            SmtpError::NotImplemented(_) => "Command not implemented",
            SmtpError::InvalidState(_) => "Bad sequence of commands",
            SmtpError::InvalidSyntax(_) => "Syntax error in parameters or arguments",
            SmtpError::MailboxUnavailable(_) => "Requested action not taken: mailbox unavailable",
            SmtpError::TooMuchData { .. } => {
                "Requested mail action aborted: exceeded storage allocation"
            }
            SmtpError::MalformedMessage(_) | SmtpError::InboxClosed => {
                "Requested action aborted: local error in processing"
            }
            SmtpError::InboxFull => "Requested action not taken: insufficient system storage",
        }
    }

    /// Whether the session has to end after this error is reported.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SmtpError::Io(_) | SmtpError::ServiceUnavailable)
    }
}
