//! Command line splitting and envelope path grammar
//!
//! `MAIL` and `RCPT` arguments follow
//! `KEYWORD ":" *SP "<" address ">" [ 1*SP parameters ]`, where the keyword
//! is `FROM` or `TO` and is matched case-insensitively.

use thiserror::Error;

use crate::smtp::error::SmtpLimits;

/// Which envelope path an argument carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// `MAIL FROM:<reverse-path>`
    From,
    /// `RCPT TO:<forward-path>`
    To,
}

impl PathKind {
    fn keyword(self) -> &'static str {
        match self {
            PathKind::From => "FROM:",
            PathKind::To => "TO:",
        }
    }
}

/// A successfully parsed envelope path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path<'a> {
    /// Address between the angle brackets; empty for the null path `<>`
    pub address: &'a str,
    /// ESMTP parameters after the closing bracket, unparsed
    pub parameters: &'a str,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("expected {0}")]
    MissingKeyword(&'static str),

    #[error("path must start with '<'")]
    MissingOpenBracket,

    #[error("path must end with '>'")]
    MissingCloseBracket,

    #[error("invalid character {0:?} in address")]
    InvalidCharacter(char),

    #[error("path too long (max {max} characters)")]
    TooLong { max: usize },
}

/// Split a command line into its verb and argument.
///
/// The verb is everything up to the first whitespace run and the argument
/// is the rest, with its interior whitespace preserved. The verb keeps the
/// case it was sent in.
pub fn split(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(end) => (&line[..end], line[end..].trim()),
        None => (line, ""),
    }
}

/// Parse a `FROM:<...>` or `TO:<...>` argument.
pub fn parse_path(argument: &str, kind: PathKind) -> Result<Path<'_>, PathError> {
    let keyword = kind.keyword();
    let argument = argument.trim();

    let rest = match argument.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => &argument[keyword.len()..],
        _ => return Err(PathError::MissingKeyword(keyword)),
    };

    let rest = rest
        .trim_start()
        .strip_prefix('<')
        .ok_or(PathError::MissingOpenBracket)?;
    let close = rest.find('>').ok_or(PathError::MissingCloseBracket)?;
    let (address, parameters) = (&rest[..close], &rest[close + 1..]);

    if address.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(PathError::TooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    if let Some(c) = address
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || *c == '<')
    {
        return Err(PathError::InvalidCharacter(c));
    }

    // Parameters have to be separated from the path.
    if !parameters.is_empty() && !parameters.starts_with(char::is_whitespace) {
        return Err(PathError::InvalidCharacter(
            parameters.chars().next().unwrap_or('>'),
        ));
    }

    Ok(Path {
        address,
        parameters: parameters.trim(),
    })
}
