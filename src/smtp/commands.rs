//! Implementation of SMTP commands

use tracing::{debug, info};

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::parser::{self, PathKind};
use crate::smtp::policy::Policy;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    domain: &'a str,
    policy: &'a Policy,
}

impl<'a> SmtpCommandHandler<'a> {
    /// Create a new command handler
    pub fn new(domain: &'a str, policy: &'a Policy) -> Self {
        Self { domain, policy }
    }

    /// Process a command line and return a response.
    ///
    /// Errors are reported to the client; only a session whose state ends
    /// up `Closed` stops reading commands.
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        // Check command line length
        if command_line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let (verb, argument) = parser::split(command_line);
        let verb = verb.to_uppercase();

        match verb.as_str() {
            "EHLO" => self.handle_ehlo(argument, session),
            "HELO" => self.handle_helo(argument, session),
            "MAIL" => self.handle_mail(argument, session),
            "RCPT" => self.handle_rcpt(argument, session),
            "DATA" => self.handle_data(argument, session),
            "RSET" | "VRFY" => Err(SmtpError::NotImplemented(verb)),
            "NOOP" => self.handle_noop(),
            "QUIT" => self.handle_quit(session),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    /// Handle EHLO command
    fn handle_ehlo(
        &self,
        client_domain: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        session.set_client_domain(client_domain.to_string());
        Ok(SmtpResponse::ehlo(self.domain, client_domain))
    }

    /// Handle HELO command
    fn handle_helo(
        &self,
        client_domain: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        session.set_client_domain(client_domain.to_string());
        Ok(SmtpResponse::helo(self.domain, client_domain))
    }

    /// Handle MAIL command
    fn handle_mail(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let path = parser::parse_path(argument, PathKind::From)
            .map_err(|err| SmtpError::InvalidSyntax(err.to_string()))?;
        let sender = path.address.to_lowercase();
        if !path.parameters.is_empty() {
            debug!(parameters = path.parameters, "ignoring MAIL parameters");
        }

        if self.policy.is_sender_blocked(&sender) {
            info!(%sender, "sender is blacklisted, closing session");
            session.close();
            return Ok(SmtpResponse::closing(self.domain));
        }

        session.begin_transaction(sender);
        Ok(SmtpResponse::ok())
    }

    /// Handle RCPT command
    fn handle_rcpt(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if session.message.is_none() {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        let path = parser::parse_path(argument, PathKind::To)
            .map_err(|err| SmtpError::InvalidSyntax(err.to_string()))?;
        let recipient = path.address.to_lowercase();
        if !path.parameters.is_empty() {
            debug!(parameters = path.parameters, "ignoring RCPT parameters");
        }

        if !self.policy.is_recipient_allowed(&recipient) {
            debug!(%recipient, "recipient is not whitelisted");
            return Err(SmtpError::MailboxUnavailable(recipient));
        }

        session.set_recipient(recipient)?;
        Ok(SmtpResponse::ok())
    }

    /// Handle DATA command
    fn handle_data(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !argument.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        session.start_data_mode()?;

        Ok(SmtpResponse::data_start())
    }

    /// Handle NOOP command
    fn handle_noop(&self) -> Result<SmtpResponse, SmtpError> {
        Ok(SmtpResponse::ok())
    }

    /// Handle QUIT command
    fn handle_quit(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        session.close();
        Ok(SmtpResponse::closing(self.domain))
    }
}
