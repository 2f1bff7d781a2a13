//! SMTP session state management

use std::net::SocketAddr;

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::message::Message;

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Connected, no greeting yet
    Start,
    /// EHLO/HELO received, no transaction in progress
    Greeted,
    /// MAIL accepted - ready for RCPT
    SenderSet,
    /// RCPT accepted - ready for DATA
    RecipientSet,
    /// DATA accepted - collecting the message body
    DataPending,
    /// QUIT or a rejected sender - no further commands are read
    Closed,
}

/// Manages the state and data for a single SMTP session
#[derive(Debug)]
pub struct SmtpSession {
    /// Current state of the session
    pub state: SmtpState,
    /// Address of the connected client
    pub peer: SocketAddr,
    /// Client domain from the last EHLO/HELO command
    pub client_domain: Option<String>,
    /// Transaction in progress, created by MAIL
    pub message: Option<Message>,
    /// Dot-decoded body collected during DATA
    data: Vec<u8>,
    /// Set once the body grew past `SmtpLimits::MAX_DATA_SIZE`
    data_overflow: bool,
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            state: SmtpState::Start,
            peer,
            client_domain: None,
            message: None,
            data: Vec::new(),
            data_overflow: false,
        }
    }

    /// State to return to when no transaction is in progress
    fn idle_state(&self) -> SmtpState {
        if self.client_domain.is_some() {
            SmtpState::Greeted
        } else {
            SmtpState::Start
        }
    }

    /// Record the domain announced by EHLO/HELO.
    ///
    /// A transaction in progress is left alone.
    pub fn set_client_domain(&mut self, domain: String) {
        self.client_domain = Some(domain);
        if self.state == SmtpState::Start {
            self.state = SmtpState::Greeted;
        }
    }

    /// Start a new transaction, replacing any pending one
    pub fn begin_transaction(&mut self, sender: String) {
        let greet_domain = self.client_domain.as_deref().unwrap_or_default();
        self.message = Some(Message::new(greet_domain, sender, self.peer));
        self.clear_data();
        self.state = SmtpState::SenderSet;
    }

    /// Record the recipient of the pending transaction
    pub fn set_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        let message = self.message.as_mut().ok_or_else(|| {
            SmtpError::InvalidState("RCPT command requires MAIL first".to_string())
        })?;

        message.set_recipient(recipient);
        self.state = SmtpState::RecipientSet;
        Ok(())
    }

    /// Start data collection mode
    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if !self.has_complete_envelope() {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.clear_data();
        self.state = SmtpState::DataPending;
        Ok(())
    }

    /// Add one line of the body, without its line ending.
    ///
    /// Leading-dot transparency is undone here. Once the body is over the
    /// size limit further lines are dropped and the transaction fails when
    /// the terminating dot arrives.
    pub fn add_data_line(&mut self, line: &[u8]) {
        if self.data_overflow {
            return;
        }

        let line = match line.strip_prefix(b".") {
            Some(rest) if !rest.is_empty() => rest,
            _ => line,
        };
        if self.data.len() + line.len() + 1 > SmtpLimits::MAX_DATA_SIZE {
            self.mark_data_overflow();
            return;
        }

        self.data.extend_from_slice(line);
        self.data.push(b'\n');
    }

    /// Give up on the body collected so far; the terminating dot will be
    /// answered with 552.
    pub fn mark_data_overflow(&mut self) {
        self.data_overflow = true;
        self.data.clear();
    }

    /// Finish data collection and hand back the completed message.
    ///
    /// The session is ready for a new MAIL afterwards, whether or not the
    /// body could be parsed.
    pub fn finish_data_collection(&mut self) -> Result<Message, SmtpError> {
        if self.state != SmtpState::DataPending {
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        }

        let overflow = self.data_overflow;
        let data = std::mem::take(&mut self.data);
        let message = self.message.take();
        self.reset();

        if overflow {
            return Err(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
        }

        let mut message = message
            .ok_or_else(|| SmtpError::InvalidState("No transaction in progress".to_string()))?;
        message.set_content(&data)?;
        Ok(message)
    }

    /// Drop the pending transaction; the greeting is kept
    pub fn reset(&mut self) {
        self.message = None;
        self.clear_data();
        self.state = self.idle_state();
    }

    /// Mark the session as finished
    pub fn close(&mut self) {
        self.message = None;
        self.clear_data();
        self.state = SmtpState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == SmtpState::Closed
    }

    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::DataPending
    }

    /// Get the current data size
    pub fn current_data_size(&self) -> usize {
        self.data.len()
    }

    /// Check if we have a sender and a recipient ready for DATA
    pub fn has_complete_envelope(&self) -> bool {
        self.message.as_ref().is_some_and(Message::has_recipient)
    }

    fn clear_data(&mut self) {
        self.data.clear();
        self.data_overflow = false;
    }
}
