//! SMTP server implementation

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, info_span, trace, warn};

use crate::config::ServerConfig;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::inbox::{self, Inbox, InboxSender};
use crate::smtp::policy::Policy;
use crate::smtp::registry::SessionRegistry;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;
use crate::smtp::signal::{ReadySignal, ShutdownSignal};

/// How often the accept loop looks at the shutdown signal when idle
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest command line read, CRLF included
const COMMAND_READ_LIMIT: usize = SmtpLimits::COMMAND_LINE_MAX_LENGTH + 2;

/// Longest DATA line read. Anything longer overflows the body anyway.
const DATA_READ_LIMIT: usize = SmtpLimits::MAX_DATA_SIZE + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// Over the limit; the rest of the line was skipped
    TooLong,
}

/// Read-only state shared by every session of a server
#[derive(Debug)]
struct ServerContext {
    domain: String,
    policy: Policy,
    idle_timeout: Option<Duration>,
}

/// SMTP server that accepts connections and hands completed messages to
/// its [`Inbox`]
#[derive(Debug, Clone)]
pub struct SmtpServer {
    context: Arc<ServerContext>,
    inbox: InboxSender,
    sessions: Arc<SessionRegistry>,
    ready: ReadySignal,
    shutdown_grace: Duration,
}

impl SmtpServer {
    /// Create a new SMTP server along with the inbox its messages arrive in
    pub fn new(config: ServerConfig) -> (Self, Inbox) {
        let (sender, inbox) = inbox::inbox(config.inbox);
        let context = ServerContext {
            policy: Policy::new(&config.sender_blacklist, &config.recipient_whitelist),
            idle_timeout: config.idle_timeout(),
            domain: config.domain,
        };

        let server = Self {
            context: Arc::new(context),
            inbox: sender,
            sessions: Arc::new(SessionRegistry::new()),
            ready: ReadySignal::new(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        };
        (server, inbox)
    }

    /// Domain announced to clients
    pub fn domain(&self) -> &str {
        &self.context.domain
    }

    /// Fires with the bound address once the server accepts connections
    pub fn ready(&self) -> ReadySignal {
        self.ready.clone()
    }

    /// Address the server is listening on, if it already is
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ready.get()
    }

    /// Number of sessions being served right now
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Bind to `addr` and serve until `shutdown` fires (blocking)
    pub fn listen(
        &self,
        shutdown: &ShutdownSignal,
        addr: impl ToSocketAddrs,
    ) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.serve(shutdown, listener)
    }

    /// Serve an already bound listener until `shutdown` fires (blocking).
    ///
    /// On return the listener is closed, every live session has been told
    /// to stop and the server waited up to its grace period for them.
    pub fn serve(&self, shutdown: &ShutdownSignal, listener: TcpListener) -> Result<(), SmtpError> {
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        info!(%local_addr, domain = %self.context.domain, "SMTP server listening");
        self.ready.notify(local_addr);

        loop {
            match listener.accept() {
                Ok((stream, peer)) => self.spawn_session(stream, peer, shutdown),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if shutdown.wait_timeout(ACCEPT_POLL_INTERVAL) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "error accepting connection");
                    if shutdown.wait_timeout(ACCEPT_POLL_INTERVAL) {
                        break;
                    }
                }
            }
        }

        drop(listener);
        self.stop_sessions();
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, shutdown: &ShutdownSignal) {
        let guard = match self.sessions.register(peer, &stream) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(%peer, error = %e, "failed to register session");
                return;
            }
        };

        let id = guard.id();
        let server = self.clone();
        let shutdown = shutdown.clone();
        let spawned = thread::Builder::new()
            .name(format!("smtp-session-{id}"))
            .spawn(move || {
                let span = info_span!("session", id, %peer);
                let _enter = span.enter();
                debug!("connection accepted");

                match server.handle_client(stream, peer, &shutdown) {
                    Ok(()) => debug!("connection closed"),
                    Err(e) => warn!(error = %e, "session ended with error"),
                }
                drop(guard);
            });

        if let Err(e) = spawned {
            error!(%peer, error = %e, "failed to spawn session thread");
        }
    }

    fn stop_sessions(&self) {
        let cancelled = self.sessions.cancel_all();
        if cancelled > 0 {
            info!(sessions = cancelled, "closing live sessions");
        }
        if !self.sessions.wait_idle(self.shutdown_grace) {
            warn!(
                sessions = self.sessions.len(),
                "sessions still running after shutdown grace period"
            );
        }
        info!("SMTP server stopped");
    }

    /// Handle a client connection
    fn handle_client(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        shutdown: &ShutdownSignal,
    ) -> Result<(), SmtpError> {
        // Some platforms hand out accepted sockets in the listener's mode.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.context.idle_timeout)?;

        let domain = self.context.domain.as_str();
        let command_handler = SmtpCommandHandler::new(domain, &self.context.policy);
        let mut session = SmtpSession::new(peer);
        let mut reader = BufReader::new(stream.try_clone()?);

        // Send greeting
        self.send_response(&mut stream, &SmtpResponse::greeting(domain))?;

        let mut line_buffer = Vec::new();
        while !session.is_closed() {
            let limit = if session.in_data_mode() {
                DATA_READ_LIMIT
            } else {
                COMMAND_READ_LIMIT
            };

            let read = match read_bounded_line(&mut reader, &mut line_buffer, limit) {
                Ok(LineRead::Eof) => {
                    debug!("client closed the connection");
                    break;
                }
                Ok(read) => read,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    info!("client idle for too long");
                    self.send_response(&mut stream, &SmtpResponse::service_unavailable(domain))?;
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let line = trim_line_ending(&line_buffer);

            let response = if session.in_data_mode() {
                if read == LineRead::TooLong {
                    debug!(limit, "data line too long");
                    session.mark_data_overflow();
                    continue;
                }
                match self.handle_data_line(line, &mut session, shutdown) {
                    Some(response) => response,
                    None => continue,
                }
            } else {
                let result = if read == LineRead::TooLong {
                    Err(SmtpError::LineTooLong {
                        max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                    })
                } else {
                    // Replace invalid UTF-8 sequences instead of dropping the line
                    let line = String::from_utf8_lossy(line);
                    trace!(command = %line, "received command");
                    command_handler.process_command(&line, &mut session)
                };
                match result {
                    Ok(response) => response,
                    Err(e) => {
                        debug!(error = %e, "command rejected");
                        self.error_response(&e, &mut session)
                    }
                }
            };

            self.send_response(&mut stream, &response)?;
        }

        Ok(())
    }

    /// Handle a line of data during DATA mode.
    ///
    /// Returns the reply once the terminating dot arrives.
    fn handle_data_line(
        &self,
        line: &[u8],
        session: &mut SmtpSession,
        shutdown: &ShutdownSignal,
    ) -> Option<SmtpResponse> {
        if line != b"." {
            session.add_data_line(line);
            return None;
        }

        let delivered = session.finish_data_collection().and_then(|message| {
            info!(
                from = message.mail_from(),
                to = message.rcpt_to().unwrap_or_default(),
                subject = message.subject().unwrap_or_default(),
                "message received"
            );
            self.inbox.deliver(message, shutdown)
        });

        Some(match delivered {
            Ok(()) => SmtpResponse::ok(),
            Err(e) => {
                warn!(error = %e, "message not accepted");
                self.error_response(&e, session)
            }
        })
    }

    /// Reply for a failed command; fatal errors also close the session
    fn error_response(&self, err: &SmtpError, session: &mut SmtpSession) -> SmtpResponse {
        if err.is_fatal() {
            session.close();
            SmtpResponse::service_unavailable(&self.context.domain)
        } else {
            SmtpResponse::from(err)
        }
    }

    /// Send a response to the client
    fn send_response(
        &self,
        stream: &mut TcpStream,
        response: &SmtpResponse,
    ) -> Result<(), SmtpError> {
        trace!(code = %response.code, "sending reply");
        stream.write_all(response.format().as_bytes())?;
        stream.flush()?;
        Ok(())
    }
}

/// Read one line into `buf`, keeping at most `limit` bytes of it.
///
/// A longer line is consumed up to its LF and reported as `TooLong`, so
/// memory stays bounded whatever the client sends.
fn read_bounded_line<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<LineRead> {
    buf.clear();
    let read = reader.by_ref().take(limit as u64 + 1).read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.len() > limit {
        if buf.last() != Some(&b'\n') {
            reader.skip_until(b'\n')?;
        }
        buf.clear();
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&byte| byte != b'\r' && byte != b'\n')
        .map_or(0, |last| last + 1);
    &line[..end]
}
