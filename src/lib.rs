//! # letterbox
//!
//! letterbox is a small receive-only SMTP server with a SQLite message store.
//!
//! Each connection runs on its own thread and is driven through the SMTP
//! command sequence. Senders on a blacklist are turned away, recipients
//! have to be on a whitelist, and every completed transaction ends up in
//! the server's [`Inbox`]. What happens to a message after that is up to
//! the owner of the inbox; the bundled binary saves it into a [`Store`]
//! folder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use letterbox::{ServerConfig, SmtpServer, Store, shutdown_channel};
//! use std::thread;
//!
//! let config = ServerConfig::new("mail.example.com")
//!     .with_recipient_whitelist(["alice@example.com"]);
//! let (server, inbox) = SmtpServer::new(config);
//! let (trigger, shutdown) = shutdown_channel();
//!
//! let background = server.clone();
//! let handle = thread::spawn(move || background.listen(&shutdown, "127.0.0.1:2525"));
//! println!("listening on {}", server.ready().wait());
//!
//! let store = Store::open("letterbox.db")?;
//! if let Ok(message) = inbox.recv() {
//!     let id = store.save(&message, "INBOX")?;
//!     println!("saved message {id} from {}", message.mail_from());
//! }
//!
//! trigger.trigger();
//! handle.join().unwrap()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `EHLO`, `HELO` - Identify the client
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the recipient (one per message, the last one wins)
//! - `DATA` - Send the message, headers first
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! `RSET` and `VRFY` are answered with 502.
//!
//! ## Notes
//!
//! - SMTP authentication is not supported.
//! - SSL/TLS connection is not supported.
//! - Mail relay is not supported.
//!
//! ## Size Limits
//!
//! - Paths: 256 characters max
//! - Command lines: 512 characters max
//! - Message data: 10 MiB max

pub mod config;
pub mod logging;
pub mod smtp;
pub mod store;

pub use config::{Config, ConfigError, ServerConfig};
pub use smtp::{
    Header, Inbox, InboxConfig, Message, Policy, QueueFullPolicy, ReadySignal, ShutdownSignal,
    ShutdownTrigger, SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession, SmtpState,
    shutdown_channel,
};
pub use store::{FolderStats, Store, StoreError};
