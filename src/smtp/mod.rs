//! SMTP server implementation

pub mod commands;
pub mod error;
pub mod inbox;
pub mod message;
pub mod parser;
pub mod policy;
pub mod registry;
pub mod response;
pub mod server;
pub mod session;
pub mod signal;

pub use error::{SmtpError, SmtpLimits};
pub use inbox::{Inbox, InboxConfig, QueueFullPolicy};
pub use message::{Header, Message};
pub use policy::Policy;
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{SmtpSession, SmtpState};
pub use signal::{ReadySignal, ShutdownSignal, ShutdownTrigger, shutdown_channel};
