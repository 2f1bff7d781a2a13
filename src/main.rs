use std::path::PathBuf;
use std::thread;

use anyhow::{Context, anyhow};
use clap::Parser;
use letterbox::{Config, SmtpServer, Store, logging, shutdown_channel};
use tracing::{error, info};

/// Receive-only SMTP server that files accepted mail into a SQLite store
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Domain announced to clients
    #[arg(long)]
    domain: Option<String>,

    /// Address to listen on
    #[arg(long)]
    addr: Option<String>,

    /// SQLite database file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Folder accepted mail is saved into
    #[arg(long)]
    folder: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(domain) = &self.domain {
            config.server.domain.clone_from(domain);
        }
        if let Some(addr) = &self.addr {
            config.server.listen.clone_from(addr);
        }
        if let Some(db) = &self.db {
            config.store.path.clone_from(db);
        }
        if let Some(folder) = &self.folder {
            config.store.folder.clone_from(folder);
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    logging::init(&config.logging);

    let store = Store::open(&config.store.path)
        .with_context(|| format!("failed to open store {}", config.store.path.display()))?;

    let (server, inbox) = SmtpServer::new(config.server.clone());
    // Never triggered: the server runs until the process is killed.
    let (_trigger, shutdown) = shutdown_channel();

    let listen = config.server.listen.clone();
    let acceptor = thread::Builder::new()
        .name("smtp-accept".to_string())
        .spawn(move || server.listen(&shutdown, listen.as_str()))
        .context("failed to start the SMTP acceptor")?;

    // Ends once the acceptor is gone, e.g. because it could not bind.
    for message in inbox.iter() {
        match store.save(&message, &config.store.folder) {
            Ok(sequence) => info!(
                folder = %config.store.folder,
                sequence,
                from = message.mail_from(),
                "message stored"
            ),
            Err(e) => error!(
                folder = %config.store.folder,
                from = message.mail_from(),
                error = %e,
                "failed to store message"
            ),
        }
    }

    acceptor
        .join()
        .map_err(|_| anyhow!("SMTP acceptor panicked"))?
        .with_context(|| format!("SMTP server on {} failed", config.server.listen))?;
    store.close()?;
    Ok(())
}
