//! SQLite-backed message store.
//!
//! Every folder is an append-only log of messages keyed by a sequence id
//! that starts at 1 and is never reused, plus `total` and `unseen` counters.
//! A message and the counter updates it causes are written in the same
//! transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{OptionalExtension as _, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::smtp::Message;

static MIGRATIONS: &[&str] = &[include_str!("store.v1.sql")];

const TOTAL: &str = "total";
const UNSEEN: &str = "unseen";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("folder not specified")]
    FolderNotSpecified,

    #[error("store is closed")]
    Closed,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode or decode message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("counter {name} of folder {folder} holds {value:?}, not a number")]
    CorruptCounter {
        folder: String,
        name: &'static str,
        value: String,
    },
}

/// Counters kept per folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStats {
    /// Messages ever saved into the folder
    pub total: u64,
    pub unseen: u64,
}

/// Handle to an open store. Safe to share between threads.
#[derive(Debug)]
pub struct Store {
    cxn: Mutex<Option<rusqlite::Connection>>,
}

impl Store {
    /// Open the database at `path`, creating it and its tables if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut cxn = rusqlite::Connection::open(path)?;

        cxn.pragma_update(None, "foreign_keys", true)?;
        cxn.busy_timeout(Duration::from_secs(10))?;
        apply_migrations(&mut cxn)?;

        debug!(path = %path.display(), "store opened");
        Ok(Self {
            cxn: Mutex::new(Some(cxn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<rusqlite::Connection>> {
        self.cxn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `message` to `folder`, creating the folder on first use.
    ///
    /// Returns the sequence id the message was stored under.
    pub fn save(&self, message: &Message, folder: &str) -> Result<u64, StoreError> {
        if folder.is_empty() {
            return Err(StoreError::FolderNotSpecified);
        }

        let data = serde_json::to_string(message)?;

        let mut cxn = self.lock();
        let cxn = cxn.as_mut().ok_or(StoreError::Closed)?;
        let txn = cxn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        txn.execute(
            "INSERT INTO `folder` (`name`) VALUES (?) ON CONFLICT DO NOTHING",
            (folder,),
        )?;
        let sequence: i64 = txn.query_row(
            "UPDATE `folder` SET `last_sequence` = `last_sequence` + 1 \
             WHERE `name` = ? RETURNING `last_sequence`",
            (folder,),
            |row| row.get(0),
        )?;
        txn.execute(
            "INSERT INTO `message` (`folder`, `sequence`, `data`) VALUES (?, ?, ?)",
            (folder, sequence, &data),
        )?;
        increment_counter(&txn, folder, TOTAL)?;
        increment_counter(&txn, folder, UNSEEN)?;

        txn.commit()?;

        let sequence = sequence_from_sql(sequence)?;
        info!(folder, sequence, "message saved");
        Ok(sequence)
    }

    /// Names of all folders, sorted
    pub fn list_folders(&self) -> Result<Vec<String>, StoreError> {
        let mut cxn = self.lock();
        let cxn = cxn.as_mut().ok_or(StoreError::Closed)?;
        let folders = cxn
            .prepare_cached("SELECT `name` FROM `folder` ORDER BY `name`")?
            .query_map((), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(folders)
    }

    /// Counters of `folder`, or `None` if nothing was ever saved there
    pub fn stats(&self, folder: &str) -> Result<Option<FolderStats>, StoreError> {
        let mut cxn = self.lock();
        let cxn = cxn.as_mut().ok_or(StoreError::Closed)?;
        let txn = cxn.transaction()?;

        let exists = txn
            .prepare_cached("SELECT 1 FROM `folder` WHERE `name` = ?")?
            .exists((folder,))?;
        if !exists {
            return Ok(None);
        }

        Ok(Some(FolderStats {
            total: read_counter(&txn, folder, TOTAL)?,
            unseen: read_counter(&txn, folder, UNSEEN)?,
        }))
    }

    /// The message stored in `folder` under `sequence`
    pub fn message(&self, folder: &str, sequence: u64) -> Result<Option<Message>, StoreError> {
        let Ok(sequence) = i64::try_from(sequence) else {
            return Ok(None);
        };

        let mut cxn = self.lock();
        let cxn = cxn.as_mut().ok_or(StoreError::Closed)?;
        let data: Option<String> = cxn
            .prepare_cached(
                "SELECT `data` FROM `message` WHERE `folder` = ? AND `sequence` = ?",
            )?
            .query_row((folder, sequence), |row| row.get(0))
            .optional()?;

        data.map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(Into::into)
    }

    /// Every message of `folder` in sequence order
    pub fn messages(&self, folder: &str) -> Result<Vec<(u64, Message)>, StoreError> {
        let mut cxn = self.lock();
        let cxn = cxn.as_mut().ok_or(StoreError::Closed)?;
        let rows = cxn
            .prepare_cached(
                "SELECT `sequence`, `data` FROM `message` \
                 WHERE `folder` = ? ORDER BY `sequence`",
            )?
            .query_map((folder,), |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(sequence, data)| -> Result<_, StoreError> {
                Ok((sequence_from_sql(sequence)?, serde_json::from_str(&data)?))
            })
            .collect()
    }

    /// Release the database. Every later call fails with
    /// [`StoreError::Closed`]; closing twice is harmless.
    pub fn close(&self) -> Result<(), StoreError> {
        let Some(cxn) = self.lock().take() else {
            return Ok(());
        };
        cxn.close().map_err(|(_, err)| err)?;
        debug!("store closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

fn apply_migrations(cxn: &mut rusqlite::Connection) -> Result<(), StoreError> {
    let latest_version = MIGRATIONS.len() as i64;

    if Ok(latest_version)
        == cxn.query_row("SELECT MAX(`version`) FROM `migration`", (), |row| {
            row.get::<_, i64>(0)
        })
    {
        return Ok(());
    }

    let txn = cxn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    txn.execute(
        "CREATE TABLE IF NOT EXISTS `migration` (\
         `version` INTEGER NOT NULL PRIMARY KEY, \
         `applied_at` TEXT NOT NULL\
         ) STRICT",
        (),
    )?;

    let current_version = txn
        .query_row("SELECT MAX(`version`) FROM `migration`", (), |row| {
            row.get::<_, Option<i64>>(0)
        })?
        .unwrap_or(0);

    for (version, migration) in (1_i64..)
        .zip(MIGRATIONS.iter().copied())
        .filter(|(version, _)| *version > current_version)
    {
        info!(version, "applying store migration");
        txn.execute_batch(migration)?;
        txn.execute(
            "INSERT INTO `migration` (`version`, `applied_at`) VALUES (?, ?)",
            (version, chrono::Utc::now().to_rfc3339()),
        )?;
    }

    txn.commit()?;
    Ok(())
}

fn read_counter(txn: &Transaction<'_>, folder: &str, name: &'static str) -> Result<u64, StoreError> {
    let raw: Option<String> = txn
        .prepare_cached("SELECT `value` FROM `stat` WHERE `folder` = ? AND `name` = ?")?
        .query_row((folder, name), |row| row.get(0))
        .optional()?;

    match raw {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| StoreError::CorruptCounter {
            folder: folder.to_owned(),
            name,
            value,
        }),
    }
}

fn increment_counter(txn: &Transaction<'_>, folder: &str, name: &'static str) -> Result<(), StoreError> {
    let value = read_counter(txn, folder, name)? + 1;
    txn.execute(
        "INSERT INTO `stat` (`folder`, `name`, `value`) VALUES (?, ?, ?) \
         ON CONFLICT (`folder`, `name`) DO UPDATE SET `value` = excluded.`value`",
        (folder, name, value.to_string()),
    )?;
    Ok(())
}

fn sequence_from_sql(sequence: i64) -> Result<u64, StoreError> {
    u64::try_from(sequence).map_err(|_| {
        StoreError::Sqlite(rusqlite::Error::IntegralValueOutOfRange(0, sequence))
    })
}
