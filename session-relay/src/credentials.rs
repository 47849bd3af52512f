//! File-backed account store.
//!
//! One `username password` pair per line. The file is the only source of
//! truth: every LOGIN and REGISTER goes back to disk, so an account added by
//! hand is visible to the next login without a restart.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{info, warn};

use crate::{directory::UNKNOWN_IDENTITY, error::CredentialError, message::SERVER_SOURCE};

/// Accounts written to a fresh store.
pub const SEED_ACCOUNTS: [(&str, &str); 4] = [
    ("client1", "password1"),
    ("client2", "password2"),
    ("client3", "password3"),
    ("client4", "password4"),
];

/// Usernames the relay uses for itself; nobody may register them.
pub const RESERVED_USERNAMES: [&str; 2] = [SERVER_SOURCE, UNKNOWN_IDENTITY];

#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    // Serializes every read and append against the file.
    lock: Mutex<()>,
}

impl CredentialStore {
    /// Opens the store at `path`, creating it with [`SEED_ACCOUNTS`] when absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        if !fs::try_exists(&path).await? {
            let seed: String = SEED_ACCOUNTS
                .iter()
                .map(|(username, password)| format!("{username} {password}\n"))
                .collect();
            fs::write(&path, seed).await?;
            info!(path = %path.display(), "seeded account store with default accounts");
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True only if a line holds exactly this username and password.
    ///
    /// An unreadable store counts as "no match".
    pub async fn exists_and_matches(&self, username: &str, password: &str) -> bool {
        let _guard = self.lock.lock().await;
        match self.read_accounts().await {
            Ok(accounts) => accounts
                .iter()
                .any(|(user, pass)| user == username && pass == password),
            Err(err) => {
                warn!(path = %self.path.display(), error = ?err, "failed to read account store");
                false
            }
        }
    }

    /// Appends a new account unless the username is already taken.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        validate_field("username", username)?;
        validate_field("password", password)?;
        if RESERVED_USERNAMES.contains(&username) {
            return Err(CredentialError::ReservedName(username.to_string()));
        }

        let _guard = self.lock.lock().await;
        let accounts = match self.read_accounts().await {
            Ok(accounts) => accounts,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        if accounts.iter().any(|(user, _)| user == username) {
            return Err(CredentialError::AlreadyExists(username.to_string()));
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // One write per record keeps readers from seeing half a line.
        file.write_all(format!("{username} {password}\n").as_bytes())
            .await?;
        file.flush().await?;

        info!(username, "registered new account");
        Ok(())
    }

    async fn read_accounts(&self) -> io::Result<Vec<(String, String)>> {
        let contents = fs::read_to_string(&self.path).await?;
        Ok(contents.lines().filter_map(parse_line).collect())
    }
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let mut fields = line.split_whitespace();
    let username = fields.next()?;
    let password = fields.next()?;
    Some((username.to_string(), password.to_string()))
}

fn validate_field(name: &'static str, value: &str) -> Result<(), CredentialError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(CredentialError::InvalidField(name));
    }
    Ok(())
}
