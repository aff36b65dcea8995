//! Target accounts and the `username:password` list format.
//!
//! Accounts form an ordered sequence; the index position is the addressing key
//! used by the progress checkpoint, so the parse preserves input order and never
//! deduplicates.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};

/// A single target account: login identifier plus secret.
///
/// Immutable once loaded. The password is wrapped in [`SecretString`] so it
/// cannot leak through `Debug` or tracing fields.
#[derive(Clone)]
pub struct Account {
    username: String,
    password: SecretString,
}

impl Account {
    /// Creates an account from its identifier and secret.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Returns the login identifier.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password for credential entry.
    ///
    /// The password is intentionally not a public field to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Parses a comma-delimited `username:password` list into an ordered account sequence.
///
/// Whitespace around entries is trimmed; empty entries (trailing commas) are skipped.
/// Passwords may themselves contain `:` - only the first colon splits.
///
/// # Errors
///
/// Returns [`Error::InvalidAccountEntry`] for an entry without a colon or with an
/// empty username or password, and [`Error::MissingConfig`] if the list yields no
/// accounts at all.
pub fn parse_account_list(raw: &str) -> Result<Vec<Account>> {
    let mut accounts = Vec::new();

    for (index, entry) in raw.split(',').map(str::trim).enumerate() {
        if entry.is_empty() {
            continue;
        }

        let Some((username, password)) = entry.split_once(':') else {
            return Err(Error::InvalidAccountEntry {
                index,
                entry: entry.to_string(),
            });
        };

        if username.is_empty() || password.is_empty() {
            return Err(Error::InvalidAccountEntry {
                index,
                // Redact whatever half was present; the operator can locate the
                // entry by position.
                entry: format!("{username}:***"),
            });
        }

        accounts.push(Account::new(username, password));
    }

    if accounts.is_empty() {
        return Err(Error::MissingConfig {
            name: "account list".into(),
        });
    }

    Ok(accounts)
}
