//! Error types for the otp-runner crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].
//!
//! The propagation policy follows the batch model: only configuration errors and
//! progress-store I/O are fatal to a whole run. Everything else is scoped to a
//! single poll attempt or a single account and degrades to "skip and continue".

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a batch run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (FATAL, abort before any processing)
    // ─────────────────────────────────────────────────────────────────────────
    /// A required configuration value is missing.
    #[error("missing configuration: {name}")]
    MissingConfig {
        /// Name of the missing value (e.g. an environment variable).
        name: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// The mailbox address is not a valid email address.
    #[error("invalid mailbox address: {address}")]
    InvalidMailboxAddress {
        /// The invalid address.
        address: String,
    },

    /// An entry in the account list is not of the form `username:password`.
    #[error("invalid account entry at position {index}: {entry:?}")]
    InvalidAccountEntry {
        /// Zero-based position in the comma-delimited list.
        index: usize,
        /// The malformed entry (never contains a parsed secret).
        entry: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE within the poll attempt budget)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (retryable within the poll attempt budget)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox authentication timeout.
    #[error("authentication timeout for {address} after {timeout:?}")]
    AuthTimeout {
        /// The mailbox address used for authentication.
        address: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Search timeout.
    #[error("search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (retryable - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {address}")]
    ImapLogin {
        /// The mailbox address used for login.
        address: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to read a message from the fetch stream.
    #[error("failed to fetch message from stream")]
    FetchMessage {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors (skip the message, keep polling)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse an email message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Driver errors (terminal for the current account, batch continues)
    // ─────────────────────────────────────────────────────────────────────────
    /// The UI-automation driver reported a failure.
    #[error("driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),

    // ─────────────────────────────────────────────────────────────────────────
    // Progress store errors (FATAL - the run cannot record progress)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to read or write the progress checkpoint file.
    #[error("progress store I/O at {path}")]
    Progress {
        /// Path of the checkpoint file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file did not contain a plain integer.
    #[error("corrupt progress checkpoint at {path}: {content:?}")]
    CorruptCheckpoint {
        /// Path of the checkpoint file.
        path: String,
        /// The offending file content (truncated).
        content: String,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed
    /// on a later poll attempt.
    ///
    /// The mailbox poller uses this to decide whether a failed attempt consumes one
    /// unit of its attempt budget or aborts the account outright.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            // Retryable: network, timeouts, IMAP operations
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. } => true,

            // Not retryable: config errors, parse failures, driver and store errors
            Error::MissingConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidMailboxAddress { .. }
            | Error::InvalidAccountEntry { .. }
            | Error::InvalidDnsName { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. }
            | Error::Driver(_)
            | Error::Progress { .. }
            | Error::CorruptCheckpoint { .. } => false,
        }
    }

    /// Returns `true` if this error must abort the whole batch rather than a single
    /// account.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Progress
        )
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidMailboxAddress { .. }
            | Error::InvalidAccountEntry { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } => ErrorCategory::Parse,

            Error::Driver(_) => ErrorCategory::Driver,

            Error::Progress { .. } | Error::CorruptCheckpoint { .. } => ErrorCategory::Progress,
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// UI-automation driver errors.
    Driver,
    /// Progress checkpoint store errors.
    Progress,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Driver => write!(f, "driver"),
            ErrorCategory::Progress => write!(f, "progress"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        // Configuration errors are not retryable
        let err = Error::MissingConfig {
            name: "OTP_MAILBOX_ADDRESS".into(),
        };
        assert!(!err.is_retryable());

        // Network errors are retryable
        let err = Error::TcpConnect {
            target: "imap.example.com:993".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.is_retryable());

        // Parse failures won't change on retry of the same message
        let err = Error::ParseEmail {
            source: mailparse::MailParseError::Generic("bad"),
        };
        assert!(!err.is_retryable());

        // Driver failures are terminal for the account
        let err = Error::Driver(crate::driver::DriverError::backend("session crashed"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        let err = Error::MissingConfig {
            name: "OTP_ACCOUNTS".into(),
        };
        assert!(err.is_fatal());

        let err = Error::Progress {
            path: "progress.txt".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.is_fatal());

        let err = Error::SearchTimeout {
            timeout: Duration::from_secs(10),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::InvalidAccountEntry {
            index: 2,
            entry: "no-colon-here".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = Error::ConnectTimeout {
            target: "imap.example.com:993".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::CorruptCheckpoint {
            path: "progress.txt".into(),
            content: "banana".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Progress);
    }

    #[test]
    fn test_account_entry_error_display() {
        let err = Error::InvalidAccountEntry {
            index: 0,
            entry: "lonely-user".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("lonely-user"));
        assert!(msg.contains("position 0"));
    }
}
