//! Mailbox poller: retrieves the current one-time code from the shared inbox.
//!
//! Each poll attempt opens its own IMAP session and logs out at the end, so a
//! long wait between accounts can never invalidate a held connection. The
//! search is scoped to unseen mail from the known sender inside the freshness
//! window; since the IMAP `SINCE` term is only day-granular, each fetched
//! message's `Date` header is checked against the window as well. Fetching the
//! selected message marks it seen, so a code is never returned twice across
//! accounts.
//!
//! A transient failure inside an attempt is logged and consumes one unit of
//! the attempt budget; exhaustion surfaces as `Ok(None)` (code not found), not
//! as an error. Only non-retryable failures, which would fail every remaining
//! attempt identically, propagate as errors.

use crate::config::{CodeProfile, MailboxConfig, PollingConfig, TimeoutConfig};
use crate::connection;
use crate::error::{Error, Result};
use crate::extract::{CodeExtractor, ExtractOutcome, OneTimeCode};
use crate::session::{self, AuthConfig, ImapSession};
use async_trait::async_trait;
use chrono::Utc;
use mailparse::MailHeaderMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Source of one-time codes for the login sequencer.
///
/// The production implementation is [`CodePoller`]; tests substitute a stub to
/// drive the state machine without a mailbox.
#[async_trait]
pub trait CodeSource: Send {
    /// Retrieves the current one-time code.
    ///
    /// Resolves to `Ok(None)` when no qualifying code appeared within the
    /// source's attempt budget.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that make further polling pointless
    /// for this run (the production poller converts everything transient into
    /// retries internally).
    async fn retrieve_code(&mut self) -> Result<Option<OneTimeCode>>;
}

/// Polls the shared mailbox for the current login's one-time code.
#[derive(Debug, Clone)]
pub struct CodePoller {
    mailbox: MailboxConfig,
    sender: String,
    polling: PollingConfig,
    timeouts: TimeoutConfig,
    extractor: CodeExtractor,
}

impl CodePoller {
    /// Creates a poller for the given mailbox and code profile.
    #[must_use]
    pub fn new(
        mailbox: MailboxConfig,
        sender: impl Into<String>,
        code: &CodeProfile,
        polling: PollingConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            mailbox,
            sender: sender.into(),
            polling,
            timeouts,
            extractor: CodeExtractor::new(code),
        }
    }

    /// Creates a poller from a full run configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.mailbox.clone(),
            config.code_sender.clone(),
            &config.code,
            config.polling.clone(),
            config.timeouts.clone(),
        )
    }

    /// Polls for a code, up to the configured attempt budget.
    ///
    /// # Errors
    ///
    /// Transient attempt failures are absorbed into the budget; only
    /// non-retryable errors (per [`Error::is_retryable`]) propagate, since
    /// they would fail every remaining attempt identically.
    #[instrument(
        name = "CodePoller::retrieve_code",
        skip(self),
        fields(
            sender = %self.sender,
            max_attempts = self.polling.max_attempts
        )
    )]
    pub async fn retrieve_code(&self) -> Result<Option<OneTimeCode>> {
        poll_with_retry(
            self.polling.max_attempts,
            self.polling.retry_delay,
            |attempt| self.poll_once(attempt),
        )
        .await
    }

    /// One complete poll attempt: open session, search, fetch, extract, logout.
    #[instrument(name = "CodePoller::poll_once", skip(self), fields(attempt = attempt))]
    async fn poll_once(&self, attempt: u32) -> Result<Option<OneTimeCode>> {
        let mut imap_session = self.open_session().await?;

        let result = self.search_and_extract(&mut imap_session).await;

        // Close the session on every path so retries never exhaust the
        // server's connection budget.
        let logout = tokio::time::timeout(
            self.timeouts.logout,
            session::logout(&mut imap_session),
        )
        .await;
        match logout {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "IMAP logout failed after poll attempt"),
            Err(_) => warn!("IMAP logout timed out after poll attempt"),
        }

        result
    }

    /// Connects, authenticates, and selects the inbox.
    async fn open_session(&self) -> Result<ImapSession> {
        let imap_host = self.mailbox.effective_imap_host();
        let target_addr = self.mailbox.server_address();

        let tls_stream = tokio::time::timeout(
            self.timeouts.connect,
            connection::establish_tls_connection(&imap_host, &target_addr),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: self.timeouts.connect,
        })??;

        let auth_config = AuthConfig {
            address: self.mailbox.address(),
            password: self.mailbox.password(),
        };

        let mut imap_session =
            tokio::time::timeout(self.timeouts.auth, session::authenticate(tls_stream, &auth_config))
                .await
                .map_err(|_| Error::AuthTimeout {
                    address: self.mailbox.address().to_string(),
                    timeout: self.timeouts.auth,
                })??;

        tokio::time::timeout(
            self.timeouts.select,
            session::select_mailbox(&mut imap_session, "INBOX"),
        )
        .await
        .map_err(|_| Error::SelectTimeout {
            mailbox: "INBOX".to_string(),
            timeout: self.timeouts.select,
        })??;

        Ok(imap_session)
    }

    /// Searches for qualifying mail and extracts a code from the newest match.
    async fn search_and_extract(&self, imap_session: &mut ImapSession) -> Result<Option<OneTimeCode>> {
        let since_date = (Utc::now()
            - chrono::Duration::from_std(self.polling.freshness_window)
                .unwrap_or_else(|_| chrono::Duration::zero()))
        .date_naive();

        let uids = tokio::time::timeout(
            self.timeouts.search,
            session::search_code_mails(imap_session, &self.sender, since_date),
        )
        .await
        .map_err(|_| Error::SearchTimeout {
            timeout: self.timeouts.search,
        })??;

        // Most recently received wins; UIDs are assigned in ascending order of
        // arrival, so the highest UID is the tie-break.
        let Some(uid) = uids.iter().max().copied() else {
            debug!("No qualifying code mail");
            return Ok(None);
        };

        let body = tokio::time::timeout(
            self.timeouts.message_fetch,
            session::fetch_message(imap_session, uid),
        )
        .await
        .map_err(|_| Error::FetchTimeout {
            uid,
            timeout: self.timeouts.message_fetch,
        })??;

        let Some(raw) = body else {
            debug!(uid, "Selected message had no body");
            return Ok(None);
        };

        if !message_is_fresh(&raw, self.polling.freshness_window) {
            // Already marked seen by the fetch, so it will not be selected
            // again on a later attempt.
            debug!(uid, "Message is older than the freshness window");
            return Ok(None);
        }

        match self.extractor.extract(&raw) {
            ExtractOutcome::Found(code) => {
                debug!(uid, "Extracted one-time code");
                Ok(Some(code))
            }
            ExtractOutcome::NotFound => {
                debug!(uid, "Message carried no valid code");
                Ok(None)
            }
            ExtractOutcome::ParseError => {
                // Already marked seen by the fetch, so the next attempt will
                // not re-select it.
                debug!(uid, "Message could not be parsed");
                Ok(None)
            }
        }
    }
}

/// Fine-grained freshness check against the message's `Date` header.
///
/// The IMAP `SINCE` search term is day-granular, so a same-day message can be
/// arbitrarily old; the header enforces the configured window. A message whose
/// `Date` header is missing or unparseable is treated as stale rather than
/// risking a code of unknown age.
pub(crate) fn message_is_fresh(raw: &[u8], window: Duration) -> bool {
    let Ok((headers, _)) = mailparse::parse_headers(raw) else {
        return false;
    };
    let Some(date) = headers.get_first_value("Date") else {
        return false;
    };
    let Ok(sent) = mailparse::dateparse(&date) else {
        return false;
    };

    let age = Utc::now().timestamp() - sent;
    age <= i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl CodeSource for CodePoller {
    async fn retrieve_code(&mut self) -> Result<Option<OneTimeCode>> {
        CodePoller::retrieve_code(self).await
    }
}

/// Runs `attempt` up to `max_attempts` times with `retry_delay` between runs.
///
/// An attempt resolving to `Ok(Some(code))` short-circuits. An empty attempt
/// (`Ok(None)`) or a retryable error consumes one unit of budget; exhaustion
/// yields `Ok(None)`. A non-retryable error (per [`Error::is_retryable`])
/// would fail every remaining attempt identically, so it aborts immediately.
pub(crate) async fn poll_with_retry<F, Fut>(
    max_attempts: u32,
    retry_delay: Duration,
    mut attempt: F,
) -> Result<Option<OneTimeCode>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<OneTimeCode>>>,
{
    for n in 1..=max_attempts {
        match attempt(n).await {
            Ok(Some(code)) => return Ok(Some(code)),
            Ok(None) => {
                debug!(attempt = n, max_attempts, "Poll attempt found no code");
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    attempt = n,
                    max_attempts,
                    category = %e.category(),
                    error = %e,
                    "Poll attempt failed"
                );
            }
            Err(e) => return Err(e),
        }

        if n < max_attempts {
            tokio::time::sleep(retry_delay).await;
        }
    }

    Ok(None)
}
