//! Internal IMAP session management.
//!
//! Wraps async-imap operations with error mapping. The search is scoped to
//! UNSEEN messages from the known sender within the freshness window; fetching
//! a message with `BODY[]` marks it `\Seen`, which is what guarantees a code
//! mail is consumed at most once across accounts.

use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::Session;
use chrono::NaiveDate;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// Authentication configuration for the mailbox.
pub(crate) struct AuthConfig<'a> {
    pub address: &'a str,
    pub password: &'a str,
}

/// Authenticates to the IMAP server and returns a session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(address = %config.address)
)]
pub(crate) async fn authenticate(
    tls_stream: TlsStream,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(tls_stream);

    debug!("Authenticating to IMAP server");

    client
        .login(config.address, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            address: config.address.to_string(),
            source: e.0,
        })
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    debug!("Selecting mailbox");

    session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(())
}

/// Searches for unseen code mails from `sender` received on or after `since_date`.
///
/// Returns the matching UIDs. The UNSEEN term excludes messages already consumed
/// by a prior poll; the SINCE term is the coarse (day-granularity) freshness bound
/// the protocol offers.
#[instrument(
    name = "session::search_code_mails",
    skip(session),
    fields(sender = %sender, since_date = %since_date)
)]
pub(crate) async fn search_code_mails(
    session: &mut ImapSession,
    sender: &str,
    since_date: NaiveDate,
) -> Result<Vec<u32>> {
    // IMAP SINCE format: "DD-Mon-YYYY" (e.g., "07-Dec-2025")
    let since_str = since_date.format("%d-%b-%Y").to_string();
    let query = format!("(UNSEEN FROM \"{sender}\" SINCE {since_str})");

    let uids = session
        .uid_search(&query)
        .await
        .map_err(|source| Error::ImapSearch { source })?;

    let uids_vec: Vec<u32> = uids.into_iter().collect();

    debug!(uid_count = uids_vec.len(), "Search complete");

    Ok(uids_vec)
}

/// Fetches the full body of a single message by UID.
///
/// Fetching `BODY[]` (not `BODY.PEEK[]`) marks the message `\Seen` as a side
/// effect, removing it from future UNSEEN searches.
#[instrument(name = "session::fetch_message", skip(session), fields(uid = uid))]
pub(crate) async fn fetch_message(session: &mut ImapSession, uid: u32) -> Result<Option<Vec<u8>>> {
    let uid_str = uid.to_string();

    let mut stream = session
        .uid_fetch(&uid_str, "BODY[]")
        .await
        .map_err(|source| Error::ImapFetch { uid, source })?;

    let mut body = None;
    while let Some(message_result) = stream.next().await {
        let message = message_result.map_err(|source| Error::FetchMessage { source })?;
        if let Some(bytes) = message.body() {
            body = Some(bytes.to_vec());
        }
    }

    debug!(found = body.is_some(), "Fetch complete");

    Ok(body)
}

/// Logs out from the IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}
