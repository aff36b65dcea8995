//! # otp-runner
//!
//! Batch account login automation driven by emailed one-time codes.
//!
//! This crate walks an ordered list of accounts and, for each one:
//! - logs in through an abstract UI-automation [`Driver`],
//! - retrieves the login's 5-digit one-time code from a shared IMAP mailbox,
//! - optionally executes a portal [`Action`] (comment, join, like, vote),
//! - records durable progress so an interrupted run resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use otp_runner::{
//!     BatchRunner, CodePoller, Config, DriverFactory, LoginLocators, LoginSequencer,
//!     LoginTiming,
//! };
//! use otp_runner::driver::{CodeSurface, Selector};
//!
//! # async fn example(factory: Box<dyn DriverFactory>) -> otp_runner::Result<()> {
//! let config = Config::builder()
//!     .mailbox_address("codes@example.com")
//!     .mailbox_password("app-password") // Use app-specific password for Gmail
//!     .code_sender("noreply@portal.example")
//!     .account_list("alice:pw1,bob:pw2")?
//!     .build()?;
//!
//! let locators = LoginLocators {
//!     login_url: "https://portal.example/login".into(),
//!     username_field: Selector::css("input[name='username']"),
//!     password_field: Selector::css("input[type='password']"),
//!     submit_button: Selector::css("button[type='submit']"),
//!     second_factor_marker: Selector::id("twofactor_entry"),
//!     error_banner: None,
//!     code_surface: CodeSurface::Single(Selector::id("twofactor_entry")),
//!     logged_in_marker: Selector::css(".account-menu"),
//! };
//! let sequencer = LoginSequencer::with_timing(locators, LoginTiming::from_config(&config));
//!
//! let mut poller = CodePoller::from_config(&config);
//! let runner = BatchRunner::new(config);
//!
//! let summary = runner
//!     .run(factory.as_ref(), &sequencer, &mut poller, None)
//!     .await?;
//! println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Code Retrieval
//!
//! The mailbox poller opens a fresh IMAP session per attempt and searches for
//! unseen mail from the configured sender inside the freshness window. HTML
//! mail is matched by the style signature of the large code element; plain
//! mail by collecting digits and requiring an exact-length total. Fetching a
//! message marks it seen, so a code is consumed at most once across accounts.
//!
//! ## Resumability
//!
//! Progress is one integer in a text file: the index of the next account.
//! The checkpoint only advances after an account fully completes, and writes
//! are atomic (temp file plus rename), so a crash resumes at the interrupted
//! account. An explicit start index overrides the checkpoint when set.
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error`. Use [`Error::is_retryable`] for
//! poll-attempt scoping and [`Error::is_fatal`] for run-abort scoping;
//! everything in between is isolated to a single account.
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Major operations emit spans
//! with structured fields (`CodePoller::retrieve_code`,
//! `LoginSequencer::login`, `BatchRunner::run`, `session::authenticate`).
//! Secrets never appear in any span field or event.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod account;
pub mod action;
pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod login;
pub mod orchestrator;
pub mod poller;
pub mod progress;

// Internal modules
mod connection;
mod session;

// Re-exports for ergonomic API
pub use account::{parse_account_list, Account};
pub use action::{Action, ActionOutcome, ApproveVote, JoinGroup, LikeFavorite, PostComment};
pub use config::{Config, ConfigBuilder, DelayRange, PacingConfig, PollingConfig, TimeoutConfig};
pub use driver::{CodeSurface, Driver, DriverError, DriverFactory, DriverResult, Selector};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use extract::OneTimeCode;
pub use login::{LoginLocators, LoginOutcome, LoginSequencer, LoginState, LoginTiming};
pub use orchestrator::{AccountOutcome, AccountReport, BatchRunner, RunSummary};
pub use poller::{CodePoller, CodeSource};
pub use progress::ProgressStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // Ensure all public types are accessible
        let _ = Config::builder();
        let _ = Selector::css("input");
        let _ = ProgressStore::new("progress.txt");
    }
}
