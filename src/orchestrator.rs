//! Batch orchestration across the ordered account sequence.
//!
//! The runner walks accounts strictly in order from the resolved start index.
//! Each account gets a fresh, isolated driver session that is always quit
//! before the next account starts, whatever the outcome. The checkpoint is
//! advanced only after an account's processing fully completes, so an
//! interrupted run resumes at the interrupted account, never past it.
//!
//! Failure isolation: one account failing to log in or to complete its action
//! never aborts the batch. Only fatal conditions (broken configuration, an
//! unreadable checkpoint) stop the run.

use crate::action::{Action, ActionOutcome};
use crate::config::Config;
use crate::driver::DriverFactory;
use crate::error::Result;
use crate::login::{LoginOutcome, LoginSequencer};
use crate::poller::CodeSource;
use crate::progress::ProgressStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Terminal outcome for one processed account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    /// Login succeeded and the action (if any) reached its end state.
    Success,
    /// The login sequence ended in a non-success state.
    LoginFailed(LoginOutcome),
    /// Login succeeded but the action reported failure.
    ActionFailed(String),
    /// A driver or transport error interrupted processing.
    Errored(String),
}

impl AccountOutcome {
    /// Whether the account completed its full flow.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Per-account record in the run summary.
#[derive(Debug, Clone)]
pub struct AccountReport {
    /// Position in the account sequence.
    pub index: usize,
    /// Login identifier (never the secret).
    pub username: String,
    /// What happened.
    pub outcome: AccountOutcome,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Per-account reports, in processing order.
    pub reports: Vec<AccountReport>,
    /// Index the next run will start from.
    pub next_index: usize,
    /// Whether the run ended early on a stop request.
    pub stopped: bool,
}

impl RunSummary {
    /// Number of accounts that completed their full flow.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Number of accounts that did not complete.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Resolves the index to start processing from.
///
/// An explicit override wins over the persisted checkpoint; either is clamped
/// to the account count, so a checkpoint at or past the end yields an empty
/// (already complete) run rather than an error.
pub(crate) fn resolve_start(
    explicit: Option<usize>,
    checkpoint: usize,
    account_count: usize,
) -> usize {
    explicit.unwrap_or(checkpoint).min(account_count)
}

/// Walks the account sequence: login, action, checkpoint, repeat.
pub struct BatchRunner {
    config: Config,
    progress: ProgressStore,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    /// Creates a runner for the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let progress = ProgressStore::new(config.progress_path.clone());
        Self {
            config,
            progress,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle that requests a cooperative stop when set.
    ///
    /// The stop is honored between accounts; the account in flight finishes
    /// and is checkpointed first.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Runs the batch.
    ///
    /// `factory` opens one fresh driver session per account. `action`, when
    /// present, runs on every successfully logged-in session; `None` makes the
    /// run a pure login verification pass.
    ///
    /// # Errors
    ///
    /// Returns an error for fatal conditions only (unreadable or corrupt
    /// checkpoint, checkpoint write failure, driver sessions that cannot be
    /// opened at all). Per-account failures land in the summary instead.
    #[instrument(name = "BatchRunner::run", skip_all, fields(accounts = self.config.accounts.len()))]
    pub async fn run<C>(
        &self,
        factory: &dyn DriverFactory,
        sequencer: &LoginSequencer,
        code_source: &mut C,
        action: Option<&dyn Action>,
    ) -> Result<RunSummary>
    where
        C: CodeSource + ?Sized,
    {
        let checkpoint = self.progress.load().await?;
        let start = resolve_start(self.config.start_index, checkpoint, self.config.accounts.len());

        info!(
            start,
            checkpoint,
            total = self.config.accounts.len(),
            "Starting batch run"
        );

        let mut summary = RunSummary {
            next_index: start,
            ..RunSummary::default()
        };

        for (index, account) in self.config.accounts.iter().enumerate().skip(start) {
            if self.stop.load(Ordering::SeqCst) {
                info!(index, "Stop requested, ending run before next account");
                summary.stopped = true;
                break;
            }

            if index > start {
                tokio::time::sleep(self.config.pacing.inter_account.sample()).await;
            }

            let outcome = self
                .process_account(factory, sequencer, code_source, action, index)
                .await?;

            info!(index, account = %account.username(), outcome = ?outcome, "Account processed");
            summary.reports.push(AccountReport {
                index,
                username: account.username().to_string(),
                outcome,
            });

            // The account is done (in whatever state); never revisit it.
            self.progress.save(index + 1).await?;
            summary.next_index = index + 1;
        }

        info!(
            processed = summary.reports.len(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            stopped = summary.stopped,
            "Batch run complete"
        );

        Ok(summary)
    }

    /// Processes one account in a fresh driver session.
    ///
    /// The session is quit on every exit path. Fatal errors propagate; anything
    /// account-scoped becomes an [`AccountOutcome`].
    async fn process_account<C>(
        &self,
        factory: &dyn DriverFactory,
        sequencer: &LoginSequencer,
        code_source: &mut C,
        action: Option<&dyn Action>,
        index: usize,
    ) -> Result<AccountOutcome>
    where
        C: CodeSource + ?Sized,
    {
        let account = &self.config.accounts[index];

        // A session that cannot even be opened means the automation backend is
        // down; retrying with the next account would fail identically.
        let mut driver = factory.open().await.map_err(crate::error::Error::Driver)?;

        let result: Result<AccountOutcome> = async {
            match sequencer.login(driver.as_mut(), account, code_source).await? {
                LoginOutcome::Success => {}
                other => return Ok(AccountOutcome::LoginFailed(other)),
            }

            let Some(action) = action else {
                return Ok(AccountOutcome::Success);
            };

            match action.execute(driver.as_mut()).await? {
                ActionOutcome::Succeeded | ActionOutcome::AlreadySatisfied => {
                    Ok(AccountOutcome::Success)
                }
                ActionOutcome::Failed(message) => Ok(AccountOutcome::ActionFailed(message)),
            }
        }
        .await;

        if let Err(e) = driver.quit().await {
            warn!(index, error = %e, "Driver quit failed");
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(index, category = %e.category(), error = %e, "Account errored");
                Ok(AccountOutcome::Errored(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_start_prefers_explicit_override() {
        assert_eq!(resolve_start(Some(2), 5, 10), 2);
        assert_eq!(resolve_start(None, 5, 10), 5);
        assert_eq!(resolve_start(None, 0, 10), 0);
    }

    #[test]
    fn test_resolve_start_clamps_to_account_count() {
        // A checkpoint at or past the end means the batch already completed.
        assert_eq!(resolve_start(None, 10, 10), 10);
        assert_eq!(resolve_start(None, 99, 10), 10);
        assert_eq!(resolve_start(Some(99), 0, 10), 10);
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary {
            reports: vec![
                AccountReport {
                    index: 0,
                    username: "a".into(),
                    outcome: AccountOutcome::Success,
                },
                AccountReport {
                    index: 1,
                    username: "b".into(),
                    outcome: AccountOutcome::LoginFailed(LoginOutcome::CredentialRejected),
                },
                AccountReport {
                    index: 2,
                    username: "c".into(),
                    outcome: AccountOutcome::ActionFailed("no box".into()),
                },
            ],
            next_index: 3,
            stopped: false,
        };
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
    }
}
