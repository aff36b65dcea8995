//! Login state machine.
//!
//! Drives a [`Driver`] through the credential-plus-mailed-code login sequence:
//!
//! ```text
//! Start -> CredentialsEntered -> Submitted -> AwaitingSecondFactor
//!       -> CodeEntered -> LoggedIn
//! ```
//!
//! Every failure path is a terminal [`LoginOutcome`] returned to the caller;
//! nothing loops internally. Retry policy, if any, belongs to the orchestrator
//! and is scoped per account, not per login attempt.

use crate::account::Account;
use crate::config::{Config, DelayRange};
use crate::driver::{CodeSurface, Driver, Selector};
use crate::error::Result;
use crate::poller::CodeSource;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Element locations and entry URL for the login flow.
///
/// These are portal-specific glue supplied by the caller; the sequencer itself
/// is portal-agnostic.
#[derive(Debug, Clone)]
pub struct LoginLocators {
    /// URL of the login page.
    pub login_url: String,
    /// Input surface for the account identifier.
    pub username_field: Selector,
    /// Input surface for the account secret.
    pub password_field: Selector,
    /// Control that submits the credential form.
    pub submit_button: Selector,
    /// Element whose presence signals the second-factor prompt.
    pub second_factor_marker: Selector,
    /// Element carrying the portal's login error text, when the portal has one.
    pub error_banner: Option<Selector>,
    /// Where the one-time code gets typed.
    pub code_surface: CodeSurface,
    /// Element whose presence confirms a completed login.
    pub logged_in_marker: Selector,
}

/// Bounded waits and the pre-poll delay for the login sequence.
#[derive(Debug, Clone)]
pub struct LoginTiming {
    /// Wait budget for each surface to appear (credentials form, second-factor
    /// prompt).
    pub surface_wait: Duration,
    /// Wait budget for the post-login marker.
    pub confirm_wait: Duration,
    /// Delay before the first code poll, covering email delivery latency.
    pub pre_poll_delay: DelayRange,
}

impl LoginTiming {
    /// Builds login timing from the run configuration's tunables.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            surface_wait: config.timeouts.login_surface,
            confirm_wait: config.timeouts.login_confirm,
            pre_poll_delay: config.polling.pre_poll_delay,
        }
    }
}

impl Default for LoginTiming {
    fn default() -> Self {
        Self {
            surface_wait: Duration::from_secs(10),
            confirm_wait: Duration::from_secs(10),
            pre_poll_delay: DelayRange::new(Duration::from_secs(15), Duration::from_secs(20)),
        }
    }
}

/// States of the login sequence, in order of progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Nothing done yet.
    Start,
    /// Identifier and secret typed into their surfaces.
    CredentialsEntered,
    /// Credential form submitted.
    Submitted,
    /// Second-factor prompt visible, code retrieval pending.
    AwaitingSecondFactor,
    /// One-time code typed into the second-factor surface.
    CodeEntered,
    /// Post-login marker observed.
    LoggedIn,
}

impl std::fmt::Display for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoginState::Start => "start",
            LoginState::CredentialsEntered => "credentials_entered",
            LoginState::Submitted => "submitted",
            LoginState::AwaitingSecondFactor => "awaiting_second_factor",
            LoginState::CodeEntered => "code_entered",
            LoginState::LoggedIn => "logged_in",
        };
        f.write_str(name)
    }
}

/// Terminal result of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The post-login marker was observed.
    Success,
    /// No qualifying code appeared within the poll budget.
    TwoFactorCodeMissing,
    /// The second-factor prompt never appeared after submit.
    CredentialRejected,
    /// The post-login marker never appeared after code entry.
    Timeout,
}

impl std::fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoginOutcome::Success => "success",
            LoginOutcome::TwoFactorCodeMissing => "two_factor_code_missing",
            LoginOutcome::CredentialRejected => "credential_rejected",
            LoginOutcome::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Drives the login sequence for one account at a time.
#[derive(Debug, Clone)]
pub struct LoginSequencer {
    locators: LoginLocators,
    timing: LoginTiming,
}

impl LoginSequencer {
    /// Creates a sequencer for the given locators with default timing.
    #[must_use]
    pub fn new(locators: LoginLocators) -> Self {
        Self {
            locators,
            timing: LoginTiming::default(),
        }
    }

    /// Creates a sequencer with explicit timing.
    #[must_use]
    pub fn with_timing(locators: LoginLocators, timing: LoginTiming) -> Self {
        Self { locators, timing }
    }

    /// Runs the full login sequence for `account` on `driver`.
    ///
    /// The account secret is typed into the driver but never logged.
    ///
    /// # Errors
    ///
    /// Returns an error for driver backend failures and unrecoverable code
    /// source failures; portal-level failures (rejected credential, missing
    /// code, confirmation timeout) are terminal [`LoginOutcome`] values, not
    /// errors.
    #[instrument(
        name = "LoginSequencer::login",
        skip_all,
        fields(account = %account.username())
    )]
    pub async fn login<C>(
        &self,
        driver: &mut dyn Driver,
        account: &Account,
        code_source: &mut C,
    ) -> Result<LoginOutcome>
    where
        C: CodeSource + ?Sized,
    {
        let locators = &self.locators;
        let mut tracker = TransitionTracker::new();

        // Start -> CredentialsEntered
        driver.navigate(&locators.login_url).await?;
        if !driver
            .wait_for(&locators.username_field, self.timing.surface_wait)
            .await?
        {
            warn!(state = %LoginState::Start, "Login form never appeared");
            return Ok(LoginOutcome::Timeout);
        }
        driver
            .type_text(&locators.username_field, account.username())
            .await?;
        driver
            .type_text(&locators.password_field, account.password())
            .await?;
        tracker.advance(LoginState::CredentialsEntered);

        // CredentialsEntered -> Submitted
        driver.click(&locators.submit_button).await?;
        tracker.advance(LoginState::Submitted);

        // Submitted -> AwaitingSecondFactor
        if !driver
            .wait_for(&locators.second_factor_marker, self.timing.surface_wait)
            .await?
        {
            // The prompt not appearing is the observable signature of a
            // rejected credential; the mailbox is never polled in this case.
            if let Some(banner) = &locators.error_banner {
                if driver.is_present(banner).await? {
                    let reason = driver.read_text(banner).await?;
                    warn!(reason = %reason.trim(), "Portal reported a login error");
                }
            }
            info!(elapsed_ms = tracker.total_ms(), "Second-factor prompt absent");
            return Ok(LoginOutcome::CredentialRejected);
        }
        tracker.advance(LoginState::AwaitingSecondFactor);

        // AwaitingSecondFactor -> CodeEntered
        let pre_poll = self.timing.pre_poll_delay.sample();
        debug!(delay_ms = pre_poll.as_millis() as u64, "Waiting for code mail delivery");
        tokio::time::sleep(pre_poll).await;

        let Some(code) = code_source.retrieve_code().await? else {
            info!(elapsed_ms = tracker.total_ms(), "No one-time code retrieved");
            return Ok(LoginOutcome::TwoFactorCodeMissing);
        };
        driver.enter_code(&locators.code_surface, &code).await?;
        tracker.advance(LoginState::CodeEntered);

        // CodeEntered -> LoggedIn
        if !driver
            .wait_for(&locators.logged_in_marker, self.timing.confirm_wait)
            .await?
        {
            info!(elapsed_ms = tracker.total_ms(), "Post-login marker absent");
            return Ok(LoginOutcome::Timeout);
        }
        tracker.advance(LoginState::LoggedIn);

        info!(elapsed_ms = tracker.total_ms(), "Login complete");
        Ok(LoginOutcome::Success)
    }
}

/// Records per-transition elapsed time for observability.
struct TransitionTracker {
    started: Instant,
    last: Instant,
    state: LoginState,
}

impl TransitionTracker {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
            state: LoginState::Start,
        }
    }

    fn advance(&mut self, to: LoginState) {
        let now = Instant::now();
        debug!(
            from = %self.state,
            to = %to,
            transition_ms = now.duration_since(self.last).as_millis() as u64,
            "Login transition"
        );
        self.last = now;
        self.state = to;
    }

    fn total_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverResult, Selector};
    use crate::extract::OneTimeCode;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Driver double whose "page" is a set of present selectors.
    struct FakeDriver {
        present: HashSet<String>,
        typed: Arc<Mutex<Vec<(String, String)>>>,
        clicks: Arc<Mutex<Vec<String>>>,
    }

    impl FakeDriver {
        fn with_present(selectors: &[&Selector]) -> Self {
            Self {
                present: selectors.iter().map(|s| s.to_string()).collect(),
                typed: Arc::default(),
                clicks: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        async fn navigate(&mut self, _url: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn wait_for(
            &mut self,
            selector: &Selector,
            _timeout: Duration,
        ) -> DriverResult<bool> {
            Ok(self.present.contains(&selector.to_string()))
        }
        async fn type_text(&mut self, selector: &Selector, text: &str) -> DriverResult<()> {
            self.typed
                .lock()
                .unwrap()
                .push((selector.to_string(), text.to_string()));
            Ok(())
        }
        async fn click(&mut self, selector: &Selector) -> DriverResult<()> {
            self.clicks.lock().unwrap().push(selector.to_string());
            Ok(())
        }
        async fn is_present(&mut self, selector: &Selector) -> DriverResult<bool> {
            Ok(self.present.contains(&selector.to_string()))
        }
        async fn read_text(&mut self, _selector: &Selector) -> DriverResult<String> {
            Ok(String::new())
        }
        async fn open_tab(&mut self, _url: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn close_tab(&mut self) -> DriverResult<()> {
            Ok(())
        }
        async fn quit(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    /// Code source double counting how often it is polled.
    struct StubCodeSource {
        code: Option<&'static str>,
        calls: AtomicU32,
    }

    impl StubCodeSource {
        fn returning(code: Option<&'static str>) -> Self {
            Self {
                code,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeSource for StubCodeSource {
        async fn retrieve_code(&mut self) -> Result<Option<OneTimeCode>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.code.and_then(|c| OneTimeCode::parse(c, 5)))
        }
    }

    fn locators() -> LoginLocators {
        LoginLocators {
            login_url: "https://portal.example/login".into(),
            username_field: Selector::css("input.login-user"),
            password_field: Selector::css("input[type='password']"),
            submit_button: Selector::css("button.login-submit"),
            second_factor_marker: Selector::id("twofactor_entry"),
            error_banner: Some(Selector::css(".login-error")),
            code_surface: CodeSurface::Single(Selector::id("twofactor_entry")),
            logged_in_marker: Selector::css(".account-menu"),
        }
    }

    fn fast_timing() -> LoginTiming {
        LoginTiming {
            surface_wait: Duration::from_millis(10),
            confirm_wait: Duration::from_millis(10),
            pre_poll_delay: DelayRange::fixed(Duration::ZERO),
        }
    }

    fn sequencer() -> LoginSequencer {
        LoginSequencer::with_timing(locators(), fast_timing())
    }

    #[tokio::test]
    async fn test_full_success_path() {
        let l = locators();
        let mut driver = FakeDriver::with_present(&[
            &l.username_field,
            &l.second_factor_marker,
            &l.logged_in_marker,
        ]);
        let typed = Arc::clone(&driver.typed);
        let mut source = StubCodeSource::returning(Some("12345"));
        let account = Account::new("alice", "pw1");

        let outcome = sequencer().login(&mut driver, &account, &mut source).await.unwrap();

        assert_eq!(outcome, LoginOutcome::Success);
        assert_eq!(source.call_count(), 1);

        let typed = typed.lock().unwrap();
        // Username, password, then the code into the second-factor surface.
        assert_eq!(typed.len(), 3);
        assert_eq!(typed[0].1, "alice");
        assert_eq!(typed[1].1, "pw1");
        assert_eq!(typed[2], ("id:twofactor_entry".into(), "12345".into()));
    }

    #[tokio::test]
    async fn test_rejected_credential_never_polls_mailbox() {
        let l = locators();
        // Second-factor marker absent: credential rejected.
        let mut driver = FakeDriver::with_present(&[&l.username_field, &l.logged_in_marker]);
        let mut source = StubCodeSource::returning(Some("12345"));
        let account = Account::new("alice", "pw1");

        let outcome = sequencer().login(&mut driver, &account, &mut source).await.unwrap();

        assert_eq!(outcome, LoginOutcome::CredentialRejected);
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_code_missing_outcome() {
        let l = locators();
        let mut driver = FakeDriver::with_present(&[
            &l.username_field,
            &l.second_factor_marker,
            &l.logged_in_marker,
        ]);
        let typed = Arc::clone(&driver.typed);
        let mut source = StubCodeSource::returning(None);
        let account = Account::new("alice", "pw1");

        let outcome = sequencer().login(&mut driver, &account, &mut source).await.unwrap();

        assert_eq!(outcome, LoginOutcome::TwoFactorCodeMissing);
        // Credentials typed, but never a code.
        assert_eq!(typed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_outcome() {
        let l = locators();
        // Logged-in marker absent: code accepted but confirmation never shows.
        let mut driver = FakeDriver::with_present(&[&l.username_field, &l.second_factor_marker]);
        let mut source = StubCodeSource::returning(Some("12345"));
        let account = Account::new("alice", "pw1");

        let outcome = sequencer().login(&mut driver, &account, &mut source).await.unwrap();

        assert_eq!(outcome, LoginOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_login_form_absent_is_timeout() {
        let mut driver = FakeDriver::with_present(&[]);
        let mut source = StubCodeSource::returning(Some("12345"));
        let account = Account::new("alice", "pw1");

        let outcome = sequencer().login(&mut driver, &account, &mut source).await.unwrap();

        assert_eq!(outcome, LoginOutcome::Timeout);
        assert_eq!(source.call_count(), 0);
    }

    #[test]
    fn test_timing_follows_configuration() {
        let config = Config::builder()
            .mailbox_address("codes@example.com")
            .mailbox_password("pw")
            .code_sender("noreply@portal.example")
            .account_list("a:b")
            .unwrap()
            .pre_poll_delay(DelayRange::fixed(Duration::from_secs(1)))
            .timeouts(crate::config::TimeoutConfig {
                login_surface: Duration::from_secs(3),
                login_confirm: Duration::from_secs(4),
                ..crate::config::TimeoutConfig::default()
            })
            .build()
            .unwrap();

        let timing = LoginTiming::from_config(&config);
        assert_eq!(timing.surface_wait, Duration::from_secs(3));
        assert_eq!(timing.confirm_wait, Duration::from_secs(4));
        assert_eq!(timing.pre_poll_delay.min, Duration::from_secs(1));
        assert_eq!(timing.pre_poll_delay.max, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_per_digit_code_surface() {
        let l = LoginLocators {
            code_surface: CodeSurface::PerDigit(
                (0..5).map(|i| Selector::css(format!(".otp-{i}"))).collect(),
            ),
            ..locators()
        };
        let mut driver = FakeDriver::with_present(&[
            &l.username_field,
            &l.second_factor_marker,
            &l.logged_in_marker,
        ]);
        let typed = Arc::clone(&driver.typed);
        let mut source = StubCodeSource::returning(Some("97531"));
        let account = Account::new("bob", "pw2");

        let outcome = LoginSequencer::with_timing(l, fast_timing())
            .login(&mut driver, &account, &mut source)
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::Success);
        let typed = typed.lock().unwrap();
        // Two credential entries plus five digit entries.
        assert_eq!(typed.len(), 7);
        assert_eq!(typed[2], ("css:.otp-0".into(), "9".into()));
        assert_eq!(typed[6], ("css:.otp-4".into(), "1".into()));
    }
}
