//! Configuration for a batch run.
//!
//! Use [`ConfigBuilder`] for programmatic construction, or [`Config::from_env`]
//! to load everything from the environment:
//!
//! ```no_run
//! use otp_runner::Config;
//!
//! let config = Config::from_env().expect("complete environment");
//! ```
//!
//! Every timing knob the run depends on lives here with an explicit default:
//! the freshness window for code mails, the poll attempt budget, the pre-poll
//! delay, and the humanized pacing ranges. Nothing is hard-coded at call sites.

use crate::account::{parse_account_list, Account};
use crate::error::{Error, Result};
use email_address::EmailAddress;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Environment variable names consumed by [`Config::from_env`].
pub mod env_vars {
    /// Mailbox address used to receive one-time codes (required).
    pub const MAILBOX_ADDRESS: &str = "OTP_MAILBOX_ADDRESS";
    /// Mailbox password or app-specific password (required).
    pub const MAILBOX_PASSWORD: &str = "OTP_MAILBOX_PASSWORD";
    /// Comma-delimited `username:password` account list (required).
    pub const ACCOUNTS: &str = "OTP_ACCOUNTS";
    /// Sender address of the code mails (required).
    pub const CODE_SENDER: &str = "OTP_CODE_SENDER";
    /// Explicit IMAP host override (optional).
    pub const IMAP_HOST: &str = "OTP_IMAP_HOST";
    /// Progress checkpoint file path (optional, default `progress.txt`).
    pub const PROGRESS_FILE: &str = "OTP_PROGRESS_FILE";
    /// Explicit start index override (optional).
    pub const START_INDEX: &str = "OTP_START_INDEX";
}

/// Map of email domains to their IMAP server hostnames.
static KNOWN_IMAP_HOSTS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("gmail.com", "imap.gmail.com");
    m.insert("googlemail.com", "imap.gmail.com");
    m.insert("yahoo.com", "imap.mail.yahoo.com");
    m.insert("hotmail.com", "imap-mail.outlook.com");
    m.insert("outlook.com", "imap-mail.outlook.com");
    m.insert("live.com", "imap-mail.outlook.com");
    m.insert("aol.com", "imap.aol.com");
    m.insert("icloud.com", "imap.mail.me.com");
    m.insert("me.com", "imap.mail.me.com");
    m
});

/// Returns the IMAP hostname for a mailbox address.
///
/// Known providers resolve from a built-in table; anything else falls back to
/// the `imap.{domain}` convention.
#[must_use]
pub fn discover_imap_host(address: &str) -> String {
    let domain = address
        .rsplit_once('@')
        .map_or("", |(_, domain)| domain)
        .to_ascii_lowercase();

    match KNOWN_IMAP_HOSTS.get(domain.as_str()) {
        Some(host) => (*host).to_string(),
        None => format!("imap.{domain}"),
    }
}

/// Credentials and connection parameters for the shared code mailbox.
///
/// The password is stored as a [`SecretString`] to prevent accidental logging;
/// the address is a validated [`EmailAddress`].
#[derive(Clone)]
pub struct MailboxConfig {
    address: EmailAddress,
    password: SecretString,
    /// IMAP server hostname (auto-discovered from the address domain if not set).
    pub imap_host: Option<String>,
    /// IMAP server port (default: 993 for IMAPS).
    pub imap_port: u16,
}

impl MailboxConfig {
    /// Returns the mailbox address as a string slice.
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    /// Returns the mailbox password for authentication.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the effective IMAP host, explicit or discovered from the address domain.
    #[must_use]
    pub fn effective_imap_host(&self) -> String {
        match &self.imap_host {
            Some(host) => host.clone(),
            None => discover_imap_host(self.address.as_str()),
        }
    }

    /// Returns the full IMAP server address as `host:port`.
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.effective_imap_host(), self.imap_port)
    }
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("address", &self.address.as_str())
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .finish()
    }
}

/// An inclusive delay range sampled per use for humanized pacing.
#[derive(Debug, Clone, Copy)]
pub struct DelayRange {
    /// Lower bound of the delay.
    pub min: Duration,
    /// Upper bound of the delay.
    pub max: Duration,
}

impl DelayRange {
    /// Creates a range. `min` and `max` may be equal for a fixed delay.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        assert!(min <= max, "delay range min must not exceed max");
        Self { min, max }
    }

    /// Creates a fixed (non-jittered) delay.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Samples a delay uniformly from the range.
    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        let millis = rng.gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Tuning for the mailbox poller's retry loop.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Maximum number of poll attempts per login (>= 1).
    pub max_attempts: u32,
    /// Delay between poll attempts.
    pub retry_delay: Duration,
    /// Maximum age of a code mail eligible for the current login.
    pub freshness_window: Duration,
    /// Delay before the first poll attempt, covering email delivery latency.
    pub pre_poll_delay: DelayRange,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            freshness_window: Duration::from_secs(300), // 5 minutes
            pre_poll_delay: DelayRange::new(Duration::from_secs(15), Duration::from_secs(20)),
        }
    }
}

/// Timeouts for IMAP operations and login surface waits.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing the TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting the inbox.
    pub select: Duration,
    /// Timeout for the UID search.
    pub search: Duration,
    /// Timeout for fetching message content.
    pub message_fetch: Duration,
    /// Timeout for the logout command.
    pub logout: Duration,
    /// Wait budget for each login surface to appear (credentials form,
    /// second-factor prompt).
    pub login_surface: Duration,
    /// Wait budget for the post-login confirmation marker.
    pub login_confirm: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            message_fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
            login_surface: Duration::from_secs(10),
            login_confirm: Duration::from_secs(10),
        }
    }
}

/// Pacing between accounts and between action targets.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Jittered delay between finishing one account and starting the next.
    pub inter_account: DelayRange,
    /// Jittered delay between action invocations on multiple targets.
    pub action_jitter: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_account: DelayRange::new(Duration::from_secs(2), Duration::from_secs(5)),
            action_jitter: DelayRange::new(
                Duration::from_millis(1500),
                Duration::from_millis(2500),
            ),
        }
    }
}

/// Shape of the one-time code and the mail template signature that carries it.
#[derive(Debug, Clone)]
pub struct CodeProfile {
    /// Expected number of digits in the code.
    pub length: usize,
    /// Style-attribute fragment identifying the large code element in HTML mail.
    pub style_signature: String,
}

impl Default for CodeProfile {
    fn default() -> Self {
        Self {
            length: 5,
            style_signature: "font-size:48px".into(),
        }
    }
}

/// Complete configuration for a batch run.
///
/// Constructed once at process start and passed into the orchestrator; there is
/// no ambient global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared code mailbox.
    pub mailbox: MailboxConfig,
    /// Ordered target account sequence.
    pub accounts: Vec<Account>,
    /// Sender address of qualifying code mails.
    pub code_sender: String,
    /// Code shape and template signature.
    pub code: CodeProfile,
    /// Poller retry tuning.
    pub polling: PollingConfig,
    /// IMAP operation timeouts.
    pub timeouts: TimeoutConfig,
    /// Humanized pacing.
    pub pacing: PacingConfig,
    /// Progress checkpoint file location.
    pub progress_path: PathBuf,
    /// Explicit start index override; `None` resumes from the checkpoint.
    pub start_index: Option<usize>,
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Loads configuration from the environment.
    ///
    /// See [`env_vars`] for the variable names. Missing mailbox credentials,
    /// code sender, or account list is a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] for absent required variables and
    /// [`Error::InvalidConfig`] for unparseable optional ones.
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| -> Result<String> {
            std::env::var(name).map_err(|_| Error::MissingConfig { name: name.into() })
        };

        let mut builder = Config::builder()
            .mailbox_address(require(env_vars::MAILBOX_ADDRESS)?)
            .mailbox_password(require(env_vars::MAILBOX_PASSWORD)?)
            .code_sender(require(env_vars::CODE_SENDER)?)
            .account_list(&require(env_vars::ACCOUNTS)?)?;

        if let Ok(host) = std::env::var(env_vars::IMAP_HOST) {
            builder = builder.imap_host(host);
        }
        if let Ok(path) = std::env::var(env_vars::PROGRESS_FILE) {
            builder = builder.progress_path(path);
        }
        if let Ok(raw) = std::env::var(env_vars::START_INDEX) {
            let index = raw.trim().parse().map_err(|_| Error::InvalidConfig {
                message: format!("{} must be an integer, got {raw:?}", env_vars::START_INDEX),
            })?;
            builder = builder.start_index(index);
        }

        builder.build()
    }
}

/// Validates a mailbox address.
fn validate_address(address: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(address, email_address::Options::default()).map_err(|_| {
        Error::InvalidMailboxAddress {
            address: address.to_string(),
        }
    })
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    mailbox_address: Option<String>,
    mailbox_password: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    accounts: Option<Vec<Account>>,
    code_sender: Option<String>,
    code: Option<CodeProfile>,
    polling: Option<PollingConfig>,
    timeouts: Option<TimeoutConfig>,
    pacing: Option<PacingConfig>,
    progress_path: Option<PathBuf>,
    start_index: Option<usize>,
}

impl ConfigBuilder {
    /// Sets the code mailbox address (required).
    #[must_use]
    pub fn mailbox_address(mut self, address: impl Into<String>) -> Self {
        self.mailbox_address = Some(address.into());
        self
    }

    /// Sets the code mailbox password (required).
    ///
    /// For Gmail/Outlook, use an app-specific password.
    #[must_use]
    pub fn mailbox_password(mut self, password: impl Into<String>) -> Self {
        self.mailbox_password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname explicitly.
    ///
    /// If not set, the server is discovered from the mailbox address domain.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port. Default is 993 (IMAPS).
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets the target account sequence (required, in processing order).
    #[must_use]
    pub fn accounts(mut self, accounts: Vec<Account>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Parses and sets the account sequence from a comma-delimited
    /// `username:password` list.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is malformed or the list is empty.
    pub fn account_list(mut self, raw: &str) -> Result<Self> {
        self.accounts = Some(parse_account_list(raw)?);
        Ok(self)
    }

    /// Sets the sender address of qualifying code mails (required).
    #[must_use]
    pub fn code_sender(mut self, sender: impl Into<String>) -> Self {
        self.code_sender = Some(sender.into());
        self
    }

    /// Sets the code shape and template signature.
    #[must_use]
    pub fn code(mut self, code: CodeProfile) -> Self {
        self.code = Some(code);
        self
    }

    /// Sets the expected code length.
    #[must_use]
    pub fn code_length(mut self, length: usize) -> Self {
        self.code.get_or_insert_with(CodeProfile::default).length = length;
        self
    }

    /// Sets the poller retry tuning.
    #[must_use]
    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Sets the poll attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .max_attempts = max_attempts;
        self
    }

    /// Sets the delay between poll attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .retry_delay = delay;
        self
    }

    /// Sets the freshness window for qualifying code mails.
    #[must_use]
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .freshness_window = window;
        self
    }

    /// Sets the pre-poll delay range.
    #[must_use]
    pub fn pre_poll_delay(mut self, range: DelayRange) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .pre_poll_delay = range;
        self
    }

    /// Sets IMAP operation timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets humanized pacing ranges.
    #[must_use]
    pub fn pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Sets the progress checkpoint file path. Default is `progress.txt`.
    #[must_use]
    pub fn progress_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.progress_path = Some(path.into());
        self
    }

    /// Sets an explicit start index, overriding the persisted checkpoint.
    #[must_use]
    pub fn start_index(mut self, index: usize) -> Self {
        self.start_index = Some(index);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<Config> {
        let address_raw = self.mailbox_address.ok_or_else(|| Error::MissingConfig {
            name: "mailbox address".into(),
        })?;
        let address = validate_address(&address_raw)?;

        let password_raw = self.mailbox_password.ok_or_else(|| Error::MissingConfig {
            name: "mailbox password".into(),
        })?;

        let accounts = self.accounts.ok_or_else(|| Error::MissingConfig {
            name: "account list".into(),
        })?;
        if accounts.is_empty() {
            return Err(Error::MissingConfig {
                name: "account list".into(),
            });
        }

        let code_sender = self.code_sender.ok_or_else(|| Error::MissingConfig {
            name: "code sender".into(),
        })?;

        let polling = self.polling.unwrap_or_default();
        if polling.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                message: "max_attempts must be >= 1".into(),
            });
        }

        let code = self.code.unwrap_or_default();
        if code.length == 0 {
            return Err(Error::InvalidConfig {
                message: "code length must be >= 1".into(),
            });
        }

        Ok(Config {
            mailbox: MailboxConfig {
                address,
                password: SecretString::from(password_raw),
                imap_host: self.imap_host,
                imap_port: self.imap_port.unwrap_or(993),
            },
            accounts,
            code_sender,
            code,
            polling,
            timeouts: self.timeouts.unwrap_or_default(),
            pacing: self.pacing.unwrap_or_default(),
            progress_path: self.progress_path.unwrap_or_else(|| "progress.txt".into()),
            start_index: self.start_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_builder() -> ConfigBuilder {
        Config::builder()
            .mailbox_address("inbox@example.com")
            .mailbox_password("secret")
            .code_sender("noreply@portal.example")
            .account_list("alice:pw1,bob:pw2")
            .unwrap()
    }

    #[test]
    fn test_builder_minimal() {
        let config = minimal_builder().build().unwrap();

        assert_eq!(config.mailbox.address(), "inbox@example.com");
        assert_eq!(config.mailbox.password(), "secret");
        assert_eq!(config.mailbox.imap_port, 993);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.code.length, 5);
        assert_eq!(config.polling.max_attempts, 3);
        assert_eq!(config.progress_path, PathBuf::from("progress.txt"));
        assert!(config.start_index.is_none());
    }

    #[test]
    fn test_builder_full() {
        let config = minimal_builder()
            .imap_host("mail.example.com")
            .imap_port(994)
            .code_length(6)
            .max_attempts(5)
            .retry_delay(Duration::from_secs(1))
            .freshness_window(Duration::from_secs(120))
            .pre_poll_delay(DelayRange::fixed(Duration::from_secs(5)))
            .progress_path("/tmp/checkpoint.txt")
            .start_index(3)
            .build()
            .unwrap();

        assert_eq!(config.mailbox.imap_host, Some("mail.example.com".into()));
        assert_eq!(config.mailbox.imap_port, 994);
        assert_eq!(config.code.length, 6);
        assert_eq!(config.polling.max_attempts, 5);
        assert_eq!(config.polling.freshness_window, Duration::from_secs(120));
        assert_eq!(config.start_index, Some(3));
    }

    #[test]
    fn test_builder_missing_required_fields() {
        let result = Config::builder()
            .mailbox_password("secret")
            .code_sender("noreply@portal.example")
            .account_list("a:b")
            .unwrap()
            .build();
        assert!(matches!(result, Err(Error::MissingConfig { .. })));

        let result = Config::builder()
            .mailbox_address("inbox@example.com")
            .mailbox_password("secret")
            .account_list("a:b")
            .unwrap()
            .build();
        assert!(matches!(result, Err(Error::MissingConfig { .. })));
    }

    #[test]
    fn test_builder_missing_accounts_is_fatal() {
        let result = Config::builder()
            .mailbox_address("inbox@example.com")
            .mailbox_password("secret")
            .code_sender("noreply@portal.example")
            .build();
        let err = result.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_builder_invalid_mailbox_address() {
        let result = Config::builder()
            .mailbox_address("not-an-address")
            .mailbox_password("secret")
            .code_sender("noreply@portal.example")
            .account_list("a:b")
            .unwrap()
            .build();
        assert!(matches!(result, Err(Error::InvalidMailboxAddress { .. })));
    }

    #[test]
    fn test_builder_rejects_zero_attempts() {
        let result = minimal_builder().max_attempts(0).build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_discover_known_and_fallback_hosts() {
        assert_eq!(discover_imap_host("user@gmail.com"), "imap.gmail.com");
        assert_eq!(
            discover_imap_host("user@outlook.com"),
            "imap-mail.outlook.com"
        );
        assert_eq!(discover_imap_host("user@corp.example"), "imap.corp.example");
        // Case-insensitive on the domain
        assert_eq!(discover_imap_host("user@GMAIL.com"), "imap.gmail.com");
    }

    #[test]
    fn test_server_address() {
        let config = minimal_builder().imap_host("mail.example.com").build().unwrap();
        assert_eq!(config.mailbox.server_address(), "mail.example.com:993");
    }

    #[test]
    fn test_password_not_in_debug() {
        let config = minimal_builder()
            .mailbox_password("super-secret-password")
            .build()
            .unwrap();

        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret-password"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_delay_range_sample_within_bounds() {
        let range = DelayRange::new(Duration::from_millis(100), Duration::from_millis(200));
        for _ in 0..50 {
            let d = range.sample();
            assert!(d >= range.min && d <= range.max);
        }
    }

    #[test]
    fn test_delay_range_fixed() {
        let range = DelayRange::fixed(Duration::from_secs(1));
        assert_eq!(range.sample(), Duration::from_secs(1));
    }

    #[test]
    #[should_panic(expected = "delay range min must not exceed max")]
    fn test_delay_range_rejects_inverted_bounds() {
        let _ = DelayRange::new(Duration::from_secs(2), Duration::from_secs(1));
    }
}
