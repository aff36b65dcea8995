//! Abstract UI-automation driver capability.
//!
//! The login sequencer and the action executors depend only on this contract,
//! never on a concrete automation backend. A WebDriver-based implementation,
//! a native-app automation layer, or a test double all satisfy the same trait.
//!
//! Waits are explicit and bounded: [`Driver::wait_for`] resolves to whether the
//! element appeared within the timeout, so callers decide what absence means
//! (a rejected credential, a failed confirmation) instead of catching errors.

use crate::extract::OneTimeCode;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Failures reported by a driver backend.
///
/// Driver failures are terminal for the account being processed; the batch
/// records them and continues.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// An element the flow requires could not be located.
    #[error("element not found: {selector}")]
    ElementNotFound {
        /// The selector that failed to resolve.
        selector: String,
    },

    /// The automation backend itself failed (session crash, protocol error).
    #[error("driver backend failure: {message}")]
    Backend {
        /// Backend-specific description.
        message: String,
    },
}

impl DriverError {
    /// Creates an element-not-found error.
    #[must_use]
    pub fn element_not_found(selector: impl std::fmt::Display) -> Self {
        Self::ElementNotFound {
            selector: selector.to_string(),
        }
    }

    /// Creates a backend failure error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Descriptor for locating an element on the automated surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// CSS selector.
    Css(String),
    /// Element id attribute.
    Id(String),
    /// Element name attribute.
    Name(String),
}

impl Selector {
    /// Convenience constructor for a CSS selector.
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Convenience constructor for an id selector.
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Css(s) => write!(f, "css:{s}"),
            Selector::Id(s) => write!(f, "id:{s}"),
            Selector::Name(s) => write!(f, "name:{s}"),
        }
    }
}

/// Where the one-time code gets typed.
///
/// Some portals present a single input field, others one field per digit.
/// Digit placement is a capability of the driver abstraction, not an assumption
/// baked into the login sequencer.
#[derive(Debug, Clone)]
pub enum CodeSurface {
    /// One field receiving the whole code.
    Single(Selector),
    /// One field per digit, in display order.
    PerDigit(Vec<Selector>),
}

/// The UI-automation contract the core depends on.
///
/// One driver instance corresponds to one isolated automation session (own
/// cookies, own state). Sessions are never shared between accounts; the
/// orchestrator acquires a fresh driver per account via [`DriverFactory`] and
/// guarantees [`quit`](Driver::quit) on every exit path.
#[async_trait]
pub trait Driver: Send {
    /// Navigates the current tab to `url`.
    async fn navigate(&mut self, url: &str) -> DriverResult<()>;

    /// Waits up to `timeout` for the element to be present.
    ///
    /// Resolves to `Ok(true)` when the element appeared, `Ok(false)` on
    /// timeout. `Err` is reserved for backend failures.
    async fn wait_for(&mut self, selector: &Selector, timeout: Duration) -> DriverResult<bool>;

    /// Types `text` into the element.
    async fn type_text(&mut self, selector: &Selector, text: &str) -> DriverResult<()>;

    /// Clicks the element.
    async fn click(&mut self, selector: &Selector) -> DriverResult<()>;

    /// Returns whether the element is currently present, without waiting.
    async fn is_present(&mut self, selector: &Selector) -> DriverResult<bool>;

    /// Reads the visible text of the element.
    async fn read_text(&mut self, selector: &Selector) -> DriverResult<String>;

    /// Opens `url` in a new tab and switches to it.
    async fn open_tab(&mut self, url: &str) -> DriverResult<()>;

    /// Closes the current tab and switches back to the previous one.
    async fn close_tab(&mut self) -> DriverResult<()>;

    /// Ends the automation session, releasing all backend resources.
    async fn quit(&mut self) -> DriverResult<()>;

    /// Types a one-time code into the second-factor surface.
    ///
    /// The provided implementation covers both surface shapes via
    /// [`type_text`](Self::type_text); backends with a faster path may
    /// override it.
    async fn enter_code(&mut self, surface: &CodeSurface, code: &OneTimeCode) -> DriverResult<()> {
        match surface {
            CodeSurface::Single(field) => self.type_text(field, code.as_str()).await,
            CodeSurface::PerDigit(fields) => {
                // Extra digits beyond the available fields are dropped, matching
                // how per-digit forms behave when typed into manually.
                for (field, digit) in fields.iter().zip(code.digits()) {
                    self.type_text(field, &digit.to_string()).await?;
                }
                Ok(())
            }
        }
    }
}

/// Produces a fresh, isolated driver session per account.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Opens a new automation session.
    async fn open(&self) -> DriverResult<Box<dyn Driver>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Minimal recording driver to exercise the provided `enter_code` path.
    #[derive(Default)]
    struct RecordingDriver {
        typed: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Driver for RecordingDriver {
        async fn navigate(&mut self, _url: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn wait_for(
            &mut self,
            _selector: &Selector,
            _timeout: Duration,
        ) -> DriverResult<bool> {
            Ok(true)
        }
        async fn type_text(&mut self, selector: &Selector, text: &str) -> DriverResult<()> {
            self.typed
                .lock()
                .unwrap()
                .push((selector.to_string(), text.to_string()));
            Ok(())
        }
        async fn click(&mut self, _selector: &Selector) -> DriverResult<()> {
            Ok(())
        }
        async fn is_present(&mut self, _selector: &Selector) -> DriverResult<bool> {
            Ok(false)
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

    #[tokio::test]
    async fn test_enter_code_single_field() {
        let mut driver = RecordingDriver::default();
        let typed = Arc::clone(&driver.typed);
        let code = OneTimeCode::parse("12345", 5).unwrap();

        driver
            .enter_code(&CodeSurface::Single(Selector::id("code_entry")), &code)
            .await
            .unwrap();

        let entries = typed.lock().unwrap();
        assert_eq!(entries.as_slice(), &[("id:code_entry".into(), "12345".into())]);
    }

    #[tokio::test]
    async fn test_enter_code_per_digit_fields() {
        let mut driver = RecordingDriver::default();
        let typed = Arc::clone(&driver.typed);
        let code = OneTimeCode::parse("12345", 5).unwrap();
        let fields: Vec<Selector> = (0..5).map(|i| Selector::css(format!(".digit-{i}"))).collect();

        driver
            .enter_code(&CodeSurface::PerDigit(fields), &code)
            .await
            .unwrap();

        let entries = typed.lock().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0], ("css:.digit-0".into(), "1".into()));
        assert_eq!(entries[4], ("css:.digit-4".into(), "5".into()));
    }

    #[tokio::test]
    async fn test_enter_code_more_digits_than_fields() {
        let mut driver = RecordingDriver::default();
        let typed = Arc::clone(&driver.typed);
        let code = OneTimeCode::parse("12345", 5).unwrap();
        let fields = vec![Selector::css(".d0"), Selector::css(".d1")];

        driver
            .enter_code(&CodeSurface::PerDigit(fields), &code)
            .await
            .unwrap();

        assert_eq!(typed.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_selector_display() {
        assert_eq!(Selector::css("input[type='password']").to_string(), "css:input[type='password']");
        assert_eq!(Selector::id("twofactor").to_string(), "id:twofactor");
        assert_eq!(Selector::Name("user".into()).to_string(), "name:user");
    }
}
