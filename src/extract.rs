//! Extraction of one-time codes from fetched mail.
//!
//! Two template shapes are handled, mirroring how the code mails arrive in
//! practice:
//!
//! - **Multipart** messages carry the code in an HTML part, wrapped in an
//!   element whose `style` attribute marks it as the large code display. The
//!   element is located by that style signature rather than by structural
//!   position, because the template nests it in varying markup.
//! - **Plain** messages carry the code in the text body; every digit in the
//!   body is collected and the result is accepted only when the total count
//!   equals the expected code length.
//!
//! Parse failures are reported distinctly so the poller can skip a malformed
//! message and keep polling.

use crate::config::CodeProfile;
use mailparse::{parse_mail, ParsedMail};
use regex::Regex;
use tracing::{debug, warn};

/// A fixed-length numeric one-time code.
///
/// Valid only within the freshness window of the message it came from; consumed
/// exactly once and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode(String);

impl OneTimeCode {
    /// Validates a candidate string: exactly `length` ASCII digits.
    #[must_use]
    pub fn parse(candidate: &str, length: usize) -> Option<Self> {
        let trimmed = candidate.trim();
        if trimmed.len() == length && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the individual digits, for per-digit entry surfaces.
    pub fn digits(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars()
    }
}

impl std::fmt::Display for OneTimeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of attempting to extract a code from one fetched message.
#[derive(Debug)]
pub(crate) enum ExtractOutcome {
    /// A valid code was found.
    Found(OneTimeCode),
    /// The message parsed cleanly but carried no valid code.
    NotFound,
    /// The message could not be parsed (logged; skip and continue).
    ParseError,
}

/// Extracts one-time codes from raw RFC822 message bytes.
#[derive(Debug, Clone)]
pub(crate) struct CodeExtractor {
    length: usize,
    styled_element: Regex,
}

impl CodeExtractor {
    /// Builds an extractor for the given code profile.
    ///
    /// The HTML pattern matches any element whose `style` attribute contains
    /// the profile's signature and captures the element's immediate text.
    pub(crate) fn new(profile: &CodeProfile) -> Self {
        let signature = regex::escape(&profile.style_signature);
        let pattern = format!(r#"style\s*=\s*"[^"]*{signature}[^"]*"[^>]*>\s*([^<]+)"#);
        Self {
            length: profile.length,
            styled_element: Regex::new(&pattern).expect("valid style signature regex"),
        }
    }

    /// Attempts to extract a code from raw message bytes.
    pub(crate) fn extract(&self, raw: &[u8]) -> ExtractOutcome {
        let parsed = match parse_mail(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to parse email, skipping message");
                return ExtractOutcome::ParseError;
            }
        };

        if parsed.subparts.is_empty() {
            self.extract_from_plain(&parsed)
        } else {
            self.extract_from_multipart(&parsed)
        }
    }

    /// Multipart path: find the HTML part and locate the styled code element.
    fn extract_from_multipart(&self, parsed: &ParsedMail<'_>) -> ExtractOutcome {
        let Some(html_part) = find_html_part(parsed) else {
            debug!("Multipart message has no HTML part");
            return ExtractOutcome::NotFound;
        };

        let html = match html_part.get_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to decode HTML part, skipping message");
                return ExtractOutcome::ParseError;
            }
        };

        match self.find_styled_code(&html) {
            Some(code) => ExtractOutcome::Found(code),
            None => {
                debug!("No styled code element in HTML part");
                ExtractOutcome::NotFound
            }
        }
    }

    /// Plain path: collect every digit and require an exact-length total.
    fn extract_from_plain(&self, parsed: &ParsedMail<'_>) -> ExtractOutcome {
        let body = match parsed.get_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to decode plain body, skipping message");
                return ExtractOutcome::ParseError;
            }
        };

        let digits: String = body.chars().filter(char::is_ascii_digit).collect();

        match OneTimeCode::parse(&digits, self.length) {
            Some(code) => ExtractOutcome::Found(code),
            None => {
                debug!(
                    digit_count = digits.len(),
                    expected = self.length,
                    "Plain body digit count does not match code length"
                );
                ExtractOutcome::NotFound
            }
        }
    }

    /// Finds the styled code element's text in raw HTML markup.
    fn find_styled_code(&self, html: &str) -> Option<OneTimeCode> {
        self.styled_element
            .captures(html)
            .and_then(|caps| caps.get(1))
            .and_then(|m| OneTimeCode::parse(m.as_str(), self.length))
    }
}

/// Recursively locates the first `text/html` part of a multipart message.
fn find_html_part<'a, 'b>(parsed: &'a ParsedMail<'b>) -> Option<&'a ParsedMail<'b>> {
    for part in &parsed.subparts {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            return Some(part);
        }
        if let Some(nested) = find_html_part(part) {
            return Some(nested);
        }
    }
    None
}
