//! Logging setup with bot token redaction.
//!
//! Transport errors from the Telegram client may embed full request URLs,
//! which carry the bot token. Everything written by the fmt layer passes
//! through [`RedactingWriter`] first.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

const PRODUCTION_FILTER: &str =
    "glowws_server=info,teloxide=warn,hyper=warn,tower_http=info,rusqlite=warn";

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    url_token: Regex,
    bare_token: Regex,
    prefixed_token: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url_token: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            bare_token: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            prefixed_token: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    /// Mask every bot token occurrence in `input`
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let output = self
            .url_token
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        let output = self
            .bare_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        self.prefixed_token
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length, the redacted one may differ
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

/// Install the global tracing subscriber writing redacted output to stderr.
///
/// `RUST_LOG` takes precedence. Otherwise `DEBUG_MODE=true` (or `1`) turns on
/// debug output for everything, and the production filter applies by default.
pub fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(PRODUCTION_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw1";

    #[test]
    fn test_redacts_token_in_request_url() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        let line = format!("error sending request for url (https://api.telegram.org/bot{TOKEN}/GetUpdates)");
        let redacted = patterns.redact(&line);
        assert!(!redacted.contains(TOKEN));
        assert!(redacted.contains("[TELEGRAM_TOKEN]"));
        Ok(())
    }

    #[test]
    fn test_redacts_bare_token() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        let redacted = patterns.redact(&format!("token={TOKEN} loaded"));
        assert_eq!(redacted, "token=[TELEGRAM_TOKEN] loaded");
        Ok(())
    }

    #[test]
    fn test_leaves_plain_text_alone() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        let line = "Registered user 42 (chat 42)";
        assert_eq!(patterns.redact(line), line);
        Ok(())
    }

    #[test]
    fn test_writer_reports_original_length() -> Result<(), Box<dyn std::error::Error>> {
        let patterns = Arc::new(RedactionPatterns::new()?);
        let mut out = Vec::new();
        let input = format!("bot{TOKEN}");
        let written = {
            let mut writer = RedactingWriter::new(&mut out, patterns);
            writer.write(input.as_bytes())?
        };
        assert_eq!(written, input.len());
        assert!(!String::from_utf8(out)?.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw1"));
        Ok(())
    }
}
