//! Browser-control abstraction for the panel workflow.
//!
//! Defines the [`PanelPage`] trait that the renewal flow and the expiry
//! extractor consume, abstracting over the browser engine (currently
//! Chromium via chromiumoxide).

pub mod chromium;

use crate::extract::PageSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A single authenticated panel page.
///
/// All waits are condition-based with bounded timeouts; implementations must
/// not rely on unbounded blocking.
#[async_trait]
pub trait PanelPage: Send + Sync {
    /// Navigate to a URL and wait for the navigation to settle.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait for an in-flight navigation (triggered by a click) to settle.
    async fn wait_for_navigation(&self) -> Result<()>;

    /// Fill a form field, dispatching an `input` event so framework-bound
    /// fields pick up the value.
    async fn fill(&self, selector: &str, text: &str) -> Result<()>;

    /// Click the first element matching a CSS selector.
    async fn click_selector(&self, selector: &str) -> Result<()>;

    /// Click the tightest visible element whose text contains `text`.
    async fn click_text(&self, text: &str) -> Result<()>;

    /// Poll until the rendered body text contains `text`, or the timeout
    /// elapses.
    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<()>;

    /// Evaluate a script and return its string result.
    async fn eval_string(&self, js: &str) -> Result<String>;

    /// Capture a read-only snapshot of the current document and its nested
    /// frames.
    async fn snapshot(&self) -> Result<PageSnapshot>;

    /// Supply proxy credentials for subsequent requests.
    async fn authenticate(&self, username: &str, password: &str) -> Result<()>;

    /// Persist a checkpoint screenshot under the run's artifact directory.
    /// A no-op when artifact capture is disabled.
    async fn capture_checkpoint(&self, label: &str) -> Result<()>;

    /// Release the page and the browser behind it.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes everything that could break out of a JS string context:
/// backslashes, quotes, backticks, newlines, and angle brackets (to prevent
/// `</script>` injection). Null bytes are stripped.
pub(crate) fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_passes_plain_text() {
        assert_eq!(sanitize_js_string("hello"), "hello");
        assert_eq!(sanitize_js_string("it's"), "it\\'s");
    }

    #[test]
    fn sanitize_blocks_script_breakout() {
        let sanitized = sanitize_js_string("</script><script>alert(1)</script>");
        assert!(!sanitized.contains("</script>"));
        assert!(sanitized.contains("\\x3c/script\\x3e"));
    }

    #[test]
    fn sanitize_strips_null_bytes() {
        assert_eq!(sanitize_js_string("abc\0def"), "abcdef");
    }
}
