//! Result presentation.
//!
//! Maps outcomes onto the three display buckets and renders the operator views.

use crate::engine::ValidationOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Display bucket of an outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Admitted
    Success,
    /// Already used
    Warning,
    /// Everything else
    Error,
}

impl Severity {
    /// Style class used by the result view.
    #[must_use]
    pub const fn css_class(self) -> &'static str {
        match self {
            Self::Success => "success-bg",
            Self::Warning => "warning-bg",
            Self::Error => "error-bg",
        }
    }

    /// Lowercase name of the bucket.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label of the single action on the result view.
pub const SCAN_NEXT_LABEL: &str = "Scan Next";

/// Everything the result view shows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    /// Display bucket
    pub severity: Severity,
    /// Style class for the bucket
    pub css_class: &'static str,
    /// Headline
    pub headline: String,
    /// Detail line
    pub detail: String,
    /// Buyer name, when known
    pub buyer_name: Option<String>,
    /// The "scan next" action
    pub action_label: &'static str,
}

impl From<&ValidationOutcome> for ResultView {
    fn from(outcome: &ValidationOutcome) -> Self {
        let severity = outcome.severity();
        Self {
            severity,
            css_class: severity.css_class(),
            headline: outcome.headline.clone(),
            detail: outcome.detail.clone(),
            buyer_name: outcome.buyer_name.clone(),
            action_label: SCAN_NEXT_LABEL,
        }
    }
}

/// Operator-facing views.
///
/// Exactly one view is visible at a time: the acquisition view, the in-progress
/// indicator, or the result view.
pub trait ResultDisplay: Send + Sync {
    /// A code was decoded and is being validated.
    fn show_validating(&self, code: &str);

    /// Hide the acquisition view and show a result.
    fn show_result(&self, view: &ResultView);

    /// Hide the result view and show the acquisition view.
    fn show_scanner(&self);
}

/// Plain-text display writing to any `Write` (stdout for the door terminal).
pub struct TerminalDisplay {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalDisplay {
    /// Display writing to `out`.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Display writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write(&self, text: &str) {
        let Ok(mut out) = self.out.lock() else {
            tracing::warn!("Display output lock poisoned");
            return;
        };
        if let Err(error) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!(%error, "Failed to write to display");
        }
    }
}

impl fmt::Debug for TerminalDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalDisplay").finish_non_exhaustive()
    }
}

impl ResultDisplay for TerminalDisplay {
    fn show_validating(&self, code: &str) {
        self.write(&format!("… validating {code}\n"));
    }

    fn show_result(&self, view: &ResultView) {
        let mut text = format!(
            "\n[{}] {}\n    {}\n",
            view.css_class, view.headline, view.detail
        );
        if let Some(buyer) = &view.buyer_name {
            if buyer != &view.detail {
                text.push_str(&format!("    Buyer: {buyer}\n"));
            }
        }
        text.push_str(&format!("    <Enter> {}\n", view.action_label));
        self.write(&text);
    }

    fn show_scanner(&self) {
        self.write("\nReady. Present the next code.\n");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::OutcomeKind;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn css_classes() {
        assert_eq!(Severity::Success.css_class(), "success-bg");
        assert_eq!(Severity::Warning.css_class(), "warning-bg");
        assert_eq!(Severity::Error.css_class(), "error-bg");
    }

    #[test]
    fn view_from_system_error() {
        let view = ResultView::from(&ValidationOutcome::system_error(None));
        assert_eq!(view.severity, Severity::Error);
        assert_eq!(view.headline, "System Error");
        assert_eq!(view.action_label, SCAN_NEXT_LABEL);
        assert!(view.buyer_name.is_none());
    }

    #[test]
    fn terminal_renders_result() {
        let buffer = SharedBuffer::default();
        let display = TerminalDisplay::new(Box::new(buffer.clone()));
        let outcome = ValidationOutcome {
            kind: OutcomeKind::AlreadyUsed,
            headline: "Ticket Already Used".to_string(),
            detail: "Checked in at 20:15:30".to_string(),
            buyer_name: Some("Maria Silva".to_string()),
            ticket_id: None,
        };

        display.show_result(&ResultView::from(&outcome));

        let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("[warning-bg] Ticket Already Used"));
        assert!(text.contains("Buyer: Maria Silva"));
        assert!(text.contains("Scan Next"));
    }
}
