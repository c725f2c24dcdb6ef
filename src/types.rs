//! Shared types used across modules
//!
//! This module contains the inbound failure signal and the small confidence
//! helpers used by both the learning and the prevention side.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A raw failure signal handed to the classifier by an error monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSignal {
    /// Caller's guess at the kind of failure ("ImportError", "cli", ...)
    #[serde(default, alias = "type")]
    pub category_hint: String,
    /// Primary error message
    #[serde(default)]
    pub message: String,
    /// Traceback or stderr tail, if any
    #[serde(default, alias = "traceback")]
    pub trace_text: String,
    /// Opaque key/value context from the caller
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl FailureSignal {
    pub fn new(category_hint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category_hint: category_hint.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace_text = trace.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// All matchable text of the signal joined with spaces.
    pub fn text(&self) -> String {
        [&self.category_hint, &self.message, &self.trace_text]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Clamp a score into the closed unit interval. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_text_skips_empty_parts() {
        let signal = FailureSignal::new("ImportError", "No module named 'foo'");
        assert_eq!(signal.text(), "ImportError No module named 'foo'");

        let signal = signal.with_trace("File \"x.py\", line 1");
        assert!(signal.text().ends_with("line 1"));
    }

    #[test]
    fn test_signal_accepts_monitor_field_names() {
        let json = r#"{"type": "TypeError", "message": "bad", "traceback": "tb"}"#;
        let signal: FailureSignal = serde_json::from_str(json).unwrap();
        assert_eq!(signal.category_hint, "TypeError");
        assert_eq!(signal.trace_text, "tb");
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.4), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.35), 0.35);
    }
}
