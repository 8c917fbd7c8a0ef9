//! System directive sent to the voice model when a live connection opens.

use crate::error::LiveError;
use tracing::warn;

const PERSONA: &str = "You are Ethos Shield, a calm security mentor helping a user decide \
whether an on-chain transaction is safe to sign. Speak briefly and plainly. Lead with the \
risk level, then the single most important reason. If the user asks for detail, explain \
the flags one at a time. Never tell the user to proceed when the data shows critical flags.";

const FALLBACK_NOTE: &str = "No valid scan data is loaded. Ask the user to paste a \
transaction scan into the scanner before giving any safety verdict.";

/// Instruction text plus whether it embeds real scan data.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemDirective {
    text: String,
    has_snapshot: bool,
}

impl SystemDirective {
    /// Build the directive from the caller's current scan data.
    ///
    /// A snapshot that is not valid JSON is not an error: the fallback note is used and a
    /// `MalformedContextSnapshot` warning is logged.
    pub fn from_snapshot(snapshot: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(snapshot) {
            Ok(value) => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Self {
                    text: format!("{}\n\nCurrent scan data:\n{}", PERSONA, pretty),
                    has_snapshot: true,
                }
            }
            Err(err) => {
                let err = LiveError::MalformedContextSnapshot(err.to_string());
                warn!("{}; using fallback directive", err);
                Self {
                    text: format!("{}\n\n{}", PERSONA, FALLBACK_NOTE),
                    has_snapshot: false,
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeds_valid_snapshot() {
        let directive = SystemDirective::from_snapshot(r#"{"asset":"USDC","ethos_score":720}"#);
        assert!(directive.has_snapshot());
        assert!(directive.text().contains("\"asset\": \"USDC\""));
    }

    #[test]
    fn test_malformed_snapshot_uses_fallback() {
        let directive = SystemDirective::from_snapshot("{ not json");
        assert!(!directive.has_snapshot());
        assert!(directive.text().contains(FALLBACK_NOTE));
    }
}
