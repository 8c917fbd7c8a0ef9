//! # Risk Analysis Types
//!
//! Data model for transaction scans and the structured verdict the analysis model
//! returns. Field names match the JSON the browser and the model exchange
//! (`snake_case`, recommendation strings with spaces).
//!
//! ## Rust Concepts:
//! - **serde(from/into)**: `Recommendation` parses from any string, mapping unknown
//!   values to `Caution`, and serializes back to its display form.
//! - **deserialize_with**: `risk_level` tolerates `null`, casing differences and
//!   unknown values (all of which mean "no level").

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Scanner output for one pending transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub transaction_type: String,
    pub asset: String,
    pub ethos_score: u32,
    pub risk_score: u32,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Risk level implied by a raw scanner risk score (0-30 low, 31-60 medium, above high).
    pub fn from_risk_score(score: u32) -> Self {
        match score {
            0..=30 => RiskLevel::Low,
            31..=60 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_risk_level<'de, D>(deserializer: D) -> Result<Option<RiskLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(RiskLevel::parse))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Recommendation {
    DoNotProceed,
    SafeToProceed,
    Caution,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::DoNotProceed => "DO NOT PROCEED",
            Recommendation::SafeToProceed => "SAFE TO PROCEED",
            Recommendation::Caution => "CAUTION",
        }
    }
}

impl From<String> for Recommendation {
    fn from(value: String) -> Self {
        let normalized = value.trim().to_ascii_uppercase().replace('_', " ");
        match normalized.as_str() {
            "DO NOT PROCEED" => Recommendation::DoNotProceed,
            "SAFE TO PROCEED" => Recommendation::SafeToProceed,
            _ => Recommendation::Caution,
        }
    }
}

impl From<Recommendation> for &'static str {
    fn from(value: Recommendation) -> Self {
        value.as_str()
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialVerification {
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_verification: Option<SocialVerification>,
}

/// Structured verdict for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    #[serde(default, deserialize_with = "lenient_risk_level")]
    pub risk_level: Option<RiskLevel>,
    pub summary: String,
    #[serde(default)]
    pub explanation: Vec<String>,
    pub recommendation: Recommendation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
    pub tts_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_metadata: Option<EnhancedMetadata>,
}

pub const INPUT_TEMPLATE: &str = "Expected format: { \"transaction_type\": \"...\", \"asset\": \"...\", \"ethos_score\": 0-1000, \"risk_score\": 0-100, \"flags\": [] }";

impl RiskAnalysis {
    /// Verdict returned when the model call or its output cannot be used.
    pub fn protocol_error_fallback() -> Self {
        Self {
            risk_level: None,
            summary: "Protocol Error: Unable to parse telemetry.".to_string(),
            explanation: vec!["The input provided does not follow the required JSON structure.".to_string()],
            recommendation: Recommendation::Caution,
            education: Some(INPUT_TEMPLATE.to_string()),
            tts_text: "Data error. Please provide a valid transaction scan.".to_string(),
            enhanced_metadata: None,
        }
    }

    /// Plain-text defense report for sharing.
    ///
    /// ```text
    /// [ETHOS SHIELD REPORT]
    /// STATUS: HIGH
    /// RECOMMENDATION: DO NOT PROCEED
    /// ETHOS SCORE: 320
    /// <summary>
    /// ```
    pub fn report_text(&self, ethos_score: Option<u32>) -> String {
        let status = self.risk_level.map(|l| l.as_str()).unwrap_or("null");
        // a zero score reads as missing in the shared report
        let score = match ethos_score {
            Some(score) if score > 0 => score.to_string(),
            _ => "N/A".to_string(),
        };
        format!(
            "[ETHOS SHIELD REPORT]\nSTATUS: {}\nRECOMMENDATION: {}\nETHOS SCORE: {}\n{}",
            status, self.recommendation, score, self.summary
        )
    }
}

/// Reputation band of an Ethos score (0-1000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EthosTier {
    HighTrust,
    Neutral,
    LowTrust,
}

impl EthosTier {
    pub fn from_score(score: u32) -> Self {
        if score > 650 {
            EthosTier::HighTrust
        } else if score > 350 {
            EthosTier::Neutral
        } else {
            EthosTier::LowTrust
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EthosTier::HighTrust => "High Social Trust Tier",
            EthosTier::Neutral => "Neutral Credibility Tier",
            EthosTier::LowTrust => "Low Trust / Anonymized Tier",
        }
    }
}
