//! # Transaction Risk Analysis
//!
//! One-shot calls to the hosted model: a structured risk verdict for a transaction
//! scan, and speech synthesis for narrating it.
//!
//! ## Key Components:
//! - **types**: Scan input, verdict, Ethos reputation tiers, the shareable report
//! - **client**: REST client with the protocol-error fallback

pub mod client;  // generateContent calls
pub mod types;   // Verdict data model

pub use client::GeminiClient;
pub use types::{EthosTier, RiskAnalysis, RiskLevel, TransactionInput};
