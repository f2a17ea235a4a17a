//! Earnings Radar Library
//!
//! Batch screening of prediction-market trade history for wallets whose
//! behavior around earnings markets looks anomalous.

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod features;
pub mod pipeline;
pub mod rank;
pub mod rules;
pub mod scoring;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunOutput, RunSummary};
