//! Threat context for matched addresses.
//!
//! A [`ContextProvider`] turns a matched address into a fixed-shape
//! [`ThreatContext`]. Providers are swappable: a local stand-in, a live
//! AbuseIPDB client, or either one behind a TTL cache.

pub mod abuseipdb;
pub mod cached;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Kind of malicious activity an address is known for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum ThreatType {
    Malware,
    Botnet,
    Scanning,
    Phishing,
    Spam,
}

impl ThreatType {
    /// Every threat type, in declaration order.
    pub const ALL: [ThreatType; 5] = [
        ThreatType::Malware,
        ThreatType::Botnet,
        ThreatType::Scanning,
        ThreatType::Phishing,
        ThreatType::Spam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Malware => "Malware",
            ThreatType::Botnet => "Botnet",
            ThreatType::Scanning => "Scanning",
            ThreatType::Phishing => "Phishing",
            ThreatType::Spam => "Spam",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown threat type: {}", s))
    }
}

/// How much the source trusts its own verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Every confidence level, in declaration order.
    pub const ALL: [Confidence; 3] = [Confidence::High, Confidence::Medium, Confidence::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown confidence: {}", s))
    }
}

/// Attributes a provider returns for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThreatContext {
    /// Reputation score (0-100, higher = worse).
    pub reputation_score: u8,
    /// Days since the address was last reported.
    pub recency_days: u32,
    /// Kind of activity.
    pub threat_type: ThreatType,
    /// Source confidence.
    pub confidence: Confidence,
}

/// A matched visitor address with its threat context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    /// The visitor address.
    pub ip: IpAddr,
    /// Snapshot of the provider's attributes.
    #[serde(flatten)]
    pub context: ThreatContext,
}

/// Error from a context provider.
#[derive(Debug, Error)]
pub enum ContextError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    /// Timeout.
    #[error("request timed out")]
    Timeout,
    /// Rate limited.
    #[error("rate limited")]
    RateLimited,
    /// Invalid response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The provider has nothing on this address.
    #[error("no threat history for {0}")]
    NoHistory(IpAddr),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ContextError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ContextError::Timeout
        } else {
            ContextError::Http(e)
        }
    }
}

/// Source of threat context for an address.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Look up context for a matched address.
    async fn lookup(&self, ip: &IpAddr) -> Result<ThreatContext, ContextError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
