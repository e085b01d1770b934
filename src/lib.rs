//! Threat correlator.
//!
//! Matches web server visitors against a public block list of malicious
//! networks and produces a prioritized threat report for the matches.
//!
//! # Pipeline
//!
//! - **Range index** - Parse block-list CIDRs, drop private/loopback/link-local
//!   ranges, answer membership queries by binary search
//! - **Correlator** - Find the visitors that fall inside a listed range
//! - **Context providers** - Reputation, recency, threat type and confidence
//!   per match (simulated or AbuseIPDB, optionally cached)
//! - **Severity scorer** - Feed context through a trained classifier for a
//!   severity label and a priority score
//! - **Report** - Rank by priority and render as text or JSON
//!
//! # Example Configuration
//!
//! ```yaml
//! feed:
//!   path: "data/firehol_level1.netset"
//!   download: true
//!
//! access_log:
//!   path: "/var/log/nginx/access.log"
//!
//! model:
//!   path: "models/threat_scorer.json"
//!
//! context:
//!   provider: abuseipdb
//!   abuseipdb:
//!     api_key: "${ABUSEIPDB_API_KEY}"
//! ```

pub mod access_log;
pub mod cache;
pub mod config;
pub mod context;
pub mod correlator;
pub mod engine;
pub mod enrich;
pub mod feed;
pub mod network;
pub mod report;
pub mod scoring;

pub use config::Config;
pub use correlator::{correlate, Correlator, MatchSet, VisitorSet};
pub use engine::{CorrelationEngine, EngineError};
pub use network::{NetworkRange, RangeIndex};
pub use report::{rank, ReportFormat, ThreatReport};
pub use scoring::{Classifier, ScoredRecord, Severity, SeverityScorer};
