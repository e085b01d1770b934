//! Ranking and rendering of scored matches.

use crate::scoring::ScoredRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output format for a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable alert list.
    #[default]
    Text,
    /// JSON array of ranked records.
    Json,
}

/// Order records by priority, most urgent first.
///
/// The sort is stable: records with equal priority keep their input order.
/// Nothing is dropped.
pub fn rank(mut records: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
    records.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
    records
}

#[derive(Serialize)]
struct RankedEntry<'a> {
    rank: usize,
    #[serde(flatten)]
    record: &'a ScoredRecord,
}

/// Ranked threat report for one run.
#[derive(Debug, Clone, Default)]
pub struct ThreatReport {
    records: Vec<ScoredRecord>,
}

impl ThreatReport {
    /// Rank scored records into a report.
    pub fn new(records: Vec<ScoredRecord>) -> Self {
        Self {
            records: rank(records),
        }
    }

    /// Records, most urgent first.
    pub fn records(&self) -> &[ScoredRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no visitor matched the block list.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// JSON array of records, each with its 1-based rank.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let entries: Vec<RankedEntry<'_>> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| RankedEntry { rank: i + 1, record })
            .collect();
        serde_json::to_string_pretty(&entries)
    }

    /// Render in the requested format.
    pub fn render(&self, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Text => Ok(self.to_string()),
            ReportFormat::Json => self.to_json(),
        }
    }
}

impl fmt::Display for ThreatReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return writeln!(f, "[+] No malicious IPs found in server logs. System clean.");
        }

        writeln!(f, "[!] Found {} match(es) in logs.", self.records.len())?;
        writeln!(f)?;
        writeln!(f, "--- [!!!] PRIORITIZED THREAT ALERTS [!!!] ---")?;
        for scored in &self.records {
            let context = &scored.record.context;
            writeln!(f)?;
            writeln!(f, "  [ SEVERITY: {} ]", scored.severity.as_str().to_uppercase())?;
            writeln!(f, "  IP Address:     {}", scored.record.ip)?;
            writeln!(f, "  Threat Type:    {}", context.threat_type)?;
            writeln!(f, "  Reputation:     {}", context.reputation_score)?;
            writeln!(f, "  Recency (Days): {}", context.recency_days)?;
            writeln!(f, "  Confidence:     {}", context.confidence)?;
            writeln!(f, "  Priority:       {:.2}", scored.priority_score)?;
        }
        Ok(())
    }
}
