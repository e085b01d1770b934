//! AbuseIPDB threat context provider.

use super::{Confidence, ContextError, ContextProvider, ThreatContext, ThreatType};
use crate::config::AbuseIpDbConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// AbuseIPDB API response.
#[derive(Debug, Deserialize)]
struct AbuseIpDbResponse {
    data: AbuseIpDbData,
}

/// AbuseIPDB API response data (verbose form).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpDbData {
    /// Abuse confidence score (0-100).
    abuse_confidence_score: u8,

    /// Total number of reports.
    #[serde(default)]
    total_reports: u32,

    /// Number of distinct reporters.
    #[serde(default)]
    num_distinct_users: u32,

    /// RFC 3339 timestamp of the latest report, absent if never reported.
    #[serde(default)]
    last_reported_at: Option<String>,

    /// Individual reports (only with `verbose`).
    #[serde(default)]
    reports: Vec<AbuseIpDbReport>,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbReport {
    #[serde(default)]
    categories: Vec<u8>,
}

/// AbuseIPDB threat context provider.
pub struct AbuseIpDbProvider {
    config: AbuseIpDbConfig,
    client: Client,
}

impl AbuseIpDbProvider {
    /// Create a new AbuseIPDB provider.
    pub fn new(config: AbuseIpDbConfig) -> Result<Self, ContextError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, client })
    }
}

/// Map an AbuseIPDB report category to a threat type.
///
/// See <https://www.abuseipdb.com/categories>.
fn category_threat_type(category: u8) -> ThreatType {
    match category {
        7 => ThreatType::Phishing,
        10 | 11 => ThreatType::Spam,
        14 => ThreatType::Scanning,
        4 | 20 | 23 => ThreatType::Botnet,
        _ => ThreatType::Malware,
    }
}

/// Most frequent threat type across all report categories.
///
/// Ties go to the type listed first in [`ThreatType::ALL`]; no categories at
/// all means generic malicious activity.
fn dominant_threat_type(reports: &[AbuseIpDbReport]) -> ThreatType {
    let mut counts = [0usize; ThreatType::ALL.len()];
    for category in reports.iter().flat_map(|r| r.categories.iter()) {
        let threat_type = category_threat_type(*category);
        if let Some(slot) = ThreatType::ALL.iter().position(|t| *t == threat_type) {
            counts[slot] += 1;
        }
    }

    let mut best = 0;
    for (slot, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = slot;
        }
    }
    ThreatType::ALL[best]
}

/// Confidence from the number of independent reporters.
fn reporter_confidence(distinct_users: u32) -> Confidence {
    match distinct_users {
        n if n >= 10 => Confidence::High,
        n if n >= 3 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// Whole days between `last_reported_at` and `now`, never negative.
fn recency_days(last_reported_at: &str, now: DateTime<Utc>) -> Result<u32, ContextError> {
    let reported = DateTime::parse_from_rfc3339(last_reported_at).map_err(|e| {
        ContextError::InvalidResponse(format!("bad lastReportedAt {:?}: {}", last_reported_at, e))
    })?;
    let days = (now - reported.with_timezone(&Utc)).num_days().max(0);
    Ok(u32::try_from(days).unwrap_or(u32::MAX))
}

fn to_context(ip: &IpAddr, data: &AbuseIpDbData, now: DateTime<Utc>) -> Result<ThreatContext, ContextError> {
    let last_reported_at = data
        .last_reported_at
        .as_deref()
        .ok_or(ContextError::NoHistory(*ip))?;

    Ok(ThreatContext {
        reputation_score: data.abuse_confidence_score.min(100),
        recency_days: recency_days(last_reported_at, now)?,
        threat_type: dominant_threat_type(&data.reports),
        confidence: reporter_confidence(data.num_distinct_users),
    })
}

#[async_trait]
impl ContextProvider for AbuseIpDbProvider {
    async fn lookup(&self, ip: &IpAddr) -> Result<ThreatContext, ContextError> {
        let url = format!(
            "{}?ipAddress={}&maxAgeInDays={}&verbose",
            self.config.base_url, ip, self.config.max_age_days
        );

        debug!(ip = %ip, "Querying AbuseIPDB");

        let response = self
            .client
            .get(&url)
            .header("Key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("AbuseIPDB rate limit exceeded");
            return Err(ContextError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ContextError::InvalidResponse(format!("HTTP {}: {}", status, body)));
        }

        let api_response: AbuseIpDbResponse = response.json().await.map_err(|e| {
            ContextError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        let data = api_response.data;
        let context = to_context(ip, &data, Utc::now())?;

        debug!(
            ip = %ip,
            score = context.reputation_score,
            reports = data.total_reports,
            threat_type = %context.threat_type,
            "AbuseIPDB lookup complete"
        );

        Ok(context)
    }

    fn name(&self) -> &str {
        "abuseipdb"
    }
}
