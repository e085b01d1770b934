//! Local stand-in for a threat intelligence service.

use super::{Confidence, ContextError, ContextProvider, ThreatContext, ThreatType};
use crate::config::SimulatedConfig;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;
use tracing::debug;

// Malware is listed twice so it comes up two times in three.
static HIGH_RISK_TYPES: [ThreatType; 3] = [ThreatType::Malware, ThreatType::Botnet, ThreatType::Malware];
static OTHER_TYPES: [ThreatType; 3] = [ThreatType::Scanning, ThreatType::Phishing, ThreatType::Spam];
static OTHER_CONFIDENCE: [Confidence; 2] = [Confidence::Medium, Confidence::Low];

/// Generates plausible context for known-bad addresses.
///
/// Every address gets a reputation of 60-100 and was seen 1-30 days ago.
/// Addresses on the high-risk list look like high-confidence malware or
/// botnet hosts; the rest look like lower-confidence scanners, phishers or
/// spammers.
pub struct SimulatedProvider {
    rng: Mutex<StdRng>,
    high_risk: HashSet<IpAddr>,
}

impl SimulatedProvider {
    /// Create a provider from configuration.
    pub fn new(config: &SimulatedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            rng: Mutex::new(rng),
            high_risk: config.high_risk_addrs().into_iter().collect(),
        }
    }

    fn generate(&self, ip: &IpAddr) -> Result<ThreatContext, ContextError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| ContextError::Other("simulated provider RNG poisoned".to_string()))?;

        let (threat_type, confidence) = if self.high_risk.contains(ip) {
            (HIGH_RISK_TYPES.choose(&mut *rng), Some(&Confidence::High))
        } else {
            (OTHER_TYPES.choose(&mut *rng), OTHER_CONFIDENCE.choose(&mut *rng))
        };

        match (threat_type, confidence) {
            (Some(threat_type), Some(confidence)) => Ok(ThreatContext {
                reputation_score: rng.random_range(60..=100),
                recency_days: rng.random_range(1..=30),
                threat_type: *threat_type,
                confidence: *confidence,
            }),
            _ => Err(ContextError::Other("empty choice table".to_string())),
        }
    }
}

#[async_trait]
impl ContextProvider for SimulatedProvider {
    async fn lookup(&self, ip: &IpAddr) -> Result<ThreatContext, ContextError> {
        let context = self.generate(ip)?;
        debug!(
            ip = %ip,
            threat_type = %context.threat_type,
            reputation = context.reputation_score,
            "Simulated threat context"
        );
        Ok(context)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
