//! Configuration types for the threat correlator.

use crate::report::ReportFormat;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::LazyLock;

/// FireHOL level 1: networks seen attacking in the recent past.
pub const DEFAULT_FEED_URL: &str =
    "https://raw.githubusercontent.com/firehol/blocklist-ipsets/master/firehol_level1.netset";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Run-wide settings.
    #[serde(default)]
    pub settings: Settings,

    /// Block-list acquisition.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Access log to scan.
    #[serde(default)]
    pub access_log: AccessLogConfig,

    /// Severity model artifact.
    #[serde(default)]
    pub model: ModelConfig,

    /// Threat context lookups.
    #[serde(default)]
    pub context: ContextConfig,

    /// Report output.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Run-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Maximum concurrent context lookups.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Visitor count above which correlation runs on the rayon pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallel_threshold: default_parallel_threshold(),
        }
    }
}

fn default_workers() -> usize {
    8
}

fn default_parallel_threshold() -> usize {
    crate::correlator::DEFAULT_PARALLEL_THRESHOLD
}

/// Block-list feed configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Where to download the feed from.
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Local copy of the feed.
    #[serde(default = "default_feed_path")]
    pub path: PathBuf,

    /// Download a fresh copy before each run.
    #[serde(default = "default_true")]
    pub download: bool,

    /// Download timeout in milliseconds.
    #[serde(default = "default_feed_timeout")]
    pub timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            path: default_feed_path(),
            download: true,
            timeout_ms: default_feed_timeout(),
        }
    }
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_feed_path() -> PathBuf {
    PathBuf::from("data/firehol_level1.netset")
}

fn default_feed_timeout() -> u64 {
    10_000
}

/// Access log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessLogConfig {
    /// Path to the web server access log.
    #[serde(default = "default_access_log_path")]
    pub path: PathBuf,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            path: default_access_log_path(),
        }
    }
}

fn default_access_log_path() -> PathBuf {
    PathBuf::from("data/sample_nginx.log")
}

/// Severity model configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Path to the JSON model artifact.
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/threat_scorer.json")
}

/// Which context provider to use.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local randomized stand-in.
    #[default]
    Simulated,
    /// AbuseIPDB v2 API.
    AbuseIpDb,
}

/// Threat context configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Provider used for lookups.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Simulated provider settings.
    #[serde(default)]
    pub simulated: SimulatedConfig,

    /// AbuseIPDB provider settings.
    #[serde(default)]
    pub abuseipdb: Option<AbuseIpDbConfig>,

    /// Lookup cache.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Simulated provider configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulatedConfig {
    /// Seed for reproducible output. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Addresses that always look like high-confidence malware or botnet hosts.
    #[serde(default)]
    pub high_risk: Vec<String>,
}

impl SimulatedConfig {
    /// Parsed high-risk addresses. Invalid entries are rejected by validation.
    pub fn high_risk_addrs(&self) -> Vec<IpAddr> {
        self.high_risk
            .iter()
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }
}

/// AbuseIPDB provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbuseIpDbConfig {
    /// API key (supports ${ENV_VAR} syntax).
    pub api_key: String,

    /// API endpoint.
    #[serde(default = "default_abuseipdb_url")]
    pub base_url: String,

    /// Only consider reports from the last N days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// API request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_abuseipdb_url() -> String {
    "https://api.abuseipdb.com/api/v2/check".to_string()
}

fn default_max_age_days() -> u32 {
    90
}

fn default_timeout() -> u64 {
    5000
}

/// Lookup cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache lookups.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    /// Maximum cached addresses.
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_entries() -> usize {
    10_000
}

/// Report configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Output format.
    #[serde(default)]
    pub format: ReportFormat,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Read a YAML file and expand `${VAR}` placeholders, without validating.
    ///
    /// Callers that apply overrides afterwards validate once they are done.
    pub fn parse(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Load and validate configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = Self::parse(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.settings.workers == 0 {
            anyhow::bail!("settings.workers must be at least 1");
        }

        if !self.feed.download && !self.feed.path.exists() {
            anyhow::bail!(
                "Feed download is disabled and {} does not exist",
                self.feed.path.display()
            );
        }

        if self.context.provider == ProviderKind::AbuseIpDb {
            match self.context.abuseipdb {
                Some(ref abuseipdb) if abuseipdb.api_key.is_empty() => {
                    anyhow::bail!("AbuseIPDB provider selected but api_key is empty");
                }
                Some(_) => {}
                None => anyhow::bail!("AbuseIPDB provider selected without an abuseipdb section"),
            }
        }

        for entry in &self.context.simulated.high_risk {
            if entry.trim().parse::<IpAddr>().is_err() {
                anyhow::bail!("Invalid high_risk address: {}", entry);
            }
        }

        if self.context.cache.enabled && self.context.cache.max_entries == 0 {
            anyhow::bail!("context.cache.max_entries must be at least 1 when the cache is enabled");
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Threat Correlator Configuration

settings:
  workers: 8                   # concurrent context lookups
  parallel_threshold: 1024     # visitors above this are checked on all cores

# Block list of known-malicious networks
feed:
  url: "https://raw.githubusercontent.com/firehol/blocklist-ipsets/master/firehol_level1.netset"
  path: "data/firehol_level1.netset"
  download: true               # fetch a fresh copy before each run
  timeout_ms: 10000

access_log:
  path: "data/sample_nginx.log"

model:
  path: "models/threat_scorer.json"

# Threat context for matched addresses
context:
  provider: simulated          # simulated or abuseipdb
  simulated:
    seed: 42                   # omit for random output
    high_risk:
      - "1.186.20.106"
  abuseipdb:
    api_key: "${ABUSEIPDB_API_KEY}"
    max_age_days: 90
    timeout_ms: 5000
  cache:
    enabled: true
    ttl_seconds: 3600
    max_entries: 10000

report:
  format: text                 # text or json
"#
        .to_string()
    }
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
