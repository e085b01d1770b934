//! Correlation engine: one run from raw inputs to a ranked report.

use crate::access_log;
use crate::cache::ContextCache;
use crate::config::{Config, ProviderKind};
use crate::context::abuseipdb::AbuseIpDbProvider;
use crate::context::cached::CachedProvider;
use crate::context::simulated::SimulatedProvider;
use crate::context::ContextProvider;
use crate::correlator::{Correlator, VisitorSet, DEFAULT_PARALLEL_THRESHOLD};
use crate::enrich::{enrich, EnrichError};
use crate::feed::{self, FeedError};
use crate::network::RangeIndex;
use crate::report::ThreatReport;
use crate::scoring::model::ModelArtifact;
use crate::scoring::{Classifier, ScoringError, SeverityScorer};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Run-level failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("failed to read access log {path}: {source}")]
    AccessLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Enrichment(#[from] EnrichError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

/// Wires the range index, correlator, context provider, scorer and ranker.
///
/// The model and provider are fixed at construction. Each run builds a fresh
/// index; nothing carries over between runs.
pub struct CorrelationEngine {
    provider: Arc<dyn ContextProvider>,
    cache: Option<Arc<ContextCache>>,
    scorer: SeverityScorer,
    workers: usize,
    parallel_threshold: usize,
}

impl CorrelationEngine {
    /// Create an engine. Fails if the model's columns or classes do not fit.
    pub fn new(provider: Arc<dyn ContextProvider>, model: Arc<dyn Classifier>) -> Result<Self, ScoringError> {
        Ok(Self {
            provider,
            cache: None,
            scorer: SeverityScorer::new(model)?,
            workers: 8,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        })
    }

    /// Maximum concurrent context lookups.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Context cache behind the provider; expired entries are purged at the
    /// start of every run.
    pub fn with_cache(mut self, cache: Arc<ContextCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Visitor count above which correlation uses the rayon pool.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Build an engine from configuration: load the model and assemble the
    /// provider stack.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let model: Arc<dyn Classifier> = ModelArtifact::load(&config.model.path)?.into_classifier().into();

        let provider: Arc<dyn ContextProvider> = match config.context.provider {
            ProviderKind::Simulated => Arc::new(SimulatedProvider::new(&config.context.simulated)),
            ProviderKind::AbuseIpDb => {
                let abuseipdb = config
                    .context
                    .abuseipdb
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("abuseipdb provider selected without configuration"))?;
                Arc::new(AbuseIpDbProvider::new(abuseipdb)?)
            }
        };

        let cache = config.context.cache.enabled.then(|| {
            Arc::new(ContextCache::new(
                config.context.cache.ttl_seconds,
                config.context.cache.max_entries,
            ))
        });

        let provider: Arc<dyn ContextProvider> = match &cache {
            Some(cache) => Arc::new(CachedProvider::new(provider, Arc::clone(cache))),
            None => provider,
        };

        info!(
            provider = provider.name(),
            cache = config.context.cache.enabled,
            workers = config.settings.workers,
            "Correlation engine initialized"
        );

        let mut engine = Self::new(provider, model)?
            .with_workers(config.settings.workers)
            .with_parallel_threshold(config.settings.parallel_threshold);
        if let Some(cache) = cache {
            engine = engine.with_cache(cache);
        }
        Ok(engine)
    }

    /// Correlate visitors against block-list lines and produce a ranked report.
    ///
    /// An empty block list or visitor set gives an empty report, not an error.
    pub async fn run<S>(&self, feed_entries: &[S], visitors: &VisitorSet) -> Result<ThreatReport, EngineError>
    where
        S: AsRef<str> + Sync,
    {
        if let Some(cache) = &self.cache {
            cache.cleanup();
        }

        let index = RangeIndex::build(feed_entries);
        let matches = Correlator::new(index)
            .with_parallel_threshold(self.parallel_threshold)
            .correlate(visitors);

        if matches.is_empty() {
            info!("No visitor matched the block list");
            return Ok(ThreatReport::default());
        }

        let records = enrich(&matches, Arc::clone(&self.provider), self.workers).await?;
        let scored = self.scorer.score(records)?;
        Ok(ThreatReport::new(scored))
    }

    /// Acquire the feed and access log named in `config`, then run.
    pub async fn run_with_config(&self, config: &Config) -> Result<ThreatReport, EngineError> {
        if config.feed.download {
            feed::download(&config.feed).await?;
        }
        let entries = feed::load(&config.feed.path).await?;

        let visitors = access_log::load(&config.access_log.path)
            .await
            .map_err(|source| EngineError::AccessLog {
                path: config.access_log.path.clone(),
                source,
            })?;

        self.run(&entries, &visitors).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Confidence, ContextError, ThreatContext, ThreatType};
    use crate::scoring::{FeatureEncoder, Severity};
    use async_trait::async_trait;
    use std::io::Write;
    use std::net::IpAddr;
    use tempfile::NamedTempFile;

    struct StaticProvider {
        fail: bool,
    }

    #[async_trait]
    impl ContextProvider for StaticProvider {
        async fn lookup(&self, ip: &IpAddr) -> Result<ThreatContext, ContextError> {
            if self.fail {
                return Err(ContextError::Other("service unreachable".to_string()));
            }
            let malware = *ip == "1.186.20.106".parse::<IpAddr>().unwrap();
            Ok(ThreatContext {
                reputation_score: if malware { 95 } else { 65 },
                recency_days: 3,
                threat_type: if malware { ThreatType::Malware } else { ThreatType::Spam },
                confidence: if malware { Confidence::High } else { Confidence::Low },
            })
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    /// Critical for high reputation, Low otherwise.
    struct ThresholdModel {
        columns: Vec<String>,
        classes: Vec<Severity>,
    }

    impl ThresholdModel {
        fn new() -> Self {
            Self {
                columns: FeatureEncoder::standard_columns(),
                classes: vec![Severity::Critical, Severity::High, Severity::Low, Severity::Medium],
            }
        }
    }

    impl Classifier for ThresholdModel {
        fn feature_columns(&self) -> &[String] {
            &self.columns
        }

        fn classes(&self) -> &[Severity] {
            &self.classes
        }

        fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoringError> {
            Ok(rows
                .iter()
                .map(|row| {
                    if row[0] >= 90.0 {
                        vec![0.6, 0.3, 0.0, 0.1]
                    } else {
                        vec![0.0, 0.1, 0.8, 0.1]
                    }
                })
                .collect())
        }
    }

    fn engine(fail: bool) -> CorrelationEngine {
        CorrelationEngine::new(Arc::new(StaticProvider { fail }), Arc::new(ThresholdModel::new())).unwrap()
    }

    fn visitors(addrs: &[&str]) -> VisitorSet {
        addrs.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_single_match() {
        let report = engine(false)
            .run(&["1.186.20.0/24"], &visitors(&["1.186.20.106", "192.168.1.5"]))
            .await
            .unwrap();

        assert_eq!(report.len(), 1);
        let first = &report.records()[0];
        assert_eq!(first.record.ip, "1.186.20.106".parse::<IpAddr>().unwrap());
        assert_eq!(first.severity, Severity::Critical);
        assert_eq!(first.priority_score, 75.0);
        assert!(report.to_string().contains("[ SEVERITY: CRITICAL ]"));
    }

    #[tokio::test]
    async fn test_ranking_across_matches() {
        let report = engine(false)
            .with_workers(2)
            .run(
                &["1.186.20.0/24", "45.9.20.0/24"],
                &visitors(&["45.9.20.7", "1.186.20.106", "45.9.20.8", "8.8.8.8"]),
            )
            .await
            .unwrap();

        let ips: Vec<String> = report.records().iter().map(|r| r.record.ip.to_string()).collect();
        // Equal priorities keep address order from enrichment.
        assert_eq!(ips, vec!["1.186.20.106", "45.9.20.7", "45.9.20.8"]);
    }

    #[tokio::test]
    async fn test_empty_visitors_is_not_an_error() {
        let report = engine(false)
            .run(&["1.186.20.0/24"], &VisitorSet::new())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(report.to_string().contains("No malicious IPs found"));
    }

    #[tokio::test]
    async fn test_no_matches_skips_provider() {
        // A failing provider is never reached when nothing matches.
        let report = engine(true)
            .run(&["10.0.0.0/8", "garbage"], &visitors(&["10.1.1.1"]))
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_fails_the_run() {
        let err = engine(true)
            .run(&["1.186.20.0/24"], &visitors(&["1.186.20.106"]))
            .await
            .unwrap_err();
        match err {
            EngineError::Enrichment(EnrichError::Lookup { ip, .. }) => {
                assert_eq!(ip, "1.186.20.106".parse::<IpAddr>().unwrap());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_incompatible_model_is_rejected() {
        let mut model = ThresholdModel::new();
        model.classes = vec![Severity::Low, Severity::High];
        let result = CorrelationEngine::new(Arc::new(StaticProvider { fail: false }), Arc::new(model));
        assert!(matches!(result, Err(ScoringError::MissingClass(Severity::Critical))));
    }

    #[tokio::test]
    async fn test_run_with_config_from_files() {
        let mut feed_file = NamedTempFile::new().unwrap();
        feed_file.write_all(b"# test feed\n1.186.20.0/24\n10.0.0.0/8\n").unwrap();
        feed_file.flush().unwrap();

        let mut log_file = NamedTempFile::new().unwrap();
        log_file
            .write_all(b"1.186.20.106 - - [x] \"GET /\" 200\n192.168.1.5 - - [x] \"GET /\" 200\n")
            .unwrap();
        log_file.flush().unwrap();

        let mut config = Config::default();
        config.feed.download = false;
        config.feed.path = feed_file.path().to_path_buf();
        config.access_log.path = log_file.path().to_path_buf();

        let report = engine(false).run_with_config(&config).await.unwrap();
        assert_eq!(report.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_access_log() {
        let mut feed_file = NamedTempFile::new().unwrap();
        feed_file.write_all(b"1.186.20.0/24\n").unwrap();
        feed_file.flush().unwrap();

        let mut config = Config::default();
        config.feed.download = false;
        config.feed.path = feed_file.path().to_path_buf();
        config.access_log.path = PathBuf::from("/nonexistent/access.log");

        let err = engine(false).run_with_config(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::AccessLog { .. }));
    }

    #[tokio::test]
    async fn test_run_purges_expired_cache_entries() {
        let cache = Arc::new(ContextCache::new(3600, 100));
        let stale: IpAddr = "45.9.20.7".parse().unwrap();
        let context = ThreatContext {
            reputation_score: 70,
            recency_days: 9,
            threat_type: ThreatType::Spam,
            confidence: Confidence::Low,
        };
        cache.set_with_ttl(stale, context, "static", std::time::Duration::ZERO);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cache.len(), 1);

        let report = engine(false)
            .with_cache(Arc::clone(&cache))
            .run(&["1.186.20.0/24"], &VisitorSet::new())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_from_config_with_bundled_model() {
        let mut config = Config::default();
        config.model.path = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/models/threat_scorer.json"));
        config.context.simulated.seed = Some(1);
        config.context.simulated.high_risk = vec!["1.186.20.106".to_string()];

        let engine = CorrelationEngine::from_config(&config).unwrap();
        let report = engine
            .run(&["1.186.20.0/24"], &visitors(&["1.186.20.106"]))
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        let first = &report.records()[0];
        assert!(first.priority_score >= 0.0 && first.priority_score <= 100.0);
    }
}
