//! Bounded-concurrency context enrichment.

use crate::context::{ContextError, ContextProvider, MatchRecord};
use crate::correlator::MatchSet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info};

/// Enrichment failure.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// A provider lookup failed. Missing context is never filled in.
    #[error("context lookup for {ip} via {provider} failed: {source}")]
    Lookup {
        ip: IpAddr,
        provider: String,
        #[source]
        source: ContextError,
    },
    /// A lookup task panicked or was cancelled.
    #[error("context lookup task failed: {0}")]
    Worker(#[from] JoinError),
}

/// Look up context for every matched address, at most `workers` at a time.
///
/// Each task returns its own address alongside the result, so completion
/// order does not matter. Records come back in address order. The first
/// failed lookup aborts the remaining tasks.
pub async fn enrich(
    matches: &MatchSet,
    provider: Arc<dyn ContextProvider>,
    workers: usize,
) -> Result<Vec<MatchRecord>, EnrichError> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for ip in matches.iter().copied() {
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => provider.lookup(&ip).await,
                Err(_) => Err(ContextError::Other("worker pool closed".to_string())),
            };
            (ip, result)
        });
    }

    let mut contexts = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (ip, result) = joined?;
        match result {
            Ok(context) => {
                debug!(ip = %ip, "Context received");
                contexts.insert(ip, context);
            }
            Err(source) => {
                tasks.abort_all();
                return Err(EnrichError::Lookup {
                    ip,
                    provider: provider.name().to_string(),
                    source,
                });
            }
        }
    }

    info!(records = contexts.len(), provider = provider.name(), "Enrichment complete");

    Ok(contexts
        .into_iter()
        .map(|(ip, context)| MatchRecord { ip, context })
        .collect())
}
