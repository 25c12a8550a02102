//! Query service: validates step lists, reads store snapshots with retry, reuses cached work
//! at the current version and bounds every query by the configured timeout.

mod cache;
mod pool;
mod retry;

pub use cache::{CacheStats, QueryCache};
pub use pool::TrainingPool;
pub use retry::RetryPolicy;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::NewEvent;
use crate::features::FeatureExtractor;
use crate::funnel::{rollup, FunnelDefinition, FunnelResult, ProgressPass};
use crate::model::{SuggestionResult, Suggester};
use crate::storage::{AppendReport, EventStore, Snapshot};
use chrono::{SecondsFormat, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct QueryService {
    store: Arc<dyn EventStore>,
    cache: QueryCache,
    pool: TrainingPool,
    extractor: Arc<FeatureExtractor>,
    suggester: Arc<Suggester>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl QueryService {
    pub fn new(store: Arc<dyn EventStore>, config: &EngineConfig) -> Result<Self> {
        let pool = TrainingPool::new(config.workers.resolved_threads())?;
        info!(
            training_threads = pool.threads(),
            timeout_ms = config.query.timeout_ms,
            "query service ready"
        );
        Ok(Self {
            store,
            cache: QueryCache::new(config.query.cache_capacity),
            pool,
            extractor: Arc::new(FeatureExtractor::new(config.features.clone())),
            suggester: Arc::new(Suggester::new(config.model.clone())),
            retry: RetryPolicy::from(&config.query.retry),
            timeout: Duration::from_millis(config.query.timeout_ms),
        })
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current store version and number of readable events.
    pub async fn status(&self) -> Result<(u64, usize)> {
        let snapshot = self.snapshot().await?;
        Ok((snapshot.version(), snapshot.len()))
    }

    /// Funnel counts for a comma-separated step list.
    pub async fn funnel(&self, raw_steps: &str) -> Result<Arc<FunnelResult>> {
        let def = FunnelDefinition::parse(raw_steps)?;
        self.within(self.funnel_for(&def)).await
    }

    /// Ranked features predicting conversion through a comma-separated step list.
    pub async fn suggestions(&self, raw_steps: &str) -> Result<Arc<SuggestionResult>> {
        let def = FunnelDefinition::parse(raw_steps)?;
        self.within(self.suggestions_for(&def)).await
    }

    /// Append a batch once. Records without a user or event name are rejected as a whole;
    /// a missing timestamp is stamped with the current time.
    pub async fn ingest(&self, mut batch: Vec<NewEvent>) -> Result<AppendReport> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for (i, ev) in batch.iter_mut().enumerate() {
            if blank(ev.user_id.as_deref()) {
                return Err(EngineError::Validation(format!("event {i}: user_id is required")));
            }
            if blank(ev.event.as_deref()) {
                return Err(EngineError::Validation(format!("event {i}: event is required")));
            }
            if ev.timestamp.is_none() {
                ev.timestamp = Some(now.clone());
            }
        }

        // Not retried: the batch may have committed before the error surfaced.
        let store = Arc::clone(&self.store);
        let report = blocking(move || store.append(batch)).await??;
        let pruned = self.cache.prune(report.version);
        info!(
            inserted = report.inserted,
            version = report.version,
            pruned,
            "events ingested"
        );
        Ok(report)
    }

    async fn within<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(out) => out,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "query timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }

    async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.retry
            .run("snapshot", || {
                let store = Arc::clone(&self.store);
                async move { blocking(move || store.snapshot()).await.and_then(|r| r) }
            })
            .await
    }

    async fn progress(
        &self,
        def: &FunnelDefinition,
        snapshot: Arc<Snapshot>,
    ) -> Result<Arc<ProgressPass>> {
        if let Some(pass) = self.cache.progress(def, snapshot.version()) {
            return Ok(pass);
        }
        let owned = def.clone();
        let pass = Arc::new(blocking(move || ProgressPass::compute(&owned, snapshot)).await?);
        if pass.snapshot.skipped() > 0 {
            warn!(
                steps = %def,
                skipped = pass.snapshot.skipped(),
                "corrupt records skipped"
            );
        }
        self.cache.put_progress(def, Arc::clone(&pass));
        Ok(pass)
    }

    async fn funnel_for(&self, def: &FunnelDefinition) -> Result<Arc<FunnelResult>> {
        let snapshot = self.snapshot().await?;
        let version = snapshot.version();
        if let Some(hit) = self.cache.funnel(def, version) {
            debug!(steps = %def, version, "funnel cache hit");
            return Ok(hit);
        }
        let pass = self.progress(def, snapshot).await?;
        let result = Arc::new(blocking(move || rollup(&pass)).await?);
        self.cache.put_funnel(def, version, Arc::clone(&result));
        info!(
            steps = %def,
            version,
            users = result.total_users,
            "funnel computed"
        );
        Ok(result)
    }

    async fn suggestions_for(&self, def: &FunnelDefinition) -> Result<Arc<SuggestionResult>> {
        let snapshot = self.snapshot().await?;
        let version = snapshot.version();
        if let Some(hit) = self.cache.suggestions(def, version) {
            debug!(steps = %def, version, "suggestions cache hit");
            return hit;
        }
        let pass = self.progress(def, snapshot).await?;
        let extractor = Arc::clone(&self.extractor);
        let suggester = Arc::clone(&self.suggester);
        let outcome = self
            .pool
            .run(move || {
                let extraction = extractor.extract(&pass);
                if extraction.dropped_values > 0 {
                    debug!(dropped = extraction.dropped_values, "non-numeric properties ignored");
                }
                suggester.suggest(&extraction.vectors).map(Arc::new)
            })
            .await?;
        match &outcome {
            Ok(_) | Err(EngineError::InsufficientData(_)) | Err(EngineError::NoFeatures) => {
                self.cache.put_suggestions(def, version, outcome.clone());
            }
            Err(_) => {}
        }
        outcome
    }
}

fn blank(s: Option<&str>) -> bool {
    s.map_or(true, |s| s.trim().is_empty())
}

/// Run CPU-bound or blocking work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Internal(format!("worker failed: {e}")))
}
