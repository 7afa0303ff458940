//! Router & Strategies — picks one [`Strategy`] (Deep vs Quick, and any
//! others registered) given an [`AnalysisRequest`]'s file count, time
//! budget, speed-priority flag, and analysis type.

mod strategies;

pub use strategies::{DeepStrategy, QuickStrategy};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::{derive_cache_key, ResultCache};
use crate::error::Error;
use crate::model::{AnalysisRequest, AnalysisResult, AnalysisType};
use crate::provider::ProviderGateway;

/// Resources a [`Strategy`] estimates it will consume for a given request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceEstimate {
    pub time_ms: u64,
    pub bytes: usize,
    pub confidence: f64,
}

/// A pluggable policy choosing how to satisfy one analysis request.
/// Strategies are discovered by the Router through a registration list, not
/// an inheritance hierarchy.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn supported_types(&self) -> &'static [AnalysisType];
    fn can_handle(&self, req: &AnalysisRequest) -> f64;
    fn estimate_resources(&self, req: &AnalysisRequest) -> ResourceEstimate;
    async fn run(&self, req: &AnalysisRequest, gateway: &ProviderGateway) -> crate::error::Result<AnalysisResult>;
}

/// Rolling per-(strategy, analysis type) metrics the Router uses to favor
/// strategies with a track record of success.
#[derive(Debug, Clone, Default)]
pub struct StrategyMetrics {
    pub execution_count: u64,
    pub success_count: u64,
    pub total_duration_ms: u64,
    pub total_confidence: f64,
}

impl StrategyMetrics {
    pub fn avg_duration_ms(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.execution_count as f64
        }
    }

    pub fn avg_confidence(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_confidence / self.execution_count as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.execution_count as f64
        }
    }

    fn record(&mut self, duration_ms: u64, confidence: f64, success: bool) {
        self.execution_count += 1;
        self.total_duration_ms += duration_ms;
        self.total_confidence += confidence;
        if success {
            self.success_count += 1;
        }
    }
}

/// The minimum combined score a fallback strategy must have to be retried
/// on a transient provider failure.
const FALLBACK_MIN_SCORE: f64 = 0.5;
/// Weight given to historical success rate when scoring a strategy.
const HISTORY_WEIGHT: f64 = 0.1;

/// Scores and selects among registered [`Strategy`] implementations, and
/// retries once on a transient provider failure.
pub struct Router {
    strategies: Vec<Arc<dyn Strategy>>,
    metrics: RwLock<HashMap<(&'static str, &'static str), StrategyMetrics>>,
    cache: Option<Arc<ResultCache>>,
}

fn analysis_type_key(t: AnalysisType) -> &'static str {
    match t {
        AnalysisType::ExecutionTrace => "execution_trace",
        AnalysisType::CrossSystem => "cross_system",
        AnalysisType::Performance => "performance",
        AnalysisType::HypothesisTest => "hypothesis_test",
        AnalysisType::QuickScan => "quick_scan",
        AnalysisType::DeepAnalysis => "deep_analysis",
    }
}

impl Router {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self {
            strategies,
            metrics: RwLock::new(HashMap::new()),
            cache: None,
        }
    }

    /// The default router wired with [`DeepStrategy`] and [`QuickStrategy`].
    pub fn with_default_strategies() -> Self {
        Self::new(vec![
            Arc::new(DeepStrategy::default()),
            Arc::new(QuickStrategy::default()),
        ])
    }

    /// Attaches a [`ResultCache`] so [`Router::route_and_run`] can skip a
    /// strategy run entirely on a cache hit, and populate the cache on a
    /// successful miss. Without a cache every request is run fresh.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn cache_key(req: &AnalysisRequest, strategy_name: &str) -> String {
        let options = serde_json::json!({
            "analysisType": analysis_type_key(req.analysis_type),
            "depthLevel": req.depth_level,
            "prioritizeSpeed": req.prioritize_speed,
        });
        derive_cache_key(
            strategy_name,
            &req.context.focus_area.files,
            &req.context.stuck_points.join("\n"),
            &options,
        )
    }

    async fn score(&self, strategy: &Arc<dyn Strategy>, req: &AnalysisRequest) -> f64 {
        let base = strategy.can_handle(req);
        let key = (strategy.name(), analysis_type_key(req.analysis_type));
        let bonus = self
            .metrics
            .read()
            .await
            .get(&key)
            .map(|m| m.success_rate())
            .unwrap_or(0.0)
            * HISTORY_WEIGHT;
        (base + bonus).min(1.0)
    }

    /// Scores every registered strategy against `req` and returns them
    /// ranked highest-score-first, with ties broken by lexicographic
    /// strategy name.
    async fn ranked(&self, req: &AnalysisRequest) -> Vec<(Arc<dyn Strategy>, f64)> {
        let mut scored = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let score = self.score(strategy, req).await;
            scored.push((Arc::clone(strategy), score));
        }
        scored.sort_by(|(sa, a), (sb, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| sa.name().cmp(sb.name()))
        });
        scored
    }

    /// Picks the top-scoring strategy and runs it. On a `ProviderTransient`
    /// failure, retries once on the next-best strategy whose score is at
    /// least [`FALLBACK_MIN_SCORE`]; otherwise the error is surfaced.
    pub async fn route_and_run(
        &self,
        req: &AnalysisRequest,
        gateway: &ProviderGateway,
    ) -> crate::error::Result<AnalysisResult> {
        let ranked = self.ranked(req).await;
        let (primary, _) = ranked
            .first()
            .cloned()
            .ok_or_else(|| Error::internal("no strategies registered"))?;

        let cache_key = self.cache.as_ref().map(|_| Self::cache_key(req, primary.name()));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(cached) = cache.get(key).await {
                if let Ok(result) = serde_json::from_value::<AnalysisResult>(cached) {
                    return Ok(result);
                }
            }
        }

        let started = std::time::Instant::now();
        match primary.run(req, gateway).await {
            Ok(result) => {
                self.record(primary.name(), req.analysis_type, started.elapsed().as_millis() as u64, result.metadata.confidence, true)
                    .await;
                if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                    if let Ok(value) = serde_json::to_value(&result) {
                        cache.set(key.clone(), value, None).await;
                    }
                }
                Ok(result)
            }
            Err(err) if err.is_locally_retryable() => {
                self.record(primary.name(), req.analysis_type, started.elapsed().as_millis() as u64, 0.0, false)
                    .await;
                let fallback = ranked
                    .iter()
                    .skip(1)
                    .find(|(_, score)| *score >= FALLBACK_MIN_SCORE);
                match fallback {
                    Some((strategy, _)) => {
                        let started = std::time::Instant::now();
                        let result = strategy.run(req, gateway).await;
                        let success = result.is_ok();
                        let confidence = result.as_ref().map(|r| r.metadata.confidence).unwrap_or(0.0);
                        self.record(strategy.name(), req.analysis_type, started.elapsed().as_millis() as u64, confidence, success)
                            .await;
                        result
                    }
                    None => Err(err),
                }
            }
            Err(err) => {
                self.record(primary.name(), req.analysis_type, started.elapsed().as_millis() as u64, 0.0, false)
                    .await;
                Err(err)
            }
        }
    }

    /// Returns just the selected strategy's name, for callers (tests,
    /// tooling) that only want to know which strategy would be chosen.
    pub async fn select(&self, req: &AnalysisRequest) -> Option<&'static str> {
        self.ranked(req).await.first().map(|(s, _)| s.name())
    }

    async fn record(
        &self,
        strategy_name: &'static str,
        analysis_type: AnalysisType,
        duration_ms: u64,
        confidence: f64,
        success: bool,
    ) {
        let key = (strategy_name, analysis_type_key(analysis_type));
        self.metrics
            .write()
            .await
            .entry(key)
            .or_default()
            .record(duration_ms, confidence, success);
    }

    pub async fn metrics_for(
        &self,
        strategy_name: &'static str,
        analysis_type: AnalysisType,
    ) -> StrategyMetrics {
        self.metrics
            .read()
            .await
            .get(&(strategy_name, analysis_type_key(analysis_type)))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisContext, FocusArea};

    fn req(analysis_type: AnalysisType, time_budget: u64, prioritize_speed: bool, file_count: usize) -> AnalysisRequest {
        AnalysisRequest {
            context: AnalysisContext {
                focus_area: FocusArea {
                    files: (0..file_count).map(|i| format!("f{i}.rs")).collect(),
                    ..Default::default()
                },
                ..Default::default()
            },
            analysis_type,
            depth_level: 1,
            time_budget_seconds: time_budget,
            prioritize_speed,
            correlation_id: "corr".into(),
        }
    }

    #[tokio::test]
    async fn quick_strategy_wins_when_prioritizing_speed() {
        let router = Router::with_default_strategies();
        let r = req(AnalysisType::DeepAnalysis, 5, true, 1);
        assert_eq!(router.select(&r).await, Some("quick"));
    }

    #[tokio::test]
    async fn deep_strategy_wins_for_large_budget_deep_analysis() {
        let router = Router::with_default_strategies();
        let r = req(AnalysisType::DeepAnalysis, 60, false, 5);
        assert_eq!(router.select(&r).await, Some("deep"));
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        use crate::cache::{CacheConfig, ResultCache};
        use crate::provider::{CompletionOptions, ConverseReply, Provider, ProviderGateway};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingProvider {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Provider for CountingProvider {
            fn name(&self) -> &str {
                "stub"
            }
            async fn available(&self) -> bool {
                true
            }
            async fn complete(&self, _prompt: &str, _options: CompletionOptions) -> crate::error::Result<String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok("reasoning".into())
            }
            async fn converse(
                &self,
                handle: Option<&str>,
                message: &str,
                _options: CompletionOptions,
            ) -> crate::error::Result<ConverseReply> {
                Ok(ConverseReply {
                    handle: handle.unwrap_or("h").into(),
                    reply: message.into(),
                })
            }
        }

        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let router = Router::with_default_strategies().with_cache(Arc::clone(&cache));
        let gateway = ProviderGateway::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_factory = Arc::clone(&calls);
        gateway
            .register_provider(
                "stub",
                Arc::new(move |_cred: &str| {
                    Arc::new(CountingProvider {
                        calls: Arc::clone(&calls_for_factory),
                    }) as Arc<dyn Provider>
                }),
            )
            .await;
        gateway.set_credential("stub", "secret", None).await.unwrap();

        let r = req(AnalysisType::QuickScan, 5, true, 1);

        let first = router.route_and_run(&r, &gateway).await.unwrap();
        assert_eq!(cache.stats().await.misses, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = router.route_and_run(&r, &gateway).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(cache.stats().await.hits, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_bonus_favors_strategy_with_track_record() {
        let router = Router::with_default_strategies();
        router
            .record("quick", AnalysisType::Performance, 10, 0.8, true)
            .await;
        let metrics = router.metrics_for("quick", AnalysisType::Performance).await;
        assert_eq!(metrics.execution_count, 1);
        assert_eq!(metrics.success_rate(), 1.0);
    }
}
