//! The two default strategies the Router ships with.

use std::time::Duration;

use async_trait::async_trait;

use super::{ResourceEstimate, Strategy};
use crate::error::Result;
use crate::model::{
    AnalysisFindings, AnalysisMetadata, AnalysisRequest, AnalysisResult, AnalysisStatus,
    AnalysisType,
};
use crate::provider::{CompletionOptions, ProviderGateway};

/// A result timed out against `req.time_budget_seconds`: `Success` carries
/// the completion's reasoning, `Timeout` discards whatever was in flight.
fn timeout_result(
    outcome: std::result::Result<std::result::Result<String, crate::error::Error>, tokio::time::error::Elapsed>,
    strategy: &'static str,
    default_confidence: f64,
    started: std::time::Instant,
) -> Result<AnalysisResult> {
    match outcome {
        Ok(inner) => {
            let reasoning = inner?;
            Ok(AnalysisResult {
                status: AnalysisStatus::Success,
                findings: AnalysisFindings::default(),
                recommendations: Vec::new(),
                reasoning,
                metadata: AnalysisMetadata {
                    strategy: strategy.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    confidence: default_confidence,
                    reason: None,
                },
            })
        }
        Err(_) => Ok(AnalysisResult {
            status: AnalysisStatus::Timeout,
            findings: AnalysisFindings::default(),
            recommendations: Vec::new(),
            reasoning: String::new(),
            metadata: AnalysisMetadata {
                strategy: strategy.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                confidence: 0.0,
                reason: Some("provider call exceeded timeBudgetSeconds".to_string()),
            },
        }),
    }
}

const DEEP_MIN_TIME_BUDGET_SECS: u64 = 30;
const DEEP_MAX_FILE_COUNT: usize = 50;
const DEEP_DEFAULT_CONFIDENCE: f64 = 0.9;

const QUICK_MIN_TIME_BUDGET_SECS: u64 = 5;
const QUICK_MAX_FILE_COUNT: usize = 10;
const QUICK_DEFAULT_CONFIDENCE: f64 = 0.7;

/// A thorough single-pass analysis over the full focus area. Scores highest
/// when the caller has a generous time budget, a modest file count, and has
/// not asked to prioritize speed.
#[derive(Default)]
pub struct DeepStrategy;

#[async_trait]
impl Strategy for DeepStrategy {
    fn name(&self) -> &'static str {
        "deep"
    }

    fn supported_types(&self) -> &'static [AnalysisType] {
        &[AnalysisType::DeepAnalysis, AnalysisType::CrossSystem]
    }

    fn can_handle(&self, req: &AnalysisRequest) -> f64 {
        let file_count = req.file_count();
        let matches_type = matches!(
            req.analysis_type,
            AnalysisType::DeepAnalysis | AnalysisType::CrossSystem
        );
        if matches_type
            && req.time_budget_seconds >= DEEP_MIN_TIME_BUDGET_SECS
            && file_count <= DEEP_MAX_FILE_COUNT
            && !req.prioritize_speed
        {
            0.9
        } else if req.prioritize_speed {
            0.4
        } else if file_count > DEEP_MAX_FILE_COUNT {
            0.2
        } else if req.time_budget_seconds < DEEP_MIN_TIME_BUDGET_SECS {
            0.3
        } else {
            0.5
        }
    }

    fn estimate_resources(&self, req: &AnalysisRequest) -> ResourceEstimate {
        ResourceEstimate {
            time_ms: req.time_budget_seconds.saturating_mul(1000),
            bytes: req.file_count().saturating_mul(4096),
            confidence: DEEP_DEFAULT_CONFIDENCE,
        }
    }

    async fn run(&self, req: &AnalysisRequest, gateway: &ProviderGateway) -> Result<AnalysisResult> {
        let started = std::time::Instant::now();
        let provider = gateway
            .any_available()
            .await
            .ok_or_else(|| crate::error::Error::provider_unavailable("no provider armed for deep analysis"))?;

        let prompt = format!(
            "Deep analysis over {} file(s), focus: {:?}, stuck points: {:?}",
            req.file_count(),
            req.context.focus_area.files,
            req.context.stuck_points,
        );
        let call = gateway.complete(
            &provider,
            &prompt,
            CompletionOptions {
                timeout_ms: Some(req.time_budget_seconds * 1000),
                ..Default::default()
            },
        );
        let outcome = tokio::time::timeout(Duration::from_secs(req.time_budget_seconds), call).await;

        timeout_result(outcome, self.name(), DEEP_DEFAULT_CONFIDENCE, started)
    }
}

/// A fast, narrow pass over at most the first ten focus files. Scores
/// highest when the caller explicitly prioritizes speed or has a short time
/// budget.
#[derive(Default)]
pub struct QuickStrategy;

#[async_trait]
impl Strategy for QuickStrategy {
    fn name(&self) -> &'static str {
        "quick"
    }

    fn supported_types(&self) -> &'static [AnalysisType] {
        &[AnalysisType::QuickScan, AnalysisType::ExecutionTrace]
    }

    fn can_handle(&self, req: &AnalysisRequest) -> f64 {
        let file_count = req.file_count();
        if req.prioritize_speed {
            0.9
        } else if req.time_budget_seconds <= QUICK_MIN_TIME_BUDGET_SECS * 2 {
            0.8
        } else if file_count > QUICK_MAX_FILE_COUNT {
            0.1
        } else {
            0.3
        }
    }

    fn estimate_resources(&self, req: &AnalysisRequest) -> ResourceEstimate {
        ResourceEstimate {
            time_ms: QUICK_MIN_TIME_BUDGET_SECS * 1000,
            bytes: req.file_count().min(QUICK_MAX_FILE_COUNT).saturating_mul(4096),
            confidence: QUICK_DEFAULT_CONFIDENCE,
        }
    }

    async fn run(&self, req: &AnalysisRequest, gateway: &ProviderGateway) -> Result<AnalysisResult> {
        let started = std::time::Instant::now();
        let provider = gateway
            .any_available()
            .await
            .ok_or_else(|| crate::error::Error::provider_unavailable("no provider armed for quick scan"))?;

        let truncated: Vec<&String> = req
            .context
            .focus_area
            .files
            .iter()
            .take(QUICK_MAX_FILE_COUNT)
            .collect();
        let prompt = format!("Quick scan over {} file(s)", truncated.len());
        let call = gateway.complete(
            &provider,
            &prompt,
            CompletionOptions {
                timeout_ms: Some(QUICK_MIN_TIME_BUDGET_SECS * 1000),
                ..Default::default()
            },
        );
        let outcome = tokio::time::timeout(Duration::from_secs(req.time_budget_seconds), call).await;

        timeout_result(outcome, self.name(), QUICK_DEFAULT_CONFIDENCE, started)
    }
}
