//! `TournamentEngine` — runs bracketed elimination over N competing
//! hypotheses in parallel batches, subject to a global concurrency cap and
//! a per-match time budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

use crate::error::{Error, Result};
use crate::model::{AnalysisStatus, Hypothesis, MatchResult};
use crate::provider::{CompletionOptions, ProviderGateway};

pub const MIN_HYPOTHESES: usize = 2;
pub const MAX_HYPOTHESES: usize = 10;
const DEFAULT_MAX_PARALLEL: usize = 3;
const DEFAULT_PER_MATCH_TIMEOUT_SEC: u64 = 30;

/// Caller-configurable tournament settings.
#[derive(Debug, Clone, Copy)]
pub struct TournamentConfig {
    pub max_parallel: usize,
    pub per_match_timeout_sec: u64,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            per_match_timeout_sec: DEFAULT_PER_MATCH_TIMEOUT_SEC,
        }
    }
}

impl TournamentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.max_parallel) {
            return Err(Error::invalid_input("maxParallel must be in 1..=5"));
        }
        if !(10..=120).contains(&self.per_match_timeout_sec) {
            return Err(Error::invalid_input("perMatchTimeoutSec must be in 10..=120"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct HypothesisState {
    hypothesis: Hypothesis,
    cumulative_likelihood: f64,
    evidence_weight: f64,
    evidence: Vec<String>,
    counter_evidence: Vec<String>,
    alive: bool,
}

impl HypothesisState {
    fn new(hypothesis: Hypothesis) -> Self {
        let seed = hypothesis.seed_likelihood();
        Self {
            hypothesis,
            cumulative_likelihood: seed,
            evidence_weight: 0.0,
            evidence: Vec::new(),
            counter_evidence: Vec::new(),
            alive: true,
        }
    }

    /// Folds one match's result into the running cumulative likelihood as a
    /// weighted average, weights proportional to evidence count (a result
    /// with no evidence still counts with weight 1 so it isn't discarded).
    fn apply(&mut self, result: &MatchResult) {
        let weight = result.evidence.len().max(1) as f64;
        let total_weight = self.evidence_weight + weight;
        self.cumulative_likelihood =
            (self.cumulative_likelihood * self.evidence_weight + result.likelihood * weight) / total_weight;
        self.evidence_weight = total_weight;
        self.evidence.extend(result.evidence.iter().cloned());
        self.counter_evidence
            .extend(result.counter_evidence.iter().cloned());
    }
}

/// One hypothesis's place in the final ranking.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RankedHypothesis {
    pub hypothesis: Hypothesis,
    pub likelihood: f64,
    pub evidence: Vec<String>,
    pub counter_evidence: Vec<String>,
}

/// The outcome of a completed (or deadline-truncated) tournament.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TournamentOutcome {
    pub status: AnalysisStatus,
    pub ranking: Vec<RankedHypothesis>,
    pub winner_id: String,
    pub recommendation: String,
}

/// Computes how many elimination rounds `n` hypotheses need to converge to
/// one survivor, eliminating `ceil(k/2)` of the `k` alive each round.
fn planned_rounds(n: usize) -> usize {
    let mut k = n;
    let mut rounds = 0;
    while k > 1 {
        k /= 2;
        rounds += 1;
    }
    rounds
}

/// Orders two hypotheses by the tie-break rule: higher final likelihood
/// wins; ties broken by higher initial confidence, then lexicographic id.
fn ranking_order(a: &HypothesisState, b: &HypothesisState) -> std::cmp::Ordering {
    b.cumulative_likelihood
        .partial_cmp(&a.cumulative_likelihood)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.hypothesis.confidence.cmp(&a.hypothesis.confidence))
        .then_with(|| a.hypothesis.id.cmp(&b.hypothesis.id))
}

pub struct TournamentEngine {
    gateway: Arc<ProviderGateway>,
}

impl TournamentEngine {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(
        &self,
        hypotheses: Vec<Hypothesis>,
        test_scope: String,
        config: TournamentConfig,
    ) -> Result<TournamentOutcome> {
        if !(MIN_HYPOTHESES..=MAX_HYPOTHESES).contains(&hypotheses.len()) {
            return Err(Error::invalid_input(format!(
                "tournament requires {MIN_HYPOTHESES}..={MAX_HYPOTHESES} hypotheses"
            )));
        }
        config.validate()?;

        let n = hypotheses.len();
        let state: Arc<RwLock<HashMap<String, HypothesisState>>> = Arc::new(RwLock::new(
            hypotheses
                .into_iter()
                .map(|h| (h.id.clone(), HypothesisState::new(h)))
                .collect(),
        ));

        let total_deadline = Duration::from_secs(config.per_match_timeout_sec * planned_rounds(n) as u64);
        let gateway = Arc::clone(&self.gateway);
        let rounds_future = Self::run_rounds(gateway, Arc::clone(&state), test_scope, config);

        let timed_out = tokio::time::timeout(total_deadline, rounds_future)
            .await
            .is_err();

        let state = state.read().await;
        let mut ordered: Vec<&HypothesisState> = state.values().collect();
        ordered.sort_by(|a, b| ranking_order(a, b));

        let ranking: Vec<RankedHypothesis> = ordered
            .iter()
            .map(|s| RankedHypothesis {
                hypothesis: s.hypothesis.clone(),
                likelihood: s.cumulative_likelihood,
                evidence: s.evidence.clone(),
                counter_evidence: s.counter_evidence.clone(),
            })
            .collect();

        let winner = ranking.first().ok_or_else(|| Error::internal("tournament produced no ranking"))?;
        let recommendation = format!(
            "{} is the most likely explanation, at {:.0}% likelihood",
            winner.hypothesis.description, winner.likelihood
        );
        let winner_id = winner.hypothesis.id.clone();

        let status = if timed_out {
            AnalysisStatus::Partial
        } else {
            AnalysisStatus::Success
        };

        Ok(TournamentOutcome {
            status,
            ranking,
            winner_id,
            recommendation,
        })
    }

    async fn run_rounds(
        gateway: Arc<ProviderGateway>,
        state: Arc<RwLock<HashMap<String, HypothesisState>>>,
        test_scope: String,
        config: TournamentConfig,
    ) {
        loop {
            let alive_ids: Vec<String> = {
                let state = state.read().await;
                let mut ids: Vec<String> = state
                    .values()
                    .filter(|s| s.alive)
                    .map(|s| s.hypothesis.id.clone())
                    .collect();
                ids.sort();
                ids
            };
            if alive_ids.len() <= 1 {
                return;
            }

            let matches: Vec<Vec<String>> = alive_ids
                .chunks(config.max_parallel)
                .map(|chunk| chunk.to_vec())
                .collect();

            let semaphore = Arc::new(Semaphore::new(config.max_parallel));
            let tasks = matches.into_iter().map(|match_ids| {
                let gateway = Arc::clone(&gateway);
                let state = Arc::clone(&state);
                let semaphore = Arc::clone(&semaphore);
                let test_scope = test_scope.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    Self::run_match(gateway, state, match_ids, test_scope, config).await;
                }
            });
            futures::future::join_all(tasks).await;

            let k = alive_ids.len();
            let eliminate_count = k.div_ceil(2);
            let mut ranked_ids = alive_ids.clone();
            {
                let state = state.read().await;
                ranked_ids.sort_by(|a, b| {
                    let sa = &state[a];
                    let sb = &state[b];
                    ranking_order(sa, sb)
                });
            }
            let to_eliminate = &ranked_ids[ranked_ids.len().saturating_sub(eliminate_count)..];
            let mut state = state.write().await;
            for id in to_eliminate {
                if let Some(s) = state.get_mut(id) {
                    s.alive = false;
                }
            }
        }
    }

    async fn run_match(
        gateway: Arc<ProviderGateway>,
        state: Arc<RwLock<HashMap<String, HypothesisState>>>,
        match_ids: Vec<String>,
        test_scope: String,
        config: TournamentConfig,
    ) {
        let started = std::time::Instant::now();
        let provider = match gateway.any_available().await {
            Some(p) => p,
            None => {
                Self::record_zero_likelihood(&state, &match_ids, started.elapsed().as_millis() as u64).await;
                return;
            }
        };

        let prompt = format!(
            "Evaluate hypotheses {:?} against test scope: {test_scope}. Respond with a JSON array of {{hypothesisId, likelihood, evidence, counterEvidence}}.",
            match_ids
        );
        let timeout = Duration::from_secs(config.per_match_timeout_sec);
        let call = gateway.complete(
            &provider,
            &prompt,
            CompletionOptions {
                timeout_ms: Some(config.per_match_timeout_sec * 1000),
                ..Default::default()
            },
        );

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let results = parse_match_response(&response, &match_ids, duration_ms);
                let mut state = state.write().await;
                for result in results {
                    if let Some(s) = state.get_mut(&result.hypothesis_id) {
                        s.apply(&result);
                    }
                }
            }
            Ok(Err(_)) | Err(_) => {
                // Provider error or per-match timeout: recorded as a
                // partial, non-fatal zero-likelihood result for this match.
                Self::record_zero_likelihood(&state, &match_ids, started.elapsed().as_millis() as u64).await;
            }
        }
    }

    async fn record_zero_likelihood(
        state: &Arc<RwLock<HashMap<String, HypothesisState>>>,
        match_ids: &[String],
        duration_ms: u64,
    ) {
        let mut state = state.write().await;
        for id in match_ids {
            if let Some(s) = state.get_mut(id) {
                s.apply(&MatchResult {
                    hypothesis_id: id.clone(),
                    likelihood: 0.0,
                    evidence: Vec::new(),
                    counter_evidence: Vec::new(),
                    duration_ms,
                });
            }
        }
    }
}

/// Parses a provider's JSON response into one [`MatchResult`] per
/// hypothesis in the match. Any hypothesis missing from the response (or a
/// response that fails to parse at all) falls back to a zero-likelihood
/// result for that hypothesis, rather than failing the whole match.
fn parse_match_response(response: &str, match_ids: &[String], duration_ms: u64) -> Vec<MatchResult> {
    #[derive(serde::Deserialize)]
    struct RawResult {
        #[serde(rename = "hypothesisId")]
        hypothesis_id: String,
        likelihood: f64,
        #[serde(default)]
        evidence: Vec<String>,
        #[serde(rename = "counterEvidence", default)]
        counter_evidence: Vec<String>,
    }

    let parsed: Vec<RawResult> = serde_json::from_str(response).unwrap_or_default();
    let mut by_id: HashMap<String, RawResult> =
        parsed.into_iter().map(|r| (r.hypothesis_id.clone(), r)).collect();

    match_ids
        .iter()
        .map(|id| match by_id.remove(id) {
            Some(r) => MatchResult {
                hypothesis_id: id.clone(),
                likelihood: r.likelihood,
                evidence: r.evidence,
                counter_evidence: r.counter_evidence,
                duration_ms,
            },
            None => MatchResult {
                hypothesis_id: id.clone(),
                likelihood: 0.0,
                evidence: Vec::new(),
                counter_evidence: Vec::new(),
                duration_ms,
            },
        })
        .collect()
}
