//! Data model shared by every component: the normalized request payload,
//! findings, sessions, turns, hypotheses, match results, cache entries, and
//! health-check configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Maximum number of entries allowed in `attemptedApproaches`/`stuckPoints`.
pub const MAX_NOTES: usize = 100;
/// Maximum length of a single note, in characters.
pub const MAX_NOTE_CHARS: usize = 2000;
/// Maximum number of `partialFindings` entries.
pub const MAX_FINDINGS: usize = 50;
/// Maximum length of a file path, in characters.
pub const MAX_PATH_CHARS: usize = 255;
/// Default analysis budget, in seconds, when the caller does not specify one.
pub const DEFAULT_ANALYSIS_BUDGET_SECS: u64 = 60;

/// One entry point into the code under analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryPoint {
    pub file: String,
    pub line: u32,
    #[serde(rename = "functionName", skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

/// The set of files and entry points an analysis is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FocusArea {
    pub files: Vec<String>,
    #[serde(rename = "entryPoints", default)]
    pub entry_points: Vec<EntryPoint>,
    #[serde(rename = "serviceNames", skip_serializing_if = "Option::is_none")]
    pub service_names: Option<Vec<String>>,
    #[serde(rename = "searchPatterns", skip_serializing_if = "Option::is_none")]
    pub search_patterns: Option<Vec<String>>,
}

/// Severity of a [`Finding`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single code location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    #[serde(rename = "functionName", skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

/// One finding carried in `partialFindings` or returned as part of an
/// [`AnalysisResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub location: Location,
    pub description: String,
    pub evidence: Vec<String>,
}

/// Checks a path against the path-safety rule: `..` anywhere, characters
/// outside `[A-Za-z0-9._/-]`, or a length over [`MAX_PATH_CHARS`] are all
/// rejected with [`Error::PathUnsafe`].
pub fn check_path_safe(path: &str) -> Result<()> {
    if path.len() > MAX_PATH_CHARS {
        return Err(Error::path_unsafe(path));
    }
    if path.split('/').any(|segment| segment == "..") || path.contains("..") {
        return Err(Error::path_unsafe(path));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/');
    if !path.chars().all(allowed) {
        return Err(Error::path_unsafe(path));
    }
    Ok(())
}

fn check_note(note: &str) -> Result<()> {
    if note.len() > MAX_NOTE_CHARS {
        return Err(Error::invalid_input(format!(
            "note exceeds {MAX_NOTE_CHARS} characters"
        )));
    }
    if note.contains(['<', '>', '{', '}']) {
        return Err(Error::invalid_input(
            "note must not contain angle brackets or braces",
        ));
    }
    Ok(())
}

/// The normalized request payload every analysis operates on.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisContext {
    #[serde(rename = "attemptedApproaches", default)]
    pub attempted_approaches: Vec<String>,
    #[serde(rename = "partialFindings", default)]
    pub partial_findings: Vec<Finding>,
    #[serde(rename = "stuckPoints", default)]
    pub stuck_points: Vec<String>,
    #[serde(rename = "focusArea", default)]
    pub focus_area: FocusArea,
    #[serde(rename = "analysisBudgetRemaining", default = "default_budget")]
    pub analysis_budget_remaining: u64,
}

fn default_budget() -> u64 {
    DEFAULT_ANALYSIS_BUDGET_SECS
}

impl AnalysisContext {
    /// Validates every field against the schema in the data model: lengths,
    /// path safety, and note content. Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.attempted_approaches.len() > MAX_NOTES {
            return Err(Error::invalid_input(format!(
                "attemptedApproaches exceeds {MAX_NOTES} entries"
            )));
        }
        for note in &self.attempted_approaches {
            check_note(note)?;
        }
        if self.stuck_points.len() > MAX_NOTES {
            return Err(Error::invalid_input(format!(
                "stuckPoints exceeds {MAX_NOTES} entries"
            )));
        }
        for note in &self.stuck_points {
            check_note(note)?;
        }
        if self.partial_findings.len() > MAX_FINDINGS {
            return Err(Error::invalid_input(format!(
                "partialFindings exceeds {MAX_FINDINGS} entries"
            )));
        }
        for file in &self.focus_area.files {
            check_path_safe(file)?;
        }
        for entry in &self.focus_area.entry_points {
            check_path_safe(&entry.file)?;
        }
        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.focus_area.files.len()
    }
}

/// The kind of analysis a caller is requesting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    ExecutionTrace,
    CrossSystem,
    Performance,
    HypothesisTest,
    QuickScan,
    DeepAnalysis,
}

/// A fully normalized request to the Router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub context: AnalysisContext,
    #[serde(rename = "analysisType")]
    pub analysis_type: AnalysisType,
    #[serde(rename = "depthLevel", default = "default_depth")]
    pub depth_level: u8,
    #[serde(rename = "timeBudgetSeconds", default = "default_budget")]
    pub time_budget_seconds: u64,
    #[serde(rename = "prioritizeSpeed", default)]
    pub prioritize_speed: bool,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

fn default_depth() -> u8 {
    1
}

impl AnalysisRequest {
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        if !(1..=5).contains(&self.depth_level) {
            return Err(Error::invalid_input("depthLevel must be in 1..=5"));
        }
        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.context.file_count()
    }
}

/// Status of a completed or partially completed analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Partial,
    Timeout,
    Error,
}

/// The grouped findings an [`AnalysisResult`] returns.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisFindings {
    #[serde(rename = "rootCauses", default)]
    pub root_causes: Vec<Finding>,
    #[serde(rename = "executionPaths", default)]
    pub execution_paths: Vec<String>,
    #[serde(rename = "performanceBottlenecks", default)]
    pub performance_bottlenecks: Vec<Finding>,
    #[serde(rename = "crossSystemImpacts", default)]
    pub cross_system_impacts: Vec<Finding>,
}

/// Bookkeeping metadata attached to every [`AnalysisResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisMetadata {
    pub strategy: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The result of running a [`crate::router::Strategy`] against an
/// [`AnalysisRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub status: AnalysisStatus,
    pub findings: AnalysisFindings,
    pub recommendations: Vec<String>,
    pub reasoning: String,
    pub metadata: AnalysisMetadata,
}

/// A session's lifecycle state. See the state machine in the component
/// design for the full set of legal transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Processing,
    Completing,
    Completed,
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Abandoned)
    }
}

/// Who produced a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Caller,
    Model,
    System,
}

/// A single message appended to a session's transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub id: String,
    pub role: TurnRole,
    #[serde(rename = "contentText")]
    pub content_text: String,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl ConversationTurn {
    pub fn new(id: impl Into<String>, role: TurnRole, content_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content_text: content_text.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            metadata: None,
        }
    }
}

/// Running progress tracked alongside a session's turns.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisProgress {
    #[serde(rename = "completedSteps", default)]
    pub completed_steps: Vec<String>,
    #[serde(rename = "pendingQuestions", default)]
    pub pending_questions: Vec<String>,
    #[serde(rename = "keyFindings", default)]
    pub key_findings: Vec<Finding>,
    #[serde(rename = "confidenceLevel", default)]
    pub confidence_level: f64,
}

/// A multi-turn analysis session, exclusively owned by the
/// `ConversationScheduler`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    #[serde(rename = "startTimeMs")]
    pub start_time_ms: i64,
    #[serde(rename = "lastActivityMs")]
    pub last_activity_ms: i64,
    pub context: AnalysisContext,
    pub turns: Vec<ConversationTurn>,
    #[serde(rename = "analysisProgress")]
    pub analysis_progress: AnalysisProgress,
    #[serde(rename = "providerHandle", skip_serializing_if = "Option::is_none")]
    pub provider_handle: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>, context: AnalysisContext) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            state: SessionState::Active,
            start_time_ms: now,
            last_activity_ms: now,
            context,
            turns: Vec::new(),
            analysis_progress: AnalysisProgress::default(),
            provider_handle: None,
        }
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - DateTime::from_timestamp_millis(self.last_activity_ms).unwrap_or(now)
    }
}

/// A caller-supplied candidate explanation entered into a tournament.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hypothesis {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: HypothesisType,
    /// Caller-supplied prior confidence, 1..=5.
    pub confidence: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisType {
    Bug,
    Performance,
    Behavior,
    Security,
}

impl Hypothesis {
    /// Maps the caller-supplied 1..=5 confidence onto the engine's internal
    /// `[20, 100]` likelihood scale.
    pub fn seed_likelihood(&self) -> f64 {
        let c = self.confidence.clamp(1, 5) as f64;
        20.0 + (c - 1.0) * 20.0
    }
}

/// The outcome of a single provider query about one hypothesis within one
/// tournament match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    #[serde(rename = "hypothesisId")]
    pub hypothesis_id: String,
    pub likelihood: f64,
    pub evidence: Vec<String>,
    #[serde(rename = "counterEvidence")]
    pub counter_evidence: Vec<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

/// A bounded key/value entry stored by the `ResultCache`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub inserted_at_ms: i64,
    pub last_accessed_ms: i64,
    pub access_count: u64,
    pub ttl_ms: u64,
    pub approx_bytes: usize,
}

/// The kind of a registered health check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    Functional,
    Resource,
    Dependency,
    Startup,
}

/// Outcome of a single health check invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Combines two statuses the way `HealthMonitor::aggregate` does:
    /// unhealthy dominates degraded dominates healthy.
    pub fn worse_of(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            (Unknown, _) | (_, Unknown) => Unknown,
            _ => Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_with_dotdot_is_rejected() {
        assert!(check_path_safe("../etc/passwd").is_err());
        assert!(check_path_safe("src/../../etc/passwd").is_err());
    }

    #[test]
    fn path_with_disallowed_chars_is_rejected() {
        assert!(check_path_safe("src/<evil>.rs").is_err());
    }

    #[test]
    fn safe_path_is_accepted() {
        assert!(check_path_safe("src/main.rs").is_ok());
        assert!(check_path_safe("a/b-c_d.2.rs").is_ok());
    }

    #[test]
    fn hypothesis_seed_likelihood_maps_1_to_5_onto_20_to_100() {
        let h = |c: u8| Hypothesis {
            id: "h".into(),
            description: "d".into(),
            kind: HypothesisType::Bug,
            confidence: c,
        };
        assert_eq!(h(1).seed_likelihood(), 20.0);
        assert_eq!(h(5).seed_likelihood(), 100.0);
        assert_eq!(h(3).seed_likelihood(), 60.0);
    }

    #[test]
    fn health_status_worse_of_unhealthy_dominates() {
        assert_eq!(
            HealthStatus::Healthy.worse_of(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Degraded.worse_of(HealthStatus::Healthy),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Healthy.worse_of(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn analysis_context_rejects_too_many_notes() {
        let mut ctx = AnalysisContext::default();
        ctx.attempted_approaches = vec!["x".to_string(); MAX_NOTES + 1];
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn analysis_context_rejects_note_with_braces() {
        let mut ctx = AnalysisContext::default();
        ctx.stuck_points = vec!["{evil}".to_string()];
        assert!(ctx.validate().is_err());
    }
}
