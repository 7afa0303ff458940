//! `ToolDispatcher` — the external tool surface. Decodes the JSON envelope
//! for each of the twelve named tools, translates snake_case external field
//! names to the internal camelCase shape, validates, assigns a
//! `correlationId` if absent, and routes to the appropriate component.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::health::HealthMonitor;
use crate::model::{
    AnalysisContext, AnalysisRequest, AnalysisType, EntryPoint, FocusArea, Hypothesis,
};
use crate::provider::ProviderGateway;
use crate::router::Router;
use crate::scheduler::{ConversationScheduler, SummaryFormat};
use crate::tournament::{TournamentConfig, TournamentEngine};

/// A value that is, externally, either a single item or a sequence —
/// `stuck_description` is accepted as a bare string and always produced as
/// one when the internal sequence has exactly one element.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    #[default]
    None,
    One(T),
    Many(Vec<T>),
}

impl OneOrMany<String> {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::None => Vec::new(),
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }

    fn from_vec(mut v: Vec<String>) -> Self {
        match v.len() {
            0 => OneOrMany::None,
            1 => OneOrMany::One(v.pop().unwrap()),
            _ => OneOrMany::Many(v),
        }
    }
}

/// The external (snake_case) shape of [`EntryPoint`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalEntryPoint {
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(rename = "function_name", skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl From<&ExternalEntryPoint> for EntryPoint {
    fn from(e: &ExternalEntryPoint) -> Self {
        EntryPoint {
            file: e.file.clone(),
            line: e.line,
            function_name: e.function_name.clone(),
        }
    }
}

impl From<&EntryPoint> for ExternalEntryPoint {
    fn from(e: &EntryPoint) -> Self {
        ExternalEntryPoint {
            file: e.file.clone(),
            line: e.line,
            function_name: e.function_name.clone(),
        }
    }
}

/// The external (snake_case) shape of [`FocusArea`], reached via
/// `code_scope`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalFocusArea {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(rename = "entry_points", default)]
    pub entry_points: Vec<ExternalEntryPoint>,
    #[serde(rename = "service_names", skip_serializing_if = "Option::is_none")]
    pub service_names: Option<Vec<String>>,
    #[serde(rename = "search_patterns", skip_serializing_if = "Option::is_none")]
    pub search_patterns: Option<Vec<String>>,
}

impl From<&ExternalFocusArea> for FocusArea {
    fn from(f: &ExternalFocusArea) -> Self {
        FocusArea {
            files: f.files.clone(),
            entry_points: f.entry_points.iter().map(EntryPoint::from).collect(),
            service_names: f.service_names.clone(),
            search_patterns: f.search_patterns.clone(),
        }
    }
}

impl From<&FocusArea> for ExternalFocusArea {
    fn from(f: &FocusArea) -> Self {
        ExternalFocusArea {
            files: f.files.clone(),
            entry_points: f.entry_points.iter().map(ExternalEntryPoint::from).collect(),
            service_names: f.service_names.clone(),
            search_patterns: f.search_patterns.clone(),
        }
    }
}

/// The external (snake_case) shape of [`AnalysisContext`] — the field names
/// and shapes `ToolDispatcher` translates per the component design:
/// `attempted_approaches`, `partial_findings`, `stuck_description`
/// (single-string-or-sequence), `code_scope`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAnalysisContext {
    #[serde(rename = "attempted_approaches", default)]
    pub attempted_approaches: Vec<String>,
    #[serde(rename = "partial_findings", default)]
    pub partial_findings: Vec<crate::model::Finding>,
    #[serde(rename = "stuck_description", default)]
    pub stuck_description: OneOrMany<String>,
    #[serde(rename = "code_scope", default)]
    pub code_scope: ExternalFocusArea,
    #[serde(rename = "analysis_budget_remaining", default = "default_budget")]
    pub analysis_budget_remaining: u64,
}

fn default_budget() -> u64 {
    crate::model::DEFAULT_ANALYSIS_BUDGET_SECS
}

impl Default for ExternalAnalysisContext {
    fn default() -> Self {
        Self {
            attempted_approaches: Vec::new(),
            partial_findings: Vec::new(),
            stuck_description: OneOrMany::None,
            code_scope: ExternalFocusArea::default(),
            analysis_budget_remaining: default_budget(),
        }
    }
}

impl From<&ExternalAnalysisContext> for AnalysisContext {
    fn from(e: &ExternalAnalysisContext) -> Self {
        AnalysisContext {
            attempted_approaches: e.attempted_approaches.clone(),
            partial_findings: e.partial_findings.clone(),
            stuck_points: e.stuck_description.clone().into_vec(),
            focus_area: FocusArea::from(&e.code_scope),
            analysis_budget_remaining: e.analysis_budget_remaining,
        }
    }
}

impl From<&AnalysisContext> for ExternalAnalysisContext {
    fn from(c: &AnalysisContext) -> Self {
        ExternalAnalysisContext {
            attempted_approaches: c.attempted_approaches.clone(),
            partial_findings: c.partial_findings.clone(),
            stuck_description: OneOrMany::from_vec(c.stuck_points.clone()),
            code_scope: ExternalFocusArea::from(&c.focus_area),
            analysis_budget_remaining: c.analysis_budget_remaining,
        }
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds a validated [`AnalysisRequest`] from a decoded [`ExternalAnalysisContext`]
/// and the remaining tool-specific fields, assigning a `correlationId` if absent.
fn build_request(
    context: ExternalAnalysisContext,
    analysis_type: AnalysisType,
    depth_level: Option<u8>,
    time_budget_seconds: Option<u64>,
    prioritize_speed: bool,
    correlation_id: Option<String>,
) -> Result<AnalysisRequest> {
    let req = AnalysisRequest {
        context: AnalysisContext::from(&context),
        analysis_type,
        depth_level: depth_level.unwrap_or(1),
        time_budget_seconds: time_budget_seconds.unwrap_or(default_budget()),
        prioritize_speed,
        correlation_id: correlation_id.unwrap_or_else(new_correlation_id),
    };
    req.validate()?;
    Ok(req)
}

#[derive(Debug, Deserialize)]
struct EscalateAnalysisParams {
    #[serde(default)]
    analysis_context: ExternalAnalysisContext,
    analysis_type: AnalysisType,
    #[serde(default)]
    depth_level: Option<u8>,
    #[serde(default)]
    time_budget_seconds: Option<u64>,
    #[serde(default)]
    prioritize_speed: bool,
    #[serde(default)]
    correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraceExecutionPathParams {
    entry_point: ExternalEntryPoint,
    #[serde(default)]
    max_depth: Option<u8>,
    #[serde(default)]
    include_data_flow: bool,
}

#[derive(Debug, Deserialize)]
struct HypothesisTestParams {
    hypothesis: String,
    code_scope: ExternalFocusArea,
    #[serde(default)]
    test_approach: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeScope {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    service_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CrossSystemImpactParams {
    change_scope: ChangeScope,
    #[serde(default)]
    impact_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CodePath {
    entry_point: ExternalEntryPoint,
    #[serde(default)]
    suspected_issues: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PerformanceBottleneckParams {
    code_path: CodePath,
    #[serde(default)]
    profile_depth: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct StartConversationParams {
    #[serde(default)]
    analysis_context: ExternalAnalysisContext,
    /// Accepted for symmetry with the tool's input schema; a session's
    /// `AnalysisContext` carries no analysis-type field of its own, so this
    /// only selects the strategy used if `initial_question` triggers a turn.
    #[serde(rename = "analysis_type", default)]
    _analysis_type: Option<AnalysisType>,
    #[serde(default)]
    initial_question: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContinueConversationParams {
    session_id: String,
    message: String,
    #[serde(default)]
    #[allow(dead_code)]
    include_code_snippets: bool,
}

#[derive(Debug, Deserialize)]
struct FinalizeConversationParams {
    session_id: String,
    #[serde(default)]
    summary_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetConversationStatusParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct RunHypothesisTournamentParams {
    hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    test_scope: Option<Value>,
    #[serde(default)]
    tournament_config: Option<TournamentConfigParams>,
}

/// `testScope` is accepted as either a free-text description or a structured
/// scope object; either way it collapses to the descriptive string the
/// tournament engine embeds in its provider prompt.
fn test_scope_to_string(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct TournamentConfigParams {
    max_parallel: Option<usize>,
    per_match_timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HealthCheckParams {
    check_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct HealthSummaryParams {
    #[serde(default)]
    #[allow(dead_code)]
    include_details: bool,
}

fn summary_format_from_str(s: Option<&str>) -> SummaryFormat {
    match s {
        Some("concise") => SummaryFormat::Concise,
        Some("actionable") => SummaryFormat::Actionable,
        _ => SummaryFormat::Detailed,
    }
}

fn params_or_empty(params: Value) -> Value {
    if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    }
}

fn decode<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T> {
    serde_json::from_value(params_or_empty(params))
        .map_err(|e| Error::invalid_input(format!("malformed params: {e}")))
}

/// Ties the core components together behind the fixed 12-tool registry.
pub struct ToolDispatcher {
    pub router: Arc<Router>,
    pub scheduler: Arc<ConversationScheduler>,
    pub tournament: Arc<TournamentEngine>,
    pub gateway: Arc<ProviderGateway>,
    pub health: Arc<HealthMonitor>,
}

impl ToolDispatcher {
    pub fn new(
        router: Arc<Router>,
        scheduler: Arc<ConversationScheduler>,
        tournament: Arc<TournamentEngine>,
        gateway: Arc<ProviderGateway>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            router,
            scheduler,
            tournament,
            gateway,
            health,
        }
    }

    /// The fixed set of tool names this dispatcher answers to.
    pub fn tool_names() -> &'static [&'static str] {
        &[
            "escalate_analysis",
            "trace_execution_path",
            "hypothesis_test",
            "cross_system_impact",
            "performance_bottleneck",
            "start_conversation",
            "continue_conversation",
            "finalize_conversation",
            "get_conversation_status",
            "run_hypothesis_tournament",
            "health_check",
            "health_summary",
        ]
    }

    #[tracing::instrument(skip(self, params), fields(correlation_id))]
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "escalate_analysis" => self.escalate_analysis(params).await,
            "trace_execution_path" => self.trace_execution_path(params).await,
            "hypothesis_test" => self.hypothesis_test(params).await,
            "cross_system_impact" => self.cross_system_impact(params).await,
            "performance_bottleneck" => self.performance_bottleneck(params).await,
            "start_conversation" => self.start_conversation(params).await,
            "continue_conversation" => self.continue_conversation(params).await,
            "finalize_conversation" => self.finalize_conversation(params).await,
            "get_conversation_status" => self.get_conversation_status(params).await,
            "run_hypothesis_tournament" => self.run_hypothesis_tournament(params).await,
            "health_check" => self.health_check(params).await,
            "health_summary" => self.health_summary(params).await,
            other => Err(Error::not_found(format!("tool {other}"))),
        }
    }

    async fn run_analysis(&self, req: AnalysisRequest) -> Result<Value> {
        let result = self.router.route_and_run(&req, &self.gateway).await?;
        Ok(serde_json::to_value(result).map_err(|e| Error::internal(e.to_string()))?)
    }

    async fn escalate_analysis(&self, params: Value) -> Result<Value> {
        let p: EscalateAnalysisParams = decode(params)?;
        let req = build_request(
            p.analysis_context,
            p.analysis_type,
            p.depth_level,
            p.time_budget_seconds,
            p.prioritize_speed,
            p.correlation_id,
        )?;
        self.run_analysis(req).await
    }

    async fn trace_execution_path(&self, params: Value) -> Result<Value> {
        let p: TraceExecutionPathParams = decode(params)?;
        let mut context = ExternalAnalysisContext::default();
        context.code_scope.entry_points = vec![p.entry_point];
        let req = build_request(
            context,
            AnalysisType::ExecutionTrace,
            p.max_depth,
            None,
            !p.include_data_flow,
            None,
        )?;
        self.run_analysis(req).await
    }

    async fn hypothesis_test(&self, params: Value) -> Result<Value> {
        let p: HypothesisTestParams = decode(params)?;
        let mut context = ExternalAnalysisContext::default();
        context.code_scope = p.code_scope;
        if let Some(approach) = p.test_approach {
            context.attempted_approaches.push(approach);
        }
        context.stuck_description = OneOrMany::One(p.hypothesis);
        let req = build_request(context, AnalysisType::HypothesisTest, None, None, false, None)?;
        self.run_analysis(req).await
    }

    async fn cross_system_impact(&self, params: Value) -> Result<Value> {
        let p: CrossSystemImpactParams = decode(params)?;
        let mut context = ExternalAnalysisContext::default();
        context.code_scope.files = p.change_scope.files;
        context.code_scope.service_names = p.change_scope.service_names;
        if let Some(impact_types) = p.impact_types {
            context.attempted_approaches = impact_types;
        }
        let req = build_request(context, AnalysisType::CrossSystem, None, None, false, None)?;
        self.run_analysis(req).await
    }

    async fn performance_bottleneck(&self, params: Value) -> Result<Value> {
        let p: PerformanceBottleneckParams = decode(params)?;
        let mut context = ExternalAnalysisContext::default();
        context.code_scope.entry_points = vec![p.code_path.entry_point];
        if let Some(issues) = p.code_path.suspected_issues {
            context.stuck_description = OneOrMany::from_vec(issues);
        }
        let req = build_request(
            context,
            AnalysisType::Performance,
            p.profile_depth,
            None,
            false,
            None,
        )?;
        self.run_analysis(req).await
    }

    async fn start_conversation(&self, params: Value) -> Result<Value> {
        let p: StartConversationParams = decode(params)?;
        let context = AnalysisContext::from(&p.analysis_context);
        context.validate()?;
        let session_id = self.scheduler.create(context).await?;
        if let Some(question) = p.initial_question {
            self.scheduler.continue_session(&session_id, &question).await?;
        }
        Ok(serde_json::json!({ "session_id": session_id }))
    }

    async fn continue_conversation(&self, params: Value) -> Result<Value> {
        let p: ContinueConversationParams = decode(params)?;
        let turn = self
            .scheduler
            .continue_session(&p.session_id, &p.message)
            .await?;
        Ok(serde_json::to_value(turn).map_err(|e| Error::internal(e.to_string()))?)
    }

    async fn finalize_conversation(&self, params: Value) -> Result<Value> {
        let p: FinalizeConversationParams = decode(params)?;
        let format = summary_format_from_str(p.summary_format.as_deref());
        let summary = self.scheduler.finalize(&p.session_id, format).await?;
        Ok(serde_json::json!({
            "session_id": summary.session_id,
            "turn_count": summary.turn_count,
            "key_findings_count": summary.key_findings_count,
            "summary_text": summary.summary_text,
        }))
    }

    async fn get_conversation_status(&self, params: Value) -> Result<Value> {
        let p: GetConversationStatusParams = decode(params)?;
        let session = self.scheduler.status(&p.session_id).await?;
        Ok(serde_json::to_value(session).map_err(|e| Error::internal(e.to_string()))?)
    }

    async fn run_hypothesis_tournament(&self, params: Value) -> Result<Value> {
        let p: RunHypothesisTournamentParams = decode(params)?;
        if !(2..=10).contains(&p.hypotheses.len()) {
            return Err(Error::invalid_input("hypotheses must contain between 2 and 10 entries"));
        }
        let mut config = TournamentConfig::default();
        if let Some(tc) = p.tournament_config {
            if let Some(mp) = tc.max_parallel {
                config.max_parallel = mp;
            }
            if let Some(pt) = tc.per_match_timeout_sec {
                config.per_match_timeout_sec = pt;
            }
        }
        let test_scope = test_scope_to_string(p.test_scope);
        let outcome = self
            .tournament
            .run(p.hypotheses, test_scope, config)
            .await?;
        Ok(serde_json::to_value(outcome).map_err(|e| Error::internal(e.to_string()))?)
    }

    async fn health_check(&self, params: Value) -> Result<Value> {
        let p: HealthCheckParams = decode(params)?;
        let name = p
            .check_name
            .ok_or_else(|| Error::invalid_input("check_name is required"))?;
        let result = self
            .health
            .execute_one(&name)
            .await
            .ok_or_else(|| Error::not_found(format!("health check {name}")))?;
        Ok(serde_json::to_value(result).map_err(|e| Error::internal(e.to_string()))?)
    }

    async fn health_summary(&self, params: Value) -> Result<Value> {
        let _p: HealthSummaryParams = decode(params)?;
        let summary = self.health.execute_all().await;
        Ok(serde_json::to_value(summary).map_err(|e| Error::internal(e.to_string()))?)
    }
}
