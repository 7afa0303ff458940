//! `ConversationScheduler` — owns multi-turn sessions: creation, a strict
//! FIFO per-session serialization lock, idle timeout, turn cap,
//! finalization, and background garbage collection.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    AnalysisContext, AnalysisProgress, ConversationTurn, Session, SessionState, TurnRole,
};
use crate::provider::{CompletionOptions, ProviderGateway};

pub const MAX_TURNS: usize = 50;
pub const SESSION_TIMEOUT_MIN: i64 = 30;
pub const SWEEP_INTERVAL_SEC: u64 = 5 * 60;
const CONFIDENCE_AUTO_COMPLETE: f64 = 0.9;

/// A summary produced by [`ConversationScheduler::finalize`].
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub session_id: String,
    pub format: SummaryFormat,
    pub turn_count: usize,
    pub key_findings_count: usize,
    pub summary_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFormat {
    Detailed,
    Concise,
    Actionable,
}

/// One session's data, plus the FIFO permit guarding `continue`/`finalize`
/// exclusivity. The data itself lives behind its own `RwLock` so that
/// status reads never have to wait on an in-flight turn.
struct SessionSlot {
    session: RwLock<Session>,
    turn_lock: Semaphore,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
            turn_lock: Semaphore::new(1),
        }
    }
}

pub struct SchedulerConfig {
    pub max_turns: usize,
    pub session_timeout_min: i64,
    pub sweep_interval_sec: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_turns: MAX_TURNS,
            session_timeout_min: SESSION_TIMEOUT_MIN,
            sweep_interval_sec: SWEEP_INTERVAL_SEC,
        }
    }
}

pub struct ConversationScheduler {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    gateway: Arc<ProviderGateway>,
    config: SchedulerConfig,
}

impl ConversationScheduler {
    pub fn new(gateway: Arc<ProviderGateway>, config: SchedulerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            gateway,
            config,
        }
    }

    /// Allocates a new session in `active` and returns its id.
    pub async fn create(&self, context: AnalysisContext) -> Result<String> {
        context.validate()?;
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), context);
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(SessionSlot::new(session)));
        Ok(id)
    }

    async fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("session {session_id}")))
    }

    /// Appends a caller turn, acquires the session's FIFO lock, routes the
    /// message through the provider gateway for a model turn, appends the
    /// model turn, and releases the lock.
    pub async fn continue_session(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<ConversationTurn> {
        let slot = self.slot(session_id).await?;
        let _permit = slot
            .turn_lock
            .acquire()
            .await
            .map_err(|_| Error::internal("session lock closed"))?;

        {
            let mut session = slot.session.write().await;
            let now = Utc::now();
            if session.state == SessionState::Active
                && session.idle_for(now) > chrono::Duration::minutes(self.config.session_timeout_min)
            {
                session.state = SessionState::Abandoned;
            }
            match session.state {
                SessionState::Abandoned => return Err(Error::not_found(format!("session {session_id}"))),
                SessionState::Active => {}
                other => {
                    return Err(Error::session_invalid_state(session_id, format!("{other:?}")))
                }
            }
            session.state = SessionState::Processing;
            session.last_activity_ms = now.timestamp_millis();
            session
                .turns
                .push(ConversationTurn::new(Uuid::new_v4().to_string(), TurnRole::Caller, message));
        }

        let provider_handle = {
            let session = slot.session.read().await;
            session.provider_handle.clone()
        };
        let provider_name = self.gateway.any_available().await;

        let reply = match provider_name {
            Some(name) => {
                self.gateway
                    .converse(&name, provider_handle.as_deref(), message, CompletionOptions::default())
                    .await
            }
            None => Err(Error::provider_unavailable("no provider armed for conversation")),
        };

        let mut session = slot.session.write().await;
        session.last_activity_ms = Utc::now().timestamp_millis();
        let model_turn = match reply {
            Ok(converse_reply) => {
                session.provider_handle = Some(converse_reply.handle);
                ConversationTurn::new(Uuid::new_v4().to_string(), TurnRole::Model, converse_reply.reply)
            }
            Err(err) => {
                session.state = SessionState::Active;
                return Err(err);
            }
        };
        session.turns.push(model_turn.clone());

        if session.turns.len() >= self.config.max_turns
            || session.analysis_progress.confidence_level >= CONFIDENCE_AUTO_COMPLETE
        {
            session.state = SessionState::Completing;
        } else {
            session.state = SessionState::Active;
        }

        Ok(model_turn)
    }

    /// Transitions the session to `completing`, synthesizes a summary from
    /// its turns, transitions to `completed`, and removes it from the
    /// scheduler. A fresh `slot`/`finalize` call afterwards sees `NotFound`;
    /// a caller already queued on this session's lock when finalize runs
    /// will observe `completed` and get `SessionInvalidState`.
    pub async fn finalize(&self, session_id: &str, format: SummaryFormat) -> Result<ConversationSummary> {
        let slot = self.slot(session_id).await?;
        let _permit = slot
            .turn_lock
            .acquire()
            .await
            .map_err(|_| Error::internal("session lock closed"))?;

        let summary = {
            let mut session = slot.session.write().await;
            if session.state == SessionState::Active
                && session.idle_for(Utc::now()) > chrono::Duration::minutes(self.config.session_timeout_min)
            {
                session.state = SessionState::Abandoned;
            }
            match session.state {
                SessionState::Abandoned => return Err(Error::not_found(format!("session {session_id}"))),
                SessionState::Active | SessionState::Completing => {}
                other => {
                    return Err(Error::session_invalid_state(session_id, format!("{other:?}")))
                }
            }
            session.state = SessionState::Completing;
            let summary = synthesize_summary(session_id, &session, format);
            session.state = SessionState::Completed;
            summary
        };

        self.sessions.write().await.remove(session_id);
        Ok(summary)
    }

    /// Returns a snapshot of the session, independent of any in-flight
    /// `continue`/`finalize` — status reads never join the FIFO queue.
    pub async fn status(&self, session_id: &str) -> Result<Session> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.read().await.clone();
        Ok(session)
    }

    /// Sweeps sessions idle past the timeout into `abandoned`. A session in
    /// `processing` is never reaped regardless of idle time.
    pub async fn sweep_idle(&self) {
        let now = Utc::now();
        let timeout = chrono::Duration::minutes(self.config.session_timeout_min);
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();
        for slot in slots {
            let mut session = slot.session.write().await;
            if session.state == SessionState::Active && session.idle_for(now) > timeout {
                session.state = SessionState::Abandoned;
            }
        }
    }

    pub fn spawn_background_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let interval = Duration::from_secs(scheduler.config.sweep_interval_sec.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scheduler.sweep_idle().await;
            }
        })
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn synthesize_summary(session_id: &str, session: &Session, format: SummaryFormat) -> ConversationSummary {
    let AnalysisProgress {
        key_findings,
        completed_steps,
        ..
    } = &session.analysis_progress;

    let summary_text = match format {
        SummaryFormat::Detailed => session
            .turns
            .iter()
            .map(|t| format!("[{:?}] {}", t.role, t.content_text))
            .collect::<Vec<_>>()
            .join("\n"),
        SummaryFormat::Concise => session
            .turns
            .last()
            .map(|t| t.content_text.clone())
            .unwrap_or_default(),
        SummaryFormat::Actionable => completed_steps.join("; "),
    };

    ConversationSummary {
        session_id: session_id.to_string(),
        format,
        turn_count: session.turns.len(),
        key_findings_count: key_findings.len(),
        summary_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ConverseReply, Provider};
    use async_trait::async_trait;

    struct OrderRecordingProvider {
        order: Arc<std::sync::Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Provider for OrderRecordingProvider {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn available(&self) -> bool {
            true
        }
        async fn complete(&self, _prompt: &str, _options: CompletionOptions) -> Result<String> {
            Ok("ok".to_string())
        }
        async fn converse(
            &self,
            handle: Option<&str>,
            message: &str,
            _options: CompletionOptions,
        ) -> Result<ConverseReply> {
            let n: usize = message.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.order.lock().unwrap().push(n);
            Ok(ConverseReply {
                handle: handle.unwrap_or("h").to_string(),
                reply: format!("reply-{n}"),
            })
        }
    }

    async fn gateway_recording(order: Arc<std::sync::Mutex<Vec<usize>>>) -> Arc<ProviderGateway> {
        let gateway = ProviderGateway::new();
        gateway
            .register_provider(
                "recorder",
                Arc::new(move |_cred| {
                    Arc::new(OrderRecordingProvider {
                        order: Arc::clone(&order),
                    }) as Arc<dyn Provider>
                }),
            )
            .await;
        gateway.set_credential("recorder", "key", None).await.unwrap();
        Arc::new(gateway)
    }

    #[tokio::test]
    async fn concurrent_continues_are_served_in_fifo_arrival_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(Arc::clone(&order)).await;
        let scheduler = Arc::new(ConversationScheduler::new(gateway, SchedulerConfig::default()));
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();

        // Acquire the lock once up front so all three continues queue up in
        // a deterministic arrival order before any of them run.
        let slot = scheduler.slot(&id).await.unwrap();
        let gate_permit = slot.turn_lock.acquire().await.unwrap();

        let s1 = Arc::clone(&scheduler);
        let id1 = id.clone();
        let h1 = tokio::spawn(async move { s1.continue_session(&id1, "1").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let s2 = Arc::clone(&scheduler);
        let id2 = id.clone();
        let h2 = tokio::spawn(async move { s2.continue_session(&id2, "2").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let s3 = Arc::clone(&scheduler);
        let id3 = id.clone();
        let h3 = tokio::spawn(async move { s3.continue_session(&id3, "3").await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(gate_permit);

        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();
        h3.await.unwrap().unwrap();

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        let status = scheduler.status(&id).await.unwrap();
        assert_eq!(status.turns.len(), 6);
    }

    #[tokio::test]
    async fn idle_session_is_reaped_to_abandoned_after_timeout() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(order).await;
        let scheduler = ConversationScheduler::new(
            gateway,
            SchedulerConfig {
                session_timeout_min: 30,
                ..SchedulerConfig::default()
            },
        );
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();
        {
            let slot = scheduler.slot(&id).await.unwrap();
            let mut session = slot.session.write().await;
            session.last_activity_ms = Utc::now().timestamp_millis() - Duration::from_secs(31 * 60).as_millis() as i64;
        }
        scheduler.sweep_idle().await;

        let status = scheduler.status(&id).await.unwrap();
        assert_eq!(status.state, SessionState::Abandoned);

        let err = scheduler.continue_session(&id, "hi").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn continue_session_rejects_idle_session_before_any_sweep_runs() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(order).await;
        let scheduler = ConversationScheduler::new(
            gateway,
            SchedulerConfig {
                session_timeout_min: 30,
                ..SchedulerConfig::default()
            },
        );
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();
        {
            let slot = scheduler.slot(&id).await.unwrap();
            let mut session = slot.session.write().await;
            session.last_activity_ms = Utc::now().timestamp_millis() - Duration::from_secs(31 * 60).as_millis() as i64;
        }

        // No sweep_idle() call here: continue_session must itself refuse a
        // session idle past the timeout, not rely on the background sweep.
        let err = scheduler.continue_session(&id, "hi").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");

        let status = scheduler.status(&id).await.unwrap();
        assert_eq!(status.state, SessionState::Abandoned);
    }

    #[tokio::test]
    async fn finalize_rejects_idle_session_before_any_sweep_runs() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(order).await;
        let scheduler = ConversationScheduler::new(
            gateway,
            SchedulerConfig {
                session_timeout_min: 30,
                ..SchedulerConfig::default()
            },
        );
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();
        {
            let slot = scheduler.slot(&id).await.unwrap();
            let mut session = slot.session.write().await;
            session.last_activity_ms = Utc::now().timestamp_millis() - Duration::from_secs(31 * 60).as_millis() as i64;
        }

        let err = scheduler.finalize(&id, SummaryFormat::Concise).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn processing_session_is_never_reaped() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(order).await;
        let scheduler = ConversationScheduler::new(gateway, SchedulerConfig::default());
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();
        {
            let slot = scheduler.slot(&id).await.unwrap();
            let mut session = slot.session.write().await;
            session.state = SessionState::Processing;
        }
        scheduler.sweep_idle().await;
        let status = scheduler.status(&id).await.unwrap();
        assert_eq!(status.state, SessionState::Processing);
    }

    #[tokio::test]
    async fn finalize_removes_session_so_next_lookup_is_not_found() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(order).await;
        let scheduler = ConversationScheduler::new(gateway, SchedulerConfig::default());
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();
        scheduler.finalize(&id, SummaryFormat::Concise).await.unwrap();

        assert_eq!(scheduler.status(&id).await.unwrap_err().kind(), "NotFound");
        assert_eq!(
            scheduler.continue_session(&id, "hi").await.unwrap_err().kind(),
            "NotFound"
        );
    }

    #[tokio::test]
    async fn turn_cap_auto_transitions_to_completing() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gateway = gateway_recording(order).await;
        let scheduler = ConversationScheduler::new(
            gateway,
            SchedulerConfig {
                max_turns: 2,
                ..SchedulerConfig::default()
            },
        );
        let id = scheduler.create(AnalysisContext::default()).await.unwrap();
        scheduler.continue_session(&id, "1").await.unwrap();
        let status = scheduler.status(&id).await.unwrap();
        assert_eq!(status.state, SessionState::Completing);
    }
}
