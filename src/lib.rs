//! # rro-core
//!
//! Reasoning orchestration server core: a `ToolDispatcher` front end over
//! five long-lived components — `Router`/`Strategy`, `ConversationScheduler`,
//! `TournamentEngine`, `ProviderGateway`, `ResultCache`, and `HealthMonitor` —
//! fronting pluggable LLM providers behind a small, typed tool surface.
//!
//! ## Core components
//!
//! - **Router**: scores and selects a [`router::Strategy`] per request
//! - **ConversationScheduler**: multi-turn sessions with FIFO per-session
//!   serialization
//! - **TournamentEngine**: elimination-round hypothesis testing
//! - **ProviderGateway**: credentialed access to pluggable model back ends
//! - **ResultCache**: bounded LRU/TTL cache over analysis results
//! - **HealthMonitor**: aggregated health checks
//! - **ToolDispatcher**: the external tool surface tying the above together

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod model;
pub mod provider;
pub mod router;
pub mod scheduler;
pub mod tournament;
pub mod transport;

pub use cache::{derive_cache_key, CacheConfig, CacheStats, ResultCache};
pub use config::{Config, ConfigIssue, ConfigSeverity, LogLevel};
pub use dispatcher::ToolDispatcher;
pub use error::{Error, Result};
pub use health::{HealthCheckConfig, HealthCheckResult, HealthMonitor, HealthSummary};
pub use provider::{CompletionOptions, ConverseReply, Provider, ProviderFactory, ProviderGateway};
pub use router::{DeepStrategy, QuickStrategy, ResourceEstimate, Router, Strategy, StrategyMetrics};
pub use scheduler::{ConversationScheduler, ConversationSummary, SchedulerConfig, SummaryFormat};
pub use tournament::{RankedHypothesis, TournamentConfig, TournamentEngine, TournamentOutcome};
pub use transport::stdio_loop;
