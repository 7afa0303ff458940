//! `ProviderGateway` — abstracts concrete model back ends behind a small
//! capability surface, with runtime credential injection and a folded
//! `{TransientError, PermanentError, Cancelled}` failure taxonomy.
//!
//! Concrete model-provider SDK integrations are out of scope; only the
//! interface and the credential lifecycle are implemented here. Callers
//! (tests, or an embedding application) supply `Provider` implementations
//! through [`ProviderGateway::register_provider`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Options accepted by [`Provider::complete`]/[`Provider::converse`].
#[derive(Clone, Default)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub cancellation_token: Option<CancellationToken>,
}

/// The reply to a [`Provider::converse`] call, with an opaque handle the
/// caller passes back in on the next turn.
#[derive(Debug, Clone)]
pub struct ConverseReply {
    pub handle: String,
    pub reply: String,
}

/// A single named model back end.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn available(&self) -> bool;
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String>;
    async fn converse(
        &self,
        handle: Option<&str>,
        message: &str,
        options: CompletionOptions,
    ) -> Result<ConverseReply>;
}

/// Builds a [`Provider`] instance from a freshly-set credential value.
pub type ProviderFactory = Arc<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync>;

const DEFAULT_CREDENTIAL_TTL_HOURS: i64 = 2;

struct CredentialEntry {
    expires_at: DateTime<Utc>,
}

/// Process-memory credential store plus the set of armed provider
/// instances it guards. Credentials are never persisted and never logged.
pub struct ProviderGateway {
    factories: RwLock<HashMap<String, ProviderFactory>>,
    instances: RwLock<HashMap<String, Arc<dyn Provider>>>,
    credentials: RwLock<HashMap<String, CredentialEntry>>,
}

impl Default for ProviderGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderGateway {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Declares a provider type. The provider remains disabled (absent from
    /// `available_providers`) until a credential is set for `name`.
    pub async fn register_provider(&self, name: impl Into<String>, factory: ProviderFactory) {
        self.factories.write().await.insert(name.into(), factory);
    }

    /// Sets (or replaces) the credential for `name`, instantiating or
    /// re-arming the provider. `ttl` defaults to two hours.
    pub async fn set_credential(
        &self,
        name: &str,
        credential_value: &str,
        ttl: Option<ChronoDuration>,
    ) -> Result<()> {
        let factory = self
            .factories
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::invalid_input(format!("unknown provider: {name}")))?;

        let instance = factory(credential_value);
        self.instances
            .write()
            .await
            .insert(name.to_string(), instance);

        let ttl = ttl.unwrap_or_else(|| ChronoDuration::hours(DEFAULT_CREDENTIAL_TTL_HOURS));
        self.credentials.write().await.insert(
            name.to_string(),
            CredentialEntry {
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    /// Clears the credential for `name`, disabling the provider.
    pub async fn clear_credential(&self, name: &str) {
        self.credentials.write().await.remove(name);
        self.instances.write().await.remove(name);
    }

    /// Sweeps expired credentials, disabling the providers they guarded.
    async fn reap_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .credentials
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.expires_at <= now)
            .map(|(name, _)| name.clone())
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut credentials = self.credentials.write().await;
        let mut instances = self.instances.write().await;
        for name in expired {
            credentials.remove(&name);
            instances.remove(&name);
        }
    }

    /// Names of providers with a live, unexpired credential and an
    /// instance reporting itself available.
    pub async fn available_providers(&self) -> Vec<String> {
        self.reap_expired().await;
        let instances = self.instances.read().await;
        let mut names = Vec::new();
        for (name, provider) in instances.iter() {
            if provider.available().await {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    async fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.reap_expired().await;
        self.instances
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::provider_unavailable(format!("provider not armed: {name}")))
    }

    /// Completes a prompt against the named provider, folding any error the
    /// provider returns into the gateway's own taxonomy unchanged (callers
    /// up the stack — Router, Scheduler, Tournament — own retry policy).
    pub async fn complete(
        &self,
        provider_name: &str,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<String> {
        let provider = self.get(provider_name).await?;
        provider.complete(prompt, options).await
    }

    pub async fn converse(
        &self,
        provider_name: &str,
        handle: Option<&str>,
        message: &str,
        options: CompletionOptions,
    ) -> Result<ConverseReply> {
        let provider = self.get(provider_name).await?;
        provider.converse(handle, message, options).await
    }

    /// Picks the first available provider, if any. Strategies that don't
    /// care which concrete provider answers use this.
    pub async fn any_available(&self) -> Option<String> {
        self.available_providers().await.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        name: String,
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }
        async fn available(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }
        async fn complete(&self, prompt: &str, _options: CompletionOptions) -> Result<String> {
            Ok(format!("echo:{prompt}"))
        }
        async fn converse(
            &self,
            handle: Option<&str>,
            message: &str,
            _options: CompletionOptions,
        ) -> Result<ConverseReply> {
            Ok(ConverseReply {
                handle: handle.unwrap_or("new-handle").to_string(),
                reply: format!("reply:{message}"),
            })
        }
    }

    fn stub_factory(up: Arc<AtomicBool>) -> ProviderFactory {
        Arc::new(move |_credential| {
            Arc::new(StubProvider {
                name: "stub".to_string(),
                up: Arc::clone(&up),
            }) as Arc<dyn Provider>
        })
    }

    #[tokio::test]
    async fn provider_is_unavailable_until_credential_is_set() {
        let gateway = ProviderGateway::new();
        let up = Arc::new(AtomicBool::new(true));
        gateway.register_provider("stub", stub_factory(up)).await;
        assert!(gateway.available_providers().await.is_empty());

        gateway.set_credential("stub", "secret", None).await.unwrap();
        assert_eq!(gateway.available_providers().await, vec!["stub".to_string()]);
    }

    #[tokio::test]
    async fn clearing_credential_disables_provider() {
        let gateway = ProviderGateway::new();
        let up = Arc::new(AtomicBool::new(true));
        gateway.register_provider("stub", stub_factory(up)).await;
        gateway.set_credential("stub", "secret", None).await.unwrap();
        gateway.clear_credential("stub").await;
        assert!(gateway.available_providers().await.is_empty());
        assert!(gateway.complete("stub", "hi", CompletionOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn expired_credential_is_reaped_lazily() {
        let gateway = ProviderGateway::new();
        let up = Arc::new(AtomicBool::new(true));
        gateway.register_provider("stub", stub_factory(up)).await;
        gateway
            .set_credential("stub", "secret", Some(ChronoDuration::milliseconds(-1)))
            .await
            .unwrap();
        assert!(gateway.available_providers().await.is_empty());
    }

    #[tokio::test]
    async fn complete_delegates_to_armed_provider() {
        let gateway = ProviderGateway::new();
        let up = Arc::new(AtomicBool::new(true));
        gateway.register_provider("stub", stub_factory(up)).await;
        gateway.set_credential("stub", "secret", None).await.unwrap();
        let out = gateway
            .complete("stub", "hello", CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "echo:hello");
    }

    #[tokio::test]
    async fn setting_credential_for_unknown_provider_is_invalid_input() {
        let gateway = ProviderGateway::new();
        let err = gateway.set_credential("nope", "x", None).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
