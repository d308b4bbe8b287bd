//! Rate limit manager: one admission decision per request.
//!
//! The `RateLimitManager` ties the pieces together. For each request it looks up the
//! route's policy, derives the identity key, runs the fixed-window counter against
//! the shared store and folds every failure into an [`Outcome`] according to the
//! policy's `allow_on_failure` flag. `evaluate` never returns an error.
//!
//! # Example
//!
//! ```ignore
//! use route_quota::{MemoryStorage, PolicyDefinition, RateLimitManagerBuilder, SimpleRequest};
//!
//! let manager = RateLimitManagerBuilder::new()
//!     .policies(vec![PolicyDefinition::new("POST", "/login", 3, "minute", "ip")])
//!     .build(MemoryStorage::new())?;
//!
//! let request = SimpleRequest::new("POST", "/login").with_client_ip("10.0.0.1".parse()?);
//! assert!(manager.evaluate(&request).await.is_allowed());
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::algorithm::{Algorithm, FixedWindow};
use crate::decision::{DenyCause, Outcome, RejectionStatus};
use crate::error::{ConnectionError, ExtractionError, RateLimitError, Result};
use crate::key::{NoTokenVerifier, RequestInfo, TokenVerifier};
use crate::policy::{Policy, PolicyDefinition};
use crate::registry::PolicyRegistry;
use crate::storage::Storage;

/// Default deadline for one counter store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// Admission controller for per-route policies.
///
/// Cheap to share: wrap it in an `Arc` and hand it to every worker. The registry is
/// read-only and the store is the only shared mutable state.
pub struct RateLimitManager<S, A = FixedWindow, V = NoTokenVerifier> {
    registry: Arc<PolicyRegistry>,
    storage: Arc<S>,
    algorithm: A,
    verifier: V,
    store_timeout: Duration,
}

impl<S, A, V> std::fmt::Debug for RateLimitManager<S, A, V>
where
    A: Algorithm,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager")
            .field("policies", &self.registry.len())
            .field("algorithm", &self.algorithm.name())
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> RateLimitManager<S> {
    /// Create a manager with the fixed-window algorithm, no token verifier and the
    /// default store timeout.
    pub fn new(registry: PolicyRegistry, storage: S) -> Self {
        Self {
            registry: Arc::new(registry),
            storage: Arc::new(storage),
            algorithm: FixedWindow::new(),
            verifier: NoTokenVerifier,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl<S, A, V> RateLimitManager<S, A, V>
where
    S: Storage,
    A: Algorithm,
    V: TokenVerifier,
{
    /// Decide whether `request` may proceed, using the current time.
    pub async fn evaluate<R: RequestInfo>(&self, request: &R) -> Outcome {
        self.evaluate_at(request, Utc::now()).await
    }

    /// Decide whether `request` may proceed, as if it arrived at `now`.
    ///
    /// Unmatched routes pass through without touching the store. Admitted requests
    /// cost exactly one store mutation; denied ones cost none.
    pub async fn evaluate_at<R: RequestInfo>(&self, request: &R, now: DateTime<Utc>) -> Outcome {
        let Some(policy) = self.registry.lookup(request.method(), request.route()) else {
            trace!(
                method = request.method(),
                route = request.route(),
                "no rate limit policy for route"
            );
            return Outcome::PassThrough;
        };

        let identity = match policy.source().extract(request, &self.verifier).await {
            Ok(identity) => identity,
            Err(error) => return self.extraction_failed(policy, error),
        };

        let decision = self
            .with_deadline(self.algorithm.check_and_record(
                &*self.storage,
                policy,
                &identity,
                now,
            ))
            .await;

        match decision {
            Ok(decision) if decision.is_allowed() => {
                trace!(
                    policy_id = policy.id(),
                    remaining = decision.info().remaining,
                    "request admitted"
                );
                Outcome::Admit(Some(decision.into_info()))
            }
            Ok(decision) => {
                debug!(
                    policy_id = policy.id(),
                    method = %policy.method(),
                    route = policy.path(),
                    identity = %identity,
                    "rate limit exceeded"
                );
                Outcome::Deny(policy.reject(
                    RejectionStatus::TooManyRequests,
                    DenyCause::QuotaExhausted,
                    Some(decision.into_info()),
                ))
            }
            Err(error) => self.store_failed(policy, error),
        }
    }

    /// Policy for a method and route template, if any.
    pub fn policy_for(&self, method: &str, route: &str) -> Option<&Policy> {
        self.registry.lookup(method, route)
    }

    /// Remaining admits for `identity` under `policy` in the window containing `now`.
    /// Does not count as a request.
    pub async fn remaining(
        &self,
        policy: &Policy,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let decision = self
            .with_deadline(self.algorithm.check(&*self.storage, policy, identity, now))
            .await?;
        Ok(decision.info().remaining)
    }

    /// Clear the counter for `identity` under `policy` in the window containing `now`.
    pub async fn reset(&self, policy: &Policy, identity: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_deadline(self.algorithm.reset(&*self.storage, policy, identity, now))
            .await
    }

    /// The policy registry.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// The counter store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Deadline applied to every store call.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Run a store call under the configured deadline. A call that runs out of time
    /// is dropped and reported as a connection timeout.
    async fn with_deadline<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(self.store_timeout).into()),
        }
    }

    fn extraction_failed(&self, policy: &Policy, error: ExtractionError) -> Outcome {
        warn!(
            policy_id = policy.id(),
            source = policy.source().name(),
            allow_on_failure = policy.allows_on_failure(),
            error = %error,
            "could not derive rate limit key"
        );

        if policy.allows_on_failure() {
            Outcome::Admit(None)
        } else {
            Outcome::Deny(policy.reject(error.status(), DenyCause::ExtractionFailed, None))
        }
    }

    fn store_failed(&self, policy: &Policy, error: RateLimitError) -> Outcome {
        warn!(
            policy_id = policy.id(),
            allow_on_failure = policy.allows_on_failure(),
            error = %error,
            "counter store unavailable"
        );

        if policy.allows_on_failure() {
            Outcome::Admit(None)
        } else {
            Outcome::Deny(policy.reject(
                RejectionStatus::TooManyRequests,
                DenyCause::StoreUnavailable,
                None,
            ))
        }
    }
}

enum RegistrySource {
    Built(Arc<PolicyRegistry>),
    Definitions(Vec<PolicyDefinition>),
}

/// Builder for RateLimitManager.
pub struct RateLimitManagerBuilder<A = FixedWindow, V = NoTokenVerifier> {
    registry: RegistrySource,
    algorithm: A,
    verifier: V,
    store_timeout: Duration,
}

impl Default for RateLimitManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitManagerBuilder {
    /// Create a builder with no policies, the fixed-window algorithm, no token
    /// verifier and the default store timeout.
    pub fn new() -> Self {
        Self {
            registry: RegistrySource::Built(Arc::new(PolicyRegistry::new())),
            algorithm: FixedWindow::new(),
            verifier: NoTokenVerifier,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl<A, V> RateLimitManagerBuilder<A, V> {
    /// Use an already compiled registry. Replaces any policies set earlier.
    pub fn registry(mut self, registry: impl Into<Arc<PolicyRegistry>>) -> Self {
        self.registry = RegistrySource::Built(registry.into());
        self
    }

    /// Compile these definitions when building. Replaces any registry set earlier.
    pub fn policies(mut self, definitions: impl IntoIterator<Item = PolicyDefinition>) -> Self {
        self.registry = RegistrySource::Definitions(definitions.into_iter().collect());
        self
    }

    /// Set the verifier used by claim-sourced policies.
    pub fn verifier<V2: TokenVerifier>(self, verifier: V2) -> RateLimitManagerBuilder<A, V2> {
        RateLimitManagerBuilder {
            registry: self.registry,
            algorithm: self.algorithm,
            verifier,
            store_timeout: self.store_timeout,
        }
    }

    /// Set the counting algorithm.
    pub fn algorithm<A2: Algorithm>(self, algorithm: A2) -> RateLimitManagerBuilder<A2, V> {
        RateLimitManagerBuilder {
            registry: self.registry,
            algorithm,
            verifier: self.verifier,
            store_timeout: self.store_timeout,
        }
    }

    /// Set the deadline for each counter store call.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Build the manager over `storage`.
    ///
    /// Fails if any policy definition is invalid.
    pub fn build<S: Storage>(self, storage: S) -> Result<RateLimitManager<S, A, V>> {
        let registry = match self.registry {
            RegistrySource::Built(registry) => registry,
            RegistrySource::Definitions(definitions) => {
                Arc::new(PolicyRegistry::from_definitions(definitions)?)
            }
        };

        Ok(RateLimitManager {
            registry,
            storage: Arc::new(storage),
            algorithm: self.algorithm,
            verifier: self.verifier,
            store_timeout: self.store_timeout,
        })
    }
}
