//! Token verification for claim-based identities.

use std::future::Future;
use std::sync::Arc;

use crate::error::ExtractionError;

/// Verified token claims.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Verifies a request credential and returns its claims.
///
/// Verification may perform I/O (e.g. introspection); the returned future is
/// dropped when the request is cancelled.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `credential`, returning its claims or an
    /// [`ExtractionError::TokenRejected`].
    fn verify(
        &self,
        credential: &str,
    ) -> impl Future<Output = Result<Claims, ExtractionError>> + Send;
}

impl<V: TokenVerifier> TokenVerifier for Arc<V> {
    async fn verify(&self, credential: &str) -> Result<Claims, ExtractionError> {
        (**self).verify(credential).await
    }
}

/// Rejects every credential. Used when no verification secret is configured, so
/// claim-based policies behave as extraction failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTokenVerifier;

impl TokenVerifier for NoTokenVerifier {
    async fn verify(&self, _credential: &str) -> Result<Claims, ExtractionError> {
        Err(ExtractionError::TokenRejected(
            "no token verifier configured".to_string(),
        ))
    }
}

/// A verifier backed by a closure.
#[derive(Clone)]
pub struct FnVerifier<F> {
    verifier: F,
}

impl<F> std::fmt::Debug for FnVerifier<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnVerifier").finish_non_exhaustive()
    }
}

impl<F> FnVerifier<F>
where
    F: Fn(&str) -> Result<Claims, String> + Send + Sync + 'static,
{
    /// Create a verifier from a function returning claims or a rejection reason.
    pub fn new(verifier: F) -> Self {
        Self { verifier }
    }
}

impl<F> TokenVerifier for FnVerifier<F>
where
    F: Fn(&str) -> Result<Claims, String> + Send + Sync + 'static,
{
    async fn verify(&self, credential: &str) -> Result<Claims, ExtractionError> {
        (self.verifier)(credential).map_err(ExtractionError::TokenRejected)
    }
}

#[cfg(feature = "jwt")]
pub use jwt::JwtVerifier;

#[cfg(feature = "jwt")]
mod jwt {
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};

    use super::{Claims, TokenVerifier};
    use crate::error::ExtractionError;

    /// HMAC-signed JWT verifier.
    ///
    /// Accepts HS256, HS384 and HS512 tokens signed with the shared secret. `exp` and
    /// `nbf` are enforced when present; no claim is required.
    #[derive(Clone)]
    pub struct JwtVerifier {
        key: DecodingKey,
        validation: Validation,
    }

    impl std::fmt::Debug for JwtVerifier {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("JwtVerifier")
                .field("algorithms", &self.validation.algorithms)
                .finish_non_exhaustive()
        }
    }

    impl JwtVerifier {
        /// Create a verifier for tokens signed with `secret`.
        pub fn new(secret: impl AsRef<[u8]>) -> Self {
            let mut validation = Validation::new(Algorithm::HS256);
            validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
            validation.required_spec_claims.clear();
            validation.validate_aud = false;
            validation.validate_nbf = true;

            Self {
                key: DecodingKey::from_secret(secret.as_ref()),
                validation,
            }
        }
    }

    impl TokenVerifier for JwtVerifier {
        async fn verify(&self, credential: &str) -> Result<Claims, ExtractionError> {
            jsonwebtoken::decode::<Claims>(credential, &self.key, &self.validation)
                .map(|data| data.claims)
                .map_err(|e| ExtractionError::TokenRejected(e.to_string()))
        }
    }
}
