//! Session credentials shared between the engine and remote adapters.
//!
//! The engine only asks whether a session exists; adapters attach the token
//! to outgoing requests. Both hold clones of the same [`Credentials`].

use std::sync::{Arc, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};

/// Shared, cloneable bearer token holder.
#[derive(Clone, Default)]
pub struct Credentials {
    token: Arc<RwLock<Option<SecretString>>>,
}

impl Credentials {
    /// Credentials with no active session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Credentials for an already signed-in session.
    #[must_use]
    pub fn with_token(token: SecretString) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token))),
        }
    }

    /// Start a session.
    pub fn sign_in(&self, token: SecretString) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// End the session. Subsequent mutations are rejected before touching the cache.
    pub fn sign_out(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `f` with the raw token, if any.
    pub fn with_bearer<R>(&self, f: impl FnOnce(Option<&str>) -> R) -> R {
        let guard = self.token.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref().map(ExposeSecret::expose_secret))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authenticated", &self.is_authenticated())
            .field("token", &"[REDACTED]")
            .finish()
    }
}
