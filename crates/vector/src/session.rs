//! Unique session identifiers for anonymous visitors.
//!
//! Random UUIDs are drawn until one is confirmed unused against a
//! [`SessionRegistry`], with a hard cap on attempts.

use async_trait::async_trait;
use docindex_core::{AppError, AppResult};
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

/// Lookup side of the session store.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn is_taken(&self, session_id: &str) -> AppResult<bool>;
}

/// In-memory registry; `claim` records an id as used.
#[derive(Debug, Default)]
pub struct MemorySessionRegistry {
    taken: Mutex<HashSet<String>>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, session_id: impl Into<String>) {
        self.taken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.into());
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn is_taken(&self, session_id: &str) -> AppResult<bool> {
        Ok(self
            .taken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(session_id))
    }
}

/// Draw a random session id not yet present in `registry`.
pub async fn generate_session_id(
    registry: &dyn SessionRegistry,
    max_attempts: u32,
) -> AppResult<String> {
    generate_session_id_with(registry, max_attempts, || Uuid::new_v4().to_string()).await
}

/// Same as [`generate_session_id`] with a custom candidate generator.
pub async fn generate_session_id_with<G>(
    registry: &dyn SessionRegistry,
    max_attempts: u32,
    mut generate: G,
) -> AppResult<String>
where
    G: FnMut() -> String,
{
    if max_attempts == 0 {
        return Err(AppError::Config(
            "session id generation needs at least one attempt".to_string(),
        ));
    }

    for attempt in 1..=max_attempts {
        let candidate = generate();
        if !registry.is_taken(&candidate).await? {
            return Ok(candidate);
        }
        tracing::debug!("Session id collision on attempt {}/{}", attempt, max_attempts);
    }

    Err(AppError::SessionExhausted(max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generates_unused_uuid() {
        let registry = MemorySessionRegistry::new();
        let id = generate_session_id(&registry, 3).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_skips_taken_candidates() {
        let registry = MemorySessionRegistry::new();
        registry.claim("one");
        registry.claim("two");

        let mut candidates = vec!["three", "two", "one"];
        let id = generate_session_id_with(&registry, 5, || {
            candidates.pop().unwrap_or("none").to_string()
        })
        .await
        .unwrap();
        assert_eq!(id, "three");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let registry = MemorySessionRegistry::new();
        registry.claim("same");

        let mut calls = 0;
        let result = generate_session_id_with(&registry, 4, || {
            calls += 1;
            "same".to_string()
        })
        .await;

        assert!(matches!(result, Err(AppError::SessionExhausted(4))));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_config_error() {
        let registry = MemorySessionRegistry::new();
        assert!(matches!(
            generate_session_id(&registry, 0).await,
            Err(AppError::Config(_))
        ));
    }
}
