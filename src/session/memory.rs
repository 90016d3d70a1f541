use super::{LoginSession, Resolution, SessionError, SessionStore, SESSION_TTL};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Instant,
};

/// In-process session store.
///
/// Each primitive runs inside one critical section, which gives the same
/// atomicity the Redis scripts provide.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (LoginSession, Instant)>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without touching the expiry.
    #[must_use]
    pub fn peek(&self, token: &str) -> Option<LoginSession> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(token)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(session, _)| session.clone())
    }

    fn mutate<T>(
        &self,
        token: &str,
        apply: impl FnOnce(&mut LoginSession) -> T,
    ) -> Option<(T, LoginSession)> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if entries
            .get(token)
            .is_some_and(|(_, expires_at)| *expires_at <= now)
        {
            entries.remove(token);
        }
        let (session, expires_at) = entries.get_mut(token)?;
        let output = apply(session);
        *expires_at = now + SESSION_TTL;
        Some((output, session.clone()))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, token: &str, session: &LoginSession) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            token.to_string(),
            (session.clone(), Instant::now() + SESSION_TTL),
        );
        Ok(())
    }

    async fn attempt(&self, token: &str) -> Result<Option<LoginSession>, SessionError> {
        Ok(self
            .mutate(token, LoginSession::record_attempt)
            .map(|((), session)| session))
    }

    async fn resolve(&self, token: &str) -> Result<Resolution, SessionError> {
        Ok(match self.mutate(token, LoginSession::resolve) {
            Some((true, _)) => Resolution::Resolved,
            Some((false, session)) => Resolution::AlreadyFinal(session.state),
            None => Resolution::Missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, MAX_TRIES};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn correct_code_resolves_once() {
        let store = MemorySessionStore::new();
        let otp_id = Uuid::new_v4();
        let token = store.create(otp_id, "ABC123").await.expect("create");

        let verified = store.check_code(token.as_str(), "ABC123").await;
        assert_eq!(verified.ok(), Some(otp_id));

        let second = store.check_code(token.as_str(), "ABC123").await;
        assert!(matches!(
            second,
            Err(SessionError::InvalidCode {
                state: SessionState::Success
            })
        ));
    }

    #[tokio::test]
    async fn wrong_code_counts_and_keeps_waiting() {
        let store = MemorySessionStore::new();
        let token = store.create(Uuid::new_v4(), "ABC123").await.expect("create");

        let result = store.check_code(token.as_str(), "ZZZ999").await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidCode {
                state: SessionState::Waiting
            })
        ));
        let session = store.peek(token.as_str()).expect("session");
        assert_eq!(session.tries, 1);
        assert_eq!(session.state, SessionState::Waiting);
    }

    #[tokio::test]
    async fn fourth_attempt_is_rejected_even_with_correct_code() {
        let store = MemorySessionStore::new();
        let token = store.create(Uuid::new_v4(), "ABC123").await.expect("create");
        for _ in 0..MAX_TRIES {
            assert!(store.check_code(token.as_str(), "WRONG1").await.is_err());
        }

        let result = store.check_code(token.as_str(), "ABC123").await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidCode {
                state: SessionState::Corrupted
            })
        ));
        assert_eq!(
            store.peek(token.as_str()).map(|s| s.state),
            Some(SessionState::Corrupted)
        );
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let store = MemorySessionStore::new();
        assert!(matches!(
            store.check_code("missing", "ABC123").await,
            Err(SessionError::NotFound)
        ));
        assert!(matches!(
            store.increment_tries("missing").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_codes_are_capped() {
        let store = Arc::new(MemorySessionStore::new());
        let token = store.create(Uuid::new_v4(), "ABC123").await.expect("create");

        let attempts = 32;
        let mut handles = Vec::with_capacity(attempts);
        for _ in 0..attempts {
            let store = Arc::clone(&store);
            let token = token.as_str().to_string();
            handles.push(tokio::spawn(async move {
                store.check_code(&token, "WRONG1").await
            }));
        }

        let mut waiting_rejections = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Err(SessionError::InvalidCode {
                    state: SessionState::Waiting,
                }) => waiting_rejections += 1,
                Err(SessionError::InvalidCode {
                    state: SessionState::Corrupted,
                }) => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        let session = store.peek(token.as_str()).expect("session");
        assert_eq!(session.tries, u32::try_from(attempts).expect("fits"));
        assert_eq!(session.state, SessionState::Corrupted);
        assert_eq!(waiting_rejections, MAX_TRIES);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_correct_codes_succeed_at_most_once() {
        let store = Arc::new(MemorySessionStore::new());
        let token = store.create(Uuid::new_v4(), "ABC123").await.expect("create");

        let mut handles = Vec::new();
        for _ in 0..3 {
            let store = Arc::clone(&store);
            let token = token.as_str().to_string();
            handles.push(tokio::spawn(async move {
                store.check_code(&token, "ABC123").await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.expect("join").is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
