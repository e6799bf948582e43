//! Session token verification.

use std::collections::HashMap;
use std::sync::Arc;

use af_core::Clock;
use af_crypto::MacKey;
use af_crypto::random::{generate_session_id, random_base64url};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{SessionError, SessionResult};
use crate::session::{AuthMethod, Session, SessionState};

/// Verifies that a caller holds the token of a session.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Returns the session if `token` belongs to `session_id` and the session
    /// is active.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSession`] for unknown sessions, wrong
    /// tokens and terminated sessions alike.
    async fn verify_session_token(&self, session_id: &str, token: &str) -> SessionResult<Session>;
}

struct StoredSession {
    session: Session,
    token_mac: Vec<u8>,
}

/// In-memory session verifier.
///
/// Stores only an HMAC of each session token, bound to the session id.
pub struct InMemorySessionVerifier {
    sessions: RwLock<HashMap<String, StoredSession>>,
    key: MacKey,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionVerifier {
    /// Creates an empty verifier.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            key: MacKey::generate(),
            clock,
        }
    }

    fn mac_input(session_id: &str, token: &str) -> Vec<u8> {
        format!("{session_id}.{token}").into_bytes()
    }

    /// Creates a session for `user_id` and returns it with its token.
    pub async fn create_session(
        &self,
        user_id: &str,
        resource_owner: &str,
        methods: &[AuthMethod],
    ) -> (Session, String) {
        let mut session = Session::new(generate_session_id(), user_id, resource_owner, self.clock.now());
        for method in methods {
            session = session.with_method(*method);
        }
        let token = random_base64url(32);
        let token_mac = self.key.sign(&Self::mac_input(&session.id, &token));

        tracing::debug!(session_id = %session.id, user_id = %user_id, "session created");
        self.sessions.write().await.insert(
            session.id.clone(),
            StoredSession {
                session: session.clone(),
                token_mac,
            },
        );
        (session, token)
    }

    /// Terminates a session; its token stops verifying.
    pub async fn terminate(&self, session_id: &str) {
        if let Some(stored) = self.sessions.write().await.get_mut(session_id) {
            stored.session.state = SessionState::Terminated;
        }
    }
}

#[async_trait]
impl SessionVerifier for InMemorySessionVerifier {
    async fn verify_session_token(&self, session_id: &str, token: &str) -> SessionResult<Session> {
        let sessions = self.sessions.read().await;
        let stored = sessions.get(session_id).ok_or(SessionError::InvalidSession)?;

        self.key
            .verify(&Self::mac_input(session_id, token), &stored.token_mac)
            .map_err(|_| SessionError::InvalidSession)?;

        if !stored.session.is_active() {
            return Err(SessionError::InvalidSession);
        }
        Ok(stored.session.clone())
    }
}
