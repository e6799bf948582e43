//! Single-use opaque tokens.
//!
//! Authorization codes, device codes, IDP intent tokens and refresh tokens
//! all share one primitive. A token has the shape `<token_id>.<mac>` where
//! `mac = HMAC-SHA384(key, bound_id "." token_id)`. The store only holds
//! `token_id -> {bound_id, expires_at}`, so a leaked store cannot be turned
//! back into presentable tokens.

use std::collections::HashMap;
use std::sync::Arc;

use af_core::Clock;
use af_crypto::MacKey;
use af_crypto::random::generate_token_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{CacheResult, TokenError};

/// What a stored token id unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    /// Identifier of the record the token is bound to.
    pub bound_id: String,
    /// Expiry of the token.
    pub expires_at: DateTime<Utc>,
}

/// Storage for single-use token entries.
#[async_trait]
pub trait OpaqueTokenStore: Send + Sync {
    /// Stores an entry. Returns `false` if the id is already taken.
    async fn store(&self, token_id: &str, entry: TokenEntry) -> CacheResult<bool>;

    /// Reads an entry without consuming it.
    async fn get(&self, token_id: &str) -> CacheResult<Option<TokenEntry>>;

    /// Atomically removes and returns an entry.
    ///
    /// Of several concurrent callers at most one receives `Some`.
    async fn take(&self, token_id: &str) -> CacheResult<Option<TokenEntry>>;
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<String, TokenEntry>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OpaqueTokenStore for MemoryTokenStore {
    async fn store(&self, token_id: &str, entry: TokenEntry) -> CacheResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(token_id) {
            return Ok(false);
        }
        entries.insert(token_id.to_string(), entry);
        Ok(true)
    }

    async fn get(&self, token_id: &str) -> CacheResult<Option<TokenEntry>> {
        Ok(self.entries.read().await.get(token_id).cloned())
    }

    async fn take(&self, token_id: &str) -> CacheResult<Option<TokenEntry>> {
        Ok(self.entries.write().await.remove(token_id))
    }
}

/// Issues, checks and redeems single-use opaque tokens.
pub struct SingleUseTokens {
    store: Arc<dyn OpaqueTokenStore>,
    key: MacKey,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SingleUseTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleUseTokens")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SingleUseTokens {
    /// Creates the primitive over a store, a MAC key and a clock.
    #[must_use]
    pub fn new(store: Arc<dyn OpaqueTokenStore>, key: MacKey, clock: Arc<dyn Clock>) -> Self {
        Self { store, key, clock }
    }

    /// Creates an in-memory instance with a random key.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryTokenStore::new()), MacKey::generate(), clock)
    }

    fn mac_input(bound_id: &str, token_id: &str) -> Vec<u8> {
        format!("{bound_id}.{token_id}").into_bytes()
    }

    fn split(token: &str) -> Result<(&str, &str), TokenError> {
        match token.split_once('.') {
            Some((id, mac)) if !id.is_empty() && !mac.is_empty() => Ok((id, mac)),
            _ => Err(TokenError::Invalid),
        }
    }

    /// Issues a token bound to `bound_id`, valid until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Backend`] if the store fails.
    pub async fn issue(
        &self,
        bound_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let entry = TokenEntry {
            bound_id: bound_id.to_string(),
            expires_at,
        };
        // 256-bit ids; a collision means a broken rng, so one retry is plenty
        for _ in 0..2 {
            let token_id = generate_token_id();
            if self.store.store(&token_id, entry.clone()).await? {
                let mac = self.key.sign_b64(&Self::mac_input(bound_id, &token_id));
                return Ok(format!("{token_id}.{mac}"));
            }
        }
        Err(TokenError::Backend(crate::error::CacheError::Internal(
            "token id collision".to_string(),
        )))
    }

    /// Checks that `token` was issued for `bound_id`.
    ///
    /// Stateless constant-time MAC check; says nothing about consumption.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] on a malformed token or mismatch.
    pub fn verify_binding(&self, token: &str, bound_id: &str) -> Result<(), TokenError> {
        let (token_id, mac) = Self::split(token)?;
        self.key
            .verify_b64(&Self::mac_input(bound_id, token_id), mac)
            .map_err(|_| TokenError::Invalid)
    }

    /// Resolves a live token to the id it is bound to, without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] for malformed or forged tokens,
    /// [`TokenError::Consumed`] for a well-formed token that is no longer
    /// stored and [`TokenError::Expired`] past expiry.
    pub async fn resolve(&self, token: &str) -> Result<String, TokenError> {
        let (token_id, _) = Self::split(token)?;
        let entry = self.store.get(token_id).await?.ok_or(TokenError::Consumed)?;
        self.verify_binding(token, &entry.bound_id)?;
        if self.clock.now() >= entry.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(entry.bound_id)
    }

    /// Redeems a token exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] if the token was not issued for
    /// `bound_id`, [`TokenError::Consumed`] if it was already redeemed, and
    /// [`TokenError::Expired`] past expiry (the token is consumed either way).
    pub async fn redeem(&self, token: &str, bound_id: &str) -> Result<(), TokenError> {
        self.verify_binding(token, bound_id)?;
        let (token_id, _) = Self::split(token)?;

        let entry = self.store.take(token_id).await?.ok_or(TokenError::Consumed)?;
        if entry.bound_id != bound_id {
            return Err(TokenError::Invalid);
        }
        if self.clock.now() >= entry.expires_at {
            return Err(TokenError::Expired);
        }
        tracing::debug!(bound_id = %bound_id, "single-use token redeemed");
        Ok(())
    }
}
