//! Authenticated session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the user proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password.
    Password,
    /// Passkey / WebAuthn with user verification.
    Passkey,
    /// Security key used as second factor.
    U2f,
    /// Time-based one-time password.
    Totp,
    /// One-time password delivered by SMS.
    OtpSms,
    /// One-time password delivered by email.
    OtpEmail,
    /// Login at an external identity provider.
    Idp,
}

impl AuthMethod {
    /// Returns the RFC 8176 `amr` values for this method.
    #[must_use]
    pub const fn amr_values(self) -> &'static [&'static str] {
        match self {
            Self::Password => &["pwd"],
            Self::Passkey => &["user", "hwk"],
            Self::U2f => &["hwk"],
            Self::Totp | Self::OtpEmail => &["otp"],
            Self::OtpSms => &["sms"],
            Self::Idp => &["fed"],
        }
    }

    const fn is_second_factor(self) -> bool {
        matches!(self, Self::U2f | Self::Totp | Self::OtpSms | Self::OtpEmail)
    }
}

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Session is active and valid.
    #[default]
    Active,
    /// Session was terminated.
    Terminated,
}

/// An authenticated session.
///
/// Produced by the login layer and consumed by the flows as proof that a user
/// authenticated, together with how and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: String,
    /// Authenticated user.
    pub user_id: String,
    /// Organization owning the user.
    pub resource_owner: String,
    /// Methods used to authenticate, in order.
    pub auth_methods: Vec<AuthMethod>,
    /// Time of the last authentication.
    pub auth_time: DateTime<Utc>,
    /// Current state.
    pub state: SessionState,
}

impl Session {
    /// Creates an active session.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        resource_owner: impl Into<String>,
        auth_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            resource_owner: resource_owner.into(),
            auth_methods: Vec::new(),
            auth_time,
            state: SessionState::Active,
        }
    }

    /// Adds an authentication method.
    #[must_use]
    pub fn with_method(mut self, method: AuthMethod) -> Self {
        if !self.auth_methods.contains(&method) {
            self.auth_methods.push(method);
        }
        self
    }

    /// Returns whether the session is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Computes the `amr` claim.
    ///
    /// `mfa` is added for a passkey (possession plus user verification) or for
    /// any first factor combined with a second factor.
    #[must_use]
    pub fn amr(&self) -> Vec<String> {
        let mut amr: Vec<String> = Vec::new();
        for method in &self.auth_methods {
            for value in method.amr_values() {
                if !amr.iter().any(|v| v == value) {
                    amr.push((*value).to_string());
                }
            }
        }

        let has_second = self.auth_methods.iter().any(|m| m.is_second_factor());
        let has_first = self
            .auth_methods
            .iter()
            .any(|m| matches!(m, AuthMethod::Password | AuthMethod::Idp));
        let passkey = self.auth_methods.contains(&AuthMethod::Passkey);
        if passkey || (has_first && has_second) {
            amr.push("mfa".to_string());
        }
        amr
    }
}
