//! Audit events for the identity flows.
//!
//! Every state transition that matters for security review (a session
//! bound, a code redeemed, a device approved, a token exchanged) produces an
//! [`AuditEvent`]. Events are written through `tracing` under the `audit`
//! target so the embedding service decides where they go.
//!
//! Events never carry secrets. Session tokens, authorization codes, device
//! codes and provider credentials stay out of the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Authorization request events
    /// Authorization request created.
    AuthRequestCreated,
    /// Session bound to an authorization request.
    SessionBound,
    /// Callback (code or implicit tokens) created.
    CallbackCreated,
    /// Authorization code exchanged for tokens.
    CodeExchanged,

    // Device authorization events
    /// Device authorization created.
    DeviceAuthCreated,
    /// Device authorization approved by the user.
    DeviceAuthApproved,
    /// Device authorization denied by the user.
    DeviceAuthDenied,
    /// Tokens released to the polling device.
    DeviceTokenIssued,

    // IDP intent events
    /// IDP intent started.
    IntentCreated,
    /// IDP intent completed successfully.
    IntentSucceeded,
    /// IDP intent failed.
    IntentFailed,
    /// IDP intent result retrieved by the login client.
    IntentRetrieved,

    // Token events
    /// Token exchange (RFC 8693) completed.
    TokenExchanged,
    /// Refresh token rotated.
    RefreshTokenRotated,
    /// A consumed single-use artifact was presented again.
    ReplayDetected,
}

impl EventType {
    /// Returns the wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequestCreated => "AUTH_REQUEST_CREATED",
            Self::SessionBound => "SESSION_BOUND",
            Self::CallbackCreated => "CALLBACK_CREATED",
            Self::CodeExchanged => "CODE_EXCHANGED",
            Self::DeviceAuthCreated => "DEVICE_AUTH_CREATED",
            Self::DeviceAuthApproved => "DEVICE_AUTH_APPROVED",
            Self::DeviceAuthDenied => "DEVICE_AUTH_DENIED",
            Self::DeviceTokenIssued => "DEVICE_TOKEN_ISSUED",
            Self::IntentCreated => "INTENT_CREATED",
            Self::IntentSucceeded => "INTENT_SUCCEEDED",
            Self::IntentFailed => "INTENT_FAILED",
            Self::IntentRetrieved => "INTENT_RETRIEVED",
            Self::TokenExchanged => "TOKEN_EXCHANGED",
            Self::RefreshTokenRotated => "REFRESH_TOKEN_ROTATED",
            Self::ReplayDetected => "REPLAY_DETECTED",
        }
    }
}

/// Outcome of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Failure,
}

/// A security event for audit logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub id: Uuid,

    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Type of event.
    pub event_type: EventType,

    /// Outcome of the event.
    pub outcome: EventOutcome,

    /// Instance the event belongs to.
    pub instance_id: Option<String>,

    /// User the event concerns.
    pub user_id: Option<String>,

    /// OAuth client involved.
    pub client_id: Option<String>,

    /// Identifier of the affected aggregate (auth request, device auth, intent).
    pub aggregate_id: Option<String>,

    /// Error code for failure events.
    pub error: Option<String>,

    /// Additional details as key-value pairs.
    pub details: Vec<(String, String)>,
}

impl AuditEvent {
    /// Creates a new event builder.
    #[must_use]
    pub const fn builder(event_type: EventType) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type)
    }

    /// Writes the event to the `audit` tracing target.
    pub fn emit(&self) {
        let details = self
            .details
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        match self.outcome {
            EventOutcome::Success => tracing::info!(
                target: "audit",
                event_id = %self.id,
                event_type = self.event_type.as_str(),
                instance_id = self.instance_id.as_deref().unwrap_or(""),
                user_id = self.user_id.as_deref().unwrap_or(""),
                client_id = self.client_id.as_deref().unwrap_or(""),
                aggregate_id = self.aggregate_id.as_deref().unwrap_or(""),
                details = %details,
                "audit event"
            ),
            EventOutcome::Failure => tracing::warn!(
                target: "audit",
                event_id = %self.id,
                event_type = self.event_type.as_str(),
                instance_id = self.instance_id.as_deref().unwrap_or(""),
                user_id = self.user_id.as_deref().unwrap_or(""),
                client_id = self.client_id.as_deref().unwrap_or(""),
                aggregate_id = self.aggregate_id.as_deref().unwrap_or(""),
                error = self.error.as_deref().unwrap_or(""),
                details = %details,
                "audit event"
            ),
        }
    }
}

/// Builder for creating audit events.
#[derive(Debug)]
pub struct AuditEventBuilder {
    event_type: EventType,
    outcome: EventOutcome,
    instance_id: Option<String>,
    user_id: Option<String>,
    client_id: Option<String>,
    aggregate_id: Option<String>,
    error: Option<String>,
    details: Vec<(String, String)>,
}

impl AuditEventBuilder {
    /// Creates a new event builder.
    #[must_use]
    pub const fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            outcome: EventOutcome::Success,
            instance_id: None,
            user_id: None,
            client_id: None,
            aggregate_id: None,
            error: None,
            details: Vec::new(),
        }
    }

    /// Sets the outcome to failure with an error code.
    #[must_use]
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.outcome = EventOutcome::Failure;
        self.error = Some(error.into());
        self
    }

    /// Sets the instance ID.
    #[must_use]
    pub fn instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Sets the user ID.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the client ID.
    #[must_use]
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the affected aggregate ID.
    #[must_use]
    pub fn aggregate(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Adds a detail key-value pair.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Builds the event.
    #[must_use]
    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            event_type: self.event_type,
            outcome: self.outcome,
            instance_id: self.instance_id,
            user_id: self.user_id,
            client_id: self.client_id,
            aggregate_id: self.aggregate_id,
            error: self.error,
            details: self.details,
        }
    }

    /// Builds and emits the event.
    pub fn emit(self) {
        self.build().emit();
    }
}
