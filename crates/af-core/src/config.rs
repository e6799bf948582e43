//! Flow configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.
//! Per-instance security switches live in [`InstancePolicy`] and are injected
//! into the managers that need them.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifetimes and endpoints shared by all flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Issuer URL placed into every token.
    pub issuer: String,

    /// Access token lifespan in seconds.
    pub access_token_lifespan: i64,

    /// ID token lifespan in seconds.
    pub id_token_lifespan: i64,

    /// Refresh token lifespan in seconds.
    pub refresh_token_lifespan: i64,

    /// Authorization code lifespan in seconds.
    pub auth_code_lifespan: i64,

    /// Device code lifespan in seconds.
    pub device_code_lifespan: i64,

    /// Minimum interval between device polls in seconds.
    pub device_poll_interval: i64,

    /// URI the user visits on the second device.
    pub device_verification_uri: String,

    /// Number of characters in a device user code.
    pub device_user_code_length: usize,

    /// IDP intent lifespan in seconds.
    pub idp_intent_lifespan: i64,

    /// Callback URL registered at external identity providers.
    pub idp_callback_url: String,

    /// Timeout for the synchronous LDAP bind in seconds.
    pub ldap_timeout: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            access_token_lifespan: 300,      // 5 minutes
            id_token_lifespan: 300,          // 5 minutes
            refresh_token_lifespan: 86_400,  // 1 day
            auth_code_lifespan: 60,          // 1 minute
            device_code_lifespan: 300,       // 5 minutes
            device_poll_interval: 5,
            device_verification_uri: "http://localhost:8080/device".to_string(),
            device_user_code_length: 8,
            idp_intent_lifespan: 3_600,      // 1 hour
            idp_callback_url: "http://localhost:8080/idps/callback".to_string(),
            ldap_timeout: 10,
        }
    }
}

impl FlowConfig {
    /// Loads configuration from `AF_*` environment variables.
    ///
    /// A `.env` file is read first if present. Unset variables keep their
    /// defaults; set but unparsable variables are an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let issuer = std::env::var("AF_ISSUER").unwrap_or(defaults.issuer);
        let device_verification_uri = std::env::var("AF_DEVICE_VERIFICATION_URI")
            .unwrap_or_else(|_| format!("{issuer}/device"));
        let idp_callback_url = std::env::var("AF_IDP_CALLBACK_URL")
            .unwrap_or_else(|_| format!("{issuer}/idps/callback"));

        let config = Self {
            access_token_lifespan: env_or(
                "AF_ACCESS_TOKEN_LIFESPAN",
                defaults.access_token_lifespan,
            )?,
            id_token_lifespan: env_or("AF_ID_TOKEN_LIFESPAN", defaults.id_token_lifespan)?,
            refresh_token_lifespan: env_or(
                "AF_REFRESH_TOKEN_LIFESPAN",
                defaults.refresh_token_lifespan,
            )?,
            auth_code_lifespan: env_or("AF_AUTH_CODE_LIFESPAN", defaults.auth_code_lifespan)?,
            device_code_lifespan: env_or(
                "AF_DEVICE_CODE_LIFESPAN",
                defaults.device_code_lifespan,
            )?,
            device_poll_interval: env_or(
                "AF_DEVICE_POLL_INTERVAL",
                defaults.device_poll_interval,
            )?,
            device_user_code_length: env_or(
                "AF_DEVICE_USER_CODE_LENGTH",
                defaults.device_user_code_length,
            )?,
            idp_intent_lifespan: env_or("AF_IDP_INTENT_LIFESPAN", defaults.idp_intent_lifespan)?,
            ldap_timeout: env_or("AF_LDAP_TIMEOUT", defaults.ldap_timeout)?,
            issuer,
            device_verification_uri,
            idp_callback_url,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty issuer, a non-positive lifespan,
    /// or a user code too short to be useful.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(Error::Config("issuer must not be empty".to_string()));
        }

        let lifespans = [
            ("access_token_lifespan", self.access_token_lifespan),
            ("id_token_lifespan", self.id_token_lifespan),
            ("refresh_token_lifespan", self.refresh_token_lifespan),
            ("auth_code_lifespan", self.auth_code_lifespan),
            ("device_code_lifespan", self.device_code_lifespan),
            ("device_poll_interval", self.device_poll_interval),
            ("idp_intent_lifespan", self.idp_intent_lifespan),
        ];
        for (name, value) in lifespans {
            if value <= 0 {
                return Err(Error::Config(format!("{name} must be positive, got {value}")));
            }
        }

        if self.device_user_code_length < 6 {
            return Err(Error::Config(
                "device_user_code_length must be at least 6".to_string(),
            ));
        }
        if self.ldap_timeout == 0 {
            return Err(Error::Config("ldap_timeout must be positive".to_string()));
        }

        Ok(())
    }
}

/// Per-instance security policy and feature flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePolicy {
    /// Whether RFC 8693 token exchange is enabled for the instance.
    pub token_exchange_enabled: bool,

    /// Whether the security policy allows impersonation.
    pub impersonation_enabled: bool,
}

impl InstancePolicy {
    /// Policy with token exchange and impersonation both enabled.
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            token_exchange_enabled: true,
            impersonation_enabled: true,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value"))),
        Err(_) => Ok(default),
    }
}
