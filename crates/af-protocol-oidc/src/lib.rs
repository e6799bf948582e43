//! # af-protocol-oidc
//!
//! OAuth 2.0 / `OpenID` Connect protocol core.
//!
//! Turns verified sessions into authorization codes and tokens, and
//! implements delegated access through token exchange. Transport, client
//! authentication and login UI live outside this crate; every manager is a
//! plain async API over injected collaborators.
//!
//! ## Flows
//!
//! - [`auth_request`] - Authorization code and implicit flow
//! - [`device`] - Device authorization grant (RFC 8628)
//! - [`exchange`] - Token exchange and impersonation (RFC 8693)
//!
//! ## Building blocks
//!
//! - [`token`] - Token issuance, refresh rotation and introspection
//! - [`permission`] - Impersonation, login client and project grant checks
//! - [`client`] - Registered applications and redirect URI matching
//! - [`claims`] - JWT claim sets, including the `act` claim
//! - [`redirect`] - Callback URLs and PKCE
//! - [`request`] - Wire-shaped request types
//! - [`types`] - Grant, response and token type identifiers
//! - [`error`] - OAuth 2.0 error taxonomy
//!
//! ## Signing
//!
//! Only ES384, PS384 and RS384 are supported for JWTs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth_request;
pub mod claims;
pub mod client;
pub mod device;
pub mod error;
pub mod exchange;
pub mod permission;
pub mod redirect;
pub mod request;
pub mod token;
pub mod types;

pub use auth_request::{AuthRequest, AuthRequestManager, AuthRequestState, CallbackOutcome};
pub use claims::{AccessTokenClaims, ActorClaim, Audience, IdTokenClaims};
pub use client::{AccessTokenFormat, App, AppRegistry, InMemoryAppRegistry, LoginVersion};
pub use device::{
    DeviceAuthState, DeviceAuthorization, DeviceAuthorizationManager, DeviceAuthorizationResponse,
    DeviceDecision, PollOutcome,
};
pub use error::{ErrorResponse, OidcError, OidcResult};
pub use exchange::{TokenExchangeEngine, TokenExchangeResponse};
pub use permission::{
    ApiUsage, DirectoryUser, GrantStore, InMemoryGrantStore, InMemoryUserDirectory,
    PermissionChecker, RoleScope, UserDirectory,
};
pub use redirect::{AuthorizationError, PkceChallenge};
pub use request::{
    AuthorizationRequest, DeviceAuthorizationRequest, DeviceTokenRequest, TokenExchangeRequest,
    TokenRequest,
};
pub use token::{
    AuthContext, IntrospectionResponse, IssuedToken, MintRequest, SigningKey, TokenInfo,
    TokenIssuer, TokenKind, TokenResponse, TokenSetOptions,
};
pub use types::{
    CodeChallengeMethod, GrantType, ResponseMode, ResponseType, ResponseTypes, TokenTypeUri,
};
