//! # af-session
//!
//! Authenticated sessions as seen by the protocol flows.
//!
//! Credential checks happen in the login layer. This crate only models the
//! result (who, how, when) and verifies that a caller holds a session's token.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod session;
pub mod verifier;

pub use error::{SessionError, SessionResult};
pub use session::{AuthMethod, Session, SessionState};
pub use verifier::{InMemorySessionVerifier, SessionVerifier};
