//! # af-cache
//!
//! Storage abstractions for the flow state machines.
//!
//! ## Records
//!
//! - [`RecordStore`] - Versioned records with aliases and compare-and-swap
//! - [`MemoryRecordStore`] - In-memory implementation
//!
//! ## Single-use tokens
//!
//! - [`OpaqueTokenStore`] - Token id entries with atomic take
//! - [`SingleUseTokens`] - HMAC-bound issue / resolve / redeem
//!
//! ## Example
//!
//! ```ignore
//! use af_cache::SingleUseTokens;
//!
//! async fn issue_code(tokens: &SingleUseTokens, request_id: &str) -> String {
//!     let expires = chrono::Utc::now() + chrono::Duration::seconds(60);
//!     tokens.issue(request_id, expires).await?
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod opaque;
pub mod record;

pub use error::{CacheError, CacheResult, TokenError};
pub use opaque::{MemoryTokenStore, OpaqueTokenStore, SingleUseTokens, TokenEntry};
pub use record::{MemoryRecordStore, RecordStore, Versioned};
