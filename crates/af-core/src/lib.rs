//! # af-core
//!
//! Core utilities, configuration, and error handling for the authflow identity core.
//!
//! This crate provides foundational types shared by every flow crate:
//!
//! - [`config`] - Flow lifetimes and per-instance policy
//! - [`error`] - Core error type
//! - [`event`] - Structured audit events written through `tracing`
//! - [`time`] - Injectable clock used for lazy expiry checks

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod time;

pub use config::{FlowConfig, InstancePolicy};
pub use error::{Error, Result};
pub use event::{AuditEvent, EventOutcome, EventType};
pub use time::{Clock, ManualClock, SystemClock};
