//! End-to-end tests.
//!
//! Every flow runs against in-memory collaborators and a manual clock, so
//! expiry is exercised by moving time instead of sleeping.

mod common;
mod concurrency;
mod device_flow;
mod exchange;
mod intents;
mod login_flow;
