//! Verify that every transaction submitted to a ledger is announced on its accounts' notification
//! streams.
//!
//! # Overview
//!
//! A run provisions a set of funded test accounts, opens one notification subscription per
//! account, and then submits escalating batches of payments between them. Each payment is
//! expected to be announced on both the sender's and the receiver's stream. After a settle
//! window that scales with the size of the batch, every expected announcement is checked; the
//! run halts at the first batch with a missing announcement or an unsubmittable payment.
//!
//! # Components
//!
//! - [provision]: create and fund test accounts in chunks of at most
//!   [herald_ledger::MAX_OPERATIONS] operations.
//! - [submitter::Submitter]: submit transactions with a bounded number of attempts and a flat
//!   delay between them.
//! - [watcher::Watcher]: keep a subscription open for one account, reconnecting with capped
//!   exponential backoff, and record every announced hash.
//! - [payment]: build signed payments to a random receiver from a bounded pool, never the
//!   sender itself.
//! - [Orchestrator]: sequence batches (generate, submit, settle, verify, reset).
//!
//! All components are generic over the [commonware_runtime] traits, so a run can be executed
//! against [herald_ledger::mocks::Ledger] on the deterministic runtime (simulated time) or
//! against [herald_ledger::http::Client] on the tokio runtime.
//!
//! # Status
//!
//! `herald-oracle` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod account;
mod config;
pub use config::{parse_duration, Config, Reconnect, Retry, MAX_ATTEMPTS};
mod error;
pub use error::Error;
mod metrics;
pub mod orchestrator;
pub use orchestrator::{run, BatchReport, Orchestrator, Report};
pub mod payment;
pub mod provision;
pub mod submitter;
pub mod verifier;
pub mod watcher;
