//! Build, sign, submit, and watch transactions on an append-only ledger.
//!
//! The [Ledger] trait is the seam between the delivery oracle and a concrete ledger deployment:
//!
//! - [Ledger::account] resolves an account's current sequence number and balance.
//! - [Ledger::submit] submits a base64-encoded [Envelope] and returns the ledger's verdict.
//! - [Ledger::subscribe] opens a push subscription to an account's transaction stream, starting
//!   from "now" (no historical backlog).
//!
//! Two implementations are provided: [http::Client] talks to a Horizon-shaped REST API (and
//! consumes account streams as server-sent events) and [mocks::Ledger] keeps all state in memory
//! with configurable latency and fault injection.
//!
//! # Status
//!
//! `herald-ledger` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future};
use thiserror::Error;

pub mod http;
pub mod mocks;
pub mod sse;
mod transaction;
pub use transaction::{
    parse_address, Address, Envelope, Keypair, Network, Operation, Transaction, MAX_OPERATIONS,
};

/// Result codes attached to a rejected transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCodes {
    /// Ledger-level result (e.g. `tx_bad_seq`).
    pub transaction: String,

    /// Per-operation results, in operation order.
    #[serde(default)]
    pub operations: Vec<String>,
}

impl fmt::Display for ResultCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "{}", self.transaction);
        }
        write!(f, "{} [{}]", self.transaction, self.operations.join(", "))
    }
}

/// Errors that can occur when interacting with a ledger.
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("transaction rejected (status {status}): {}", describe(.codes))]
    Rejected {
        status: u16,
        codes: Option<ResultCodes>,
    },
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
    #[error("invalid seed")]
    InvalidSeed,
    #[error("invalid address")]
    InvalidAddress,
    #[error("unavailable")]
    Unavailable,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe(codes: &Option<ResultCodes>) -> String {
    match codes {
        Some(codes) => codes.to_string(),
        None => "no result codes".into(),
    }
}

impl Error {
    /// Ledger and operation result codes, if the ledger supplied them.
    pub fn result_codes(&self) -> Option<&ResultCodes> {
        match self {
            Error::Rejected { codes, .. } => codes.as_ref(),
            _ => None,
        }
    }
}

/// Subset of account state required to build transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    /// Sequence number of the last transaction applied for this account.
    pub sequence: u64,

    /// Balance of the native asset, in base units.
    pub balance: u64,
}

/// Response to an accepted submission.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SubmitResponse {
    /// Hash of the accepted transaction.
    pub hash: String,

    /// Index of the confirmation window that included the transaction.
    pub ledger: u64,
}

/// Stream of raw event payloads for a single account.
///
/// The stream ends when the underlying transport fails or the server closes it. Callers that
/// want to keep watching must subscribe again.
pub type Subscription = BoxStream<'static, Bytes>;

/// Interface to a ledger deployment.
pub trait Ledger: Clone + Send + Sync + 'static {
    /// Fetch the current state of an account.
    fn account(&self, address: &Address) -> impl Future<Output = Result<AccountInfo, Error>> + Send;

    /// Resolve the sequence number of the last transaction applied for an account.
    fn sequence(&self, address: &Address) -> impl Future<Output = Result<u64, Error>> + Send {
        let account = self.account(address);
        async move { Ok(account.await?.sequence) }
    }

    /// Submit a base64-encoded [Envelope].
    fn submit(&self, envelope: &str) -> impl Future<Output = Result<SubmitResponse, Error>> + Send;

    /// Subscribe to events for transactions affecting an account, starting from now.
    fn subscribe(&self, address: &Address)
        -> impl Future<Output = Result<Subscription, Error>> + Send;
}

/// A notification payload announcing a transaction that affected an account.
#[derive(Clone, Debug, Deserialize)]
pub struct Notification {
    /// Hash of the transaction, absent on keep-alive or malformed payloads.
    pub hash: Option<String>,

    /// Source account of the transaction, when supplied.
    pub source_account: Option<String>,
}

impl Notification {
    /// Parse a raw event payload.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(payload)?)
    }
}
