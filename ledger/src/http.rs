//! [Ledger] implementation backed by a Horizon-shaped REST API.
//!
//! | Operation   | Request                                                             |
//! |-------------|---------------------------------------------------------------------|
//! | `account`   | `GET {url}/accounts/{address}`                                      |
//! | `submit`    | `POST {url}/transactions` (form field `tx`)                         |
//! | `subscribe` | `GET {url}/accounts/{address}/transactions?cursor=now` (SSE stream) |
//!
//! Rejected submissions return a problem document whose `extras.result_codes` carries the
//! ledger and operation result codes.

use crate::{sse, AccountInfo, Address, Error, Ledger, ResultCodes, SubmitResponse, Subscription};
use futures::StreamExt;
use reqwest::{header::ACCEPT, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default timeout applied to non-streaming requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct AccountResponse {
    sequence: String,
    #[serde(default)]
    balance: Option<String>,
}

#[derive(Deserialize)]
struct Problem {
    #[serde(default)]
    extras: Option<ProblemExtras>,
}

#[derive(Deserialize)]
struct ProblemExtras {
    result_codes: Option<ResultCodes>,
}

/// Client for a single ledger endpoint.
#[derive(Clone)]
pub struct Client {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl Client {
    /// Create a client for the given endpoint, applying `timeout` to non-streaming requests.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, Error> {
        // Streams stay open indefinitely, so the timeout is set per request instead
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }
}

fn parse_amount(raw: &str) -> Result<u64, Error> {
    raw.parse::<u64>()
        .map_err(|_| Error::InvalidTransaction(format!("invalid amount: {raw}")))
}

impl Ledger for Client {
    async fn account(&self, address: &Address) -> Result<AccountInfo, Error> {
        let response = self
            .http
            .get(format!("{}/accounts/{}", self.url, address))
            .timeout(self.timeout)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(Error::AccountNotFound(address.to_string())),
            status => return Err(Error::Status(status.as_u16())),
        }
        let account: AccountResponse = response.json().await?;
        Ok(AccountInfo {
            sequence: parse_amount(&account.sequence)?,
            balance: account.balance.as_deref().map(parse_amount).transpose()?.unwrap_or(0),
        })
    }

    async fn submit(&self, envelope: &str) -> Result<SubmitResponse, Error> {
        let response = self
            .http
            .post(format!("{}/transactions", self.url))
            .form(&[("tx", envelope)])
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        // The body may not be a problem document (e.g. a proxy error page)
        let body = response.bytes().await?;
        let codes = serde_json::from_slice::<Problem>(&body)
            .ok()
            .and_then(|problem| problem.extras)
            .and_then(|extras| extras.result_codes);
        Err(Error::Rejected {
            status: status.as_u16(),
            codes,
        })
    }

    async fn subscribe(&self, address: &Address) -> Result<Subscription, Error> {
        let response = self
            .http
            .get(format!(
                "{}/accounts/{}/transactions?cursor=now",
                self.url, address
            ))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        let address = address.to_string();
        let mut decoder = sse::Decoder::new();
        let events = response
            .bytes_stream()
            .take_while(move |chunk| {
                if let Err(err) = chunk {
                    debug!(account = %address, ?err, "stream transport failed");
                }
                futures::future::ready(chunk.is_ok())
            })
            .flat_map(move |chunk| {
                let events = chunk.map(|chunk| decoder.push(&chunk)).unwrap_or_default();
                futures::stream::iter(events)
            });
        Ok(events.boxed())
    }
}
