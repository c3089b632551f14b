//! In-memory [crate::Ledger] for testing.
//!
//! The mock applies transactions immediately (every accepted submission closes its own
//! confirmation window) and publishes a notification to every open subscription of every account
//! the transaction touched after the configured latency. Faults can be injected to exercise retry
//! and reconnect paths.

use crate::{
    AccountInfo, Address, Envelope, Error, Network, Operation, ResultCodes, SubmitResponse,
    Subscription,
};
use bytes::Bytes;
use commonware_runtime::{Clock, Spawner};
use futures::{channel::mpsc, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Configuration for the mock [Ledger].
#[derive(Clone, Debug)]
pub struct Config {
    /// Network transactions must be signed for.
    pub network: Network,

    /// Delay between applying a transaction and notifying subscribers.
    pub latency: Duration,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Address, AccountInfo>,
    subscribers: HashMap<Address, Vec<mpsc::UnboundedSender<Bytes>>>,
    ledger: u64,

    submissions: usize,
    subscriptions: HashMap<Address, usize>,
    applied: Vec<String>,

    fail_submissions: usize,
    fail_subscriptions: usize,
    dropped: HashSet<String>,
}

fn rejected(transaction: &str, operations: Vec<String>) -> Error {
    Error::Rejected {
        status: 400,
        codes: Some(ResultCodes {
            transaction: transaction.into(),
            operations,
        }),
    }
}

/// A simulated ledger.
#[derive(Clone)]
pub struct Ledger<E: Spawner + Clock> {
    context: E,
    cfg: Config,
    state: Arc<Mutex<State>>,
}

impl<E: Spawner + Clock> Ledger<E> {
    pub fn new(context: E, cfg: Config) -> Self {
        Self {
            context,
            cfg,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Create (or top up) an account outside of any transaction.
    pub fn fund(&self, address: Address, balance: u64) {
        let mut state = self.state.lock().unwrap();
        state
            .accounts
            .entry(address)
            .or_insert(AccountInfo {
                sequence: 0,
                balance: 0,
            })
            .balance += balance;
    }

    /// Fail the next `n` submissions before they are inspected.
    pub fn fail_submissions(&self, n: usize) {
        self.state.lock().unwrap().fail_submissions = n;
    }

    /// Fail the next `n` subscription attempts.
    pub fn fail_subscriptions(&self, n: usize) {
        self.state.lock().unwrap().fail_subscriptions = n;
    }

    /// Apply the transaction with `hash` without notifying anyone.
    pub fn drop_notifications(&self, hash: &str) {
        self.state.lock().unwrap().dropped.insert(hash.to_string());
    }

    /// Close every open subscription of `address`.
    pub fn disconnect(&self, address: &Address) {
        self.state.lock().unwrap().subscribers.remove(address);
    }

    /// Push a raw payload to every open subscription of `address`.
    pub fn inject(&self, address: &Address, payload: Bytes) {
        let mut state = self.state.lock().unwrap();
        if let Some(subscribers) = state.subscribers.get_mut(address) {
            subscribers.retain(|subscriber| subscriber.unbounded_send(payload.clone()).is_ok());
        }
    }

    /// Number of submissions received (including failed ones).
    pub fn submissions(&self) -> usize {
        self.state.lock().unwrap().submissions
    }

    /// Number of subscriptions successfully opened for `address`.
    pub fn subscriptions(&self, address: &Address) -> usize {
        let state = self.state.lock().unwrap();
        state.subscriptions.get(address).copied().unwrap_or(0)
    }

    /// Number of subscriptions for `address` that are currently open.
    pub fn open_subscriptions(&self, address: &Address) -> usize {
        let state = self.state.lock().unwrap();
        state
            .subscribers
            .get(address)
            .map(|subscribers| subscribers.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Hashes of applied transactions, in order.
    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    /// Validate and apply a submission.
    ///
    /// Returns the hash of the transaction, its source, and every account it touched.
    fn apply(
        &self,
        state: &mut State,
        encoded: &str,
    ) -> Result<(String, Address, Vec<Address>), Error> {
        let envelope = Envelope::decode(encoded).map_err(|_| rejected("tx_malformed", vec![]))?;
        let transaction = envelope.transaction();
        if transaction.network != self.cfg.network || !envelope.verify() {
            return Err(rejected("tx_bad_auth", vec![]));
        }
        let Some(source) = state.accounts.get(&transaction.source).copied() else {
            return Err(rejected("tx_no_source_account", vec![]));
        };
        if transaction.sequence != source.sequence + 1 {
            return Err(rejected("tx_bad_seq", vec![]));
        }

        // Operations are applied to a scratch copy so a failure leaves no trace
        let mut scratch = HashMap::new();
        scratch.insert(transaction.source.clone(), source);
        let mut codes = Vec::with_capacity(transaction.operations.len());
        let mut failed = false;
        for operation in &transaction.operations {
            let destination = operation.destination().clone();
            let existing = scratch
                .get(&destination)
                .copied()
                .or_else(|| state.accounts.get(&destination).copied());
            let code = match (operation, existing) {
                (Operation::CreateAccount { .. }, Some(_)) => "op_already_exists",
                (Operation::Payment { .. }, None) => "op_no_destination",
                _ if scratch[&transaction.source].balance < operation.amount() => {
                    "op_underfunded"
                }
                _ => {
                    let amount = operation.amount();
                    if let Some(sender) = scratch.get_mut(&transaction.source) {
                        sender.balance -= amount;
                    }
                    let receiver = scratch.entry(destination).or_insert(existing.unwrap_or(
                        AccountInfo {
                            sequence: 0,
                            balance: 0,
                        },
                    ));
                    receiver.balance += amount;
                    "op_success"
                }
            };
            failed |= code != "op_success";
            codes.push(code.to_string());
        }
        if failed {
            return Err(rejected("tx_failed", codes));
        }

        // Commit
        let hash = envelope.hash();
        let mut touched = Vec::with_capacity(scratch.len());
        for (address, mut account) in scratch {
            if address == transaction.source {
                account.sequence = transaction.sequence;
            }
            state.accounts.insert(address.clone(), account);
            touched.push(address);
        }
        state.ledger += 1;
        state.applied.push(hash.clone());
        Ok((hash, transaction.source.clone(), touched))
    }
}

impl<E: Spawner + Clock> crate::Ledger for Ledger<E> {
    async fn account(&self, address: &Address) -> Result<AccountInfo, Error> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(address)
            .copied()
            .ok_or_else(|| Error::AccountNotFound(address.to_string()))
    }

    async fn submit(&self, envelope: &str) -> Result<SubmitResponse, Error> {
        let (response, notification, subscribers) = {
            let mut state = self.state.lock().unwrap();
            state.submissions += 1;
            if state.fail_submissions > 0 {
                state.fail_submissions -= 1;
                return Err(Error::Unavailable);
            }
            let (hash, source, touched) = self.apply(&mut state, envelope)?;
            let response = SubmitResponse {
                hash: hash.clone(),
                ledger: state.ledger,
            };

            let mut subscribers = Vec::new();
            if !state.dropped.contains(&hash) {
                for address in &touched {
                    if let Some(senders) = state.subscribers.get_mut(address) {
                        senders.retain(|sender| !sender.is_closed());
                        subscribers.extend(senders.iter().cloned());
                    }
                }
            }
            let notification = serde_json::json!({
                "hash": hash,
                "source_account": source.to_string(),
                "ledger": state.ledger,
            });
            (response, Bytes::from(notification.to_string()), subscribers)
        };

        let publish = move || {
            for subscriber in subscribers {
                let _ = subscriber.unbounded_send(notification.clone());
            }
        };
        if self.cfg.latency.is_zero() {
            publish();
        } else {
            let latency = self.cfg.latency;
            self.context.clone().spawn(move |context| async move {
                context.sleep(latency).await;
                publish();
            });
        }
        Ok(response)
    }

    async fn subscribe(&self, address: &Address) -> Result<Subscription, Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscriptions > 0 {
            state.fail_subscriptions -= 1;
            return Err(Error::Unavailable);
        }
        let (sender, receiver) = mpsc::unbounded();
        state
            .subscribers
            .entry(address.clone())
            .or_default()
            .push(sender);
        *state.subscriptions.entry(address.clone()).or_default() += 1;
        Ok(receiver.boxed())
    }
}
