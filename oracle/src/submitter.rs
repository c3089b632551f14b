//! Submit transactions with a bounded number of attempts.
//!
//! A [Request] is either a pre-signed [Envelope] (resubmitted verbatim, so its hash is stable
//! across attempts) or a recipe that is rebuilt on every attempt against the source account's
//! latest sequence number. Failed attempts are logged with the ledger's result codes and retried
//! after a flat delay until the attempt cap is reached.

use crate::{metrics, Error};
use commonware_runtime::{Clock, Metrics};
use herald_ledger::{Envelope, Keypair, Ledger, Network, Operation, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the [Submitter].
#[derive(Clone, Debug)]
pub struct Config {
    /// Network transactions built by the submitter are signed for.
    pub network: Network,

    /// Number of attempts made before giving up.
    pub max_attempts: usize,

    /// Delay between attempts.
    pub delay: Duration,
}

/// Transaction to submit.
#[derive(Clone, Debug)]
pub enum Request {
    /// Build and sign a fresh transaction on every attempt.
    Build {
        source: Keypair,
        operations: Vec<Operation>,
    },

    /// Submit an already signed transaction.
    Signed(Envelope),
}

/// Outcome of a successful submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the accepted transaction.
    pub hash: String,

    /// Confirmation window that included the transaction.
    pub ledger: u64,

    /// Attempts made, including the successful one.
    pub attempts: usize,
}

/// Submits [Request]s to a [Ledger], retrying failures.
#[derive(Clone)]
pub struct Submitter<E: Clock, L: Ledger> {
    context: E,
    ledger: L,
    cfg: Config,
    metrics: metrics::Submitter,
}

impl<E: Clock + Metrics, L: Ledger> Submitter<E, L> {
    pub fn new(context: E, ledger: L, cfg: Config) -> Self {
        let metrics = metrics::Submitter::init(context.clone());
        Self {
            context,
            ledger,
            cfg,
            metrics,
        }
    }
}

impl<E: Clock, L: Ledger> Submitter<E, L> {
    /// Submit `request`, retrying up to the configured number of attempts.
    ///
    /// Every failure is retried the same way, whether it happened while resolving the sequence
    /// number, building the transaction, or submitting it.
    pub async fn submit(&self, request: &Request) -> Result<Receipt, Error> {
        self.metrics.submissions.inc();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.metrics.attempts.inc();
            let (hash, result) = match self.prepare(request).await {
                Ok(envelope) => {
                    let hash = envelope.hash();
                    debug!(attempt, %hash, "submitting transaction");
                    (Some(hash), self.ledger.submit(&envelope.encode()).await)
                }
                Err(err) => (None, Err(err)),
            };

            match result {
                Ok(response) => {
                    debug!(
                        attempt,
                        hash = %response.hash,
                        ledger = response.ledger,
                        "transaction accepted"
                    );
                    return Ok(Receipt {
                        hash: response.hash,
                        ledger: response.ledger,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    self.metrics.failures.inc();
                    match err.result_codes() {
                        Some(codes) => warn!(
                            attempt,
                            hash = hash.as_deref().unwrap_or("none"),
                            %codes,
                            "transaction rejected"
                        ),
                        None => warn!(
                            attempt,
                            hash = hash.as_deref().unwrap_or("none"),
                            ?err,
                            "submission failed"
                        ),
                    }
                    if attempt >= self.cfg.max_attempts {
                        self.metrics.exhausted.inc();
                        info!(attempts = attempt, "giving up on transaction");
                        return Err(Error::Exhausted {
                            hash,
                            attempts: attempt,
                            source: err,
                        });
                    }
                }
            }
            self.context.sleep(self.cfg.delay).await;
        }
    }

    async fn prepare(&self, request: &Request) -> Result<Envelope, herald_ledger::Error> {
        match request {
            Request::Signed(envelope) => Ok(envelope.clone()),
            Request::Build { source, operations } => {
                let address = source.address();
                let sequence = self.ledger.sequence(&address).await?;
                Transaction::new(address, sequence + 1, self.cfg.network, operations.clone())?
                    .sign(source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use herald_ledger::{mocks, MAX_OPERATIONS};
    use rand::{rngs::StdRng, SeedableRng};

    const PASSPHRASE: &str = "submitter network";

    fn setup(
        context: deterministic::Context,
        max_attempts: usize,
    ) -> (
        mocks::Ledger<deterministic::Context>,
        Submitter<deterministic::Context, mocks::Ledger<deterministic::Context>>,
    ) {
        let ledger = mocks::Ledger::new(
            context.clone(),
            mocks::Config {
                network: Network::new(PASSPHRASE),
                latency: Duration::ZERO,
            },
        );
        let submitter = Submitter::new(
            context.with_label("submitter"),
            ledger.clone(),
            Config {
                network: Network::new(PASSPHRASE),
                max_attempts,
                delay: Duration::from_secs(1),
            },
        );
        (ledger, submitter)
    }

    fn payment(from: &Keypair, to: &Keypair, sequence: u64) -> Envelope {
        Transaction::new(
            from.address(),
            sequence,
            Network::new(PASSPHRASE),
            vec![Operation::Payment {
                destination: to.address(),
                amount: 1,
            }],
        )
        .unwrap()
        .sign(from)
        .unwrap()
    }

    #[test_traced]
    fn test_succeeds_after_transient_failures() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (ledger, submitter) = setup(context.clone(), 5);
            let mut rng = StdRng::seed_from_u64(0);
            let alice = Keypair::random(&mut rng);
            let bob = Keypair::random(&mut rng);
            ledger.fund(alice.address(), 10);
            ledger.fund(bob.address(), 0);

            ledger.fail_submissions(2);
            let envelope = payment(&alice, &bob, 1);
            let start = context.current();
            let receipt = submitter
                .submit(&Request::Signed(envelope.clone()))
                .await
                .unwrap();
            assert_eq!(receipt.attempts, 3);
            assert_eq!(receipt.hash, envelope.hash());
            assert_eq!(ledger.submissions(), 3);

            // Two flat delays separate the three attempts
            let elapsed = context.current().duration_since(start).unwrap();
            assert!(elapsed >= Duration::from_secs(2));
            assert!(elapsed < Duration::from_secs(3));
        });
    }

    #[test_traced]
    fn test_gives_up_at_cap() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (ledger, submitter) = setup(context, 4);
            let mut rng = StdRng::seed_from_u64(1);
            let alice = Keypair::random(&mut rng);
            let bob = Keypair::random(&mut rng);
            ledger.fund(alice.address(), 10);

            // Destination never exists, so every attempt is rejected
            let envelope = payment(&alice, &bob, 1);
            let err = submitter
                .submit(&Request::Signed(envelope.clone()))
                .await
                .unwrap_err();
            match err {
                Error::Exhausted {
                    hash,
                    attempts,
                    source,
                } => {
                    assert_eq!(hash, Some(envelope.hash()));
                    assert_eq!(attempts, 4);
                    let codes = source.result_codes().unwrap();
                    assert_eq!(codes.operations, vec!["op_no_destination".to_string()]);
                }
                err => panic!("unexpected error: {err}"),
            }
            assert_eq!(ledger.submissions(), 4);
        });
    }

    #[test_traced]
    fn test_single_attempt() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (ledger, submitter) = setup(context, 1);
            let mut rng = StdRng::seed_from_u64(2);
            let alice = Keypair::random(&mut rng);
            let bob = Keypair::random(&mut rng);
            ledger.fund(alice.address(), 10);
            ledger.fund(bob.address(), 0);

            ledger.fail_submissions(1);
            let err = submitter
                .submit(&Request::Signed(payment(&alice, &bob, 1)))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Exhausted { attempts: 1, .. }));
            assert_eq!(ledger.submissions(), 1);
        });
    }

    #[test_traced]
    fn test_build_resolves_sequence_each_attempt() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (ledger, submitter) = setup(context, 3);
            let mut rng = StdRng::seed_from_u64(3);
            let funder = Keypair::random(&mut rng);
            let fresh = Keypair::random(&mut rng);
            ledger.fund(funder.address(), 1_000);

            // Someone else consumes sequence 1 first
            let other = Keypair::random(&mut rng);
            ledger.fund(other.address(), 0);
            ledger.submit(&payment(&funder, &other, 1).encode()).await.unwrap();

            ledger.fail_submissions(1);
            let request = Request::Build {
                source: funder.clone(),
                operations: vec![Operation::CreateAccount {
                    destination: fresh.address(),
                    starting_balance: 100,
                }],
            };
            let receipt = submitter.submit(&request).await.unwrap();
            assert_eq!(receipt.attempts, 2);
            assert_eq!(ledger.account(&fresh.address()).await.unwrap().balance, 100);
            assert_eq!(ledger.sequence(&funder.address()).await.unwrap(), 2);
        });
    }

    #[test_traced]
    fn test_build_errors_never_reach_ledger() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (ledger, submitter) = setup(context, 5);
            let mut rng = StdRng::seed_from_u64(4);
            let funder = Keypair::random(&mut rng);
            ledger.fund(funder.address(), 1_000);

            let operations = (0..=MAX_OPERATIONS)
                .map(|_| Operation::CreateAccount {
                    destination: Keypair::random(&mut rng).address(),
                    starting_balance: 1,
                })
                .collect();
            let err = submitter
                .submit(&Request::Build {
                    source: funder,
                    operations,
                })
                .await
                .unwrap_err();
            match err {
                Error::Exhausted {
                    hash,
                    attempts,
                    source,
                } => {
                    assert!(hash.is_none());
                    assert_eq!(attempts, 5);
                    assert!(matches!(
                        source,
                        herald_ledger::Error::InvalidTransaction(_)
                    ));
                }
                err => panic!("unexpected error: {err}"),
            }
            assert_eq!(ledger.submissions(), 0);
        });
    }

    #[test_traced]
    fn test_unknown_source_is_retried() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (ledger, submitter) = setup(context, 2);
            let mut rng = StdRng::seed_from_u64(5);
            let ghost = Keypair::random(&mut rng);
            let err = submitter
                .submit(&Request::Build {
                    source: ghost.clone(),
                    operations: vec![Operation::Payment {
                        destination: ghost.address(),
                        amount: 1,
                    }],
                })
                .await
                .unwrap_err();
            match err {
                Error::Exhausted {
                    hash,
                    attempts,
                    source,
                } => {
                    assert!(hash.is_none());
                    assert_eq!(attempts, 2);
                    assert!(matches!(source, herald_ledger::Error::AccountNotFound(_)));
                }
                err => panic!("unexpected error: {err}"),
            }
        });
    }
}
