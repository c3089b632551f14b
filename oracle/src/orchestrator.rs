//! Drive a delivery run: provision accounts, watch them, and verify escalating payment batches.
//!
//! Each batch proceeds strictly in order:
//!
//! 1. Generate one payment per sender, registering its hash as pending on both the sender and
//!    the receiver.
//! 2. Submit every payment concurrently (staggered), waiting for all submissions to resolve.
//! 3. Wait for the settle window, which grows with the size of the batch.
//! 4. Verify that every pending hash was delivered, then clear all records.
//!
//! The run halts at the first batch that fails. Watchers keep running across batches and are
//! stopped once the run ends.

use crate::{
    account::TestAccount,
    metrics, payment, provision,
    submitter::{self, Request, Submitter},
    verifier::{self, Verification},
    watcher::{self, Supervisor, Watcher},
    Config, Error,
};
use commonware_runtime::{Clock, Metrics, Spawner};
use futures::future::join_all;
use herald_ledger::{Keypair, Ledger, Network};
use rand::{rngs::StdRng, CryptoRng, Rng, RngCore, SeedableRng};
use std::{collections::HashSet, time::Duration};
use tracing::{debug, error, info, warn};

/// Outcome of a single batch.
#[derive(Clone, Debug)]
pub struct BatchReport {
    /// Position of the batch in the run.
    pub index: usize,

    /// Number of payments requested.
    pub requested: usize,

    /// Number of payments generated (at most one per account).
    pub payments: usize,

    /// Payments accepted by the ledger.
    pub submitted: usize,

    /// Payments that exhausted their retries.
    pub failed: usize,

    /// Time waited before verification (absent if verification was skipped).
    pub settle: Option<Duration>,

    /// Delivery check (absent if verification was skipped).
    pub verification: Option<Verification>,
}

impl BatchReport {
    pub fn passed(&self) -> bool {
        self.failed == 0
            && self
                .verification
                .as_ref()
                .is_some_and(|verification| verification.passed())
    }
}

/// Outcome of a run.
#[derive(Clone, Debug, Default)]
pub struct Report {
    /// Batches executed, in order. Only the last one can have failed.
    pub batches: Vec<BatchReport>,
}

impl Report {
    pub fn passed(&self) -> bool {
        !self.batches.is_empty() && self.batches.iter().all(BatchReport::passed)
    }

    /// Convert the first failed batch into an error.
    pub fn ensure(&self) -> Result<(), Error> {
        for batch in &self.batches {
            if batch.failed > 0 {
                return Err(Error::Submissions {
                    batch: batch.index,
                    failed: batch.failed,
                });
            }
            match &batch.verification {
                Some(verification) if !verification.passed() => {
                    return Err(Error::Verification {
                        batch: batch.index,
                        missing: verification.missing.len(),
                    });
                }
                Some(_) => {}
                None => {
                    return Err(Error::Verification {
                        batch: batch.index,
                        missing: batch.payments * 2,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Coordinates the accounts, watchers, and batches of a run.
pub struct Orchestrator<E: Clock + Spawner + Metrics + RngCore + CryptoRng, L: Ledger> {
    context: E,
    ledger: L,
    cfg: Config,

    network: Network,
    funder: Keypair,
    submitter: Submitter<E, L>,
    accounts: Vec<TestAccount>,

    rng: StdRng,
    offset: usize,
    metrics: metrics::Orchestrator,
}

impl<E: Clock + Spawner + Metrics + RngCore + CryptoRng, L: Ledger> Orchestrator<E, L> {
    /// Validate `cfg` and prepare a run against `ledger`.
    pub fn new(mut context: E, ledger: L, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        let funder = Keypair::from_seed(&cfg.funder_seed)?;
        let network = Network::new(&cfg.network);
        let submitter = Submitter::new(
            context.with_label("submitter"),
            ledger.clone(),
            submitter::Config {
                network,
                max_attempts: cfg.retry.max_attempts,
                delay: cfg.retry.delay,
            },
        );
        let seed = cfg.seed.unwrap_or_else(|| context.gen());
        info!(seed, "seeded payment generator");
        let metrics = metrics::Orchestrator::init(context.with_label("orchestrator"));
        Ok(Self {
            context,
            ledger,
            cfg,
            network,
            funder,
            submitter,
            accounts: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            offset: 0,
            metrics,
        })
    }

    /// Provisioned accounts, in creation order.
    pub fn accounts(&self) -> &[TestAccount] {
        &self.accounts
    }

    /// Create and fund the test accounts.
    pub async fn provision(&mut self) -> Result<(), Error> {
        self.log_funder("before provisioning").await;
        let mut rng = self.context.clone();
        self.accounts = provision::provision(
            &self.submitter,
            &self.funder,
            self.cfg.accounts,
            self.cfg.fund_amount,
            self.cfg.max_operations,
            &mut rng,
        )
        .await?;
        info!(accounts = self.accounts.len(), "provisioned accounts");
        if let Some(path) = &self.cfg.keypairs {
            provision::persist(path, &self.accounts)?;
        }
        Ok(())
    }

    /// Start one watcher per account.
    pub async fn watch(&self) -> Supervisor {
        let metrics = metrics::Watcher::init(self.context.with_label("watcher"));
        let cfg = watcher::Config {
            initial_backoff: self.cfg.reconnect.initial,
            max_backoff: self.cfg.reconnect.max,
        };
        let mut supervisor = Supervisor::new();
        for account in &self.accounts {
            let watcher = Watcher::new(
                self.context.with_label("watcher"),
                self.ledger.clone(),
                cfg.clone(),
                account,
                metrics.clone(),
            );
            supervisor.push(watcher.start());
            self.context.sleep(self.cfg.watcher_stagger).await;
        }
        info!(watchers = supervisor.len(), "started watchers");
        supervisor
    }

    /// Run every configured batch against the provisioned accounts, halting at the first failure.
    pub async fn run(mut self) -> Result<Report, Error> {
        let supervisor = self.watch().await;
        let result = self.batches().await;
        supervisor.shutdown();
        self.log_funder("after run").await;
        result
    }

    async fn batches(&mut self) -> Result<Report, Error> {
        let mut report = Report::default();
        for (index, size) in self.cfg.batch_sizes().into_iter().enumerate() {
            if index > 0 {
                debug!(cooldown = ?self.cfg.cooldown, "cooling down");
                self.context.sleep(self.cfg.cooldown).await;
            }
            let batch = self.batch(index, size).await?;
            let passed = batch.passed();
            report.batches.push(batch);
            if !passed {
                error!(batch = index, "halting run");
                break;
            }
        }
        Ok(report)
    }

    /// Generate, submit, and verify a batch of `size` payments.
    pub async fn batch(&mut self, index: usize, size: usize) -> Result<BatchReport, Error> {
        let total = self.accounts.len();
        let senders = size.min(total);
        if senders < size {
            warn!(
                batch = index,
                requested = size,
                senders,
                "batch limited to one payment per account"
            );
        }
        let pool = self.cfg.receiver_pool.min(total);

        // Generate and register
        let mut payments = Vec::with_capacity(senders);
        let mut hashes = HashSet::with_capacity(senders);
        for i in 0..senders {
            let sender = &self.accounts[(self.offset + i) % total];
            let payment = payment::generate(
                &self.ledger,
                self.network,
                &self.accounts[..pool],
                sender,
                self.cfg.payment_amount,
                &mut self.rng,
            )
            .await?;
            if !hashes.insert(payment.hash.clone()) {
                return Err(Error::DuplicateHash(payment.hash));
            }
            let receiver = &self.accounts[payment.receiver];
            verifier::register(sender, receiver, &payment.hash);
            debug!(
                batch = index,
                sender = %sender.address(),
                receiver = %receiver.address(),
                hash = %payment.hash,
                "generated payment"
            );
            payments.push(payment);
        }
        self.offset = (self.offset + senders) % total;
        self.metrics.payments.inc_by(senders as u64);

        // Submit
        info!(batch = index, payments = senders, "submitting batch");
        let mut handles = Vec::with_capacity(senders);
        for payment in payments {
            let submitter = self.submitter.clone();
            handles.push(
                self.context
                    .with_label("payment")
                    .spawn(move |_| async move {
                        let result = submitter.submit(&Request::Signed(payment.envelope)).await;
                        (payment.hash, result)
                    }),
            );
            self.context.sleep(self.cfg.submission_stagger).await;
        }
        let mut submitted = 0;
        let mut failed = 0;
        for result in join_all(handles).await {
            match result {
                Ok((_, Ok(_))) => submitted += 1,
                Ok((hash, Err(err))) => {
                    error!(batch = index, %hash, ?err, "payment not submitted");
                    failed += 1;
                }
                Err(err) => {
                    error!(batch = index, ?err, "payment task failed");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            error!(batch = index, submitted, failed, "skipping verification");
            verifier::reset(&self.accounts);
            return Ok(BatchReport {
                index,
                requested: size,
                payments: senders,
                submitted,
                failed,
                settle: None,
                verification: None,
            });
        }

        // Settle and verify
        let settle = self.cfg.settle(senders);
        info!(batch = index, ?settle, "waiting for notifications");
        self.context.sleep(settle).await;
        let verification = verifier::verify(&self.accounts);
        verifier::reset(&self.accounts);
        self.metrics.batches.inc();
        self.metrics
            .delivered
            .inc_by(verification.delivered.len() as u64);
        self.metrics
            .missing
            .inc_by(verification.missing.len() as u64);
        if verification.passed() {
            info!(
                batch = index,
                payments = senders,
                delivered = verification.delivered.len(),
                "batch verified"
            );
        } else {
            error!(
                batch = index,
                payments = senders,
                delivered = verification.delivered.len(),
                missing = verification.missing.len(),
                "batch failed verification"
            );
        }
        Ok(BatchReport {
            index,
            requested: size,
            payments: senders,
            submitted,
            failed,
            settle: Some(settle),
            verification: Some(verification),
        })
    }

    async fn log_funder(&self, stage: &str) {
        let address = self.funder.address();
        match self.ledger.account(&address).await {
            Ok(account) => info!(
                stage,
                funder = %address,
                balance = account.balance,
                sequence = account.sequence,
                "funding account"
            ),
            Err(err) => warn!(stage, funder = %address, ?err, "unable to fetch funding account"),
        }
    }
}

/// Provision accounts and run every configured batch.
pub async fn run<E, L>(context: E, ledger: L, cfg: Config) -> Result<Report, Error>
where
    E: Clock + Spawner + Metrics + RngCore + CryptoRng,
    L: Ledger,
{
    let mut orchestrator = Orchestrator::new(context, ledger, cfg)?;
    orchestrator.provision().await?;
    orchestrator.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use herald_ledger::mocks;

    const PASSPHRASE: &str = "orchestrator network";

    type Mock = mocks::Ledger<deterministic::Context>;

    fn setup(
        context: &mut deterministic::Context,
        latency: Duration,
        accounts: usize,
    ) -> (Mock, Config) {
        let funder = Keypair::random(context);
        let ledger = mocks::Ledger::new(
            context.clone(),
            mocks::Config {
                network: Network::new(PASSPHRASE),
                latency,
            },
        );
        ledger.fund(funder.address(), 1_000_000);
        let cfg = Config {
            funder_seed: funder.seed(),
            fund_amount: 100,
            network: PASSPHRASE.into(),
            accounts,
            receiver_pool: accounts,
            windows: vec![1],
            window_capacity: 4,
            cooldown: Duration::from_secs(1),
            seed: Some(0),
            ..Default::default()
        };
        (ledger, cfg)
    }

    #[test_traced]
    fn test_single_batch_passes() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, cfg) = setup(&mut context, Duration::from_millis(500), 5);
            let report = run(context.clone(), ledger.clone(), cfg).await.unwrap();

            assert!(report.passed());
            report.ensure().unwrap();
            assert_eq!(report.batches.len(), 1);
            let batch = &report.batches[0];
            assert_eq!(batch.payments, 4);
            assert_eq!(batch.submitted, 4);
            assert_eq!(batch.settle, Some(Duration::from_secs(10)));
            let verification = batch.verification.as_ref().unwrap();
            assert_eq!(verification.delivered.len(), 8);

            // One provisioning transaction followed by four distinct payments
            let applied = ledger.applied();
            assert_eq!(applied.len(), 5);
            let unique: HashSet<_> = applied.iter().collect();
            assert_eq!(unique.len(), 5);
        });
    }

    #[test_traced]
    fn test_escalating_batches() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, mut cfg) = setup(&mut context, Duration::from_millis(200), 6);
            cfg.windows = vec![1, 2, 3];
            cfg.window_capacity = 2;
            let start = context.current();
            let report = run(context.clone(), ledger.clone(), cfg).await.unwrap();
            assert!(report.passed());

            let payments: Vec<_> = report.batches.iter().map(|b| b.payments).collect();
            assert_eq!(payments, vec![2, 4, 6]);
            assert!(report.batches.iter().all(|b| {
                b.verification.as_ref().unwrap().delivered.len() == b.payments * 2
            }));
            assert_eq!(ledger.applied().len(), 1 + 2 + 4 + 6);

            // Settle windows (10s, 15s, 20s) and two cooldowns bound the run from below
            let elapsed = context.current().duration_since(start).unwrap();
            assert!(elapsed >= Duration::from_secs(47));
        });
    }

    #[test_traced]
    fn test_batch_larger_than_account_set() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, mut cfg) = setup(&mut context, Duration::from_millis(100), 3);
            cfg.window_capacity = 10;
            let report = run(context.clone(), ledger, cfg).await.unwrap();
            assert!(report.passed());
            assert_eq!(report.batches[0].requested, 10);
            assert_eq!(report.batches[0].payments, 3);
        });
    }

    #[test_traced]
    fn test_late_notifications_halt_run() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            // Notifications arrive long after the 10s settle window
            let (ledger, mut cfg) = setup(&mut context, Duration::from_secs(60), 5);
            cfg.windows = vec![1, 2];
            let report = run(context.clone(), ledger.clone(), cfg).await.unwrap();

            assert!(!report.passed());
            assert_eq!(report.batches.len(), 1);
            let verification = report.batches[0].verification.as_ref().unwrap();
            assert!(verification.delivered.is_empty());
            assert_eq!(verification.missing.len(), 8);
            assert!(matches!(
                report.ensure(),
                Err(Error::Verification {
                    batch: 0,
                    missing: 8
                })
            ));

            // The second batch never ran
            assert_eq!(ledger.applied().len(), 5);
        });
    }

    #[test_traced]
    fn test_single_dropped_notification_halts_run() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, mut cfg) = setup(&mut context, Duration::from_millis(100), 5);
            cfg.windows = vec![1, 2];
            let mut orchestrator =
                Orchestrator::new(context.clone(), ledger.clone(), cfg).unwrap();
            orchestrator.provision().await.unwrap();
            let accounts = orchestrator.accounts().to_vec();

            // The first payment of the batch is drawn from a generator seeded the same way
            let mut rng = StdRng::seed_from_u64(0);
            let lost = payment::generate(
                &ledger,
                Network::new(PASSPHRASE),
                &accounts,
                &accounts[0],
                1,
                &mut rng,
            )
            .await
            .unwrap();
            ledger.drop_notifications(&lost.hash);

            let report = orchestrator.run().await.unwrap();
            assert!(!report.passed());
            assert_eq!(report.batches.len(), 1);
            let batch = &report.batches[0];
            assert_eq!(batch.payments, 4);
            assert_eq!(batch.submitted, 4);
            let verification = batch.verification.as_ref().unwrap();
            assert_eq!(verification.delivered.len(), 6);
            assert!(verification.delivered.iter().all(|r| r.hash != lost.hash));
            assert_eq!(
                verification.missing,
                vec![
                    verifier::Record {
                        account: accounts[0].address().clone(),
                        hash: lost.hash.clone(),
                    },
                    verifier::Record {
                        account: accounts[lost.receiver].address().clone(),
                        hash: lost.hash.clone(),
                    },
                ]
            );
            assert!(matches!(
                report.ensure(),
                Err(Error::Verification {
                    batch: 0,
                    missing: 2
                })
            ));

            // The dropped payment was still applied, and the second batch never ran
            assert!(ledger.applied().contains(&lost.hash));
            assert_eq!(ledger.applied().len(), 5);
        });
    }

    #[test_traced]
    fn test_exhausted_submissions_skip_verification() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, mut cfg) = setup(&mut context, Duration::from_millis(100), 5);
            cfg.retry.max_attempts = 2;
            cfg.retry.delay = Duration::from_millis(10);
            let mut orchestrator =
                Orchestrator::new(context.clone(), ledger.clone(), cfg).unwrap();
            orchestrator.provision().await.unwrap();
            let accounts = orchestrator.accounts().to_vec();

            ledger.fail_submissions(usize::MAX);
            let report = orchestrator.run().await.unwrap();
            let batch = &report.batches[0];
            assert_eq!(batch.failed, 4);
            assert!(batch.verification.is_none());
            assert!(matches!(
                report.ensure(),
                Err(Error::Submissions {
                    batch: 0,
                    failed: 4
                })
            ));
            assert_eq!(ledger.submissions(), 1 + 4 * 2);
            assert!(accounts.iter().all(|a| a.deliveries().is_empty()));
        });
    }

    #[test_traced]
    fn test_batches_reset_records() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, cfg) = setup(&mut context, Duration::from_millis(100), 5);
            let mut orchestrator = Orchestrator::new(context.clone(), ledger, cfg).unwrap();
            orchestrator.provision().await.unwrap();
            let supervisor = orchestrator.watch().await;
            assert_eq!(supervisor.len(), 5);

            for index in 0..3 {
                let batch = orchestrator.batch(index, 4).await.unwrap();
                assert!(batch.passed());
                assert_eq!(batch.verification.unwrap().delivered.len(), 8);
                assert!(orchestrator
                    .accounts()
                    .iter()
                    .all(|a| a.deliveries().is_empty()));
            }
            supervisor.shutdown();
        });
    }

    #[test_traced]
    fn test_receivers_drawn_from_pool() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, mut cfg) = setup(&mut context, Duration::ZERO, 6);
            cfg.receiver_pool = 2;
            cfg.window_capacity = 6;
            let mut orchestrator =
                Orchestrator::new(context.clone(), ledger.clone(), cfg).unwrap();
            orchestrator.provision().await.unwrap();
            let pool: Vec<_> = orchestrator.accounts()[..2]
                .iter()
                .map(|a| a.address().clone())
                .collect();
            let outside: Vec<_> = orchestrator.accounts()[2..]
                .iter()
                .map(|a| a.address().clone())
                .collect();

            let supervisor = orchestrator.watch().await;
            assert!(orchestrator.batch(0, 6).await.unwrap().passed());
            supervisor.shutdown();

            // Accounts outside the pool only ever send
            for address in outside {
                assert_eq!(ledger.account(&address).await.unwrap().balance, 99);
            }

            // Pool members never pay themselves, so together they received 6 payments and sent 2
            let mut total = 0;
            for address in pool {
                total += ledger.account(&address).await.unwrap().balance;
            }
            assert_eq!(total, 200 + 6 - 2);
        });
    }

    #[test_traced]
    fn test_invalid_config_rejected() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let (ledger, mut cfg) = setup(&mut context, Duration::ZERO, 5);
            cfg.accounts = 1;
            assert!(matches!(
                Orchestrator::new(context.clone(), ledger.clone(), cfg.clone()),
                Err(Error::InvalidConfig(_))
            ));

            cfg.accounts = 5;
            cfg.funder_seed = "zz".into();
            assert!(matches!(
                Orchestrator::new(context, ledger, cfg),
                Err(Error::Ledger(herald_ledger::Error::InvalidSeed))
            ));
        });
    }
}
