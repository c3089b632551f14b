//! Configuration of a delivery run.

use crate::Error;
use herald_ledger::MAX_OPERATIONS;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Largest retry cap accepted by [Config::validate].
pub const MAX_ATTEMPTS: usize = 10;

/// Retry policy of the submitter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retry {
    /// Number of attempts made before a submission is abandoned.
    pub max_attempts: usize,

    /// Flat delay between attempts.
    #[serde(with = "duration")]
    pub delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Backoff applied by watchers between failed connection attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reconnect {
    /// Delay after the first failure.
    #[serde(with = "duration")]
    pub initial: Duration,

    /// Upper bound of the delay, reached by doubling.
    #[serde(with = "duration")]
    pub max: Duration,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
        }
    }
}

/// Configuration of a delivery run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hex-encoded seed of the account that funds every test account.
    pub funder_seed: String,

    /// Starting balance of every test account.
    pub fund_amount: u64,

    /// Base URL of the ledger API.
    pub endpoint: String,

    /// Network passphrase transactions are signed for.
    pub network: String,

    /// Accounts created per provisioning transaction.
    pub max_operations: usize,

    /// Number of test accounts to provision.
    pub accounts: usize,

    /// Amount moved by each payment.
    pub payment_amount: u64,

    /// Number of accounts (from the front of the provisioned set) payments may be sent to.
    pub receiver_pool: usize,

    /// Confirmation windows covered by each batch, in order.
    pub windows: Vec<usize>,

    /// Transactions a single confirmation window can hold.
    pub window_capacity: usize,

    /// Expected duration of a confirmation window.
    #[serde(with = "duration")]
    pub window_duration: Duration,

    /// Settle time granted to even the smallest batch.
    #[serde(with = "duration")]
    pub settle_minimum: Duration,

    /// Pause between consecutive batches.
    #[serde(with = "duration")]
    pub cooldown: Duration,

    /// Delay between launching consecutive submissions of a batch.
    #[serde(with = "duration")]
    pub submission_stagger: Duration,

    /// Delay between starting consecutive watchers.
    #[serde(with = "duration")]
    pub watcher_stagger: Duration,

    /// Timeout of non-streaming ledger requests.
    #[serde(with = "duration")]
    pub request_timeout: Duration,

    pub retry: Retry,
    pub reconnect: Reconnect,

    /// Seed of the payment RNG. Drawn at random when absent.
    pub seed: Option<u64>,

    /// Where to write the provisioned keypairs, if anywhere.
    pub keypairs: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            funder_seed: String::new(),
            fund_amount: 100,
            endpoint: String::new(),
            network: String::new(),
            max_operations: MAX_OPERATIONS,
            accounts: 500,
            payment_amount: 1,
            receiver_pool: 30,
            windows: vec![1, 2, 3, 5],
            window_capacity: 100,
            window_duration: Duration::from_secs(5),
            settle_minimum: Duration::from_secs(5),
            cooldown: Duration::from_secs(20),
            submission_stagger: Duration::from_millis(50),
            watcher_stagger: Duration::from_millis(4),
            request_timeout: Duration::from_secs(30),
            retry: Retry::default(),
            reconnect: Reconnect::default(),
            seed: None,
            keypairs: None,
        }
    }
}

impl Config {
    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| Err(Error::InvalidConfig(reason));
        if self.funder_seed.is_empty() {
            return invalid("funder seed is required".into());
        }
        if self.network.is_empty() {
            return invalid("network passphrase is required".into());
        }
        if self.max_operations == 0 || self.max_operations > MAX_OPERATIONS {
            return invalid(format!(
                "max operations must be between 1 and {MAX_OPERATIONS}"
            ));
        }
        if self.accounts < 2 {
            return invalid("at least 2 accounts are required".into());
        }
        if self.receiver_pool < 2 {
            return invalid("receiver pool must hold at least 2 accounts".into());
        }
        if self.windows.is_empty() || self.windows.contains(&0) {
            return invalid("windows must be non-empty and positive".into());
        }
        if self.window_capacity == 0 {
            return invalid("window capacity must be positive".into());
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_ATTEMPTS {
            return invalid(format!(
                "retry attempts must be between 1 and {MAX_ATTEMPTS}"
            ));
        }
        if self.reconnect.initial.is_zero() || self.reconnect.initial > self.reconnect.max {
            return invalid("reconnect backoff must satisfy 0 < initial <= max".into());
        }
        Ok(())
    }

    /// Number of payments submitted by each batch, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.windows
            .iter()
            .map(|windows| windows * self.window_capacity)
            .collect()
    }

    /// Time to wait after submitting `transactions` before verifying delivery.
    pub fn settle(&self, transactions: usize) -> Duration {
        let scaled = self.window_duration.as_nanos() * transactions as u128
            / self.window_capacity.max(1) as u128;
        self.settle_minimum + Duration::from_nanos(scaled.min(u64::MAX as u128) as u64)
    }
}

/// Parse a human-readable duration (e.g. `250ms`, `20s`, `1m 30s`).
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw.trim())
}

mod duration {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            funder_seed: "00".repeat(32),
            network: "test network".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = valid();
        cfg.validate().unwrap();
        assert_eq!(cfg.batch_sizes(), vec![100, 200, 300, 500]);
        assert_eq!(cfg.receiver_pool, 30);
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn test_settle_scales_with_batch() {
        let cfg = valid();
        assert_eq!(cfg.settle(0), Duration::from_secs(5));
        assert_eq!(cfg.settle(100), Duration::from_secs(10));
        assert_eq!(cfg.settle(500), Duration::from_secs(30));
        assert_eq!(cfg.settle(4), Duration::from_millis(5_200));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c| c.funder_seed.clear()),
            Box::new(|c| c.network.clear()),
            Box::new(|c| c.max_operations = 0),
            Box::new(|c| c.max_operations = MAX_OPERATIONS + 1),
            Box::new(|c| c.accounts = 1),
            Box::new(|c| c.receiver_pool = 1),
            Box::new(|c| c.windows.clear()),
            Box::new(|c| c.windows = vec![1, 0]),
            Box::new(|c| c.window_capacity = 0),
            Box::new(|c| c.retry.max_attempts = 0),
            Box::new(|c| c.retry.max_attempts = MAX_ATTEMPTS + 1),
            Box::new(|c| c.reconnect.initial = Duration::ZERO),
            Box::new(|c| c.reconnect.max = Duration::from_millis(1)),
        ];
        for mutate in cases {
            let mut cfg = valid();
            mutate(&mut cfg);
            assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 1m 30s ").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("20").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5 fortnights").is_err());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let cfg: Config = serde_yaml::from_str(
            r#"
funder_seed: "abcd"
network: "Test SDF Network"
endpoint: "http://localhost:8000"
accounts: 40
windows: [1, 2]
cooldown: 500ms
retry:
  max_attempts: 3
reconnect:
  max: 2s
"#,
        )
        .unwrap();
        assert_eq!(cfg.accounts, 40);
        assert_eq!(cfg.batch_sizes(), vec![100, 200]);
        assert_eq!(cfg.cooldown, Duration::from_millis(500));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.delay, Duration::from_secs(1));
        assert_eq!(cfg.reconnect.initial, Duration::from_millis(100));
        assert_eq!(cfg.reconnect.max, Duration::from_secs(2));
        assert_eq!(cfg.receiver_pool, 30);
        assert!(cfg.seed.is_none());
    }
}
