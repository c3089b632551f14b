//! Run a delivery check against a live ledger.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use commonware_runtime::{tokio, Metrics, Runner};
use herald_ledger::http;
use herald_oracle::{parse_duration, run, Config};
use std::{path::PathBuf, process::ExitCode, str::FromStr};
use tracing::{error, info, Level};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn main() -> ExitCode {
    // Parse arguments
    let matches = Command::new("herald")
        .version(crate_version())
        .about("Verify that every submitted payment is announced on the notification streams of its sender and receiver.")
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to YAML config file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(Arg::new("endpoint").long("endpoint").help("Base URL of the ledger API"))
        .arg(Arg::new("network").long("network").help("Network passphrase"))
        .arg(
            Arg::new("funder-seed")
                .long("funder-seed")
                .help("Hex-encoded seed of the funding account"),
        )
        .arg(
            Arg::new("fund-amount")
                .long("fund-amount")
                .help("Starting balance of every test account")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("accounts")
                .long("accounts")
                .help("Number of test accounts to provision")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("max-operations")
                .long("max-operations")
                .help("Accounts created per provisioning transaction")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("receiver-pool")
                .long("receiver-pool")
                .help("Number of accounts payments may be sent to")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("windows")
                .long("windows")
                .help("Comma-separated confirmation windows covered by each batch (e.g. 1,2,3,5)"),
        )
        .arg(
            Arg::new("retry-attempts")
                .long("retry-attempts")
                .help("Attempts made per submission")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("retry-delay")
                .long("retry-delay")
                .help("Delay between submission attempts (e.g. 1s)"),
        )
        .arg(
            Arg::new("cooldown")
                .long("cooldown")
                .help("Pause between batches (e.g. 20s)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Seed of the payment generator")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("keypairs")
                .long("keypairs")
                .help("Write provisioned keypairs to this JSON file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Emit logs as JSON")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Create logger
    let level = match Level::from_str(matches.get_one::<String>("log-level").unwrap()) {
        Ok(level) => level,
        Err(err) => {
            eprintln!("invalid log level: {err}");
            return ExitCode::FAILURE;
        }
    };
    if matches.get_flag("json") {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_line_number(true)
            .with_file(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    // Load config
    let cfg = match load(&matches) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    if cfg.endpoint.is_empty() {
        error!("endpoint is required");
        return ExitCode::FAILURE;
    }
    let ledger = match http::Client::new(&cfg.endpoint, cfg.request_timeout) {
        Ok(ledger) => ledger,
        Err(err) => {
            error!(?err, "unable to create ledger client");
            return ExitCode::FAILURE;
        }
    };
    info!(
        endpoint = %cfg.endpoint,
        accounts = cfg.accounts,
        batches = ?cfg.batch_sizes(),
        "loaded config"
    );

    // Start runtime
    let executor = tokio::Runner::default();
    executor.start(|context| async move {
        let report = match run(context.with_label("oracle"), ledger, cfg).await {
            Ok(report) => report,
            Err(err) => {
                error!(%err, "run aborted");
                return ExitCode::FAILURE;
            }
        };
        for batch in &report.batches {
            info!(
                batch = batch.index,
                payments = batch.payments,
                submitted = batch.submitted,
                failed = batch.failed,
                delivered = ?batch.verification.as_ref().map(|v| v.delivered.len()),
                missing = ?batch.verification.as_ref().map(|v| v.missing.len()),
                "batch summary"
            );
        }
        match report.ensure() {
            Ok(()) => {
                info!(batches = report.batches.len(), "all notifications delivered");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(%err, "delivery check failed");
                ExitCode::FAILURE
            }
        }
    })
}

/// Build the configuration from the YAML file (if any), overridden by command-line flags.
fn load(matches: &ArgMatches) -> Result<Config, String> {
    let mut cfg = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|err| format!("could not read {}: {err}", path.display()))?;
            serde_yaml::from_str(&raw)
                .map_err(|err| format!("could not parse {}: {err}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(endpoint) = matches.get_one::<String>("endpoint") {
        cfg.endpoint = endpoint.clone();
    }
    if let Some(network) = matches.get_one::<String>("network") {
        cfg.network = network.clone();
    }
    if let Some(seed) = matches.get_one::<String>("funder-seed") {
        cfg.funder_seed = seed.clone();
    }
    if let Some(amount) = matches.get_one::<u64>("fund-amount") {
        cfg.fund_amount = *amount;
    }
    if let Some(accounts) = matches.get_one::<usize>("accounts") {
        cfg.accounts = *accounts;
    }
    if let Some(max) = matches.get_one::<usize>("max-operations") {
        cfg.max_operations = *max;
    }
    if let Some(pool) = matches.get_one::<usize>("receiver-pool") {
        cfg.receiver_pool = *pool;
    }
    if let Some(windows) = matches.get_one::<String>("windows") {
        cfg.windows = windows
            .split(',')
            .map(|window| {
                window
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid window: {window}"))
            })
            .collect::<Result<_, _>>()?;
    }
    if let Some(attempts) = matches.get_one::<usize>("retry-attempts") {
        cfg.retry.max_attempts = *attempts;
    }
    if let Some(delay) = matches.get_one::<String>("retry-delay") {
        cfg.retry.delay =
            parse_duration(delay).map_err(|err| format!("invalid retry delay: {err}"))?;
    }
    if let Some(cooldown) = matches.get_one::<String>("cooldown") {
        cfg.cooldown =
            parse_duration(cooldown).map_err(|err| format!("invalid cooldown: {err}"))?;
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        cfg.seed = Some(*seed);
    }
    if let Some(path) = matches.get_one::<PathBuf>("keypairs") {
        cfg.keypairs = Some(path.clone());
    }
    cfg.validate().map_err(|err| err.to_string())?;
    Ok(cfg)
}
