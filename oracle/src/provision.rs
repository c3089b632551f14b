//! Create and fund the test accounts used by a run.

use crate::{
    account::{KeypairFile, TestAccount},
    submitter::{Request, Submitter},
    Error,
};
use commonware_runtime::Clock;
use herald_ledger::{Keypair, Ledger, Operation};
use rand::{CryptoRng, Rng};
use std::path::Path;
use tracing::{debug, info};

/// Create `count` accounts funded with `fund_amount` each by `funder`.
///
/// Accounts are created in transactions of at most `max_operations` operations, submitted one
/// after another. Each transaction is rebuilt against the funder's latest sequence number on
/// every attempt. If a transaction exhausts its retries, provisioning stops and reports how many
/// accounts were already created.
pub async fn provision<E: Clock, L: Ledger, R: Rng + CryptoRng>(
    submitter: &Submitter<E, L>,
    funder: &Keypair,
    count: usize,
    fund_amount: u64,
    max_operations: usize,
    rng: &mut R,
) -> Result<Vec<TestAccount>, Error> {
    let keypairs: Vec<Keypair> = (0..count).map(|_| Keypair::random(rng)).collect();
    let mut accounts = Vec::with_capacity(count);
    for (batch, chunk) in keypairs.chunks(max_operations.max(1)).enumerate() {
        let operations = chunk
            .iter()
            .map(|keypair| Operation::CreateAccount {
                destination: keypair.address(),
                starting_balance: fund_amount,
            })
            .collect();
        let request = Request::Build {
            source: funder.clone(),
            operations,
        };
        let receipt = submitter
            .submit(&request)
            .await
            .map_err(|err| Error::Provision {
                batch,
                created: accounts.len(),
                source: Box::new(err),
            })?;
        debug!(batch, hash = %receipt.hash, attempts = receipt.attempts, "provisioned batch");
        for keypair in chunk {
            info!(index = accounts.len(), account = %keypair.address(), "created account");
            accounts.push(TestAccount::new(keypair.clone()));
        }
    }
    Ok(accounts)
}

/// Write the seeds and addresses of `accounts` to `path` as JSON.
pub fn persist(path: &Path, accounts: &[TestAccount]) -> Result<(), Error> {
    let file = KeypairFile::new(accounts);
    std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    info!(path = %path.display(), accounts = accounts.len(), "wrote keypairs");
    Ok(())
}
