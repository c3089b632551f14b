//! Register expected notifications and check which of them arrived.

use crate::account::TestAccount;
use herald_ledger::Address;
use tracing::{error, info};

/// A notification expected on an account's stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub account: Address,
    pub hash: String,
}

/// Outcome of checking every account's delivery records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    /// Records that were delivered, including hashes announced without being expected.
    pub delivered: Vec<Record>,

    /// Records that were still pending.
    pub missing: Vec<Record>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Expect a notification for `hash` on both the sender and the receiver of a payment.
pub fn register(sender: &TestAccount, receiver: &TestAccount, hash: &str) {
    sender.deliveries().expect(hash);
    receiver.deliveries().expect(hash);
}

/// Check every account's records, logging each matched and missing notification.
pub fn verify(accounts: &[TestAccount]) -> Verification {
    let mut verification = Verification::default();
    for account in accounts {
        for (hash, delivered) in account.deliveries().snapshot() {
            let record = Record {
                account: account.address().clone(),
                hash,
            };
            if delivered {
                info!(account = %record.account, hash = %record.hash, "notification delivered");
                verification.delivered.push(record);
            } else {
                error!(account = %record.account, hash = %record.hash, "notification missing");
                verification.missing.push(record);
            }
        }
    }
    verification
}

/// Clear every account's records so the next batch starts clean.
pub fn reset(accounts: &[TestAccount]) {
    for account in accounts {
        account.deliveries().clear();
    }
}
