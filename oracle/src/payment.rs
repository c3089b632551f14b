//! Generate signed payments between test accounts.

use crate::{account::TestAccount, Error};
use herald_ledger::{Envelope, Ledger, Network, Operation, Transaction};
use rand::Rng;

/// A signed payment awaiting submission.
#[derive(Clone, Debug)]
pub struct Payment {
    /// Index of the receiver within the pool it was drawn from.
    pub receiver: usize,

    /// Hash of the signed transaction.
    pub hash: String,

    /// Signed transaction, ready to submit.
    pub envelope: Envelope,
}

/// Pick a receiver for `sender` uniformly at random from `pool`, never the sender itself.
///
/// Returns the index of the receiver within `pool`.
pub fn pick_receiver<R: Rng>(
    pool: &[TestAccount],
    sender: &TestAccount,
    rng: &mut R,
) -> Result<usize, Error> {
    let candidates: Vec<usize> = pool
        .iter()
        .enumerate()
        .filter(|(_, account)| account.address() != sender.address())
        .map(|(index, _)| index)
        .collect();
    if candidates.is_empty() {
        return Err(Error::NoReceiver {
            sender: sender.address().to_string(),
        });
    }
    Ok(candidates[rng.gen_range(0..candidates.len())])
}

/// Build and sign a payment of `amount` from `sender` to a random member of `pool`.
///
/// The transaction uses the sender's current sequence number plus one, so a sender must not
/// have more than one payment in flight.
pub async fn generate<L: Ledger, R: Rng>(
    ledger: &L,
    network: Network,
    pool: &[TestAccount],
    sender: &TestAccount,
    amount: u64,
    rng: &mut R,
) -> Result<Payment, Error> {
    let receiver = pick_receiver(pool, sender, rng)?;
    let sequence = ledger.sequence(sender.address()).await?;
    let envelope = Transaction::new(
        sender.address().clone(),
        sequence + 1,
        network,
        vec![Operation::Payment {
            destination: pool[receiver].address().clone(),
            amount,
        }],
    )?
    .sign(sender.keypair())?;
    Ok(Payment {
        receiver,
        hash: envelope.hash(),
        envelope,
    })
}
