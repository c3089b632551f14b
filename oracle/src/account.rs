//! Provisioned test accounts and the delivery records attached to them.

use herald_ledger::{Address, Keypair};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Transaction hashes an account expects to be notified about, and whether each has arrived.
///
/// Cloning yields another handle to the same records. A watcher only ever calls
/// [Deliveries::deliver]; the orchestrator registers expectations and clears them between
/// batches.
#[derive(Clone, Default, Debug)]
pub struct Deliveries {
    records: Arc<Mutex<HashMap<String, bool>>>,
}

impl Deliveries {
    /// Register `hash` as pending.
    ///
    /// Returns `false` if the hash was already registered (the record is left untouched).
    pub fn expect(&self, hash: &str) -> bool {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(hash) {
            return false;
        }
        records.insert(hash.to_string(), false);
        true
    }

    /// Mark `hash` as delivered.
    ///
    /// Hashes that were never registered are recorded as delivered as well. Returns whether the
    /// hash was pending before this call.
    pub fn deliver(&self, hash: &str) -> bool {
        let mut records = self.records.lock().unwrap();
        let previous = records.insert(hash.to_string(), true);
        previous == Some(false)
    }

    /// Whether `hash` has been delivered (`None` if it was never seen).
    pub fn delivered(&self, hash: &str) -> Option<bool> {
        self.records.lock().unwrap().get(hash).copied()
    }

    /// Hashes that are registered but not yet delivered, sorted.
    pub fn pending(&self) -> Vec<String> {
        let records = self.records.lock().unwrap();
        let mut pending: Vec<_> = records
            .iter()
            .filter(|(_, delivered)| !**delivered)
            .map(|(hash, _)| hash.clone())
            .collect();
        pending.sort();
        pending
    }

    /// Every record, sorted by hash.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let records = self.records.lock().unwrap();
        let mut snapshot: Vec<_> = records
            .iter()
            .map(|(hash, delivered)| (hash.clone(), *delivered))
            .collect();
        snapshot.sort();
        snapshot
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

/// A provisioned account used as payment sender and receiver.
#[derive(Clone, Debug)]
pub struct TestAccount {
    keypair: Keypair,
    address: Address,
    deliveries: Deliveries,
}

impl TestAccount {
    pub fn new(keypair: Keypair) -> Self {
        let address = keypair.address();
        Self {
            keypair,
            address,
            deliveries: Deliveries::default(),
        }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Handle to the account's delivery records.
    pub fn deliveries(&self) -> &Deliveries {
        &self.deliveries
    }
}

/// Serialized form of a provisioned keypair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeypairRecord {
    pub seed: String,
    pub address: String,
}

/// Serialized form of every provisioned keypair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeypairFile {
    pub keypairs: Vec<KeypairRecord>,
}

impl KeypairFile {
    pub fn new(accounts: &[TestAccount]) -> Self {
        Self {
            keypairs: accounts
                .iter()
                .map(|account| KeypairRecord {
                    seed: account.keypair.seed(),
                    address: account.address.to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_deliveries() {
        let deliveries = Deliveries::default();
        assert!(deliveries.expect("b"));
        assert!(deliveries.expect("a"));
        assert!(!deliveries.expect("a"));
        assert_eq!(deliveries.pending(), vec!["a".to_string(), "b".to_string()]);

        // Delivery through another handle is visible everywhere
        let watcher = deliveries.clone();
        assert!(watcher.deliver("a"));
        assert!(!watcher.deliver("a"));
        assert_eq!(deliveries.delivered("a"), Some(true));
        assert_eq!(deliveries.pending(), vec!["b".to_string()]);

        // Unexpected hashes are recorded
        assert!(!watcher.deliver("z"));
        assert_eq!(deliveries.delivered("z"), Some(true));
        assert_eq!(deliveries.len(), 3);
        assert_eq!(
            deliveries.snapshot(),
            vec![
                ("a".to_string(), true),
                ("b".to_string(), false),
                ("z".to_string(), true)
            ]
        );

        deliveries.clear();
        assert!(watcher.is_empty());
        assert_eq!(deliveries.delivered("a"), None);
    }

    #[test]
    fn test_keypair_file() {
        let mut rng = StdRng::seed_from_u64(0);
        let account = TestAccount::new(Keypair::random(&mut rng));
        let file = KeypairFile::new(&[account.clone()]);
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(
            json["keypairs"][0]["address"],
            serde_json::Value::String(account.address().to_string())
        );
        let seed = json["keypairs"][0]["seed"].as_str().unwrap();
        assert_eq!(&Keypair::from_seed(seed).unwrap().address(), account.address());
    }
}
