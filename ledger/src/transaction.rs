//! Build, sign, and encode transactions.
//!
//! A [Transaction] is serialized into a canonical payload:
//!
//! ```txt
//! network (32) | source (32) | sequence (8) | operations (4) | operation*
//! operation := kind (1) | destination (32) | amount (8)
//! ```
//!
//! The payload is signed by the source account and the hash of a transaction is the SHA-256
//! digest of the payload. Because the payload commits to the network, an [Envelope] signed for
//! one network is rejected (and hashes differently) on any other.

use crate::Error;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Buf, BufMut};
use commonware_cryptography::{
    ed25519, Hasher, PrivateKeyExt as _, Sha256, Signer as _, Verifier as _,
};
use commonware_utils::{from_hex_formatted, hex};
use rand::{CryptoRng, Rng};
use std::fmt;

/// Unique namespace to avoid signature replay across applications.
const TRANSACTION_NAMESPACE: &[u8] = b"_HERALD_TRANSACTION";

/// Maximum number of operations allowed in a single transaction.
pub const MAX_OPERATIONS: usize = 100;

const NETWORK_LEN: usize = 32;
const ADDRESS_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;
const OPERATION_LEN: usize = 1 + ADDRESS_LEN + 8;
const HEADER_LEN: usize = NETWORK_LEN + ADDRESS_LEN + 8 + 4;

/// Public identity of a ledger account.
pub type Address = ed25519::PublicKey;

/// Parse an [Address] from its hex representation.
pub fn parse_address(address: &str) -> Result<Address, Error> {
    let raw = from_hex_formatted(address).ok_or(Error::InvalidAddress)?;
    Address::try_from(raw).map_err(|_| Error::InvalidAddress)
}

/// Asymmetric signing identity of a ledger account.
#[derive(Clone)]
pub struct Keypair {
    key: ed25519::PrivateKey,
}

impl Keypair {
    /// Generate a fresh keypair from the supplied RNG.
    pub fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self {
            key: ed25519::PrivateKey::from_rng(rng),
        }
    }

    /// Parse a keypair from a hex-encoded seed.
    pub fn from_seed(seed: &str) -> Result<Self, Error> {
        let raw = from_hex_formatted(seed).ok_or(Error::InvalidSeed)?;
        let key = ed25519::PrivateKey::try_from(raw).map_err(|_| Error::InvalidSeed)?;
        Ok(Self { key })
    }

    /// Public address of the keypair.
    pub fn address(&self) -> Address {
        self.key.public_key()
    }

    /// Hex-encoded private seed of the keypair.
    pub fn seed(&self) -> String {
        hex(self.key.as_ref())
    }

    fn sign(&self, payload: &[u8]) -> ed25519::Signature {
        self.key.sign(Some(TRANSACTION_NAMESPACE), payload)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Identifier of a ledger network, derived from its passphrase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Network([u8; NETWORK_LEN]);

impl Network {
    /// Derive the network identifier from a passphrase.
    pub fn new(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; NETWORK_LEN];
        id.copy_from_slice(digest.as_ref());
        Self(id)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// A ledger operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Create (and fund) a new account.
    CreateAccount {
        destination: Address,
        starting_balance: u64,
    },

    /// Transfer the native asset to an existing account.
    Payment { destination: Address, amount: u64 },
}

impl Operation {
    const CREATE_ACCOUNT: u8 = 0;
    const PAYMENT: u8 = 1;

    /// The account receiving funds from this operation.
    pub fn destination(&self) -> &Address {
        match self {
            Operation::CreateAccount { destination, .. } => destination,
            Operation::Payment { destination, .. } => destination,
        }
    }

    /// Amount moved by this operation.
    pub fn amount(&self) -> u64 {
        match self {
            Operation::CreateAccount {
                starting_balance, ..
            } => *starting_balance,
            Operation::Payment { amount, .. } => *amount,
        }
    }

    fn write(&self, buf: &mut impl BufMut) {
        let kind = match self {
            Operation::CreateAccount { .. } => Self::CREATE_ACCOUNT,
            Operation::Payment { .. } => Self::PAYMENT,
        };
        buf.put_u8(kind);
        buf.put_slice(self.destination().as_ref());
        buf.put_u64(self.amount());
    }

    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < OPERATION_LEN {
            return Err(Error::InvalidEnvelope("operation truncated"));
        }
        let kind = buf.get_u8();
        let destination = read_address(buf)?;
        let amount = buf.get_u64();
        match kind {
            Self::CREATE_ACCOUNT => Ok(Operation::CreateAccount {
                destination,
                starting_balance: amount,
            }),
            Self::PAYMENT => Ok(Operation::Payment {
                destination,
                amount,
            }),
            _ => Err(Error::InvalidEnvelope("unknown operation")),
        }
    }
}

fn read_address(buf: &mut impl Buf) -> Result<Address, Error> {
    let mut raw = [0u8; ADDRESS_LEN];
    buf.copy_to_slice(&mut raw);
    Address::try_from(&raw[..]).map_err(|_| Error::InvalidEnvelope("invalid address"))
}

/// An unsigned transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub source: Address,
    pub sequence: u64,
    pub network: Network,
    pub operations: Vec<Operation>,
}

impl Transaction {
    /// Build a transaction, rejecting empty or oversized operation lists.
    pub fn new(
        source: Address,
        sequence: u64,
        network: Network,
        operations: Vec<Operation>,
    ) -> Result<Self, Error> {
        if operations.is_empty() {
            return Err(Error::InvalidTransaction("no operations".into()));
        }
        if operations.len() > MAX_OPERATIONS {
            return Err(Error::InvalidTransaction(format!(
                "{} operations exceeds maximum of {}",
                operations.len(),
                MAX_OPERATIONS
            )));
        }
        Ok(Self {
            source,
            sequence,
            network,
            operations,
        })
    }

    /// Canonical payload that is signed and hashed.
    pub fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.operations.len() * OPERATION_LEN);
        buf.put_slice(&self.network.0);
        buf.put_slice(self.source.as_ref());
        buf.put_u64(self.sequence);
        buf.put_u32(self.operations.len() as u32);
        for operation in &self.operations {
            operation.write(&mut buf);
        }
        buf
    }

    /// Hex-encoded SHA-256 digest of the payload.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload());
        hex(hasher.finalize().as_ref())
    }

    /// Sign the transaction with the source account's keypair.
    ///
    /// Fails if the keypair does not control the source account.
    pub fn sign(self, keypair: &Keypair) -> Result<Envelope, Error> {
        if keypair.address() != self.source {
            return Err(Error::InvalidTransaction(
                "signer does not match source account".into(),
            ));
        }
        let signature = keypair.sign(&self.payload());
        Ok(Envelope {
            transaction: self,
            signature,
        })
    }

    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < HEADER_LEN {
            return Err(Error::InvalidEnvelope("header truncated"));
        }
        let mut network = [0u8; NETWORK_LEN];
        buf.copy_to_slice(&mut network);
        let source = read_address(buf)?;
        let sequence = buf.get_u64();
        let count = buf.get_u32() as usize;
        if count == 0 || count > MAX_OPERATIONS {
            return Err(Error::InvalidEnvelope("invalid operation count"));
        }
        let mut operations = Vec::with_capacity(count);
        for _ in 0..count {
            operations.push(Operation::read(buf)?);
        }
        Ok(Self {
            source,
            sequence,
            network: Network(network),
            operations,
        })
    }
}

/// A signed transaction, ready for submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    transaction: Transaction,
    signature: ed25519::Signature,
}

impl Envelope {
    /// The signed transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Hex-encoded hash of the signed transaction.
    pub fn hash(&self) -> String {
        self.transaction.hash()
    }

    /// Check the signature against the source account.
    pub fn verify(&self) -> bool {
        self.transaction.source.verify(
            Some(TRANSACTION_NAMESPACE),
            &self.transaction.payload(),
            &self.signature,
        )
    }

    /// Base64 encoding of the envelope, as accepted by [crate::Ledger::submit].
    pub fn encode(&self) -> String {
        let mut buf = self.transaction.payload();
        buf.put_slice(self.signature.as_ref());
        BASE64.encode(buf)
    }

    /// Decode an envelope produced by [Envelope::encode].
    ///
    /// The signature is parsed but not verified.
    pub fn decode(encoded: &str) -> Result<Self, Error> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| Error::InvalidEnvelope("invalid base64"))?;
        let mut buf = raw.as_slice();
        let transaction = Transaction::read(&mut buf)?;
        if buf.remaining() != SIGNATURE_LEN {
            return Err(Error::InvalidEnvelope("invalid signature length"));
        }
        let signature = ed25519::Signature::try_from(buf)
            .map_err(|_| Error::InvalidEnvelope("invalid signature"))?;
        Ok(Self {
            transaction,
            signature,
        })
    }
}
