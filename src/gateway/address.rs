//! In-memory address index: phone number -> (client, carrier).
//!
//! Read-mostly under a single read/write lock. Writes are bulk reloads only;
//! per-message paths never take the write half.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

/// A client account. Owns zero or more numbers; the credential pair
/// authenticates SMPP binds.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: u64,
    pub username: String,
    /// SHA-256 of the bind password, hex-encoded.
    pub password_hash: String,
    /// Where MM4 deliveries for this client's numbers connect, `host:port`.
    pub mm4_endpoint: Option<String>,
    pub numbers: Vec<ClientNumber>,
}

/// A number bound to exactly one client and hosted on exactly one carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNumber {
    pub number: String,
    pub client_id: u64,
    pub carrier: String,
}

/// How `outbound_carrier` compares a stored number against an inbound
/// source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberMatch {
    /// Stored number is a substring of (or equal to) the source. Tolerates
    /// stored numbers without a country code or plus sign.
    #[default]
    Substring,
    /// Exact string equality.
    Exact,
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("no carrier found for number: {0}")]
    NotFound(String),
}

#[derive(Default)]
struct Index {
    /// Username -> client.
    clients: HashMap<String, Arc<Client>>,
    /// Client id -> username.
    usernames: HashMap<u64, String>,
    /// Exact number -> owning record.
    numbers: HashMap<String, ClientNumber>,
}

impl Index {
    fn build(clients: Vec<Client>) -> Self {
        let mut index = Index::default();
        for client in clients {
            for num in &client.numbers {
                index.numbers.insert(num.number.clone(), num.clone());
            }
            index.usernames.insert(client.id, client.username.clone());
            index.clients.insert(client.username.clone(), Arc::new(client));
        }
        index
    }
}

/// Process-wide number/client lookup. All queries are side-effect-free.
pub struct AddressIndex {
    inner: RwLock<Index>,
    match_mode: NumberMatch,
}

impl AddressIndex {
    pub fn new(clients: Vec<Client>, match_mode: NumberMatch) -> Self {
        let index = Index::build(clients);
        info!(
            clients = index.clients.len(),
            numbers = index.numbers.len(),
            match_mode = ?match_mode,
            "address index loaded"
        );
        Self {
            inner: RwLock::new(index),
            match_mode,
        }
    }

    /// Atomically replace the whole index.
    pub fn reload(&self, clients: Vec<Client>) {
        let index = Index::build(clients);
        let mut inner = self.inner.write().unwrap();
        debug!(
            clients = index.clients.len(),
            numbers = index.numbers.len(),
            "address index reloaded"
        );
        *inner = index;
    }

    /// Carrier hosting an exactly-known number.
    pub fn carrier_of(&self, number: &str) -> Result<String, AddressError> {
        let inner = self.inner.read().unwrap();
        inner
            .numbers
            .get(number)
            .map(|n| n.carrier.clone())
            .ok_or_else(|| AddressError::NotFound(number.to_string()))
    }

    /// Client owning an exactly-known number.
    pub fn client_of(&self, number: &str) -> Option<Arc<Client>> {
        let inner = self.inner.read().unwrap();
        let num = inner.numbers.get(number)?;
        let username = inner.usernames.get(&num.client_id)?;
        inner.clients.get(username).cloned()
    }

    /// Carrier for an outbound message, resolved from its source address.
    ///
    /// Scans all client-owned numbers for one that matches `source` under
    /// the configured rule. Scan order is unspecified; the first match wins.
    pub fn outbound_carrier(&self, source: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        for client in inner.clients.values() {
            for num in &client.numbers {
                let matched = match self.match_mode {
                    NumberMatch::Substring => source.contains(num.number.as_str()),
                    NumberMatch::Exact => source == num.number,
                };
                if matched {
                    return Some(num.carrier.clone());
                }
            }
        }
        None
    }

    /// Client by username.
    pub fn client_by_username(&self, username: &str) -> Option<Arc<Client>> {
        self.inner.read().unwrap().clients.get(username).cloned()
    }

    /// Validate SMPP bind credentials. Returns the client on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<Arc<Client>> {
        let client = self.client_by_username(username)?;
        if client.password_hash == password_digest(password) {
            Some(client)
        } else {
            None
        }
    }
}

/// Hex SHA-256 of a bind password, the form stored in config.
pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
