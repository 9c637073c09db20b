//! Least-used credential selection
//!
//! Each credential carries an in-flight counter. `acquire` picks the eligible
//! credential with the lowest counter, breaking ties toward the one acquired
//! least recently (and by configured order before any has been used), then
//! increments the counter. The returned lease decrements it again on drop.
//!
//! The counter approximates least-connections balancing across API keys: no
//! single key is hammered while others idle, and a call excluding a rejected
//! key still finds the quietest remaining one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use common::Secret;
use tracing::debug;

use crate::error::{Error, Result};

/// One API key/identity pair plus its usage bookkeeping.
///
/// Owned exclusively by the pool; callers only ever see a [`CredentialLease`]
/// holding a clone of the secret.
struct Credential {
    identity: String,
    secret: Secret<String>,
    /// Number of in-flight attempts currently using this credential.
    in_use: u32,
    /// Monotonic sequence of the most recent acquisition, 0 = never acquired.
    /// Breaks counter ties so sequential calls still rotate through the pool.
    last_acquired: u64,
}

/// Ordered pool of credentials (configured order = fail-over order).
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    credentials: Vec<Credential>,
    /// Source for `last_acquired` sequence numbers.
    acquire_seq: u64,
}

impl CredentialPool {
    /// Build a pool from `(identity, secret)` pairs, preserving order.
    pub fn new(credentials: impl IntoIterator<Item = (String, Secret<String>)>) -> Self {
        let credentials: Vec<Credential> = credentials
            .into_iter()
            .map(|(identity, secret)| Credential {
                identity,
                secret,
                in_use: 0,
                last_acquired: 0,
            })
            .collect();
        debug!(credentials = credentials.len(), "credential pool initialized");
        Self {
            inner: Mutex::new(PoolInner {
                credentials,
                acquire_seq: 0,
            }),
        }
    }

    /// Number of configured credentials.
    pub fn len(&self) -> usize {
        self.lock().credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current in-flight count for an identity, if it exists.
    pub fn in_use(&self, identity: &str) -> Option<u32> {
        self.lock()
            .credentials
            .iter()
            .find(|c| c.identity == identity)
            .map(|c| c.in_use)
    }

    /// Pick the least-used credential whose identity is not in `excluding`,
    /// increment its counter, and return a lease for it.
    ///
    /// The scan and the increment are one atomic unit under the pool lock.
    /// Fails with `PoolExhausted` when every credential is excluded (or the
    /// pool is empty).
    pub fn acquire(self: &Arc<Self>, excluding: &HashSet<String>) -> Result<CredentialLease> {
        let mut inner = self.lock();
        let total = inner.credentials.len();

        let selected = inner
            .credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| !excluding.contains(&c.identity))
            // min_by_key keeps the first on ties, so configured order wins
            // among never-acquired candidates.
            .min_by_key(|(_, c)| (c.in_use, c.last_acquired))
            .map(|(idx, _)| idx);

        let Some(idx) = selected else {
            return Err(Error::PoolExhausted {
                total,
                excluded: excluding.len(),
            });
        };

        inner.acquire_seq += 1;
        let seq = inner.acquire_seq;
        let credential = &mut inner.credentials[idx];
        credential.in_use += 1;
        credential.last_acquired = seq;
        debug!(
            identity = %credential.identity,
            in_use = credential.in_use,
            "credential acquired"
        );

        Ok(CredentialLease {
            pool: Arc::clone(self),
            identity: credential.identity.clone(),
            secret: credential.secret.clone(),
        })
    }

    /// Decrement the in-flight counter for an identity (floor 0).
    fn release(&self, identity: &str) {
        let mut inner = self.lock();
        if let Some(credential) = inner.credentials.iter_mut().find(|c| c.identity == identity) {
            credential.in_use = credential.in_use.saturating_sub(1);
            debug!(identity = %identity, in_use = credential.in_use, "credential released");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // A poisoned lock means a panic while holding it; the counters are
        // still structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A held credential. Releases (decrements the counter) on drop, so an
/// attempt that is cancelled or panics still gives the credential back.
pub struct CredentialLease {
    pool: Arc<CredentialPool>,
    identity: String,
    secret: Secret<String>,
}

impl CredentialLease {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &Secret<String> {
        &self.secret
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.pool.release(&self.identity);
    }
}

impl std::fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("identity", &self.identity)
            .field("secret", &self.secret)
            .finish()
    }
}
