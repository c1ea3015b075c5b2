//! Keyed connection pool.
//!
//! Connections are keyed by endpoint plus SHA-256 digests of the username and
//! password. Each key maps to one entry holding at most one live
//! connection, leased to a single user at a time.
//!
//! Two levels of locking are used:
//! - the structural lock guards the key map and is held only for lookups,
//!   inserts and removals
//! - each entry has its own slot lock and condition variable; a lease is
//!   represented by the slot's `in_use` flag, so no lock is held across I/O
//!
//! Opening, probing and closing connections never happens under the
//! structural lock.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crate::errors::{SmtpError, SmtpResult};
use crate::mime::OutgoingMessage;
use crate::observability::DispatchMetrics;
use crate::transport::MailTransport;
use crate::types::{Credentials, PoolStatus};

/// Locks a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Every critical section in this crate leaves its state consistent before
/// anything that can panic runs.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pool key: endpoint plus credential digests.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    endpoint: String,
    username_digest: [u8; 32],
    password_digest: [u8; 32],
}

impl PoolKey {
    /// Creates the key for `endpoint` and `credentials`.
    pub fn new(endpoint: &str, credentials: &Credentials) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            username_digest: digest(credentials.username()),
            password_digest: digest(credentials.password()),
        }
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolKey")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

struct Slot<C> {
    in_use: bool,
    evicted: bool,
    connection: Option<C>,
    last_used: Instant,
}

/// One pooled connection and its lease state.
struct PoolEntry<C> {
    slot: Mutex<Slot<C>>,
    available: Condvar,
}

impl<C> PoolEntry<C> {
    fn leased() -> Self {
        Self {
            slot: Mutex::new(Slot {
                in_use: true,
                evicted: false,
                connection: None,
                last_used: Instant::now(),
            }),
            available: Condvar::new(),
        }
    }
}

/// Keyed pool of transport connections.
pub struct ConnectionPool<T: MailTransport> {
    transport: Arc<T>,
    entries: Mutex<HashMap<PoolKey, Arc<PoolEntry<T::Connection>>>>,
    metrics: Arc<DispatchMetrics>,
}

impl<T: MailTransport> ConnectionPool<T> {
    /// Creates an empty pool.
    pub fn new(transport: Arc<T>, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            transport,
            entries: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Leases the connection for `endpoint` and `credentials`, opening one
    /// if needed.
    ///
    /// Blocks while another caller holds the lease for the same key. On
    /// open failure the entry stays in the pool without a connection and the
    /// next caller retries the open.
    pub fn acquire(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> SmtpResult<PooledConnection<'_, T>> {
        let key = PoolKey::new(endpoint, credentials);

        loop {
            let (entry, created) = {
                let mut entries = lock_unpoisoned(&self.entries);
                match entries.get(&key) {
                    Some(entry) => (Arc::clone(entry), false),
                    None => {
                        let entry = Arc::new(PoolEntry::leased());
                        entries.insert(key.clone(), Arc::clone(&entry));
                        (entry, true)
                    }
                }
            };

            let existing = if created {
                #[cfg(feature = "tracing")]
                tracing::debug!(endpoint = %endpoint, "Pool entry created");
                None
            } else {
                let slot = lock_unpoisoned(&entry.slot);
                let mut slot = entry
                    .available
                    .wait_while(slot, |slot| slot.in_use && !slot.evicted)
                    .unwrap_or_else(PoisonError::into_inner);
                if slot.evicted {
                    // Removed while we waited; look the key up again.
                    continue;
                }
                slot.in_use = true;
                slot.connection.take()
            };

            let mut lease = PooledConnection {
                pool: self,
                entry,
                connection: None,
            };
            lease.connection = Some(self.ready(existing, endpoint, credentials)?);
            return Ok(lease);
        }
    }

    /// Returns a usable connection: the existing one if alive, else a new one.
    fn ready(
        &self,
        existing: Option<T::Connection>,
        endpoint: &str,
        credentials: &Credentials,
    ) -> SmtpResult<T::Connection> {
        if let Some(mut connection) = existing {
            if self.transport.is_alive(&mut connection) {
                return Ok(connection);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %endpoint, "Pooled connection is dead, reopening");
            self.transport.close(connection);
        }

        let result = self.transport.open(endpoint, credentials);
        self.metrics.record_connection_attempt(result.is_ok());
        result
    }

    /// Ends a lease.
    fn give_back(&self, entry: &PoolEntry<T::Connection>, connection: Option<T::Connection>) {
        let (to_close, evicted) = {
            let mut slot = lock_unpoisoned(&entry.slot);
            slot.in_use = false;
            slot.last_used = Instant::now();
            if slot.evicted {
                (connection, true)
            } else {
                slot.connection = connection;
                (None, false)
            }
        };

        if evicted {
            entry.available.notify_all();
        } else {
            entry.available.notify_one();
        }

        if let Some(connection) = to_close {
            self.transport.close(connection);
        }
    }

    /// Evicts entries unused for longer than `threshold`.
    ///
    /// Never blocks on an entry: leased or contended entries are skipped and
    /// revisited on the next sweep. Returns the number of entries removed.
    pub fn sweep_idle(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        let mut closing = Vec::new();
        let mut removed = 0;

        {
            let mut entries = lock_unpoisoned(&self.entries);
            entries.retain(|_, entry| {
                let mut slot = match entry.slot.try_lock() {
                    Ok(slot) => slot,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return true,
                };
                if slot.in_use || now.saturating_duration_since(slot.last_used) <= threshold {
                    return true;
                }
                slot.evicted = true;
                closing.extend(slot.connection.take());
                removed += 1;
                false
            });
        }

        for connection in closing {
            self.transport.close(connection);
        }

        self.metrics.record_sweep(removed);

        if removed > 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!(evicted = removed, "Idle connections swept");
        }

        removed
    }

    /// Closes every pooled connection and empties the pool.
    ///
    /// Leased connections are closed when their lease ends.
    pub fn shutdown(&self) {
        let entries: Vec<_> = lock_unpoisoned(&self.entries).drain().map(|(_, e)| e).collect();

        let mut closing = Vec::with_capacity(entries.len());
        for entry in &entries {
            {
                let mut slot = lock_unpoisoned(&entry.slot);
                slot.evicted = true;
                closing.extend(slot.connection.take());
            }
            entry.available.notify_all();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(entries = entries.len(), "Connection pool shut down");

        for connection in closing {
            self.transport.close(connection);
        }
    }

    /// Returns the current pool status.
    pub fn status(&self) -> PoolStatus {
        let entries = lock_unpoisoned(&self.entries);
        let in_use = entries
            .values()
            .filter(|entry| lock_unpoisoned(&entry.slot).in_use)
            .count();
        PoolStatus {
            total: entries.len(),
            in_use,
            idle: entries.len() - in_use,
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    /// Returns true if the pool has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: MailTransport> Drop for ConnectionPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: MailTransport> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("transport", &self.transport)
            .field("status", &self.status())
            .finish()
    }
}

/// Exclusive lease on a pooled connection.
///
/// The lease ends when this value is dropped or [`released`](Self::release).
pub struct PooledConnection<'a, T: MailTransport> {
    pool: &'a ConnectionPool<T>,
    entry: Arc<PoolEntry<T::Connection>>,
    connection: Option<T::Connection>,
}

impl<'a, T: MailTransport> PooledConnection<'a, T> {
    /// Returns the leased connection.
    pub fn connection_mut(&mut self) -> Option<&mut T::Connection> {
        self.connection.as_mut()
    }

    /// Sends a message over the leased connection.
    pub fn send(&mut self, message: &OutgoingMessage, verbose: bool) -> SmtpResult<()> {
        match self.connection.as_mut() {
            Some(connection) => self.pool.transport.send(connection, message, verbose),
            None => Err(SmtpError::transmission("No open connection for lease")),
        }
    }

    /// Ends the lease and returns the connection to the pool.
    pub fn release(self) {}
}

impl<T: MailTransport> Drop for PooledConnection<'_, T> {
    fn drop(&mut self) {
        self.pool.give_back(&self.entry, self.connection.take());
    }
}
