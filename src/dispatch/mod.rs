//! The dispatch engine.
//!
//! An [`Engine`] owns the shared asynchronous queue, the background worker
//! draining it and the executor with its connection pool. Synchronous
//! submissions run on the calling thread; asynchronous ones are queued and
//! executed by the worker in batches.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::builder::{self, RequestBuilder};
use crate::config::EngineConfig;
use crate::errors::{SmtpError, SmtpResult};
use crate::executor::Executor;
use crate::observability::{DispatchMetrics, MetricsSnapshot};
use crate::pool::lock_unpoisoned;
use crate::request::PendingRequest;
use crate::transport::{LettreTransport, MailTransport};
use crate::types::PoolStatus;

/// Name of the background worker thread.
pub const WORKER_THREAD_NAME: &str = "smtp-dispatch-worker";

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Live engines per transport type.
static TRANSPORT_USERS: Mutex<Vec<(TypeId, usize)>> = Mutex::new(Vec::new());

fn retain_transport<T: MailTransport>() {
    let mut users = lock_unpoisoned(&TRANSPORT_USERS);
    let type_id = TypeId::of::<T>();
    match users.iter_mut().find(|(id, _)| *id == type_id) {
        Some((_, count)) => *count += 1,
        None => {
            T::global_init();
            users.push((type_id, 1));
        }
    }
}

fn release_transport<T: MailTransport>() {
    let mut users = lock_unpoisoned(&TRANSPORT_USERS);
    let type_id = TypeId::of::<T>();
    if let Some(index) = users.iter().position(|(id, _)| *id == type_id) {
        users[index].1 -= 1;
        if users[index].1 == 0 {
            users.swap_remove(index);
            T::global_cleanup();
        }
    }
}

/// Returns the number of live engines using transport type `T`.
pub fn live_engines<T: MailTransport>() -> usize {
    let type_id = TypeId::of::<T>();
    lock_unpoisoned(&TRANSPORT_USERS)
        .iter()
        .find(|(id, _)| *id == type_id)
        .map_or(0, |(_, count)| *count)
}

struct Queue {
    pending: Vec<PendingRequest>,
    running: bool,
}

struct Shared<T: MailTransport> {
    queue: Mutex<Queue>,
    signal: Condvar,
    executor: Executor<T>,
    metrics: Arc<DispatchMetrics>,
    config: EngineConfig,
}

/// Concurrent SMTP dispatch engine.
///
/// Engines are `Send + Sync`; share one by reference or through an `Arc`.
/// Dropping the engine shuts it down.
pub struct Engine<T: MailTransport = LettreTransport> {
    id: u64,
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine<LettreTransport> {
    /// Creates an engine sending through `lettre`.
    pub fn new(config: EngineConfig) -> SmtpResult<Self> {
        let transport = LettreTransport::new(&config);
        Self::with_transport(config, transport)
    }
}

impl<T: MailTransport> Engine<T> {
    /// Creates an engine over a custom transport and starts its worker.
    pub fn with_transport(config: EngineConfig, transport: T) -> SmtpResult<Self> {
        config.validate()?;

        let metrics = Arc::new(DispatchMetrics::new());
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: Vec::new(),
                running: true,
            }),
            signal: Condvar::new(),
            executor: Executor::new(transport, &config, Arc::clone(&metrics)),
            metrics,
            config,
        });

        retain_transport::<T>();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(worker_shared))
            .map_err(|e| {
                release_transport::<T>();
                SmtpError::internal(format!("Failed to start worker thread: {}", e))
            })?;

        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::debug!(engine = id, "Dispatch engine started");

        Ok(Self {
            id,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Returns a request builder bound to the calling thread.
    pub fn requests(&self) -> RequestBuilder<'_, T> {
        RequestBuilder::new(self)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        self.shared.executor.pool().transport()
    }

    /// Executes requests on the calling thread, callbacks included.
    pub fn submit_sync(&self, requests: Vec<PendingRequest>) {
        if requests.is_empty() {
            return;
        }
        self.shared.metrics.record_submitted(requests.len(), false);
        self.shared.executor.execute_all(requests);
    }

    /// Queues requests for the background worker.
    ///
    /// After shutdown the requests run on the calling thread instead.
    pub fn submit_async(&self, mut requests: Vec<PendingRequest>) {
        if requests.is_empty() {
            return;
        }
        self.shared.metrics.record_submitted(requests.len(), true);

        {
            let mut queue = lock_unpoisoned(&self.shared.queue);
            if queue.running {
                queue.pending.append(&mut requests);
            }
        }

        if requests.is_empty() {
            self.shared.signal.notify_one();
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                engine = self.id,
                count = requests.len(),
                "Engine stopped, executing inline"
            );
            self.shared.executor.execute_all(requests);
        }
    }

    /// Returns the number of requests waiting for the worker.
    pub fn queued(&self) -> usize {
        lock_unpoisoned(&self.shared.queue).pending.len()
    }

    /// Returns the number of uncommitted requests on the calling thread.
    pub fn local_pending(&self) -> usize {
        builder::local_pending(self.id)
    }

    /// Returns the connection pool status.
    pub fn pool_status(&self) -> PoolStatus {
        self.shared.executor.pool().status()
    }

    /// Returns a snapshot of the engine metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Evicts idle connections now. Returns the number evicted.
    pub fn sweep_now(&self) -> usize {
        self.shared
            .executor
            .pool()
            .sweep_idle(self.shared.config.idle_timeout)
    }

    /// Returns true until [`shutdown`](Self::shutdown) has run.
    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.shared.queue).running
    }

    /// Stops the worker after it drains the queue, then closes pooled
    /// connections. Idempotent.
    pub fn shutdown(&self) {
        let Some(worker) = lock_unpoisoned(&self.worker).take() else {
            return;
        };

        lock_unpoisoned(&self.shared.queue).running = false;
        self.shared.signal.notify_all();

        if worker.thread().id() != thread::current().id() && worker.join().is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!(engine = self.id, "Dispatch worker panicked");
        }

        self.shared.executor.pool().shutdown();
        builder::discard_local(self.id);
        release_transport::<T>();

        #[cfg(feature = "tracing")]
        tracing::debug!(engine = self.id, "Dispatch engine stopped");
    }
}

impl<T: MailTransport> Drop for Engine<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: MailTransport> fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("queued", &self.queued())
            .field("pool", &self.pool_status())
            .finish()
    }
}

fn run_worker<T: MailTransport>(shared: Arc<Shared<T>>) {
    #[cfg(feature = "tracing")]
    tracing::debug!("Dispatch worker started");

    let config = &shared.config;
    let mut last_sweep = Instant::now();

    loop {
        let (batch, running) = {
            let queue = lock_unpoisoned(&shared.queue);
            let (mut queue, _) = shared
                .signal
                .wait_timeout_while(queue, config.poll_interval, |queue| {
                    queue.pending.is_empty() && queue.running
                })
                .unwrap_or_else(PoisonError::into_inner);
            (std::mem::take(&mut queue.pending), queue.running)
        };

        if last_sweep.elapsed() >= config.sweep_interval {
            shared.executor.pool().sweep_idle(config.idle_timeout);
            last_sweep = Instant::now();
        }

        if !batch.is_empty() {
            shared.metrics.record_batch();

            #[cfg(feature = "tracing")]
            tracing::debug!(count = batch.len(), "Draining queued requests");

            shared.executor.execute_all(batch);
        }

        if !running {
            break;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::OutgoingMessage;
    use crate::mocks::MockTransport;
    use crate::types::Credentials;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    static INITS: AtomicUsize = AtomicUsize::new(0);
    static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    /// Transport used only by the global lifecycle test.
    #[derive(Debug)]
    struct CountingTransport;

    impl MailTransport for CountingTransport {
        type Connection = ();

        fn global_init() {
            INITS.fetch_add(1, Ordering::SeqCst);
        }

        fn global_cleanup() {
            CLEANUPS.fetch_add(1, Ordering::SeqCst);
        }

        fn open(&self, _endpoint: &str, _credentials: &Credentials) -> SmtpResult<()> {
            Ok(())
        }

        fn send(&self, _: &mut (), _: &OutgoingMessage, _: bool) -> SmtpResult<()> {
            Ok(())
        }

        fn close(&self, _connection: ()) {}
    }

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .poll_interval(Duration::from_millis(10))
            .sweep_interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[test]
    fn test_global_init_runs_once_per_transport_type() {
        let first = Engine::with_transport(config(), CountingTransport).unwrap();
        let second = Engine::with_transport(config(), CountingTransport).unwrap();
        assert_eq!(INITS.load(Ordering::SeqCst), 1);
        assert_eq!(live_engines::<CountingTransport>(), 2);

        drop(first);
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), 1);
        assert_eq!(live_engines::<CountingTransport>(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = Engine::with_transport(config(), MockTransport::new()).unwrap();
        assert!(engine.is_running());

        engine.shutdown();
        engine.shutdown();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.poll_interval = Duration::ZERO;
        assert!(Engine::with_transport(config, MockTransport::new()).is_err());
    }

    #[test]
    fn test_worker_sweeps_idle_connections() {
        let config = EngineConfig::builder()
            .poll_interval(Duration::from_millis(5))
            .sweep_interval(Duration::from_millis(5))
            .idle_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let engine = Engine::with_transport(config, MockTransport::new()).unwrap();

        engine
            .executor_pool_for_tests()
            .acquire("smtp.x.com", &Credentials::default())
            .unwrap()
            .release();
        assert_eq!(engine.pool_status().total, 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.pool_status().total > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.pool_status().total, 0);
        assert_eq!(engine.transport().closes(), 1);
        assert!(engine.metrics().sweeps > 0);
    }

    impl<T: MailTransport> Engine<T> {
        fn executor_pool_for_tests(&self) -> &crate::pool::ConnectionPool<T> {
            self.shared.executor.pool()
        }
    }
}
