//! Mock implementations for testing.
//!
//! [`MockTransport`] records every open, send and close, can be told to fail
//! or stall, and tracks how many threads use a connection at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{SmtpError, SmtpResult};
use crate::mime::OutgoingMessage;
use crate::pool::lock_unpoisoned;
use crate::transport::MailTransport;
use crate::types::{Address, Attachment, Credentials};

/// Connection handed out by [`MockTransport`].
#[derive(Debug)]
pub struct MockConnection {
    /// Unique connection id.
    pub id: u64,
    /// Endpoint the connection was opened to.
    pub endpoint: String,
    /// Username used to open it.
    pub username: String,
    generation: u64,
}

/// A message recorded by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Connection the message went out on.
    pub connection_id: u64,
    /// Endpoint of that connection.
    pub endpoint: String,
    /// The composed message.
    pub message: OutgoingMessage,
    /// Verbosity flag of the request.
    pub verbose: bool,
}

impl SentMessage {
    /// Returns the formatted message as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.message.formatted).into_owned()
    }
}

/// Mock mail transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    next_id: AtomicU64,
    generation: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_opens: AtomicUsize,
    fail_sends: AtomicUsize,
    panic_next_send: AtomicBool,
    send_delay: Mutex<Duration>,
    sent: Mutex<Vec<SentMessage>>,
    in_flight: Mutex<HashMap<u64, usize>>,
    max_concurrent: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send sleep for `delay`.
    pub fn with_send_delay(self, delay: Duration) -> Self {
        *lock_unpoisoned(&self.send_delay) = delay;
        self
    }

    /// Fails the next `count` opens.
    pub fn fail_next_opens(&self, count: usize) -> &Self {
        self.fail_opens.store(count, Ordering::SeqCst);
        self
    }

    /// Fails the next `count` sends with a permanent rejection.
    pub fn fail_next_sends(&self, count: usize) -> &Self {
        self.fail_sends.store(count, Ordering::SeqCst);
        self
    }

    /// Panics inside the next send.
    pub fn panic_next_send(&self) -> &Self {
        self.panic_next_send.store(true, Ordering::SeqCst);
        self
    }

    /// Marks every connection opened so far as dead.
    pub fn kill_connections(&self) -> &Self {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self
    }

    /// Returns the number of connections opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Returns the number of connections closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Returns the number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }

    /// Returns recorded messages in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        lock_unpoisoned(&self.sent).clone()
    }

    /// Returns the number of recorded messages.
    pub fn sent_count(&self) -> usize {
        lock_unpoisoned(&self.sent).len()
    }

    /// Forgets recorded messages.
    pub fn clear(&self) {
        lock_unpoisoned(&self.sent).clear();
    }

    /// Returns the highest number of simultaneous sends seen on one
    /// connection.
    pub fn max_concurrent_use(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn enter(&self, id: u64) {
        let mut in_flight = lock_unpoisoned(&self.in_flight);
        let count = in_flight.entry(id).or_insert(0);
        *count += 1;
        self.max_concurrent.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, id: u64) {
        let mut in_flight = lock_unpoisoned(&self.in_flight);
        if let Some(count) = in_flight.get_mut(&id) {
            *count = count.saturating_sub(1);
        }
    }
}

impl MailTransport for MockTransport {
    type Connection = MockConnection;

    fn open(&self, endpoint: &str, credentials: &Credentials) -> SmtpResult<MockConnection> {
        if Self::take_one(&self.fail_opens) {
            return Err(SmtpError::connection(format!(
                "Connection refused by {}",
                endpoint
            )));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            endpoint: endpoint.to_string(),
            username: credentials.username().to_string(),
            generation: self.generation.load(Ordering::SeqCst),
        })
    }

    fn is_alive(&self, connection: &mut MockConnection) -> bool {
        connection.generation == self.generation.load(Ordering::SeqCst)
    }

    fn send(
        &self,
        connection: &mut MockConnection,
        message: &OutgoingMessage,
        verbose: bool,
    ) -> SmtpResult<()> {
        if self.panic_next_send.swap(false, Ordering::SeqCst) {
            panic!("mock transport panic");
        }

        self.enter(connection.id);
        let delay = *lock_unpoisoned(&self.send_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.leave(connection.id);

        if Self::take_one(&self.fail_sends) {
            return Err(SmtpError::from_smtp_response(550, "Mailbox unavailable"));
        }

        lock_unpoisoned(&self.sent).push(SentMessage {
            connection_id: connection.id,
            endpoint: connection.endpoint.clone(),
            message: message.clone(),
            verbose,
        });
        Ok(())
    }

    fn close(&self, _connection: MockConnection) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sender used by test fixtures.
pub fn test_sender() -> Address {
    Address::new("Sender", "sender@x.com")
}

/// Recipient used by test fixtures.
pub fn test_recipient() -> Address {
    Address::new("", "recipient@y.com")
}

/// Small attachment used by test fixtures.
pub fn test_attachment() -> Attachment {
    Attachment::from_bytes("hello.txt", b"Hello, attachment!".to_vec())
}
