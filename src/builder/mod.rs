//! Per-thread request accumulation.
//!
//! Each thread keeps its own list of not-yet-submitted requests per engine.
//! [`RequestBuilder::server`] starts a new request; every other directive
//! edits the most recently started one, or does nothing if none is open.
//! The perform directives hand the whole list to the engine and clear it.
//!
//! ```no_run
//! # use integrations_smtp_dispatch::{Engine, EngineConfig};
//! # let engine = Engine::new(EngineConfig::default()).unwrap();
//! engine
//!     .requests()
//!     .server("smtp.example.com:587")
//!     .credentials("user", "password")
//!     .from("Alice", "alice@example.com")
//!     .to("", "bob@example.com")
//!     .subject("Hello")
//!     .text("Hi Bob")
//!     .callback(|outcome| println!("sent: {}", outcome.is_success()))
//!     .perform_async();
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::dispatch::Engine;
use crate::request::PendingRequest;
use crate::transport::MailTransport;
use crate::types::{Address, Attachment, Credentials, SendOutcome, UserData};

thread_local! {
    static ACCUMULATIONS: RefCell<HashMap<u64, Vec<PendingRequest>>> =
        RefCell::new(HashMap::new());
}

/// Number of requests the calling thread has started for `engine_id`.
pub(crate) fn local_pending(engine_id: u64) -> usize {
    ACCUMULATIONS
        .try_with(|acc| acc.borrow().get(&engine_id).map_or(0, Vec::len))
        .unwrap_or(0)
}

/// Drops the calling thread's uncommitted requests for `engine_id`.
pub(crate) fn discard_local(engine_id: u64) {
    // Thread-local storage is gone during thread teardown; nothing to discard.
    let _ = ACCUMULATIONS.try_with(|acc| acc.borrow_mut().remove(&engine_id));
}

/// Builds requests on the calling thread.
///
/// Obtained from [`Engine::requests`]. All directives return `&Self` for
/// chaining and never fail. The builder is not `Send`: it always refers to
/// the accumulation of the thread that uses it.
pub struct RequestBuilder<'e, T: MailTransport> {
    engine: &'e Engine<T>,
    _thread_bound: PhantomData<*const ()>,
}

impl<'e, T: MailTransport> RequestBuilder<'e, T> {
    pub(crate) fn new(engine: &'e Engine<T>) -> Self {
        Self {
            engine,
            _thread_bound: PhantomData,
        }
    }

    fn with_current(&self, edit: impl FnOnce(&mut PendingRequest)) -> &Self {
        let id = self.engine.id();
        let _ = ACCUMULATIONS.try_with(|acc| {
            if let Some(request) = acc.borrow_mut().get_mut(&id).and_then(|list| list.last_mut()) {
                edit(request);
            }
        });
        self
    }

    fn take(&self) -> Vec<PendingRequest> {
        let id = self.engine.id();
        ACCUMULATIONS
            .try_with(|acc| acc.borrow_mut().remove(&id))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Starts a new request for `endpoint`; later directives target it.
    pub fn server(&self, endpoint: impl Into<String>) -> &Self {
        let request = PendingRequest::new(endpoint, self.engine.config().default_subject.clone());
        let id = self.engine.id();
        let _ = ACCUMULATIONS.try_with(|acc| {
            acc.borrow_mut().entry(id).or_default().push(request);
        });
        self
    }

    /// Sets the login credentials.
    pub fn credentials(&self, username: impl Into<String>, password: impl Into<String>) -> &Self {
        let credentials = Credentials::new(username, password);
        self.with_current(|request| request.credentials = credentials)
    }

    /// Sets the sender.
    pub fn from(&self, name: impl Into<String>, email: impl Into<String>) -> &Self {
        let address = Address::new(name, email);
        self.with_current(|request| request.from = address)
    }

    /// Adds a recipient.
    pub fn to(&self, name: impl Into<String>, email: impl Into<String>) -> &Self {
        let address = Address::new(name, email);
        self.with_current(|request| request.to.push(address))
    }

    /// Sets the subject.
    pub fn subject(&self, subject: impl Into<String>) -> &Self {
        let subject = subject.into();
        self.with_current(|request| request.subject = subject)
    }

    /// Sets the plain-text body.
    pub fn text(&self, text: impl Into<String>) -> &Self {
        let text = text.into();
        self.with_current(|request| request.text = text)
    }

    /// Sets the HTML body.
    pub fn html(&self, html: impl Into<String>) -> &Self {
        let html = html.into();
        self.with_current(|request| request.html = html)
    }

    /// Adds an attachment.
    pub fn attachment(&self, attachment: Attachment) -> &Self {
        self.with_current(|request| request.attachments.push(attachment))
    }

    /// Enables or disables verbose logging for the request.
    pub fn verbose(&self, verbose: bool) -> &Self {
        self.with_current(|request| request.verbose = verbose)
    }

    /// Attaches opaque data handed back in the outcome.
    pub fn user_data(&self, data: UserData) -> &Self {
        self.with_current(|request| request.user_data = Some(data))
    }

    /// Sets the completion callback.
    pub fn callback<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(SendOutcome) + Send + 'static,
    {
        self.with_current(|request| request.callback = Some(Box::new(callback)))
    }

    /// Executes all started requests on this thread and clears the list.
    ///
    /// Returns the number of requests executed.
    pub fn perform_sync(&self) -> usize {
        let requests = self.take();
        let count = requests.len();
        self.engine.submit_sync(requests);
        count
    }

    /// Queues all started requests for the worker and clears the list.
    ///
    /// Returns the number of requests queued.
    pub fn perform_async(&self) -> usize {
        let requests = self.take();
        let count = requests.len();
        self.engine.submit_async(requests);
        count
    }

    /// Returns the number of started, uncommitted requests on this thread.
    pub fn pending(&self) -> usize {
        local_pending(self.engine.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::mocks::MockTransport;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn engine() -> Engine<MockTransport> {
        Engine::with_transport(EngineConfig::default(), MockTransport::new()).unwrap()
    }

    #[test]
    fn test_directives_without_request_are_noops() {
        let engine = engine();
        let requests = engine.requests();

        requests
            .credentials("u", "p")
            .from("A", "a@x.com")
            .to("", "b@x.com")
            .subject("s")
            .text("t")
            .html("h")
            .attachment(Attachment::from_bytes("a.txt", vec![1]))
            .verbose(true)
            .user_data(Arc::new(1u8))
            .callback(|_| {});

        assert_eq!(requests.pending(), 0);
        assert_eq!(requests.perform_sync(), 0);
        assert_eq!(requests.perform_async(), 0);
        assert_eq!(engine.transport().opens(), 0);
    }

    #[test]
    fn test_server_starts_request_with_default_subject() {
        let engine = engine();
        engine.requests().server("smtp.x.com");

        ACCUMULATIONS.with(|acc| {
            let acc = acc.borrow();
            let list = &acc[&engine.id()];
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].subject, "No subject.");
            assert_eq!(list[0].endpoint, "smtp.x.com");
        });
        assert_eq!(engine.local_pending(), 1);
    }

    #[test]
    fn test_directives_target_latest_request() {
        let engine = engine();
        engine
            .requests()
            .server("first")
            .subject("one")
            .server("second")
            .subject("two")
            .to("", "a@x.com")
            .to("", "b@x.com");

        ACCUMULATIONS.with(|acc| {
            let acc = acc.borrow();
            let list = &acc[&engine.id()];
            assert_eq!(list[0].subject, "one");
            assert!(list[0].to.is_empty());
            assert_eq!(list[1].subject, "two");
            let recipients: Vec<&str> = list[1].to.iter().map(|a| a.email.as_str()).collect();
            assert_eq!(recipients, vec!["a@x.com", "b@x.com"]);
        });
    }

    #[test]
    fn test_accumulation_is_per_thread() {
        let engine = engine();
        engine.requests().server("main-thread");

        thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(engine.local_pending(), 0);
                engine.requests().subject("ignored").server("worker-thread");
                assert_eq!(engine.local_pending(), 1);
            });
        });

        assert_eq!(engine.local_pending(), 1);
    }

    #[test]
    fn test_accumulation_is_per_engine() {
        let a = engine();
        let b = engine();
        a.requests().server("smtp.x.com");

        assert_eq!(a.local_pending(), 1);
        assert_eq!(b.local_pending(), 0);
    }

    #[test]
    fn test_perform_sync_clears_and_runs_callbacks() {
        let engine = engine();
        let errors = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let errors = Arc::clone(&errors);
            engine
                .requests()
                .server("smtp.x.com")
                .callback(move |outcome| errors.lock().unwrap().push(outcome.error));
        }

        assert_eq!(engine.requests().perform_sync(), 2);
        assert_eq!(engine.local_pending(), 0);
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["No message for body!".to_string(); 2]
        );
    }

    #[test]
    fn test_callback_may_start_new_requests() {
        let engine = Arc::new(engine());
        let inner = Arc::clone(&engine);

        engine
            .requests()
            .server("smtp.x.com")
            .callback(move |_| {
                inner.requests().server("follow-up");
            });
        engine.requests().perform_sync();

        assert_eq!(engine.local_pending(), 1);
    }

    #[test]
    fn test_shutdown_discards_local_requests() {
        let engine = engine();
        engine.requests().server("smtp.x.com");
        engine.shutdown();
        assert_eq!(engine.local_pending(), 0);
    }
}
