//! Request execution.
//!
//! The [`Executor`] runs one request end to end:
//! validate, lease a pooled connection, compose, transmit, release, and
//! finally invoke the completion callback exactly once. Every failure,
//! panics included, ends up in the callback's [`SendOutcome`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::errors::{SmtpError, SmtpErrorCategory, SmtpResult};
use crate::mime::MessageComposer;
use crate::observability::{DispatchMetrics, Timer};
use crate::pool::ConnectionPool;
use crate::request::PendingRequest;
use crate::transport::MailTransport;
use crate::types::SendOutcome;

/// Executes pending requests against a connection pool.
#[derive(Debug)]
pub struct Executor<T: MailTransport> {
    pool: ConnectionPool<T>,
    composer: MessageComposer,
    metrics: Arc<DispatchMetrics>,
}

impl<T: MailTransport> Executor<T> {
    /// Creates an executor owning a fresh pool over `transport`.
    pub fn new(transport: T, config: &EngineConfig, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            pool: ConnectionPool::new(Arc::new(transport), Arc::clone(&metrics)),
            composer: MessageComposer::new(config),
            metrics,
        }
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> &ConnectionPool<T> {
        &self.pool
    }

    /// Executes `request` and invokes its callback.
    ///
    /// Returns true if the message was transmitted.
    pub fn execute(&self, mut request: PendingRequest) -> bool {
        let timer = Timer::start("smtp.request");
        let callback = request.callback.take();
        let mut message_id = None;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transmit(&request, &mut message_id)
        }))
        .unwrap_or_else(|payload| Err(SmtpError::from_panic(payload.as_ref())));

        let success = result.is_ok();
        match &result {
            Ok(()) => {
                self.metrics.record_send_success();

                #[cfg(feature = "tracing")]
                log_sent(&request, message_id.as_deref());
            }
            Err(error) => {
                self.metrics
                    .record_send_failure(error.category() == SmtpErrorCategory::Validation);

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    endpoint = %request.endpoint,
                    kind = %error.kind(),
                    error = %error,
                    "Email failed"
                );
            }
        }

        let outcome = match result {
            Ok(()) => SendOutcome {
                error: String::new(),
                kind: None,
                message_id,
                user_data: request.user_data.take(),
            },
            Err(error) => SendOutcome {
                error: error.to_string(),
                kind: Some(error.kind()),
                message_id,
                user_data: request.user_data.take(),
            },
        };

        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(endpoint = %request.endpoint, "Completion callback panicked");
            }
        }

        timer.stop();
        success
    }

    /// Executes requests in order.
    pub fn execute_all(&self, requests: Vec<PendingRequest>) {
        for request in requests {
            self.execute(request);
        }
    }

    fn transmit(
        &self,
        request: &PendingRequest,
        message_id: &mut Option<String>,
    ) -> SmtpResult<()> {
        request.validate()?;

        let mut lease = self.pool.acquire(&request.endpoint, &request.credentials)?;
        let message = self.composer.compose(request)?;
        *message_id = Some(message.message_id.clone());
        let result = lease.send(&message, request.verbose);
        lease.release();
        result
    }
}

#[cfg(feature = "tracing")]
fn log_sent(request: &PendingRequest, message_id: Option<&str>) {
    if request.verbose {
        tracing::info!(
            endpoint = %request.endpoint,
            message_id = message_id.unwrap_or_default(),
            recipients = request.to.len(),
            "Email sent"
        );
    } else {
        tracing::debug!(endpoint = %request.endpoint, "Email sent");
    }
}
