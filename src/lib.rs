//! # SMTP Dispatch Engine
//!
//! Concurrent outbound email dispatch with:
//! - Per-thread request building through chained directives
//! - Synchronous sends on the calling thread, or asynchronous sends drained
//!   by a single background worker
//! - Connection reuse keyed by server and credentials, with idle eviction
//! - Exactly-once completion callbacks carrying the outcome and caller data
//!
//! The SMTP conversation, TLS and MIME encoding are handled by `lettre`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use integrations_smtp_dispatch::{Engine, EngineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(EngineConfig::default())?;
//!
//!     engine
//!         .requests()
//!         .server("smtp.example.com:587")
//!         .credentials("user@example.com", "password")
//!         .from("Sender", "sender@example.com")
//!         .to("", "recipient@example.com")
//!         .subject("Hello from Rust!")
//!         .text("This is a test email.")
//!         .user_data(Arc::new(42u32))
//!         .callback(|outcome| {
//!             if outcome.is_success() {
//!                 println!("Message sent with ID: {:?}", outcome.message_id);
//!             } else {
//!                 eprintln!("Send failed: {}", outcome.error);
//!             }
//!         })
//!         .perform_sync();
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Requests
pub mod request;
pub mod builder;

// Transport layer
pub mod transport;
pub mod pool;

// Message composition
pub mod mime;

// Execution
pub mod executor;
pub mod dispatch;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use builder::RequestBuilder;
pub use config::{EngineConfig, EngineConfigBuilder, TlsMode};
pub use dispatch::Engine;
pub use errors::{SmtpError, SmtpErrorCategory, SmtpErrorKind, SmtpResult};
pub use executor::Executor;
pub use mime::{MessageComposer, OutgoingMessage};
pub use observability::{DispatchMetrics, MetricsSnapshot};
pub use pool::{ConnectionPool, PoolKey, PooledConnection};
pub use request::PendingRequest;
pub use transport::{Endpoint, LettreTransport, MailTransport};
pub use types::{Address, Attachment, Credentials, PoolStatus, SendOutcome, UserData};
