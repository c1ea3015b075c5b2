//! Core types for the dispatch engine.
//!
//! This module provides:
//! - Address and attachment values carried by a request
//! - Credentials with a redacted password
//! - The outcome handed to completion callbacks
//! - Pool status snapshots

use secrecy::{ExposeSecret, SecretString};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::errors::{SmtpError, SmtpErrorKind};

/// Opaque caller data passed through a request to its callback unchanged.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Completion callback invoked exactly once per request.
pub type Callback = Box<dyn FnOnce(SendOutcome) + Send + 'static>;

/// Email address with optional display name.
///
/// Values are stored as given; they are checked only when the message is
/// composed, so setting them never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    /// Display name (e.g., "John Doe"); empty when absent.
    pub name: String,
    /// Email address (e.g., "john@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }

    /// Returns the domain of the email address.
    ///
    /// The domain is whatever follows the first `@`, cut at a closing `>` or
    /// whitespace.
    pub fn domain(&self) -> Option<&str> {
        let at = self.email.find('@')?;
        let rest = &self.email[at + 1..];
        let end = rest
            .find(|c: char| c == '>' || c.is_whitespace())
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Formats the address for email headers.
    pub fn to_header(&self) -> String {
        match self.name() {
            Some(name) => {
                // Quote name if it contains special characters
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name, self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => self.email.clone(),
        }
    }

    /// Converts into a `lettre` mailbox, validating the email.
    pub fn to_mailbox(&self, kind: SmtpErrorKind) -> Result<lettre::message::Mailbox, SmtpError> {
        let email: lettre::Address = self.email.trim().parse().map_err(|e| {
            SmtpError::validation(kind, format!("Invalid address '{}': {}", self.email, e))
        })?;
        Ok(lettre::message::Mailbox::new(
            self.name().map(str::to_string),
            email,
        ))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

/// File attachment supplied as raw bytes.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Binary content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates a new attachment.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Creates an attachment with content type guessed from the filename.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        Self::new(filename, content_type, data)
    }
}

/// Username and password for a server.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    /// Creates plain credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns true when no username is set; authentication is skipped.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Final state of one request, handed to its callback.
#[derive(Clone)]
pub struct SendOutcome {
    /// Error description; empty on success.
    pub error: String,
    /// Error kind when the request failed.
    pub kind: Option<SmtpErrorKind>,
    /// Message-ID generated for the message, once composed.
    pub message_id: Option<String>,
    /// Caller data attached to the request.
    pub user_data: Option<UserData>,
}

impl SendOutcome {
    /// Returns true if the message was transmitted.
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }

    /// Returns the user data downcast to `T`.
    pub fn user_data_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOutcome")
            .field("error", &self.error)
            .field("kind", &self.kind)
            .field("message_id", &self.message_id)
            .field("user_data", &self.user_data.as_ref().map(|_| "<opaque>"))
            .finish()
    }
}

/// Connection pool status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Total entries in the pool.
    pub total: usize,
    /// Entries currently leased to a transmission.
    pub in_use: usize,
    /// Entries waiting for reuse.
    pub idle: usize,
}
