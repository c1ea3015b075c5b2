//! Error types for the dispatch engine.
//!
//! Every failure a request can hit is classified into one of four categories
//! (validation, connection, transmission, internal). Errors never escape the
//! executor: they are rendered into the request's outcome and handed to its
//! completion callback.

use std::fmt;
use thiserror::Error;

/// Result type for dispatch operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Message reported when a request carries neither a text nor an HTML body.
pub const NO_BODY_MESSAGE: &str = "No message for body!";

/// Error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Validation errors
    /// Neither a text nor an HTML body was supplied.
    NoMessageBody,
    /// Invalid sender address.
    InvalidFromAddress,
    /// Invalid recipient address.
    InvalidRecipientAddress,
    /// No recipient was supplied.
    MissingRecipients,
    /// Endpoint string could not be parsed.
    InvalidEndpoint,

    // Connection errors
    /// Connection was refused or could not be established.
    ConnectionRefused,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// Connection timed out.
    ConnectionTimeout,

    // Transmission errors
    /// Credentials were rejected.
    CredentialsInvalid,
    /// Server answered with a transient (4xx) failure.
    TransientRejection,
    /// Server answered with a permanent (5xx) failure.
    PermanentRejection,
    /// Network failure while transmitting.
    TransmissionFailed,
    /// Read or write timed out while transmitting.
    TransmissionTimeout,

    // Internal errors
    /// Building headers or MIME parts failed.
    EncodingFailed,
    /// Unexpected failure (including a panic) inside the executor.
    Internal,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,
}

/// Broad classification of an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorCategory {
    /// Request rejected before any network activity.
    Validation,
    /// Transport handle could not be opened or reused.
    Connection,
    /// The send step failed.
    Transmission,
    /// Unexpected failure while composing or sending.
    Internal,
    /// Engine configuration rejected.
    Configuration,
}

impl SmtpErrorKind {
    /// Returns the category this kind belongs to.
    pub fn category(&self) -> SmtpErrorCategory {
        match self {
            SmtpErrorKind::NoMessageBody
            | SmtpErrorKind::InvalidFromAddress
            | SmtpErrorKind::InvalidRecipientAddress
            | SmtpErrorKind::MissingRecipients
            | SmtpErrorKind::InvalidEndpoint => SmtpErrorCategory::Validation,

            SmtpErrorKind::ConnectionRefused
            | SmtpErrorKind::TlsHandshakeFailed
            | SmtpErrorKind::ConnectionTimeout => SmtpErrorCategory::Connection,

            SmtpErrorKind::CredentialsInvalid
            | SmtpErrorKind::TransientRejection
            | SmtpErrorKind::PermanentRejection
            | SmtpErrorKind::TransmissionFailed
            | SmtpErrorKind::TransmissionTimeout => SmtpErrorCategory::Transmission,

            SmtpErrorKind::EncodingFailed | SmtpErrorKind::Internal => SmtpErrorCategory::Internal,

            SmtpErrorKind::ConfigurationInvalid => SmtpErrorCategory::Configuration,
        }
    }

    /// Returns true if a later attempt of the same request could succeed.
    ///
    /// The engine itself never retries; this is a hint for callbacks.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionRefused
                | SmtpErrorKind::ConnectionTimeout
                | SmtpErrorKind::TransientRejection
                | SmtpErrorKind::TransmissionFailed
                | SmtpErrorKind::TransmissionTimeout
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::NoMessageBody => write!(f, "Missing body"),
            SmtpErrorKind::InvalidFromAddress => write!(f, "Invalid sender address"),
            SmtpErrorKind::InvalidRecipientAddress => write!(f, "Invalid recipient address"),
            SmtpErrorKind::MissingRecipients => write!(f, "Missing recipients"),
            SmtpErrorKind::InvalidEndpoint => write!(f, "Invalid endpoint"),
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection failed"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::ConnectionTimeout => write!(f, "Connection timed out"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::TransientRejection => write!(f, "Transient server rejection"),
            SmtpErrorKind::PermanentRejection => write!(f, "Permanent server rejection"),
            SmtpErrorKind::TransmissionFailed => write!(f, "Transmission failed"),
            SmtpErrorKind::TransmissionTimeout => write!(f, "Transmission timed out"),
            SmtpErrorKind::EncodingFailed => write!(f, "Encoding failed"),
            SmtpErrorKind::Internal => write!(f, "Internal error"),
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
        }
    }
}

/// Dispatch error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    /// Error kind.
    kind: SmtpErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP status code if the server produced one.
    smtp_code: Option<u16>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP status code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error category.
    pub fn category(&self) -> SmtpErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP status code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return (400..500).contains(&code);
        }
        self.kind.is_retryable()
    }

    // Convenience constructors

    /// Creates the "no body" validation error.
    pub fn no_body() -> Self {
        Self::new(SmtpErrorKind::NoMessageBody, NO_BODY_MESSAGE)
    }

    /// Creates a validation error.
    pub fn validation(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionRefused, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates a transmission error.
    pub fn transmission(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TransmissionFailed, message)
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::EncodingFailed, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Internal, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates an error from an SMTP reply code.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            530 | 534 | 535 => SmtpErrorKind::CredentialsInvalid,
            553 => SmtpErrorKind::InvalidFromAddress,
            550 | 551 => SmtpErrorKind::InvalidRecipientAddress,
            400..=499 => SmtpErrorKind::TransientRejection,
            _ if code >= 500 => SmtpErrorKind::PermanentRejection,
            _ => SmtpErrorKind::TransmissionFailed,
        };
        Self::new(kind, message).with_smtp_code(code)
    }

    /// Creates an error describing a panic payload caught by the executor.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::internal(format!("Unexpected failure: {}", detail))
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The body check is reported verbatim so callers can match on it.
        if self.kind == SmtpErrorKind::NoMessageBody {
            return f.write_str(&self.message);
        }
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

impl From<lettre::transport::smtp::Error> for SmtpError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        let message = error.to_string();
        if let Some(code) = error.status() {
            // Code renders as its three digits.
            if let Ok(code) = code.to_string().parse::<u16>() {
                return SmtpError::from_smtp_response(code, message).with_cause(error);
            }
        }
        let kind = if error.is_timeout() {
            SmtpErrorKind::TransmissionTimeout
        } else if error.is_tls() {
            SmtpErrorKind::TlsHandshakeFailed
        } else if error.is_permanent() {
            SmtpErrorKind::PermanentRejection
        } else if error.is_transient() {
            SmtpErrorKind::TransientRejection
        } else {
            SmtpErrorKind::TransmissionFailed
        };
        SmtpError::new(kind, message).with_cause(error)
    }
}

impl From<lettre::error::Error> for SmtpError {
    fn from(error: lettre::error::Error) -> Self {
        let kind = match &error {
            lettre::error::Error::MissingFrom => SmtpErrorKind::InvalidFromAddress,
            lettre::error::Error::MissingTo => SmtpErrorKind::MissingRecipients,
            _ => SmtpErrorKind::EncodingFailed,
        };
        SmtpError::new(kind, error.to_string()).with_cause(error)
    }
}

impl From<lettre::address::AddressError> for SmtpError {
    fn from(error: lettre::address::AddressError) -> Self {
        SmtpError::validation(SmtpErrorKind::InvalidRecipientAddress, error.to_string())
            .with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_category() {
        assert_eq!(SmtpErrorKind::NoMessageBody.category(), SmtpErrorCategory::Validation);
        assert_eq!(SmtpErrorKind::TlsHandshakeFailed.category(), SmtpErrorCategory::Connection);
        assert_eq!(SmtpErrorKind::CredentialsInvalid.category(), SmtpErrorCategory::Transmission);
        assert_eq!(SmtpErrorKind::Internal.category(), SmtpErrorCategory::Internal);
    }

    #[test]
    fn test_address_error_is_validation() {
        let err: SmtpError = "no-at-sign"
            .parse::<lettre::Address>()
            .unwrap_err()
            .into();
        assert_eq!(err.category(), SmtpErrorCategory::Validation);
    }

    #[test]
    fn test_no_body_display_is_verbatim() {
        assert_eq!(SmtpError::no_body().to_string(), "No message for body!");
    }

    #[test]
    fn test_smtp_error_from_response() {
        let err = SmtpError::from_smtp_response(535, "Authentication failed");
        assert_eq!(err.kind(), SmtpErrorKind::CredentialsInvalid);
        assert_eq!(err.smtp_code(), Some(535));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Invalid credentials: Authentication failed (SMTP 535)"
        );

        let err = SmtpError::from_smtp_response(451, "Try again later");
        assert_eq!(err.kind(), SmtpErrorKind::TransientRejection);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let err = SmtpError::from_panic(payload.as_ref());
        assert_eq!(err.kind(), SmtpErrorKind::Internal);
        assert!(err.message().contains("boom"));

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert!(SmtpError::from_panic(payload.as_ref()).message().contains("owned boom"));
    }
}
