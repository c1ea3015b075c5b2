//! Pending send requests.
//!
//! A [`PendingRequest`] is one email job as accumulated by the
//! [`RequestBuilder`](crate::builder::RequestBuilder): where to send, as whom,
//! to whom, what, and who to tell when done.

use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::types::{Address, Attachment, Callback, Credentials, UserData};

/// One accumulated email job.
pub struct PendingRequest {
    /// Server endpoint, used verbatim as part of the pool key.
    pub endpoint: String,
    /// Login credentials.
    pub credentials: Credentials,
    /// Sender.
    pub from: Address,
    /// Recipients in header order.
    pub to: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: String,
    /// Attachments in order.
    pub attachments: Vec<Attachment>,
    /// Log the server conversation summary.
    pub verbose: bool,
    /// Opaque caller data.
    pub user_data: Option<UserData>,
    /// Completion callback.
    pub callback: Option<Callback>,
}

impl PendingRequest {
    /// Creates an empty request for `endpoint` carrying `subject`.
    pub fn new(endpoint: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: Credentials::default(),
            from: Address::default(),
            to: Vec::new(),
            subject: subject.into(),
            text: String::new(),
            html: String::new(),
            attachments: Vec::new(),
            verbose: false,
            user_data: None,
            callback: None,
        }
    }

    /// Returns true if either body is non-empty.
    pub fn has_body(&self) -> bool {
        !self.text.is_empty() || !self.html.is_empty()
    }

    /// Checks the request can be transmitted without touching the network.
    pub fn validate(&self) -> SmtpResult<()> {
        if !self.has_body() {
            return Err(SmtpError::no_body());
        }

        if self.to.is_empty() {
            return Err(SmtpError::validation(
                SmtpErrorKind::MissingRecipients,
                "No recipients specified",
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("text_len", &self.text.len())
            .field("html_len", &self.html.len())
            .field("attachments", &self.attachments.len())
            .field("verbose", &self.verbose)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_recipient() -> PendingRequest {
        let mut request = PendingRequest::new("smtp.x.com", "Hello");
        request.to.push(Address::new("", "b@x.com"));
        request
    }

    #[test]
    fn test_new_request_defaults() {
        let request = PendingRequest::new("smtp.x.com", "No subject.");
        assert_eq!(request.endpoint, "smtp.x.com");
        assert_eq!(request.subject, "No subject.");
        assert!(request.to.is_empty());
        assert!(!request.verbose);
        assert!(request.callback.is_none());
    }

    #[test]
    fn test_validate_requires_body() {
        let request = request_with_recipient();
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::NoMessageBody);
        assert_eq!(err.to_string(), "No message for body!");
    }

    #[test]
    fn test_validate_accepts_either_body() {
        let mut request = request_with_recipient();
        request.html = "<p>hi</p>".to_string();
        assert!(request.validate().is_ok());

        let mut request = request_with_recipient();
        request.text = "hi".to_string();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_body_checked_before_recipients() {
        let request = PendingRequest::new("smtp.x.com", "s");
        assert_eq!(request.validate().unwrap_err().kind(), SmtpErrorKind::NoMessageBody);

        let mut request = PendingRequest::new("smtp.x.com", "s");
        request.text = "hi".to_string();
        assert_eq!(
            request.validate().unwrap_err().kind(),
            SmtpErrorKind::MissingRecipients
        );
    }

    #[test]
    fn test_debug_hides_bodies_and_password() {
        let mut request = request_with_recipient();
        request.credentials = Credentials::new("u", "secret-pass");
        request.text = "confidential".to_string();
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("secret-pass"));
        assert!(!rendered.contains("confidential"));
    }
}
