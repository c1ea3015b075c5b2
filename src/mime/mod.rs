//! Message composition.
//!
//! Turns a [`PendingRequest`] into wire-ready bytes plus an SMTP envelope
//! using `lettre`'s message builder:
//!
//! ```text
//! multipart/mixed
//! ├── multipart/alternative
//! │   ├── text/plain   (if present)
//! │   └── text/html    (if present)
//! └── attachments...
//! ```

use lettre::address::Envelope;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as AttachmentPart, MultiPart, SinglePart};
use lettre::Message;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::request::PendingRequest;
use crate::types::Address;

/// A composed message ready for transmission.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Message-ID header value, angle brackets included.
    pub message_id: String,
    /// SMTP envelope (MAIL FROM / RCPT TO).
    pub envelope: Envelope,
    /// RFC 5322 formatted message.
    pub formatted: Vec<u8>,
}

/// Builds [`OutgoingMessage`]s from requests.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    fallback_domain: String,
}

impl MessageComposer {
    /// Creates a composer from the engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fallback_domain: config.fallback_domain.clone(),
        }
    }

    /// Generates a Message-ID for a message sent by `from`.
    pub fn message_id(&self, from: &Address) -> String {
        let domain = from
            .domain()
            .filter(|d| !d.is_empty())
            .unwrap_or(self.fallback_domain.as_str());
        format!("<{}@{}>", Uuid::new_v4().hyphenated(), domain)
    }

    /// Composes the message for `request`.
    pub fn compose(&self, request: &PendingRequest) -> SmtpResult<OutgoingMessage> {
        let message_id = self.message_id(&request.from);

        let mut builder = Message::builder()
            .date_now()
            .from(request.from.to_mailbox(SmtpErrorKind::InvalidFromAddress)?);
        for recipient in &request.to {
            builder = builder.to(recipient.to_mailbox(SmtpErrorKind::InvalidRecipientAddress)?);
        }
        builder = builder
            .message_id(Some(message_id.clone()))
            .subject(request.subject.as_str());

        let mut body = MultiPart::mixed().multipart(Self::alternative(request)?);
        for attachment in &request.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                SmtpError::encoding(format!(
                    "Invalid content type '{}' for {}: {}",
                    attachment.content_type, attachment.filename, e
                ))
            })?;
            body = body.singlepart(
                AttachmentPart::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }

        let message = builder.multipart(body)?;

        Ok(OutgoingMessage {
            message_id,
            envelope: message.envelope().clone(),
            formatted: message.formatted(),
        })
    }

    fn alternative(request: &PendingRequest) -> SmtpResult<MultiPart> {
        let mut parts = Vec::with_capacity(2);
        if !request.text.is_empty() {
            parts.push(SinglePart::plain(request.text.clone()));
        }
        if !request.html.is_empty() {
            parts.push(SinglePart::html(request.html.clone()));
        }

        let mut parts = parts.into_iter();
        let first = parts.next().ok_or_else(SmtpError::no_body)?;
        Ok(parts.fold(MultiPart::alternative().singlepart(first), |multipart, part| {
            multipart.singlepart(part)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attachment;

    fn composer() -> MessageComposer {
        MessageComposer::new(&EngineConfig::default())
    }

    fn request() -> PendingRequest {
        let mut request = PendingRequest::new("smtp.x.com", "Greetings");
        request.from = Address::new("Alice", "a@x.com");
        request.to.push(Address::new("", "b@y.com"));
        request.to.push(Address::new("Carol", "c@z.com"));
        request.text = "Hello".to_string();
        request
    }

    fn formatted(message: &OutgoingMessage) -> String {
        String::from_utf8_lossy(&message.formatted).into_owned()
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        let id = composer().message_id(&Address::new("", "a@x.com"));
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@x.com>"));

        let uuid = &id[1..id.find('@').unwrap()];
        let groups: Vec<usize> = uuid.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
    }

    #[test]
    fn test_message_id_fallback_domain() {
        let id = composer().message_id(&Address::new("", "nobody"));
        assert!(id.ends_with("@example.org>"));

        let config = EngineConfig::builder().fallback_domain("mail.local").build().unwrap();
        let id = MessageComposer::new(&config).message_id(&Address::default());
        assert!(id.ends_with("@mail.local>"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let composer = composer();
        let from = Address::new("", "a@x.com");
        assert_ne!(composer.message_id(&from), composer.message_id(&from));
    }

    #[test]
    fn test_compose_headers_and_envelope() {
        let message = composer().compose(&request()).unwrap();
        let text = formatted(&message);

        assert!(text.contains("Subject: Greetings"));
        assert!(text.contains(&format!("Message-ID: {}", message.message_id)));
        assert!(text.contains("Date: "));
        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("multipart/alternative"));
        assert!(text.contains("text/plain"));
        assert!(!text.contains("text/html"));
        assert_eq!(text.matches("\r\nTo: ").count(), 1);

        assert_eq!(message.envelope.from().map(|a| a.to_string()), Some("a@x.com".to_string()));
        let recipients: Vec<String> = message.envelope.to().iter().map(|a| a.to_string()).collect();
        assert_eq!(recipients, vec!["b@y.com", "c@z.com"]);
    }

    #[test]
    fn test_compose_text_before_html() {
        let mut request = request();
        request.html = "<b>Hello</b>".to_string();
        let text = formatted(&composer().compose(&request).unwrap());

        let plain = text.find("text/plain").unwrap();
        let html = text.find("text/html").unwrap();
        assert!(plain < html);
    }

    #[test]
    fn test_compose_attachments() {
        let mut request = request();
        request.attachments.push(Attachment::from_bytes("report.pdf", b"%PDF-1.4".to_vec()));
        request.attachments.push(Attachment::new("notes.txt", "text/plain", b"notes".to_vec()));
        let text = formatted(&composer().compose(&request).unwrap());

        assert!(text.contains("application/pdf"));
        assert!(text.contains("report.pdf"));
        assert!(text.contains("notes.txt"));
    }

    #[test]
    fn test_compose_rejects_bad_addresses() {
        let mut bad_from = request();
        bad_from.from = Address::new("", "not-an-address");
        assert_eq!(
            composer().compose(&bad_from).unwrap_err().kind(),
            SmtpErrorKind::InvalidFromAddress
        );

        let mut bad_to = request();
        bad_to.to.push(Address::new("", "@@"));
        assert_eq!(
            composer().compose(&bad_to).unwrap_err().kind(),
            SmtpErrorKind::InvalidRecipientAddress
        );
    }

    #[test]
    fn test_compose_rejects_bad_content_type() {
        let mut request = request();
        request.attachments.push(Attachment::new("x.bin", "not a type", vec![1]));
        assert_eq!(
            composer().compose(&request).unwrap_err().kind(),
            SmtpErrorKind::EncodingFailed
        );
    }
}
