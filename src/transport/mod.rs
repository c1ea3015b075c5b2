//! Transport layer for SMTP connections.
//!
//! The dispatch engine never speaks SMTP itself. It drives a [`MailTransport`],
//! which opens, probes, uses and closes long-lived connections. The default
//! implementation, [`LettreTransport`], delegates the conversation, TLS and
//! authentication to `lettre`'s blocking [`SmtpConnection`].

use lettre::transport::smtp::authentication::{Credentials as LettreCredentials, Mechanism};
use lettre::transport::smtp::client::SmtpConnection;
use lettre::transport::smtp::extension::ClientId;
use std::fmt;
use std::time::Duration;

use crate::config::{EngineConfig, TlsMode, DEFAULT_IMPLICIT_TLS_PORT, DEFAULT_PORT};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::OutgoingMessage;
use crate::types::Credentials;

/// Trait for mail transport abstraction.
///
/// Implementations must be shareable across the worker and caller threads.
/// A connection is only ever used by one thread at a time; the pool enforces
/// this.
pub trait MailTransport: Send + Sync + fmt::Debug + 'static {
    /// Live connection handle.
    type Connection: Send + 'static;

    /// One-time process setup, run when the first engine using this
    /// transport type starts.
    fn global_init() {}

    /// Counterpart of [`MailTransport::global_init`], run when the last
    /// engine using this transport type stops.
    fn global_cleanup() {}

    /// Opens and authenticates a connection to `endpoint`.
    fn open(&self, endpoint: &str, credentials: &Credentials) -> SmtpResult<Self::Connection>;

    /// Returns false when a pooled connection can no longer be used.
    fn is_alive(&self, _connection: &mut Self::Connection) -> bool {
        true
    }

    /// Transmits one composed message over the connection.
    fn send(
        &self,
        connection: &mut Self::Connection,
        message: &OutgoingMessage,
        verbose: bool,
    ) -> SmtpResult<()>;

    /// Closes a connection. Never fails.
    fn close(&self, connection: Self::Connection);
}

/// Parsed server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TLS mode in effect for this endpoint.
    pub tls: TlsMode,
}

impl Endpoint {
    /// Parses `host`, `host:port`, `smtp://host[:port]` or
    /// `smtps://host[:port]`.
    ///
    /// `smtps://` forces implicit TLS; otherwise `default_tls` applies.
    pub fn parse(endpoint: &str, default_tls: TlsMode) -> SmtpResult<Self> {
        let trimmed = endpoint.trim();
        let (rest, tls) = if let Some(rest) = strip_scheme(trimmed, "smtps://") {
            (rest, TlsMode::Implicit)
        } else if let Some(rest) = strip_scheme(trimmed, "smtp://") {
            (rest, default_tls)
        } else if trimmed.contains("://") {
            return Err(invalid_endpoint(endpoint, "unsupported scheme"));
        } else {
            (trimmed, default_tls)
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) =
            split_host_port(rest).ok_or_else(|| invalid_endpoint(endpoint, "malformed address"))?;
        if host.is_empty() {
            return Err(invalid_endpoint(endpoint, "missing host"));
        }
        if !host.chars().all(|c| c.is_ascii_graphic()) {
            return Err(invalid_endpoint(endpoint, "invalid host"));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid_endpoint(endpoint, "invalid port"))?,
            None if tls == TlsMode::Implicit => DEFAULT_IMPLICIT_TLS_PORT,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// Returns the address in `host:port` format.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    value
        .get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        .then(|| value.get(scheme.len()..))
        .flatten()
}

fn split_host_port(value: &str) -> Option<(&str, Option<&str>)> {
    // Bracketed IPv6 literal
    if let Some(rest) = value.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            _ => Some((host, Some(tail.strip_prefix(':')?))),
        };
    }
    match value.split_once(':') {
        Some((host, port)) if !port.contains(':') => Some((host, Some(port))),
        Some(_) => None,
        None => Some((value, None)),
    }
}

fn invalid_endpoint(endpoint: &str, reason: &str) -> SmtpError {
    SmtpError::new(
        SmtpErrorKind::InvalidEndpoint,
        format!("Invalid endpoint '{}': {}", endpoint, reason),
    )
}

/// Transport backed by `lettre`'s blocking SMTP client.
#[derive(Debug, Clone)]
pub struct LettreTransport {
    timeout: Duration,
    tls: TlsMode,
    client_id: String,
}

impl LettreTransport {
    /// Creates a transport from the engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            timeout: config.transmit_timeout,
            tls: config.tls,
            client_id: config.client_id().to_string(),
        }
    }

    fn hello(&self) -> ClientId {
        ClientId::Domain(self.client_id.clone())
    }

    #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
    fn connect(&self, endpoint: &Endpoint) -> SmtpResult<SmtpConnection> {
        use lettre::transport::smtp::client::TlsParameters;

        let hello = self.hello();
        let server = (endpoint.host.as_str(), endpoint.port);
        let tls_parameters = || {
            TlsParameters::new(endpoint.host.clone())
                .map_err(|e| SmtpError::tls(format!("Invalid TLS parameters: {}", e)))
        };

        if endpoint.tls == TlsMode::Implicit {
            let parameters = tls_parameters()?;
            return SmtpConnection::connect(
                server,
                Some(self.timeout),
                &hello,
                Some(&parameters),
                None,
            )
            .map_err(map_connect_error);
        }

        let mut connection = SmtpConnection::connect(server, Some(self.timeout), &hello, None, None)
            .map_err(map_connect_error)?;

        match endpoint.tls {
            TlsMode::StartTls | TlsMode::StartTlsRequired if connection.can_starttls() => {
                let parameters = tls_parameters()?;
                connection
                    .starttls(&parameters, &hello)
                    .map_err(map_connect_error)?;
            }
            TlsMode::StartTlsRequired => {
                connection.abort();
                return Err(SmtpError::tls(format!(
                    "{} does not support STARTTLS",
                    endpoint
                )));
            }
            _ => {}
        }

        Ok(connection)
    }

    #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
    fn connect(&self, endpoint: &Endpoint) -> SmtpResult<SmtpConnection> {
        if matches!(endpoint.tls, TlsMode::Implicit | TlsMode::StartTlsRequired) {
            return Err(SmtpError::configuration(
                "TLS required but no TLS backend feature is enabled",
            ));
        }
        let server = (endpoint.host.as_str(), endpoint.port);
        SmtpConnection::connect(server, Some(self.timeout), &self.hello(), None, None)
            .map_err(map_connect_error)
    }
}

impl MailTransport for LettreTransport {
    type Connection = SmtpConnection;

    fn global_init() {
        #[cfg(feature = "tracing")]
        tracing::debug!("SMTP transport initialized");
    }

    fn global_cleanup() {
        #[cfg(feature = "tracing")]
        tracing::debug!("SMTP transport released");
    }

    fn open(&self, endpoint: &str, credentials: &Credentials) -> SmtpResult<SmtpConnection> {
        let endpoint = Endpoint::parse(endpoint, self.tls)?;
        let mut connection = self.connect(&endpoint)?;

        if !credentials.is_anonymous() {
            let lettre_credentials = LettreCredentials::new(
                credentials.username().to_string(),
                credentials.password().to_string(),
            );
            let mechanisms = [Mechanism::Plain, Mechanism::Login];
            if let Err(e) = connection.auth(&mechanisms, &lettre_credentials) {
                connection.abort();
                return Err(SmtpError::new(
                    SmtpErrorKind::CredentialsInvalid,
                    format!("Authentication failed: {}", e),
                )
                .with_cause(e));
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %endpoint, "SMTP connection established");

        Ok(connection)
    }

    fn is_alive(&self, connection: &mut SmtpConnection) -> bool {
        !connection.has_broken() && connection.test_connected()
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn send(
        &self,
        connection: &mut SmtpConnection,
        message: &OutgoingMessage,
        verbose: bool,
    ) -> SmtpResult<()> {
        let response = connection.send(&message.envelope, &message.formatted)?;

        if verbose {
            #[cfg(feature = "tracing")]
            tracing::info!(
                message_id = %message.message_id,
                code = %response.code(),
                reply = %response.message().collect::<Vec<_>>().join(" "),
                "Message accepted"
            );
        }

        Ok(())
    }

    fn close(&self, mut connection: SmtpConnection) {
        if connection.quit().is_err() {
            connection.abort();
        }
    }
}

fn map_connect_error(error: lettre::transport::smtp::Error) -> SmtpError {
    let kind = if error.is_timeout() {
        SmtpErrorKind::ConnectionTimeout
    } else if error.is_tls() {
        SmtpErrorKind::TlsHandshakeFailed
    } else {
        SmtpErrorKind::ConnectionRefused
    };
    SmtpError::new(kind, format!("Connection failed: {}", error)).with_cause(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("smtp.example.com", "smtp.example.com", 587, TlsMode::StartTlsRequired)]
    #[case("smtp.example.com:25", "smtp.example.com", 25, TlsMode::StartTlsRequired)]
    #[case("smtp://mail.local:2525", "mail.local", 2525, TlsMode::StartTlsRequired)]
    #[case("smtps://mail.local", "mail.local", 465, TlsMode::Implicit)]
    #[case("SMTPS://mail.local:1465/", "mail.local", 1465, TlsMode::Implicit)]
    #[case("[::1]:2525", "::1", 2525, TlsMode::StartTlsRequired)]
    #[case("  relay  ", "relay", 587, TlsMode::StartTlsRequired)]
    fn test_endpoint_parse(
        #[case] input: &str,
        #[case] host: &str,
        #[case] port: u16,
        #[case] tls: TlsMode,
    ) {
        let endpoint = Endpoint::parse(input, TlsMode::StartTlsRequired).unwrap();
        assert_eq!(endpoint.host, host);
        assert_eq!(endpoint.port, port);
        assert_eq!(endpoint.tls, tls);
    }

    #[rstest]
    #[case("")]
    #[case(":25")]
    #[case("host:notaport")]
    #[case("host:0")]
    #[case("http://host")]
    #[case("a:b:c")]
    #[case("éééé")]
    #[case("smtpé://host")]
    fn test_endpoint_parse_invalid(#[case] input: &str) {
        let err = Endpoint::parse(input, TlsMode::None).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidEndpoint);
    }

    #[test]
    fn test_endpoint_default_tls_applies_without_scheme() {
        let endpoint = Endpoint::parse("mail.local", TlsMode::Implicit).unwrap();
        assert_eq!(endpoint.port, 465);

        let endpoint = Endpoint::parse("smtp://mail.local", TlsMode::None).unwrap();
        assert_eq!(endpoint.tls, TlsMode::None);
        assert_eq!(endpoint.address(), "mail.local:587");
    }

    #[test]
    fn test_endpoint_ipv6_address() {
        let endpoint = Endpoint::parse("[::1]", TlsMode::None).unwrap();
        assert_eq!(endpoint.address(), "[::1]:587");
    }

    #[test]
    fn test_lettre_transport_from_config() {
        let config = EngineConfig::builder()
            .client_id("mailer.local")
            .transmit_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let transport = LettreTransport::new(&config);
        assert_eq!(transport.client_id, "mailer.local");
        assert_eq!(transport.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_lettre_transport_rejects_bad_endpoint_before_connecting() {
        let transport = LettreTransport::new(&EngineConfig::default());
        let err = transport
            .open("ftp://nowhere", &Credentials::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidEndpoint);
    }
}
