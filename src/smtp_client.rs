use std::io;
use std::time::Duration;

use log::{debug, info};

use crate::authentication::{Credentials, Mechanism};
use crate::commands::*;
use crate::config::SMTP_PORT;
use crate::error::{Error, Phase, SmtpResult};
use crate::message::Message;
use crate::net::{ClientTlsParameters, Connector, NetworkStream, TlsSettings};
use crate::runtime::{phase_deadline, phase_timeout, timeout, Instant, WriteExt};
use crate::stream::{SmtpStream, Timeouts};

/// Default submission over TLS port
pub const SUBMISSIONS_PORT: u16 = 465;

/// Budget for the closing QUIT, whatever happened before
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How to apply TLS to a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSecurity {
    /// Plain text only
    None,
    /// Start with a plain connection and upgrade with `STARTTLS`
    StartTls,
    /// Use TLS wrapped connection
    Wrapper,
}

/// Contains client configuration
///
/// Built once before anything goes on the network, and not changed for the
/// duration of the session.
#[derive(Debug, Clone)]
pub struct SmtpClient {
    /// Mailhub we are connecting to
    server: String,
    port: u16,
    /// Name sent during HELO/EHLO
    hello_name: ClientId,
    /// TLS security configuration
    security: ClientSecurity,
    tls: TlsSettings,
    /// Credentials, authentication is skipped without them
    credentials: Option<Credentials>,
    authentication_mechanism: Mechanism,
    timeouts: Timeouts,
}

/// Builder for the SMTP `SmtpTransport`
impl SmtpClient {
    /// Creates a new SMTP client
    ///
    /// Defaults are:
    ///
    /// * No TLS
    /// * No authentication
    /// * Timeouts from `Timeouts::default()`
    pub fn new<S: Into<String>>(server: S, port: u16) -> SmtpClient {
        SmtpClient {
            server: server.into(),
            port,
            hello_name: ClientId::default(),
            security: ClientSecurity::None,
            tls: TlsSettings::default(),
            credentials: None,
            authentication_mechanism: Mechanism::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Creates a client for the standard SMTP port
    pub fn with_server<S: Into<String>>(server: S) -> SmtpClient {
        SmtpClient::new(server, SMTP_PORT)
    }

    /// Set the name used during HELO/EHLO
    pub fn hello_name(self, name: ClientId) -> SmtpClient {
        SmtpClient {
            hello_name: name,
            ..self
        }
    }

    pub fn security(self, security: ClientSecurity) -> SmtpClient {
        SmtpClient { security, ..self }
    }

    pub fn tls_settings(self, tls: TlsSettings) -> SmtpClient {
        SmtpClient { tls, ..self }
    }

    /// Set the client credentials
    pub fn credentials(self, credentials: Credentials) -> SmtpClient {
        SmtpClient {
            credentials: Some(credentials),
            ..self
        }
    }

    /// Set the authentication mechanism to use
    pub fn authentication_mechanism(self, mechanism: Mechanism) -> SmtpClient {
        SmtpClient {
            authentication_mechanism: mechanism,
            ..self
        }
    }

    pub fn timeouts(self, timeouts: Timeouts) -> SmtpClient {
        SmtpClient { timeouts, ..self }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Rejects settings that cannot lead to a session
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.is_empty() {
            return Err(Error::Config("no mailhub configured".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("mailhub port 0".to_string()));
        }
        let t = &self.timeouts;
        let budgets = [
            ("connect", t.connect),
            ("read", t.read),
            ("write", t.write),
            ("exchange", t.exchange),
            ("session", t.session),
        ];
        for &(name, budget) in budgets.iter() {
            if budget == Duration::from_secs(0) {
                return Err(Error::Config(format!("{} timeout must not be zero", name)));
            }
        }
        Ok(())
    }

    /// Creates the transport relaying with this configuration
    pub fn into_transport(self) -> SmtpTransport {
        SmtpTransport::new(self)
    }
}

type Connection = SmtpStream<NetworkStream>;

fn connection(slot: &mut Option<Connection>) -> Result<&mut Connection, Error> {
    slot.as_mut().ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection lost",
        ))
    })
}

/// Structure that implements the high level SMTP client
#[derive(Debug)]
pub struct SmtpTransport {
    /// Information about the client
    client_info: SmtpClient,
}

impl SmtpTransport {
    pub fn new(client_info: SmtpClient) -> SmtpTransport {
        SmtpTransport { client_info }
    }

    /// Relays one message and returns the server's final reply.
    ///
    /// The whole session runs under the session deadline. Once connected,
    /// QUIT is attempted on every exit path.
    pub async fn send(&self, message: &Message) -> SmtpResult {
        let client = &self.client_info;
        client.validate()?;

        let tls = match client.security {
            ClientSecurity::None => None,
            _ => Some(ClientTlsParameters::from_settings(client.server.clone(), &client.tls).await?),
        };
        let deadline = Instant::now() + client.timeouts.session;

        let mut slot = Some(phase_deadline(Phase::Session, deadline, self.connect(tls.as_ref())).await?);
        let result = phase_deadline(
            Phase::Session,
            deadline,
            self.session(&mut slot, tls.as_ref(), message),
        )
        .await;

        if let Some(connection) = slot {
            close(connection).await;
        }
        result
    }

    async fn connect(&self, tls: Option<&ClientTlsParameters>) -> Result<Connection, Error> {
        let client = &self.client_info;
        let wrapper = match client.security {
            ClientSecurity::Wrapper => tls,
            _ => None,
        };
        let stream =
            NetworkStream::connect(&client.server, client.port, client.timeouts.connect, wrapper)
                .await?;
        if let Ok(addr) = stream.peer_addr() {
            debug!(
                "connected to {} ({}){}",
                client.server,
                addr,
                if stream.is_encrypted() { " over tls" } else { "" }
            );
        }
        Ok(SmtpStream::new(stream, client.timeouts))
    }

    /// Plain text EHLO and STARTTLS, then the handshake.
    ///
    /// The server sends no new greeting on the encrypted channel.
    async fn starttls(
        &self,
        slot: &mut Option<Connection>,
        tls: Option<&ClientTlsParameters>,
    ) -> Result<(), Error> {
        let client = &self.client_info;
        let tls = tls.ok_or_else(|| Error::Config("STARTTLS without TLS parameters".to_string()))?;

        let stream = connection(slot)?;
        stream
            .expect_success(EhloCommand::new(client.hello_name.clone()))
            .await?;
        stream.expect_success(StarttlsCommand).await?;

        let plain = slot.take().ok_or_else(|| Error::Config("no connection".to_string()))?;
        let upgraded = phase_timeout(
            Phase::Connect,
            client.timeouts.connect,
            plain.into_inner().upgrade_tls(tls),
        )
        .await?;
        debug!("connection upgraded to tls");
        *slot = Some(SmtpStream::new(upgraded, client.timeouts));
        Ok(())
    }

    async fn session(
        &self,
        slot: &mut Option<Connection>,
        tls: Option<&ClientTlsParameters>,
        message: &Message,
    ) -> SmtpResult {
        let client = &self.client_info;

        let stream = connection(slot)?;
        let greeting =
            phase_timeout(Phase::Exchange, client.timeouts.exchange, stream.read_response())
                .await?;
        if !greeting.is_positive() {
            return Err(Error::Protocol(greeting));
        }

        if client.security == ClientSecurity::StartTls {
            self.starttls(slot, tls).await?;
        }
        let stream = connection(slot)?;

        let hello_name = client.hello_name.clone();
        match client.credentials {
            Some(ref credentials) => {
                stream.expect_success(EhloCommand::new(hello_name)).await?;
                client
                    .authentication_mechanism
                    .authenticate(stream, credentials)
                    .await?;
            }
            None => {
                stream.expect_success(HeloCommand::new(hello_name)).await?;
            }
        }

        let envelope = message.envelope();
        stream
            .expect_success(MailCommand::new(envelope.from().clone()))
            .await?;

        for recipient in envelope.to() {
            let response = stream.command(RcptCommand::new(recipient.clone())).await?;
            if !response.is_positive() {
                return Err(Error::RecipientRejected {
                    recipient: recipient.to_string(),
                    response,
                });
            }
            debug!("to=<{}>", recipient);
        }

        let response = stream.command(DataCommand).await?;
        if !response.is_intermediate() {
            return Err(Error::Protocol(response));
        }

        let response = stream.message(message.lines()).await?;
        if response.is_positive() {
            info!("sent mail for {} ({})", envelope.from(), response);
            Ok(response)
        } else {
            Err(Error::MessageRejected(response))
        }
    }
}

/// Sends QUIT and closes; failures are only logged
async fn close(mut connection: Connection) {
    let quit = async {
        let response = connection.command(QuitCommand).await?;
        debug!("quit: {}", response);
        connection.into_inner().shutdown().await?;
        Ok::<(), Error>(())
    };
    match timeout(CLOSE_TIMEOUT, quit).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("closing: {}", e),
        Err(_) => debug!("closing: QUIT timed out"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = SmtpClient::with_server("mailhub");
        assert_eq!(client.server(), "mailhub");
        assert_eq!(client.port(), 25);
        assert_eq!(client.security, ClientSecurity::None);
        assert!(client.credentials.is_none());
        assert_eq!(client.authentication_mechanism, Mechanism::Login);
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            SmtpClient::new("", 25).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SmtpClient::new("mailhub", 0).validate(),
            Err(Error::Config(_))
        ));
        let timeouts = Timeouts {
            read: Duration::from_secs(0),
            ..Timeouts::default()
        };
        assert!(matches!(
            SmtpClient::new("mailhub", SUBMISSIONS_PORT)
                .timeouts(timeouts)
                .validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let client = SmtpClient::new("smtp.example.com", 587)
            .hello_name(ClientId::new("box.example.com".to_string()))
            .security(ClientSecurity::StartTls)
            .credentials(Credentials::new("u".to_string(), "p".to_string()))
            .authentication_mechanism(Mechanism::CramMd5);
        assert_eq!(client.hello_name.as_ref(), "box.example.com");
        assert_eq!(client.security, ClientSecurity::StartTls);
        assert_eq!(client.authentication_mechanism, Mechanism::CramMd5);
        assert!(client.credentials.is_some());
        assert_eq!(client.into_transport().client_info.port(), 587);
    }
}
