//! A trait to represent a stream

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_native_tls::{Identity, TlsConnector, TlsStream};
use async_trait::async_trait;
use log::{debug, warn};
use pin_project::pin_project;
use tokio::io::{self, ReadBuf};
use tokio::net::lookup_host;

use crate::error::{Error, Phase};
use crate::runtime::{phase_timeout, timeout, Read, TcpStream, Write};

/// How the TLS connector is to be built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Reject peer certificates that do not verify
    pub verify: bool,
    /// PEM file holding the client certificate chain and its PKCS#8 key
    pub client_certificate: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        TlsSettings {
            verify: true,
            client_certificate: None,
        }
    }
}

/// Parameters to use for secure clients
pub struct ClientTlsParameters {
    /// A connector from `native-tls`
    pub connector: TlsConnector,
    /// The domain to send during the TLS handshake
    pub domain: String,
}

impl fmt::Debug for ClientTlsParameters {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ClientTlsParameters")
            .field("connector", &"TlsConnector")
            .field("domain", &self.domain)
            .finish()
    }
}

impl ClientTlsParameters {
    /// Creates a `ClientTlsParameters`
    pub fn new(domain: String, connector: TlsConnector) -> ClientTlsParameters {
        ClientTlsParameters { connector, domain }
    }

    /// Builds the connector described by `settings`, loading the client
    /// certificate if one is configured.
    pub async fn from_settings(
        domain: String,
        settings: &TlsSettings,
    ) -> Result<ClientTlsParameters, Error> {
        let mut connector = TlsConnector::new();
        if !settings.verify {
            warn!("peer certificate verification disabled");
            connector = connector.danger_accept_invalid_certs(true);
        }
        if let Some(ref path) = settings.client_certificate {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            connector = connector.identity(Identity::from_pkcs8(&pem, &pem)?);
            debug!("using client certificate {}", path.display());
        }
        Ok(ClientTlsParameters::new(domain, connector))
    }
}

/// Represents the different types of underlying network streams
#[pin_project(project = NetworkStreamProj)]
#[allow(missing_debug_implementations)]
pub enum NetworkStream {
    /// Plain TCP stream
    Tcp(#[pin] TcpStream),
    /// Encrypted TCP stream
    Tls(#[pin] TlsStream<TcpStream>),
}

impl NetworkStream {
    /// Returns peer's address
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match *self {
            NetworkStream::Tcp(ref s) => s.peer_addr(),
            NetworkStream::Tls(ref s) => s.get_ref().peer_addr(),
        }
    }
}

impl Read for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_read(cx, buf),
            NetworkStreamProj::Tls(s) => s.poll_read(cx, buf),
        }
    }
}

impl Write for NetworkStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_write(cx, buf),
            NetworkStreamProj::Tls(s) => s.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_flush(cx),
            NetworkStreamProj::Tls(s) => s.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_shutdown(cx),
            NetworkStreamProj::Tls(s) => s.poll_shutdown(cx),
        }
    }
}

/// Runs the TLS handshake and insists on a peer certificate
async fn handshake(
    tls_parameters: &ClientTlsParameters,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, Error> {
    let stream = tls_parameters
        .connector
        .connect(&tls_parameters.domain, stream)
        .await?;
    match stream.peer_certificate()? {
        Some(_) => Ok(stream),
        None => Err(Error::NoPeerCertificate),
    }
}

/// A trait for the concept of opening a stream
#[async_trait]
pub trait Connector: Sized {
    /// Opens a connection to `host`, trying each resolved address in turn
    async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        tls_parameters: Option<&ClientTlsParameters>,
    ) -> Result<Self, Error>;
    /// Upgrades to TLS connection
    async fn upgrade_tls(self, tls_parameters: &ClientTlsParameters) -> Result<Self, Error>;

    /// Is the NetworkStream encrypted
    fn is_encrypted(&self) -> bool;
}

#[async_trait]
impl Connector for NetworkStream {
    async fn connect(
        host: &str,
        port: u16,
        duration: Duration,
        tls_parameters: Option<&ClientTlsParameters>,
    ) -> Result<NetworkStream, Error> {
        let addrs: Vec<SocketAddr> = match timeout(duration, lookup_host((host, port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => return Err(Error::Resolution(format!("{}: {}", host, e))),
            Err(_) => return Err(Error::Resolution(format!("{}: lookup timed out", host))),
        };

        let mut last_error = Error::Resolution(format!("{}: no addresses", host));
        let mut connected = None;
        for addr in addrs {
            debug!("connecting to {}", addr);
            match timeout(duration, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    connected = Some(stream);
                    break;
                }
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                    last_error = Error::ConnectRefused {
                        host: host.to_string(),
                        port,
                    };
                }
                Ok(Err(e)) => {
                    last_error = Error::Unreachable {
                        host: host.to_string(),
                        port,
                        source: e,
                    };
                }
                Err(_) => {
                    last_error = Error::ConnectTimeout {
                        host: host.to_string(),
                        port,
                    };
                }
            }
            debug!("{}: {}", addr, last_error);
        }
        let tcp_stream = connected.ok_or(last_error)?;

        match tls_parameters {
            Some(context) => {
                phase_timeout(Phase::Connect, duration, handshake(context, tcp_stream))
                    .await
                    .map(NetworkStream::Tls)
            }
            None => Ok(NetworkStream::Tcp(tcp_stream)),
        }
    }

    async fn upgrade_tls(self, tls_parameters: &ClientTlsParameters) -> Result<Self, Error> {
        match self {
            NetworkStream::Tcp(stream) => {
                let tls_stream = handshake(tls_parameters, stream).await?;
                Ok(NetworkStream::Tls(tls_stream))
            }
            _ => Ok(self),
        }
    }

    fn is_encrypted(&self) -> bool {
        match *self {
            NetworkStream::Tcp(_) => false,
            NetworkStream::Tls(_) => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::async_test;
    use tokio::net::TcpListener;

    async_test! { test_connect_plain, {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = NetworkStream::connect("127.0.0.1", port, Duration::from_secs(2), None)
            .await
            .unwrap();
        assert!(!stream.is_encrypted());
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }}

    async_test! { test_connect_refused, {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        match NetworkStream::connect("127.0.0.1", port, Duration::from_secs(2), None).await {
            Err(Error::ConnectRefused { host, port: p }) => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(p, port);
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("connected to a closed port"),
        }
    }}

    async_test! { test_missing_client_certificate, {
        let settings = TlsSettings {
            verify: true,
            client_certificate: Some(PathBuf::from("/nonexistent/client.pem")),
        };
        assert!(matches!(
            ClientTlsParameters::from_settings("localhost".to_string(), &settings).await,
            Err(Error::Config(_))
        ));
    }}
}
