//! Error and result type for the relay session

use std::fmt;
use std::io;

use base64::DecodeError;

use crate::response::Response;

/// Protocol step during which a timeout fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Resolving the mailhub or waiting for the TCP connection
    Connect,
    /// Waiting for a reply line
    Read,
    /// Waiting for the peer to accept written bytes
    Write,
    /// A single command/reply exchange ran past its deadline
    Exchange,
    /// The whole session ran past its deadline
    Session,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connect => "connect",
            Phase::Read => "read",
            Phase::Write => "write",
            Phase::Exchange => "exchange",
            Phase::Session => "session",
        })
    }
}

/// An enum of all error kinds.
///
/// Every kind is fatal to the session: nothing is retried.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid or unsatisfiable configuration
    #[error("configuration: {0}")]
    Config(String),
    /// DNS resolution error
    #[error("could not resolve {0}")]
    Resolution(String),
    /// No candidate address completed the connection in time
    #[error("connect({host}:{port}) timed out")]
    ConnectTimeout { host: String, port: u16 },
    /// The mailhub refused the connection
    #[error("connection to {host}:{port} refused")]
    ConnectRefused { host: String, port: u16 },
    /// Any other failure to reach the mailhub
    #[error("unable to connect to {host}:{port}: {source}")]
    Unreachable {
        host: String,
        port: u16,
        source: io::Error,
    },
    /// TLS handshake or setup error
    #[error("tls: {0}")]
    Tls(#[from] async_native_tls::Error),
    /// The peer completed the handshake without presenting a certificate
    #[error("tls: server presented no certificate")]
    NoPeerCertificate,
    /// A per-operation timeout or the watchdog fired
    #[error("{0} timed out")]
    Timeout(Phase),
    /// Unexpected reply class
    #[error("{0}")]
    Protocol(Response),
    /// The server rejected the credentials or the mechanism
    #[error("authorization failed ({0})")]
    AuthRejected(Response),
    /// The server rejected a recipient; the whole session is abandoned
    #[error("recipient <{recipient}> rejected: {response}")]
    RecipientRejected {
        recipient: String,
        response: Response,
    },
    /// The server refused the message after the data terminator
    #[error("{0}")]
    MessageRejected(Response),
    /// Error parsing a base64 string in a challenge
    #[error("challenge parsing: {0}")]
    ChallengeParsing(#[from] DecodeError),
    /// Address unusable in an SMTP command
    #[error("invalid email address: {0:?}")]
    InvalidAddress(String),
    /// Nobody to deliver to
    #[error("no recipients specified")]
    NoRecipients,
    /// A line exceeded the protocol buffer
    #[error("line of {len} bytes exceeds the {max} byte limit")]
    LineTooLong { len: usize, max: usize },
    /// IO error
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The server reply attached to this error, if the server produced one
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Protocol(response)
            | Error::AuthRejected(response)
            | Error::MessageRejected(response)
            | Error::RecipientRejected { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// SMTP result type
pub type SmtpResult = Result<Response, Error>;
