//! SMTP commands

use std::fmt::{self, Display, Formatter};

use crate::authentication::Mechanism;
use crate::types::EmailAddress;

/// Name the client announces in HELO/EHLO and in the trace header
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new `ClientId` from a fully qualified domain name
    pub fn new(domain: String) -> ClientId {
        ClientId(domain)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        // https://tools.ietf.org/html/rfc5321#section-4.1.4
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .map(ClientId)
            .unwrap_or_else(|| ClientId("localhost".to_string()))
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// HELO command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct HeloCommand {
    client_id: ClientId,
}

impl Display for HeloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "HELO {}\r\n", self.client_id)
    }
}

impl HeloCommand {
    /// Creates a HELO command
    pub fn new(client_id: ClientId) -> HeloCommand {
        HeloCommand { client_id }
    }
}

/// EHLO command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EhloCommand {
    client_id: ClientId,
}

impl Display for EhloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "EHLO {}\r\n", self.client_id)
    }
}

impl EhloCommand {
    /// Creates a EHLO command
    pub fn new(client_id: ClientId) -> EhloCommand {
        EhloCommand { client_id }
    }
}

/// STARTTLS command
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct StarttlsCommand;

impl Display for StarttlsCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("STARTTLS\r\n")
    }
}

/// MAIL command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MailCommand {
    sender: EmailAddress,
}

impl Display for MailCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "MAIL FROM:<{}>\r\n", self.sender)
    }
}

impl MailCommand {
    /// Creates a MAIL command
    pub fn new(sender: EmailAddress) -> MailCommand {
        MailCommand { sender }
    }
}

/// RCPT command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct RcptCommand {
    recipient: EmailAddress,
}

impl Display for RcptCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "RCPT TO:<{}>\r\n", self.recipient)
    }
}

impl RcptCommand {
    /// Creates an RCPT command
    pub fn new(recipient: EmailAddress) -> RcptCommand {
        RcptCommand { recipient }
    }
}

/// DATA command
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct DataCommand;

impl Display for DataCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("DATA\r\n")
    }
}

/// QUIT command
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct QuitCommand;

impl Display for QuitCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("QUIT\r\n")
    }
}

/// AUTH command, optionally carrying the first response inline
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthCommand {
    mechanism: Mechanism,
    initial_response: Option<String>,
}

impl Display for AuthCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.initial_response {
            Some(ref response) => write!(f, "AUTH {} {}\r\n", self.mechanism, response),
            None => write!(f, "AUTH {}\r\n", self.mechanism),
        }
    }
}

impl AuthCommand {
    /// Creates an AUTH command
    pub fn new(mechanism: Mechanism, initial_response: Option<String>) -> AuthCommand {
        AuthCommand {
            mechanism,
            initial_response,
        }
    }
}

/// Bare line answering a server challenge during AUTH
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthResponse(pub String);

impl Display for AuthResponse {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}\r\n", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let id = ClientId::new("host.example".to_string());
        let address: EmailAddress = "user@example.com".parse().unwrap();
        assert_eq!(
            format!("{}", HeloCommand::new(id.clone())),
            "HELO host.example\r\n"
        );
        assert_eq!(format!("{}", EhloCommand::new(id)), "EHLO host.example\r\n");
        assert_eq!(format!("{}", StarttlsCommand), "STARTTLS\r\n");
        assert_eq!(
            format!("{}", MailCommand::new(address.clone())),
            "MAIL FROM:<user@example.com>\r\n"
        );
        assert_eq!(
            format!("{}", RcptCommand::new(address)),
            "RCPT TO:<user@example.com>\r\n"
        );
        assert_eq!(format!("{}", DataCommand), "DATA\r\n");
        assert_eq!(format!("{}", QuitCommand), "QUIT\r\n");
        assert_eq!(
            format!(
                "{}",
                AuthCommand::new(Mechanism::Login, Some("dGlt".to_string()))
            ),
            "AUTH LOGIN dGlt\r\n"
        );
        assert_eq!(
            format!("{}", AuthCommand::new(Mechanism::CramMd5, None)),
            "AUTH CRAM-MD5\r\n"
        );
        assert_eq!(format!("{}", AuthResponse("cGFzcw==".to_string())), "cGFzcw==\r\n");
    }

    #[test]
    fn test_default_client_id() {
        assert!(!ClientId::default().as_ref().is_empty());
    }
}
