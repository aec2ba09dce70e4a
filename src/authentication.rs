//! Provides limited SASL authentication mechanisms

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use hmac::{Hmac, Mac};
use log::debug;

use crate::commands::{AuthCommand, AuthResponse};
use crate::error::{Error, SmtpResult};
use crate::runtime::{Read, Write};
use crate::stream::SmtpStream;

type HmacMd5 = Hmac<md5::Md5>;

/// Accepted authentication mechanisms
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug)]
pub enum Mechanism {
    /// LOGIN authentication mechanism
    /// Obsolete but needed for some providers (like office365)
    ///
    /// Defined in [draft-murchison-sasl-login-00](https://www.ietf.org/archive/id/draft-murchison-sasl-login-00.txt).
    Login,
    /// CRAM-MD5 authentication mechanism
    ///
    /// Defined in [RFC 2195](https://tools.ietf.org/html/rfc2195).
    CramMd5,
}

impl Default for Mechanism {
    fn default() -> Self {
        Mechanism::Login
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            Mechanism::Login => "LOGIN",
            Mechanism::CramMd5 => "CRAM-MD5",
        })
    }
}

impl FromStr for Mechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("login") {
            Ok(Mechanism::Login)
        } else if s.eq_ignore_ascii_case("cram-md5") {
            Ok(Mechanism::CramMd5)
        } else {
            Err(Error::Config(format!(
                "unsupported authentication method {:?}",
                s
            )))
        }
    }
}

/// Contains user credentials
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Credentials {
    authentication_identity: String,
    secret: String,
}

impl Credentials {
    /// Create a `Credentials` struct from username and password
    pub fn new(username: String, password: String) -> Credentials {
        Credentials {
            authentication_identity: username,
            secret: password,
        }
    }

    /// Name presented to the server
    pub fn username(&self) -> &str {
        &self.authentication_identity
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("authentication_identity", &self.authentication_identity)
            .field("secret", &"<hidden>")
            .finish()
    }
}

/// Hex HMAC-MD5 of `challenge` keyed with `secret`
pub fn cram_md5_digest(secret: &str, challenge: &[u8]) -> Result<String, Error> {
    let mut mac = HmacMd5::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("cram-md5 key: {}", e)))?;
    mac.update(challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Encoded answer to a CRAM-MD5 challenge, as sent on the wire
///
/// `challenge` is the base64 text the server put after its 334 code.
pub fn cram_md5_response(credentials: &Credentials, challenge: &str) -> Result<String, Error> {
    let decoded = base64::decode(challenge.trim())?;
    let digest = cram_md5_digest(&credentials.secret, &decoded)?;
    Ok(base64::encode(format!(
        "{} {}",
        credentials.authentication_identity, digest
    )))
}

impl Mechanism {
    /// Runs the exchange for this mechanism over `stream`.
    ///
    /// Any reply other than the expected one ends in `AuthRejected`; no other
    /// mechanism is attempted.
    pub async fn authenticate<S: Read + Write + Unpin>(
        self,
        stream: &mut SmtpStream<S>,
        credentials: &Credentials,
    ) -> SmtpResult {
        debug!("authenticating as {} with {}", credentials.username(), self);

        let command = match self {
            Mechanism::Login => {
                let user = base64::encode(&credentials.authentication_identity);
                AuthCommand::new(self, Some(user))
            }
            Mechanism::CramMd5 => AuthCommand::new(self, None),
        };

        let challenge = stream.command(command).await?;
        if !challenge.is_intermediate() {
            return Err(Error::AuthRejected(challenge));
        }

        let answer = match self {
            Mechanism::Login => base64::encode(&credentials.secret),
            Mechanism::CramMd5 => cram_md5_response(credentials, challenge.text())?,
        };

        let response = stream.command(AuthResponse(answer)).await?;
        if response.is_positive() {
            Ok(response)
        } else {
            Err(Error::AuthRejected(response))
        }
    }
}
