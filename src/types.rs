use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::Error;

/// Email address as it goes inside `<...>` on the envelope
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(address: String) -> Result<EmailAddress, Error> {
        // Only protocol syntax is rejected, quoted local parts may carry spaces
        if address.is_empty()
            || address
                .chars()
                .any(|c| c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(address));
        }

        Ok(EmailAddress(address))
    }
}

impl FromStr for EmailAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailAddress::new(s.to_string())
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Simple email envelope representation
///
/// Exactly one sender; recipients keep their order and are not deduplicated.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Envelope {
    /// The envelope recipients' addresses
    ///
    /// This can not be empty.
    forward_path: Vec<EmailAddress>,
    /// The envelope sender address
    reverse_path: EmailAddress,
}

impl Envelope {
    /// Creates a new envelope, which may fail if `to` is empty.
    pub fn new(from: EmailAddress, to: Vec<EmailAddress>) -> Result<Envelope, Error> {
        if to.is_empty() {
            return Err(Error::NoRecipients);
        }
        Ok(Envelope {
            forward_path: to,
            reverse_path: from,
        })
    }

    /// Destination addresses of the envelope
    pub fn to(&self) -> &[EmailAddress] {
        self.forward_path.as_slice()
    }

    /// Source address of the envelope
    pub fn from(&self) -> &EmailAddress {
        &self.reverse_path
    }
}
