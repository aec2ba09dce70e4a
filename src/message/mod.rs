//! The message read from standard input, with its envelope and the headers
//! the relay adds in front of it

pub mod address;
pub mod header;

use std::fmt;
use std::iter;

use chrono::Local;
use log::debug;

pub use self::address::{parse_address_token, split_address_list, Rewriter};
pub use self::header::{fold_crlf, HeaderKind, HeaderLine, RawMessage};

use crate::accounts::AccountDirectory;
use crate::error::Error;
use crate::types::{EmailAddress, Envelope};

/// Name used in the trace header
const AGENT: &str = "sendmail-relay sendmail emulation";

/// How the sender is determined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderPolicy {
    /// Honour a `From:` header in the input, and `forced_address`
    pub from_line_override: bool,
    /// Envelope and header address given with `-f`
    pub forced_address: Option<String>,
    /// Display name given with `-F`
    pub full_name: Option<String>,
    /// Address from the reverse aliases for the calling account
    pub reverse_alias: Option<String>,
}

/// Where the recipients come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// `To:`, `Cc:` and `Bcc:` headers (`-t`)
    FromHeaders,
    /// Command line arguments, each possibly a comma separated list
    Arguments(Vec<String>),
}

/// Message ready to be relayed
#[derive(Debug, Clone)]
pub struct Message {
    envelope: Envelope,
    prelude: Vec<String>,
    headers: Vec<HeaderLine>,
    body: Vec<Vec<u8>>,
}

impl Message {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Headers generated here, sent before the input headers
    pub fn prelude(&self) -> &[String] {
        &self.prelude
    }

    /// Input headers that are passed on
    pub fn headers(&self) -> &[HeaderLine] {
        &self.headers
    }

    pub fn body(&self) -> &[Vec<u8>] {
        &self.body
    }

    /// Every line of the DATA section, in transmission order, unstuffed and
    /// without terminators
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.prelude
            .iter()
            .map(|line| line.as_bytes())
            .chain(self.headers.iter().map(HeaderLine::text))
            .chain(iter::once(&b""[..]))
            .chain(self.body.iter().map(Vec::as_slice))
    }
}

/// Turns the raw input into a `Message`
pub struct MessageBuilder<'a> {
    rewriter: Rewriter,
    accounts: &'a dyn AccountDirectory,
    policy: SenderPolicy,
    recipients: Recipients,
    date: Option<String>,
}

impl fmt::Debug for MessageBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MessageBuilder")
            .field("rewriter", &self.rewriter)
            .field("policy", &self.policy)
            .field("recipients", &self.recipients)
            .field("date", &self.date)
            .finish()
    }
}

impl<'a> MessageBuilder<'a> {
    pub fn new(rewriter: Rewriter, accounts: &'a dyn AccountDirectory) -> MessageBuilder<'a> {
        MessageBuilder {
            rewriter,
            accounts,
            policy: SenderPolicy::default(),
            recipients: Recipients::FromHeaders,
            date: None,
        }
    }

    pub fn policy(self, policy: SenderPolicy) -> MessageBuilder<'a> {
        MessageBuilder { policy, ..self }
    }

    pub fn recipients(self, recipients: Recipients) -> MessageBuilder<'a> {
        MessageBuilder { recipients, ..self }
    }

    /// Fixes the date used in generated headers, local time by default
    pub fn date(self, date: String) -> MessageBuilder<'a> {
        MessageBuilder {
            date: Some(date),
            ..self
        }
    }

    /// Parses `input` and derives the envelope.
    ///
    /// Fails with `NoRecipients` when nobody is left to deliver to.
    pub fn build(self, input: &[u8]) -> Result<Message, Error> {
        let raw = RawMessage::parse(input);
        let account = self.accounts.current()?;
        let from_headers = self.recipients == Recipients::FromHeaders;

        let mut sender = self
            .policy
            .reverse_alias
            .clone()
            .unwrap_or_else(|| account.name.clone());
        let (mut have_from, mut have_to, mut have_date) = (false, false, false);
        let mut recipients = Vec::new();
        let mut headers = Vec::with_capacity(raw.headers.len());

        for header in raw.headers {
            match header.kind() {
                HeaderKind::From => {
                    if header.value().trim().is_empty() {
                        debug!("ignoring empty From: header");
                        continue;
                    }
                    if !self.policy.from_line_override {
                        debug!("dropping {:?}", header.to_string());
                        continue;
                    }
                    sender = parse_address_token(&header.value());
                    have_from = true;
                }
                HeaderKind::To => have_to = true,
                HeaderKind::Date => have_date = true,
                _ => {}
            }
            if from_headers {
                if let HeaderKind::To | HeaderKind::Cc | HeaderKind::Bcc = header.kind() {
                    recipients.extend(split_address_list(&header.value()));
                }
            }
            headers.push(header);
        }

        if let Recipients::Arguments(ref arguments) = self.recipients {
            for argument in arguments {
                recipients.extend(
                    argument
                        .split(',')
                        .map(parse_address_token)
                        .filter(|address| !address.is_empty()),
                );
            }
        }

        if self.policy.from_line_override {
            if let Some(ref forced) = self.policy.forced_address {
                sender = forced.clone();
            }
        }
        let sender = self.rewriter.append_domain(&sender);

        let recipients = recipients
            .iter()
            .map(|recipient| {
                EmailAddress::new(self.rewriter.remap_local_user(recipient, self.accounts))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let envelope = Envelope::new(EmailAddress::new(sender.clone())?, recipients)?;

        let date = self.date.unwrap_or_else(|| Local::now().to_rfc2822());
        let mut prelude = vec![format!(
            "Received: by {} ({}); {}",
            self.rewriter.hostname(),
            AGENT,
            date
        )];
        if !have_from {
            let name = self.policy.full_name.or(account.full_name);
            prelude.push(match name {
                Some(name) => format!("From: \"{}\" <{}>", name, sender),
                None => format!("From: {}", sender),
            });
        }
        if !have_date {
            prelude.push(format!("Date: {}", date));
        }
        if !from_headers && !have_to {
            prelude.push("To: postmaster".to_string());
        }

        debug!(
            "sender {}, {} recipient(s), {} header(s), {} body line(s)",
            envelope.from(),
            envelope.to().len(),
            headers.len(),
            raw.body.len()
        );

        Ok(Message {
            envelope,
            prelude,
            headers,
            body: raw.body,
        })
    }
}
