//! sendmail-relay is a sendmail-compatible submission agent: it reads one
//! message from standard input and relays it to a single SMTP mailhub.

#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    missing_debug_implementations,
    clippy::unwrap_used
)]

pub mod accounts;
pub mod authentication;
mod codec;
pub mod commands;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod message;
pub mod mock;
pub mod net;
pub mod response;
mod runtime;
pub mod smtp_client;
pub mod stream;
mod types;

pub use types::*;

pub use crate::accounts::{Account, AccountDirectory, FixedAccounts, SystemAccounts};
pub use crate::authentication::{Credentials, Mechanism};
pub use crate::commands::ClientId;
pub use crate::config::{ReverseAlias, Settings};
pub use crate::dead_letter::DeadLetter;
pub use crate::error::{Error, Phase, SmtpResult};
pub use crate::message::{Message, MessageBuilder, Recipients, Rewriter, SenderPolicy};
pub use crate::net::{ClientTlsParameters, TlsSettings};
pub use crate::response::Response;
pub use crate::smtp_client::{ClientSecurity, SmtpClient, SmtpTransport};
pub use crate::stream::Timeouts;

/// Runs an async test body on the tokio test runtime
#[macro_export]
macro_rules! async_test {
    ($name:ident, $block:block) => {
        #[tokio::test]
        async fn $name() {
            $block
        }
    };
}
