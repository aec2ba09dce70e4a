//! The dead letter keeps a copy of a message that could not be relayed.
//! The input is appended to `dead.letter` in the sender's home directory.

use std::path::{Path, PathBuf};

use log::{debug, error};
use tokio::fs::OpenOptions;

use crate::error::Error;
use crate::runtime::WriteExt;

/// File name inside the home directory
pub const DEAD_LETTER: &str = "dead.letter";

/// Appends undeliverable input to a mailbox-like file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    path: PathBuf,
}

impl DeadLetter {
    /// Dead letter file inside `home`
    pub fn new<P: AsRef<Path>>(home: P) -> DeadLetter {
        DeadLetter {
            path: home.as_ref().join(DEAD_LETTER),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `input`, separated from what the file holds by a blank line
    pub async fn save(&self, input: &[u8]) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(b"\n\n").await?;
        file.write_all(input).await?;
        file.flush().await?;
        debug!("saved {} bytes to {}", input.len(), self.path.display());
        Ok(())
    }

    /// Like `save`, but failures are only logged
    pub async fn keep(&self, input: &[u8]) {
        if let Err(e) = self.save(input).await {
            error!("can't save to {}: {}", self.path.display(), e);
        }
    }
}
