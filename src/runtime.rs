pub use tokio::{
    io::AsyncBufReadExt as BufReadExt,
    io::AsyncRead as Read,
    io::AsyncReadExt as ReadExt,
    io::AsyncWrite as Write,
    io::AsyncWriteExt as WriteExt,
    io::BufReader,
    net::TcpStream,
    time::{timeout, timeout_at, Instant},
};

use std::{future::Future, time::Duration};

use crate::error::{Error, Phase};

/// Bounds `f` by `dur`, reporting expiry as a timeout of `phase`
pub async fn phase_timeout<F, T>(phase: Phase, dur: Duration, f: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match timeout(dur, f).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout(phase)),
    }
}

/// Bounds `f` by an absolute deadline, reporting expiry as a timeout of `phase`
pub async fn phase_deadline<F, T>(phase: Phase, deadline: Instant, f: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match timeout_at(deadline, f).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout(phase)),
    }
}
