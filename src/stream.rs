use std::fmt::Display;
use std::time::Duration;

use log::debug;

use crate::codec::ClientCodec;
use crate::error::{Error, Phase, SmtpResult};
use crate::response::{is_continuation, Response};
use crate::runtime::{phase_timeout, BufReadExt, BufReader, Read, ReadExt, Write, WriteExt};

/// Longest command or reply line accepted, terminator included
pub const MAX_LINE_LENGTH: usize = 2048;

/// Flush threshold while streaming the message content
const CHUNK_SIZE: usize = 8 * 1024;

/// Wait budgets applied to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on each connect attempt, including name resolution
    pub connect: Duration,
    /// Bound on waiting for each reply line
    pub read: Duration,
    /// Bound on each write
    pub write: Duration,
    /// Watchdog around a single command/reply exchange
    pub exchange: Duration,
    /// Watchdog around the whole session
    pub session: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_millis(3000),
            read: Duration::from_millis(3000),
            write: Duration::from_millis(3000),
            exchange: Duration::from_secs(5 * 60),
            session: Duration::from_secs(10 * 60),
        }
    }
}

/// SMTP stream.
#[derive(Debug)]
pub struct SmtpStream<S: Read + Write + Unpin> {
    /// Inner stream.
    inner: BufReader<S>,
    timeouts: Timeouts,
}

impl<S: Read + Write + Unpin> SmtpStream<S> {
    /// Creates new SMTP stream.
    pub fn new(stream: S, timeouts: Timeouts) -> Self {
        Self {
            inner: BufReader::new(stream),
            timeouts,
        }
    }

    /// Returns inner stream.
    ///
    /// Should only be used when there are no unread responses,
    /// because the buffer of `BufReader` may be lost.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Returns a reference to the inner stream.
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Sends the given SMTP command and returns whatever the server replied.
    ///
    /// The whole exchange is bounded by the exchange watchdog.
    pub async fn command(&mut self, command: impl Display) -> SmtpResult {
        let exchange = self.timeouts.exchange;
        phase_timeout(Phase::Exchange, exchange, async {
            self.send_command(command).await?;
            self.read_response().await
        })
        .await
    }

    /// Sends the command and requires a 2yz reply.
    pub async fn expect_success(&mut self, command: impl Display) -> SmtpResult {
        let response = self.command(command).await?;
        if response.is_positive() {
            Ok(response)
        } else {
            Err(Error::Protocol(response))
        }
    }

    /// Sends the given SMTP command to the server without waiting for response.
    pub async fn send_command(&mut self, command: impl Display) -> Result<(), Error> {
        let line = command.to_string();
        if line.len() > MAX_LINE_LENGTH {
            return Err(Error::LineTooLong {
                len: line.len(),
                max: MAX_LINE_LENGTH,
            });
        }
        self.write(line.as_bytes()).await?;
        debug!(">> {}", escape_crlf(&line));
        Ok(())
    }

    /// Writes the given data to the server.
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let stream = self.inner.get_mut();
        phase_timeout(Phase::Write, self.timeouts.write, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    /// Reads one line, without its CRLF or LF terminator.
    pub async fn read_line(&mut self) -> Result<String, Error> {
        let mut buffer = Vec::with_capacity(100);
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        let reader = &mut self.inner;
        let read = phase_timeout(Phase::Read, self.timeouts.read, async {
            Ok(reader.take(limit).read_until(b'\n', &mut buffer).await?)
        })
        .await?;

        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )
            .into());
        }
        if buffer.last() == Some(&b'\n') {
            buffer.pop();
        } else if buffer.len() > MAX_LINE_LENGTH {
            return Err(Error::LineTooLong {
                len: buffer.len(),
                max: MAX_LINE_LENGTH,
            });
        }
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Read an SMTP response from the wire.
    ///
    /// Continuation lines are collected until a line that does not carry a
    /// `-` in fourth position.
    pub async fn read_response(&mut self) -> SmtpResult {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            debug!("<< {}", line);
            let more = is_continuation(&line);
            lines.push(line);
            if !more {
                break;
            }
        }

        Ok(Response::from_lines(lines))
    }

    /// Sends the message content followed by the data terminator, then reads
    /// the final reply.
    ///
    /// Lines come without terminators and are dot-stuffed on the way out.
    pub async fn message<'a, I>(&mut self, lines: I) -> SmtpResult
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut codec = ClientCodec::new();
        let mut chunk = Vec::with_capacity(CHUNK_SIZE + MAX_LINE_LENGTH);

        for line in lines {
            codec.encode(line, &mut chunk).await?;
            if chunk.len() >= CHUNK_SIZE {
                self.write(&chunk).await?;
                chunk.clear();
            }
        }
        codec.terminate(&mut chunk).await?;
        self.write(&chunk).await?;
        debug!(">> ({} lines, {} bytes)", codec.lines(), codec.bytes());
        debug!(">> .");

        let exchange = self.timeouts.exchange;
        phase_timeout(Phase::Exchange, exchange, self.read_response()).await
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
/// Used for debug displays
fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}
