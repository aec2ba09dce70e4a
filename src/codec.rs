use std::borrow::Cow;

use crate::runtime::{Write, WriteExt};

use tokio::io;

/// Doubles a leading `.` so the line cannot be taken for the data terminator
pub fn dot_stuff(line: &[u8]) -> Cow<'_, [u8]> {
    if line.first() == Some(&b'.') {
        let mut stuffed = Vec::with_capacity(line.len() + 1);
        stuffed.push(b'.');
        stuffed.extend_from_slice(line);
        Cow::Owned(stuffed)
    } else {
        Cow::Borrowed(line)
    }
}

/// The codec used for transparency
///
/// Takes message lines without their terminators and puts them on the wire
/// dot-stuffed and CRLF-terminated.
#[derive(Default, Clone, Copy, Debug)]
pub struct ClientCodec {
    lines: usize,
    bytes: usize,
}

impl ClientCodec {
    /// Creates a new client codec
    pub fn new() -> Self {
        ClientCodec::default()
    }

    /// Adds transparency to one line and terminates it
    pub async fn encode<W: Write + Unpin>(&mut self, line: &[u8], mut buf: W) -> io::Result<()> {
        let line = dot_stuff(line);
        buf.write_all(&line).await?;
        buf.write_all(b"\r\n").await?;
        self.lines += 1;
        self.bytes += line.len() + 2;
        Ok(())
    }

    /// Writes the lone `.` ending the data section
    pub async fn terminate<W: Write + Unpin>(&mut self, mut buf: W) -> io::Result<()> {
        buf.write_all(b".\r\n").await
    }

    /// Number of lines encoded so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Number of bytes written by `encode` so far
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}
