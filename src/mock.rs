//! In-memory stream standing in for a server connection

use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};

/// Server replies come from a prepared script, client output is collected
/// for inspection.
#[pin_project]
#[derive(Clone, Debug, Default)]
pub struct MockStream {
    #[pin]
    script: Cursor<Vec<u8>>,
    #[pin]
    written: Cursor<Vec<u8>>,
}

impl MockStream {
    pub fn new() -> MockStream {
        MockStream::default()
    }

    /// Stream whose reads yield `script`
    pub fn scripted(script: &str) -> MockStream {
        MockStream {
            script: Cursor::new(script.as_bytes().to_vec()),
            written: Cursor::default(),
        }
    }

    /// Everything written since the last call
    pub fn take_written(&mut self) -> Vec<u8> {
        self.written.set_position(0);
        std::mem::take(self.written.get_mut())
    }

    /// Replaces whatever is left of the script
    pub fn rescript(&mut self, script: &str) {
        self.script = Cursor::new(script.as_bytes().to_vec());
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().script.poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.project().written.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        self.project().written.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        self.project().written.poll_shutdown(cx)
    }
}
