//! The byte stream under a session. Plaintext and TLS look the same from
//! here on, so STARTTLS is just a matter of building a new `Transport`.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsAcceptor;
use tracing::warn;

use crate::error::SessionError;
use crate::reply::ReplyLine;
use crate::tls::TlsInfo;

/// Upper bound on a single read while collecting a message body.
const BODY_CHUNK: u64 = 64 * 1024;

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Outcome of reading a DATA body.
#[derive(Debug, PartialEq, Eq)]
pub enum Body {
    Complete(Vec<u8>),
    /// The terminator was reached but the message was over the limit and has
    /// been discarded.
    TooLarge,
}

pub struct Transport {
    inner: BufReader<Box<dyn Stream>>,
    timeout: Duration,
}

async fn with_deadline<T>(
    timeout: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, SessionError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SessionError::Timeout),
    }
}

impl Transport {
    pub fn new<S: Stream + 'static>(stream: S, timeout: Duration) -> Self {
        let stream: Box<dyn Stream> = Box::new(stream);
        Self {
            inner: BufReader::new(stream),
            timeout,
        }
    }

    /// Reads one line and strips its terminator. `Ok(None)` means the client
    /// closed the connection cleanly.
    pub async fn read_line(&mut self, max: usize) -> Result<Option<String>, SessionError> {
        let mut buf = Vec::new();
        // Room for the line plus CRLF, and one byte to notice overflow.
        let limit = max as u64 + 3;
        let n = with_deadline(
            self.timeout,
            (&mut self.inner).take(limit).read_until(b'\n', &mut buf),
        )
        .await?;
        if n == 0 {
            return Ok(None);
        }

        if buf.ends_with(b"\n") {
            buf.pop();
            if buf.ends_with(b"\r") {
                buf.pop();
            }
        }
        if buf.len() > max {
            return Err(SessionError::LineTooLong { max });
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Reads a dot-terminated message body. Leading dots are unstuffed and
    /// CRLF becomes LF. A body over `max_size` is drained and dropped.
    pub async fn read_body(&mut self, max_size: usize) -> Result<Body, SessionError> {
        let mut body = Vec::new();
        let mut too_large = false;
        let mut at_line_start = true;
        // A CR that ended the previous chunk, held back until we know
        // whether an LF follows.
        let mut pending_cr = false;
        let mut chunk = Vec::new();

        loop {
            chunk.clear();
            let n = with_deadline(
                self.timeout,
                (&mut self.inner).take(BODY_CHUNK).read_until(b'\n', &mut chunk),
            )
            .await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during DATA",
                )
                .into());
            }

            let complete = chunk.ends_with(b"\n");
            if at_line_start {
                if chunk == b".\r\n" || chunk == b".\n" {
                    break;
                }
                if chunk.starts_with(b".") {
                    chunk.remove(0);
                }
            }
            if pending_cr {
                if !chunk.starts_with(b"\n") {
                    chunk.insert(0, b'\r');
                }
                pending_cr = false;
            }
            if chunk.ends_with(b"\r\n") {
                chunk.truncate(chunk.len() - 2);
                chunk.push(b'\n');
            } else if chunk.ends_with(b"\r") {
                chunk.pop();
                pending_cr = true;
            }
            at_line_start = complete;

            if too_large {
                continue;
            }
            if body.len() + chunk.len() > max_size {
                too_large = true;
                body = Vec::new();
            } else {
                body.extend_from_slice(&chunk);
            }
        }

        if too_large {
            Ok(Body::TooLarge)
        } else {
            Ok(Body::Complete(body))
        }
    }

    pub async fn write_reply(&mut self, reply: &ReplyLine) -> Result<(), SessionError> {
        self.write_raw(format!("{reply}\r\n").as_bytes()).await
    }

    /// Writes `lines` as one multi-line reply with `code`.
    pub async fn write_multiline(&mut self, code: u16, lines: &[String]) -> Result<(), SessionError> {
        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            let sep = if i + 1 == lines.len() { ' ' } else { '-' };
            out.push_str(&format!("{code}{sep}{line}\r\n"));
        }
        self.write_raw(out.as_bytes()).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let inner = &mut self.inner;
        with_deadline(self.timeout, async move {
            inner.write_all(bytes).await?;
            inner.flush().await
        })
        .await
    }

    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        with_deadline(self.timeout, self.inner.shutdown()).await
    }

    /// Runs the server side of a TLS handshake over the current stream and
    /// returns the encrypted transport.
    ///
    /// Anything the client sent after STARTTLS but before the handshake is
    /// thrown away (RFC 3207 §4.2).
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> Result<(Transport, TlsInfo), SessionError> {
        let timeout = self.timeout;
        let pipelined = self.inner.buffer().len();
        if pipelined > 0 {
            warn!(bytes = pipelined, "discarding data pipelined after STARTTLS");
        }

        let stream = self.inner.into_inner();
        let tls = match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(SessionError::Handshake(e)),
            Err(_) => return Err(SessionError::Timeout),
        };

        let info = TlsInfo::from_connection(tls.get_ref().1);
        Ok((Transport::new(tls, timeout), info))
    }
}
