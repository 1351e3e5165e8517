// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport stream handed out by the pool

use sockpool_error::{Error, ErrorType::*, OrErr, Result};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::{timeout_at, Instant};

use crate::address::PeerAddr;

#[derive(Debug)]
enum RawStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A connected TCP or Unix domain stream.
///
/// The stream carries an optional I/O deadline. The deadline is absolute: it is set once when the
/// connection is established and is not pushed back by later reads or writes. Once it passes,
/// [Stream::write_all()] and [Stream::read()] fail with a timeout and the connection should be
/// checked in with force close.
#[derive(Debug)]
pub struct Stream {
    raw: RawStream,
    peer: PeerAddr,
    deadline: Option<Instant>,
}

impl Stream {
    pub(crate) fn from_tcp(stream: TcpStream, peer: PeerAddr) -> Self {
        Stream {
            raw: RawStream::Tcp(stream),
            peer,
            deadline: None,
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: UnixStream, peer: PeerAddr) -> Self {
        Stream {
            raw: RawStream::Unix(stream),
            peer,
            deadline: None,
        }
    }

    /// The endpoint this stream is connected to
    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    /// The I/O deadline of this stream, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Replace the I/O deadline. `None` removes it.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Write the whole buffer before the deadline.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.deadline_passed() {
            return Error::e_explain(WriteTimedout, format!("deadline passed on {}", self.peer));
        }
        let write = self.raw.write_all(buf);
        let res = match self.deadline {
            Some(d) => timeout_at(d, write)
                .await
                .explain_err(WriteTimedout, |_| {
                    format!("deadline reached writing to {}", self.peer)
                })?,
            None => write.await,
        };
        res.or_err_with(WriteError, || format!("fail to write to {}", self.peer))
    }

    /// Read into `buf` before the deadline. `Ok(0)` means the peer closed the connection.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.deadline_passed() {
            return Error::e_explain(ReadError, format!("deadline passed on {}", self.peer));
        }
        let read = self.raw.read(buf);
        let res = match self.deadline {
            Some(d) => timeout_at(d, read).await.explain_err(ReadError, |_| {
                format!("deadline reached reading from {}", self.peer)
            })?,
            None => read.await,
        };
        res.or_err_with(ReadError, || format!("fail to read from {}", self.peer))
    }

    /// Shut down the write side. The socket itself is released when the stream is dropped.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.raw
            .shutdown()
            .await
            .or_err_with(ConnectionClosed, || format!("fail to shutdown {}", self.peer))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().raw).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn pair() -> (Stream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let peer = PeerAddr::Inet(addr.to_string());
        (Stream::from_tcp(client, peer), server)
    }

    #[tokio::test]
    async fn test_write_read() {
        let (mut stream, mut server) = pair().await;
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &b"pong"[..n]);
    }

    #[tokio::test]
    async fn test_deadline_is_fixed() {
        let (mut stream, _server) = pair().await;
        stream.set_deadline(Some(Instant::now() + Duration::from_millis(20)));
        stream.write_all(b"before").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let err = stream.write_all(b"after").await.unwrap_err();
        assert_eq!(err.etype(), &WriteTimedout);
        assert!(err.etype().is_io_error());

        // a fresh deadline makes the stream usable again
        stream.set_deadline(None);
        stream.write_all(b"again").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_eof() {
        let (mut stream, server) = pair().await;
        drop(server);
        let mut buf = [0; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }
}
