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

//! Establishing and closing pooled connections

use async_trait::async_trait;
use log::debug;
use sockpool_error::{Error, ErrorType::*, OrErr, Result};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::address::PeerAddr;
use crate::stream::Stream;

/// A connection that can be owned by a [crate::ConnectionPool].
#[async_trait]
pub trait Connection: Send + 'static {
    /// Physically close the connection.
    async fn close(self) -> Result<()>;
}

/// The interface to establish a new connection to the endpoint of a pool
#[async_trait]
pub trait Connect: Send + Sync + std::fmt::Debug {
    type Conn: Connection;

    async fn connect(&self) -> Result<Self::Conn>;
}

#[async_trait]
impl Connection for Stream {
    async fn close(mut self) -> Result<()> {
        self.shutdown().await
    }
}

/// Connects TCP or Unix domain sockets with a connect timeout.
///
/// Every new [Stream] gets a deadline of `io_timeout` from the moment it was connected.
#[derive(Debug, Clone)]
pub struct TransportConnector {
    peer: PeerAddr,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl TransportConnector {
    pub fn new(peer: PeerAddr) -> Self {
        TransportConnector {
            peer,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Give up connecting after `timeout`.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the deadline of new streams to `timeout` after they are connected.
    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    async fn raw_connect(&self) -> Result<Stream> {
        match &self.peer {
            PeerAddr::Inet(addr) => TcpStream::connect(addr.as_str())
                .await
                .map(|s| Stream::from_tcp(s, self.peer.clone()))
                .map_err(|e| wrap_os_connect_error(e, format!("Fail to connect to {}", self.peer))),
            #[cfg(unix)]
            PeerAddr::Unix(path) => tokio::net::UnixStream::connect(path)
                .await
                .map(|s| Stream::from_unix(s, self.peer.clone()))
                .map_err(|e| wrap_os_connect_error(e, format!("Fail to connect to {}", self.peer))),
            #[cfg(not(unix))]
            PeerAddr::Unix(_) => Error::e_explain(
                ConnectError,
                format!("unix domain sockets are not supported: {}", self.peer),
            ),
        }
    }
}

#[async_trait]
impl Connect for TransportConnector {
    type Conn = Stream;

    async fn connect(&self) -> Result<Stream> {
        let connect_future = self.raw_connect();
        let mut stream = match self.connect_timeout {
            Some(t) => tokio::time::timeout(t, connect_future)
                .await
                .explain_err(ConnectTimedout, |_| {
                    format!("timeout {t:?} connecting to {}", self.peer)
                })??,
            None => connect_future.await?,
        };
        if let Some(t) = self.io_timeout {
            stream.set_deadline(Some(Instant::now() + t));
        }
        debug!("connected to {}", self.peer);
        Ok(stream)
    }
}

fn wrap_os_connect_error(e: std::io::Error, context: String) -> Box<Error> {
    match e.kind() {
        ErrorKind::ConnectionRefused => Error::because(ConnectRefused, context, e),
        ErrorKind::TimedOut => Error::because(ConnectTimedout, context, e),
        _ => Error::because(ConnectError, context, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connector = TransportConnector::new(addr.parse().unwrap())
            .connect_timeout(Some(Duration::from_secs(1)))
            .io_timeout(Some(Duration::from_secs(5)));

        let before = Instant::now();
        let stream = connector.connect().await.unwrap();
        let deadline = stream.deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(5));
        assert_eq!(stream.peer().as_inet(), Some(addr.as_str()));
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // grab a free port then release it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TransportConnector::new(addr.parse().unwrap());
        let err = connector.connect().await.unwrap_err();
        assert!(err.etype().is_connect_error());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_missing_uds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let connector = TransportConnector::new(PeerAddr::Unix(path));
        let err = connector.connect().await.unwrap_err();
        assert!(err.etype().is_connect_error());
        assert!(err.to_string().contains("missing.sock"));
    }
}
