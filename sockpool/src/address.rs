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

//! Endpoint address of a pool

use sockpool_error::{Error, ErrorType::InvalidConf, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The remote endpoint of a pool.
///
/// The transport is picked from the address itself: anything with a port separator is a TCP
/// `host:port`, everything else is the path of a Unix domain socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Inet(String),
    Unix(PathBuf),
}

impl PeerAddr {
    /// The `host:port` if this is a TCP endpoint
    pub fn as_inet(&self) -> Option<&str> {
        if let PeerAddr::Inet(addr) = self {
            Some(addr)
        } else {
            None
        }
    }

    /// The socket path if this is a Unix domain endpoint
    pub fn as_unix(&self) -> Option<&Path> {
        if let PeerAddr::Unix(path) = self {
            Some(path)
        } else {
            None
        }
    }

    /// The name of the transport, "tcp" or "unix"
    pub fn kind(&self) -> &'static str {
        match self {
            PeerAddr::Inet(_) => "tcp",
            PeerAddr::Unix(_) => "unix",
        }
    }
}

impl FromStr for PeerAddr {
    type Err = Box<Error>;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Error::e_explain(InvalidConf, "empty peer address");
        }
        if s.contains(':') {
            Ok(PeerAddr::Inet(s.to_string()))
        } else {
            Ok(PeerAddr::Unix(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "tcp://{addr}"),
            PeerAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
