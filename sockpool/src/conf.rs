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

//! Pool configurations
//!
//! A pool configuration names the endpoint and sizes the pool. Like the rest of the
//! configurations in this project it is read from YAML, and keys unknown to it are ignored so
//! that it can be embedded in a larger file.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use sockpool_error::{ErrorType::*, OrErr, Result};
use std::fs;
use std::time::Duration;

use crate::address::PeerAddr;
use crate::connection::{ConnectionPool, PoolOptions};
use crate::connector::TransportConnector;

/// The default endpoint, the local syslog-ng socket
pub const DEFAULT_ADDR: &str = "/var/run/syslog/syslog-ng.sock";

/// The configuration of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConf {
    /// `host:port` for TCP, a socket path otherwise
    pub addr: String,
    /// Maximum connections, idle and in use. 0 is unlimited.
    pub max_conns: usize,
    /// Maximum idle connections kept. 0 is unlimited.
    pub max_idle: usize,
    /// Seconds an idle connection may be kept before it is closed. 0 is unlimited.
    pub idle_timeout: u64,
    /// Wait when the pool is exhausted instead of failing right away
    pub wait: bool,
    /// Connect timeout in milliseconds. 0 disables the timeout.
    pub connect_timeout_ms: u64,
    /// I/O deadline of each connection, counted from connect, in milliseconds. 0 disables it.
    pub io_timeout_ms: u64,
}

impl Default for PoolConf {
    fn default() -> Self {
        PoolConf {
            addr: DEFAULT_ADDR.to_string(),
            max_conns: 0,
            max_idle: 100,
            idle_timeout: 3,
            wait: false,
            connect_timeout_ms: 50,
            io_timeout_ms: 50,
        }
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl PoolConf {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: PoolConf = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;
        trace!("Loaded conf: {conf:?}");
        conf.validate()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).or_err(InternalError, "Unable to serialize conf")
    }

    pub fn validate(self) -> Result<Self> {
        self.peer()?;
        Ok(self)
    }

    pub fn peer(&self) -> Result<PeerAddr> {
        self.addr.parse()
    }

    pub fn options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_conns,
            max_idle: self.max_idle,
            idle_timeout: (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout)),
            wait: self.wait,
        }
    }

    pub fn connector(&self) -> Result<TransportConnector> {
        Ok(TransportConnector::new(self.peer()?)
            .connect_timeout(non_zero_ms(self.connect_timeout_ms))
            .io_timeout(non_zero_ms(self.io_timeout_ms)))
    }
}

impl ConnectionPool<TransportConnector> {
    /// Create a pool of TCP or Unix domain streams from its configuration
    pub fn from_conf(conf: &PoolConf) -> Result<Self> {
        Ok(ConnectionPool::new(conf.connector()?, conf.options()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_default() {
        init_log();
        let conf = PoolConf::from_yaml("---\nmax_conns: 20\n").unwrap();
        assert_eq!(20, conf.max_conns);
        assert_eq!(100, conf.max_idle);
        assert_eq!(DEFAULT_ADDR, conf.addr);
        assert_eq!(
            conf.options(),
            PoolOptions {
                max_connections: 20,
                max_idle: 100,
                idle_timeout: Some(Duration::from_secs(3)),
                wait: false,
            }
        );
        assert_eq!(conf.peer().unwrap().kind(), "unix");
    }

    #[test]
    fn test_unlimited() {
        init_log();
        let conf_str = r#"
---
addr: 127.0.0.1:601
max_idle: 0
idle_timeout: 0
wait: true
connect_timeout_ms: 0
extra_key_for_someone_else: 1
        "#;
        let conf = PoolConf::from_yaml(conf_str).unwrap();
        let options = conf.options();
        assert_eq!(options.idle_timeout, None);
        assert_eq!(options.max_idle, 0);
        assert!(options.wait);
        assert_eq!(conf.peer().unwrap().as_inet(), Some("127.0.0.1:601"));
        let pool = ConnectionPool::from_conf(&conf).unwrap();
        assert_eq!(pool.connector().peer().kind(), "tcp");
    }

    #[test]
    fn test_invalid() {
        init_log();
        let err = PoolConf::from_yaml("addr: ''").unwrap_err();
        assert_eq!(err.etype(), &InvalidConf);
        let err = PoolConf::from_yaml("max_conns: many").unwrap_err();
        assert_eq!(err.etype(), &ReadError);
    }

    #[test]
    fn test_load_file() {
        init_log();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr: /tmp/sockpool-test.sock\nmax_conns: 2").unwrap();
        let path = file.path().display().to_string();
        let conf = PoolConf::load_from_yaml(&path).unwrap();
        assert_eq!(conf.max_conns, 2);

        let round = PoolConf::from_yaml(&conf.to_yaml().unwrap()).unwrap();
        assert_eq!(round, conf);
    }
}
