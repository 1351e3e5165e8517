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

//! Sink configurations

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use sockpool::PoolConf;
use sockpool_error::{ErrorType::*, OrErr, Result};
use std::fs;

/// Severity of a log line. Lines below the configured level are dropped.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Debug = 1,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug | log::Level::Trace => Level::Debug,
        }
    }
}

/// The configuration of a [crate::SyslogSink]
///
/// The pool keys live at the top level next to the sink's own keys:
/// ```yaml
/// addr: /var/run/syslog/syslog-ng.sock
/// local_file: /tmp/messages
/// max_conns: 20
/// max_idle: 10
/// idle_timeout: 3
/// level: info
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyslogConf {
    #[serde(flatten)]
    pub pool: PoolConf,
    /// Lines that cannot be sent are appended here. Without it they are dropped.
    pub local_file: Option<String>,
    /// Reuse connections through a pool. When false every line is sent over its own connection.
    pub pooled: bool,
    /// Minimum level written
    pub level: Level,
}

impl Default for SyslogConf {
    fn default() -> Self {
        SyslogConf {
            pool: PoolConf::default(),
            local_file: None,
            pooled: true,
            level: Level::Debug,
        }
    }
}

impl SyslogConf {
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
        let conf: SyslogConf = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;
        trace!("Loaded conf: {conf:?}");
        conf.validate()
    }

    pub fn validate(self) -> Result<Self> {
        self.pool.peer()?;
        Ok(self)
    }
}
