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

use log::{debug, warn};
use sockpool::{Connect, Connection, ConnectionPool, PeerAddr, Stream, TransportConnector};
use sockpool_error::{Error, ErrorType::*, OrErr, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::conf::{Level, SyslogConf};

/// Writes log lines to a syslog-ng endpoint.
///
/// Each line is newline terminated and sent over a pooled connection. A connection that fails a
/// write is closed rather than returned for reuse. Lines that cannot be sent, whether the pool is
/// exhausted, closed or the endpoint is down, are appended to the configured local file and the
/// error is returned to the caller.
pub struct SyslogSink {
    conf: SyslogConf,
    connector: TransportConnector,
    pool: Option<ConnectionPool<TransportConnector>>,
    io_timeout: Option<Duration>,
    // serializes appends to the local file
    local_file: Mutex<()>,
}

impl SyslogSink {
    /// Create a sink. A Unix domain socket endpoint must already exist.
    pub fn new(conf: SyslogConf) -> Result<Self> {
        let conf = conf.validate()?;
        if let PeerAddr::Unix(path) = conf.pool.peer()? {
            let meta = std::fs::metadata(&path)
                .or_err_with(InvalidConf, || format!("{} is not available", path.display()))?;
            if meta.is_dir() {
                return Error::e_explain(InvalidConf, format!("{} is a directory", path.display()));
            }
        }

        let connector = conf.pool.connector()?;
        let pool = conf
            .pooled
            .then(|| ConnectionPool::new(connector.clone(), conf.pool.options()));
        let io_timeout =
            (conf.pool.io_timeout_ms > 0).then(|| Duration::from_millis(conf.pool.io_timeout_ms));
        Ok(SyslogSink {
            conf,
            connector,
            pool,
            io_timeout,
            local_file: Mutex::new(()),
        })
    }

    pub fn level(&self) -> Level {
        self.conf.level
    }

    /// The pool of this sink, `None` when it is configured not to reuse connections
    pub fn pool(&self) -> Option<&ConnectionPool<TransportConnector>> {
        self.pool.as_ref()
    }

    /// Write one log line if `level` is not below the configured level.
    pub async fn write_msg(&self, level: Level, msg: &str) -> Result<()> {
        if level < self.conf.level {
            return Ok(());
        }
        let mut line = String::with_capacity(msg.len() + 1);
        line.push_str(msg);
        line.push('\n');

        let sent = match &self.pool {
            Some(pool) => self.send_pooled(pool, &line).await,
            None => self.send_direct(&line).await,
        };
        if let Err(e) = &sent {
            warn!("fail to send log line to {}: {e}", self.connector.peer());
            if let Err(e) = self.write_local_file(&line).await {
                warn!("fail to save log line locally: {e}");
            }
        }
        sent
    }

    async fn send_pooled(
        &self,
        pool: &ConnectionPool<TransportConnector>,
        line: &str,
    ) -> Result<()> {
        let mut conn = pool.checkout().await?;
        // the pool only sets a deadline at connect time, give every line its own window
        conn.set_deadline(self.io_timeout.map(|t| Instant::now() + t));
        match conn.write_all(line.as_bytes()).await {
            Ok(()) => {
                pool.checkin(Some(conn), false).await;
                Ok(())
            }
            Err(e) => {
                pool.checkin(Some(conn), true).await;
                Err(e)
            }
        }
    }

    async fn send_direct(&self, line: &str) -> Result<()> {
        let mut conn: Stream = self.connector.connect().await?;
        let sent = conn.write_all(line.as_bytes()).await;
        if let Err(e) = conn.close().await {
            debug!("fail to close connection: {e}");
        }
        sent
    }

    async fn write_local_file(&self, line: &str) -> Result<()> {
        let Some(path) = self.conf.local_file.as_deref() else {
            return Ok(());
        };
        let _guard = self.local_file.lock().await;
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o660);
        let mut file = options
            .open(path)
            .await
            .or_err_with(FileOpenError, || format!("fail to open {path}"))?;
        file.write_all(line.as_bytes())
            .await
            .or_err_with(FileWriteError, || format!("fail to write {path}"))?;
        file.flush()
            .await
            .or_err_with(FileWriteError, || format!("fail to flush {path}"))
    }

    pub async fn debug(&self, msg: &str) -> Result<()> {
        self.write_msg(Level::Debug, msg).await
    }

    pub async fn info(&self, msg: &str) -> Result<()> {
        self.write_msg(Level::Info, msg).await
    }

    pub async fn warn(&self, msg: &str) -> Result<()> {
        self.write_msg(Level::Warn, msg).await
    }

    pub async fn error(&self, msg: &str) -> Result<()> {
        self.write_msg(Level::Error, msg).await
    }

    pub async fn fatal(&self, msg: &str) -> Result<()> {
        self.write_msg(Level::Fatal, msg).await
    }

    /// Close the pool. Lines written afterwards go to the local file.
    pub async fn destroy(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
