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

use sockpool::PoolConf;
use sockpool_error::ErrorType;
use sockpool_syslog::{Level, SyslogConf, SyslogSink};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sink_conf(addr: String, local_file: Option<String>) -> SyslogConf {
    SyslogConf {
        pool: PoolConf {
            addr,
            connect_timeout_ms: 1000,
            io_timeout_ms: 1000,
            ..Default::default()
        },
        local_file,
        ..Default::default()
    }
}

// accept `conns` connections one after the other and collect what was sent over each
async fn collector(conns: usize) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        let mut received = vec![];
        for _ in 0..conns {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = String::new();
            socket.read_to_string(&mut buf).await.unwrap();
            received.push(buf);
        }
        received
    });
    (addr, handle)
}

async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[tokio::test]
async fn test_lines_share_connection() {
    init_log();
    let (addr, server) = collector(1).await;
    let sink = SyslogSink::new(sink_conf(addr, None)).unwrap();

    sink.info("service started").await.unwrap();
    sink.error("disk is full").await.unwrap();
    assert_eq!(sink.pool().unwrap().status().current, 1);

    sink.destroy().await;
    assert_eq!(
        server.await.unwrap(),
        vec!["service started\ndisk is full\n".to_string()]
    );
}

#[tokio::test]
async fn test_unpooled_connection_per_line() {
    init_log();
    let (addr, server) = collector(2).await;
    let mut conf = sink_conf(addr, None);
    conf.pooled = false;
    let sink = SyslogSink::new(conf).unwrap();
    assert!(sink.pool().is_none());

    sink.warn("one").await.unwrap();
    sink.warn("two").await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        vec!["one\n".to_string(), "two\n".to_string()]
    );
}

#[tokio::test]
async fn test_fallback_to_local_file() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("messages");
    let addr = closed_port().await;
    let sink = SyslogSink::new(sink_conf(addr, Some(local.display().to_string()))).unwrap();

    let err = sink.error("nobody is listening").await.unwrap_err();
    assert!(err.etype().is_connect_error());
    sink.fatal("still nobody").await.unwrap_err();
    assert_eq!(sink.pool().unwrap().status().current, 0);

    let saved = std::fs::read_to_string(&local).unwrap();
    assert_eq!(saved, "nobody is listening\nstill nobody\n");
}

#[tokio::test]
async fn test_fallback_after_destroy() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("messages");
    let (addr, server) = collector(1).await;
    let sink = SyslogSink::new(sink_conf(addr, Some(local.display().to_string()))).unwrap();

    sink.info("sent").await.unwrap();
    sink.destroy().await;
    let err = sink.info("kept").await.unwrap_err();
    assert_eq!(err.etype(), &ErrorType::PoolClosed);

    assert_eq!(server.await.unwrap(), vec!["sent\n".to_string()]);
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "kept\n");
}

#[tokio::test]
async fn test_level_filter() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("messages");
    let addr = closed_port().await;
    let mut conf = sink_conf(addr, Some(local.display().to_string()));
    conf.level = Level::Warn;
    let sink = SyslogSink::new(conf).unwrap();
    assert_eq!(sink.level(), Level::Warn);

    sink.debug("noise").await.unwrap();
    sink.info("noise").await.unwrap();
    assert!(!local.exists());
    assert!(sink.warn("signal").await.is_err());
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "signal\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syslog-ng.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = String::new();
        socket.read_to_string(&mut buf).await.unwrap();
        buf
    });

    let sink = SyslogSink::new(sink_conf(path.display().to_string(), None)).unwrap();
    sink.info("over uds").await.unwrap();
    sink.destroy().await;
    assert_eq!(server.await.unwrap(), "over uds\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_write_failure_on_reused_connection() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syslog-ng.sock");
    let local = dir.path().join("messages");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    // read the first line then go away while the sink keeps the connection idle
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0; 6];
        socket.read_exact(&mut buf).await.unwrap();
        buf
    });

    let sink = SyslogSink::new(sink_conf(
        path.display().to_string(),
        Some(local.display().to_string()),
    ))
    .unwrap();
    sink.info("first").await.unwrap();
    assert_eq!(&server.await.unwrap(), b"first\n");
    let pool = sink.pool().unwrap();
    assert_eq!(pool.status().idle, 1);

    let err = sink.info("second").await.unwrap_err();
    assert!(err.etype().is_io_error());
    // the broken connection is closed, not kept for reuse
    assert_eq!(pool.status().current, 0);
    assert_eq!(pool.status().idle, 0);
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "second\n");
}

#[test]
fn test_missing_unix_socket() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.sock");
    let err = SyslogSink::new(sink_conf(path.display().to_string(), None))
        .err()
        .unwrap();
    assert_eq!(err.etype(), &ErrorType::InvalidConf);

    let err = SyslogSink::new(sink_conf(dir.path().display().to_string(), None))
        .err()
        .unwrap();
    assert_eq!(err.etype(), &ErrorType::InvalidConf);
}
