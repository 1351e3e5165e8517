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

//! Generic connection pooling

use log::{debug, warn};
use parking_lot::Mutex;
use sockpool_error::{Error, ErrorType::*, Result};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::connector::{Connect, Connection};

/// Sizing and acquisition policy of a [ConnectionPool]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Total connections, idle and checked out, the pool may own. 0 means unlimited.
    pub max_connections: usize,
    /// Idle connections kept for reuse. 0 means unlimited.
    pub max_idle: usize,
    /// Idle connections older than this are closed instead of reused. `None` means never.
    pub idle_timeout: Option<Duration>,
    /// Wait for a connection to be checked in instead of failing when the pool is exhausted.
    pub wait: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            max_connections: 0,
            max_idle: 100,
            idle_timeout: Some(Duration::from_secs(3)),
            wait: false,
        }
    }
}

/// A snapshot of the pool accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections created and not yet released, idle and checked out.
    pub current: usize,
    /// Connections sitting in the idle list.
    pub idle: usize,
    pub closed: bool,
}

struct IdleConnection<S> {
    connection: S,
    returned_at: Instant,
}

struct PoolState<S> {
    // front: most recently returned
    idle: VecDeque<IdleConnection<S>>,
    current: usize,
    closed: bool,
}

enum Acquire<'a, C: Connect> {
    Reuse(C::Conn),
    Dial(DialSlot<'a, C>),
    Wait(Pin<Box<Notified<'a>>>),
}

/// Connection pool
///
/// [ConnectionPool] owns every connection it creates. A caller that checks a connection out has
/// exclusive use of it until it is handed back with [ConnectionPool::checkin()], exactly once.
///
/// Dialing and closing happen outside of the pool lock, so a slow endpoint does not block callers
/// that only need to return a connection.
pub struct ConnectionPool<C: Connect> {
    connector: C,
    options: PoolOptions,
    state: Mutex<PoolState<C::Conn>>,
    // signaled when a connection or a connection slot becomes available, or the pool closes
    available: Notify,
}

impl<C: Connect> ConnectionPool<C> {
    /// Create a new [ConnectionPool] that dials new connections with `connector`.
    pub fn new(connector: C, options: PoolOptions) -> Self {
        ConnectionPool {
            connector,
            options,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                current: 0,
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    /// The connector used to dial new connections
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The sizing and acquisition policy of this pool
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// A snapshot of the connection accounting
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            current: state.current,
            idle: state.idle.len(),
            closed: state.closed,
        }
    }

    /// Get a connection from the pool.
    ///
    /// The most recently returned idle connection is reused first. It is not probed, so the first
    /// write on a reused connection may still fail if the peer closed it in the meantime.
    ///
    /// Without an idle connection a new one is dialed if the limit allows it. Otherwise this
    /// fails with [PoolExhausted], or waits if the pool is configured to wait. Dial failures are
    /// returned as they are, never retried here. After [ConnectionPool::close()] this fails with
    /// [PoolClosed].
    ///
    /// Dropping the returned future at any point gives back whatever it reserved.
    pub async fn checkout(&self) -> Result<C::Conn> {
        loop {
            // stale connections no longer hold a slot, dropping them midway only skips the close
            for connection in self.evict_stale() {
                debug!("closing stale idle connection");
                self.close_connection(connection).await;
            }
            // nothing is awaited between taking an idle connection and returning it
            match self.acquire()? {
                Acquire::Reuse(connection) => {
                    debug!("reusing idle connection");
                    return Ok(connection);
                }
                Acquire::Dial(slot) => return self.dial(slot).await,
                Acquire::Wait(notified) => {
                    debug!("pool exhausted, waiting for a connection to be released");
                    notified.await;
                }
            }
        }
    }

    // Take the idle connections that expired out of the pool and give back their slots. The
    // caller closes them after the lock is released.
    fn evict_stale(&self) -> Vec<C::Conn> {
        let Some(timeout) = self.options.idle_timeout.filter(|t| !t.is_zero()) else {
            return Vec::new();
        };
        let mut stale = Vec::new();
        let mut state = self.state.lock();
        let now = Instant::now();
        while state
            .idle
            .back()
            .is_some_and(|c| now.duration_since(c.returned_at) >= timeout)
        {
            if let Some(expired) = state.idle.pop_back() {
                stale.push(expired.connection);
                self.release(&mut state);
            }
        }
        stale
    }

    // Decide what checkout should do under the lock.
    fn acquire(&self) -> Result<Acquire<'_, C>> {
        let mut state = self.state.lock();
        if state.closed {
            return Error::e_explain(PoolClosed, "checkout from a closed pool");
        }

        if let Some(idle) = state.idle.pop_front() {
            return Ok(Acquire::Reuse(idle.connection));
        }

        let max = self.options.max_connections;
        if max == 0 || state.current < max {
            state.current += 1;
            // the slot is counted from here on, the guard gives it back unless the dial succeeds
            return Ok(Acquire::Dial(DialSlot {
                pool: self,
                armed: true,
            }));
        }

        if !self.options.wait {
            return Error::e_explain(
                PoolExhausted,
                format!("all {max} connections are checked out"),
            );
        }

        // register before the lock is released so that a check in right after cannot be missed
        let mut notified = Box::pin(self.available.notified());
        notified.as_mut().enable();
        Ok(Acquire::Wait(notified))
    }

    async fn dial(&self, mut slot: DialSlot<'_, C>) -> Result<C::Conn> {
        match self.connector.connect().await {
            Ok(connection) => {
                slot.armed = false;
                Ok(connection)
            }
            Err(e) => {
                debug!("fail to dial a new connection: {e}");
                Err(e)
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// With `force_close`, or after the pool is closed, the connection is closed instead of kept.
    /// A connection that failed an I/O operation should always be returned with `force_close`.
    ///
    /// `None` gives back the slot of a checked out connection that the caller no longer has.
    ///
    /// When the idle list is already full, the least recently returned idle connection is closed
    /// to make room for this one.
    pub async fn checkin(&self, connection: Option<C::Conn>, force_close: bool) {
        let to_close = {
            let mut state = self.state.lock();
            match connection {
                None => {
                    self.release(&mut state);
                    None
                }
                Some(connection) if force_close || state.closed => {
                    self.release(&mut state);
                    Some(connection)
                }
                Some(connection) => {
                    state.idle.push_front(IdleConnection {
                        connection,
                        returned_at: Instant::now(),
                    });
                    let max_idle = self.options.max_idle;
                    if max_idle > 0 && state.idle.len() > max_idle {
                        let evicted = state.idle.pop_back().map(|c| c.connection);
                        self.release(&mut state);
                        evicted
                    } else {
                        self.available.notify_one();
                        None
                    }
                }
            }
        }; // lock released here

        if let Some(connection) = to_close {
            self.close_connection(connection).await;
        }
    }

    /// Close the pool.
    ///
    /// All idle connections are closed and every checkout, including the ones waiting, fails with
    /// [PoolClosed] from now on. Connections that are still checked out are closed when they are
    /// checked in. Calling this again has no effect.
    pub async fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            let idle = std::mem::take(&mut state.idle);
            state.closed = true;
            state.current = state.current.saturating_sub(idle.len());
            self.available.notify_waiters();
            idle
        }; // lock released here

        if !idle.is_empty() {
            debug!("closing {} idle connections", idle.len());
        }
        for idle_connection in idle {
            self.close_connection(idle_connection.connection).await;
        }
    }

    // give back one connection slot, must be called with the lock held
    fn release(&self, state: &mut PoolState<C::Conn>) {
        if state.current == 0 {
            warn!("more connections released than created");
        } else {
            state.current -= 1;
        }
        self.available.notify_one();
    }

    async fn close_connection(&self, connection: C::Conn) {
        // the connection is discarded either way
        if let Err(e) = connection.close().await {
            debug!("fail to close connection: {e}");
        }
    }
}

struct DialSlot<'a, C: Connect> {
    pool: &'a ConnectionPool<C>,
    armed: bool,
}

impl<C: Connect> Drop for DialSlot<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.state.lock();
            self.pool.release(&mut state);
        }
    }
}
