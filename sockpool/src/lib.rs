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

//! Socket connection pooling
//!
//! A [ConnectionPool] keeps reusable stream connections to a single endpoint. Connections are
//! created lazily up to an optional limit, idle ones are served most recently returned first, and
//! stale or surplus idle connections are closed. When the pool is at capacity a checkout either
//! fails fast or waits for a connection to be checked in.

#![warn(clippy::all)]

mod address;
mod conf;
mod connection;
mod connector;
mod stream;

pub use address::PeerAddr;
pub use conf::{PoolConf, DEFAULT_ADDR};
pub use connection::{ConnectionPool, PoolOptions, PoolStatus};
pub use connector::{Connect, Connection, TransportConnector};
pub use stream::Stream;

pub use sockpool_error::{Error, ErrorType, Result};
