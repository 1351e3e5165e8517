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

//! Log lines over pooled connections
//!
//! [SyslogSink] writes each log line to a syslog-ng endpoint, TCP or Unix domain socket, through
//! a [sockpool::ConnectionPool]. When the endpoint cannot be reached the line is appended to a
//! local file instead, so that it is not lost.

#![warn(clippy::all)]

mod conf;
mod sink;

pub use conf::{Level, SyslogConf};
pub use sink::SyslogSink;
