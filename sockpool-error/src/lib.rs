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

#![warn(clippy::all)]
//! The error type shared by the connection pool and the log sink built on it.

pub use std::error::Error as ErrorTrait;
use std::borrow::Cow;
use std::fmt;
use std::result::Result as StdResult;

/// The context string of an [Error], static strings are not allocated.
pub type ErrStr = Cow<'static, str>;

/// The boxed [Error], the desired way to pass [Error]
pub type BError = Box<Error>;
/// Syntax sugar for `std::Result<T, BError>`
pub type Result<T, E = BError> = StdResult<T, E>;

/// The struct that represents an error
#[derive(Debug)]
pub struct Error {
    /// the type of error
    pub etype: ErrorType,
    /// whether the caller may try the same operation again
    pub retry: bool,
    /// chain to the cause of this error
    pub cause: Option<Box<dyn ErrorTrait + Send + Sync>>,
    /// an arbitrary string that explains the context when the error happens
    pub context: Option<ErrStr>,
}

/// Predefined type of errors
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorType {
    // pool state
    /// The pool was closed before or during the operation
    PoolClosed,
    /// No idle connection, at capacity, and the pool is not configured to wait
    PoolExhausted,
    // dial errors
    ConnectTimedout,
    ConnectRefused,
    ConnectError, // catch all
    // IO error on established connections
    ReadError,
    WriteError,
    WriteTimedout,
    ConnectionClosed,
    // configuration
    InvalidConf,
    // fallback file
    FileOpenError,
    FileWriteError,
    // other errors
    InternalError,
    /// Custom error with static string.
    Custom(&'static str),
}

impl ErrorType {
    /// create a new type of error. Users should try to make `name` unique.
    pub const fn new(name: &'static str) -> Self {
        ErrorType::Custom(name)
    }

    /// for displaying the error type
    pub fn as_str(&self) -> &str {
        match self {
            ErrorType::PoolClosed => "PoolClosed",
            ErrorType::PoolExhausted => "PoolExhausted",
            ErrorType::ConnectTimedout => "ConnectTimedout",
            ErrorType::ConnectRefused => "ConnectRefused",
            ErrorType::ConnectError => "ConnectError",
            ErrorType::ReadError => "ReadError",
            ErrorType::WriteError => "WriteError",
            ErrorType::WriteTimedout => "WriteTimedout",
            ErrorType::ConnectionClosed => "ConnectionClosed",
            ErrorType::InvalidConf => "InvalidConf",
            ErrorType::FileOpenError => "FileOpenError",
            ErrorType::FileWriteError => "FileWriteError",
            ErrorType::InternalError => "InternalError",
            ErrorType::Custom(s) => s,
        }
    }

    /// Whether the error comes from establishing a new connection
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            ErrorType::ConnectTimedout | ErrorType::ConnectRefused | ErrorType::ConnectError
        )
    }

    /// Whether the error happened on an established connection.
    ///
    /// The state of such a connection is unknown, so it should be checked in with force close.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            ErrorType::ReadError
                | ErrorType::WriteError
                | ErrorType::WriteTimedout
                | ErrorType::ConnectionClosed
        )
    }

    fn default_retry(&self) -> bool {
        // exhaustion is transient, everything else is up to the caller
        matches!(self, ErrorType::PoolExhausted)
    }
}

impl Error {
    /// Simply create the error. See other functions that provide less verbose interfaces.
    #[inline]
    pub fn create(
        etype: ErrorType,
        context: Option<ErrStr>,
        cause: Option<Box<dyn ErrorTrait + Send + Sync>>,
    ) -> BError {
        let retry = match cause.as_ref().and_then(|c| c.downcast_ref::<BError>()) {
            Some(e) => e.retry,
            None => etype.default_retry(),
        };
        Box::new(Error {
            etype,
            retry,
            cause,
            context,
        })
    }

    /// Create an error with the given type
    #[inline]
    pub fn new(e: ErrorType) -> BError {
        Self::create(e, None, None)
    }

    /// Create an error with the given type, a context string and the causing error.
    /// ```
    /// use sockpool_error::{Error, ErrorType, Result};
    ///
    /// fn dial() -> Result<()> {
    ///     Ok(())
    /// }
    /// fn checkout() -> Result<()> {
    ///     dial().map_err(|e| Error::because(ErrorType::ConnectError, "dial failed", e))
    /// }
    /// ```
    #[inline]
    pub fn because<S: Into<ErrStr>, E: Into<Box<dyn ErrorTrait + Send + Sync>>>(
        e: ErrorType,
        context: S,
        cause: E,
    ) -> BError {
        Self::create(e, Some(context.into()), Some(cause.into()))
    }

    /// Short for Err(Self::because)
    #[inline]
    pub fn e_because<T, S: Into<ErrStr>, E: Into<Box<dyn ErrorTrait + Send + Sync>>>(
        e: ErrorType,
        context: S,
        cause: E,
    ) -> Result<T> {
        Err(Self::because(e, context, cause))
    }

    /// Create an error with context but no direct causing error
    #[inline]
    pub fn explain<S: Into<ErrStr>>(e: ErrorType, context: S) -> BError {
        Self::create(e, Some(context.into()), None)
    }

    /// Short for Err(Self::explain)
    #[inline]
    pub fn e_explain<T, S: Into<ErrStr>>(e: ErrorType, context: S) -> Result<T> {
        Err(Self::explain(e, context))
    }

    #[inline]
    pub fn err<T>(e: ErrorType) -> Result<T> {
        Err(Self::new(e))
    }

    pub fn etype(&self) -> &ErrorType {
        &self.etype
    }

    pub fn retry(&self) -> bool {
        self.retry
    }

    pub fn set_retry(&mut self, retry: bool) {
        self.retry = retry;
    }

    pub fn reason_str(&self) -> &str {
        self.etype.as_str()
    }

    pub fn set_cause<C: Into<Box<dyn ErrorTrait + Send + Sync>>>(&mut self, cause: C) {
        self.cause = Some(cause.into());
    }

    pub fn set_context<T: Into<ErrStr>>(&mut self, context: T) {
        self.context = Some(context.into());
    }

    /// Create a new error from self, with the same type and put self as the cause
    pub fn more_context<T: Into<ErrStr>>(self: BError, context: T) -> BError {
        let retry = self.retry;
        let mut e = Self::because(self.etype.clone(), context, self);
        e.retry = retry;
        e
    }

    // Display error but skip the type if it repeats the previous hop
    fn chain_display(&self, previous: Option<&Error>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if previous.map(|p| p.etype != self.etype).unwrap_or(true) {
            write!(f, "{}", self.etype.as_str())?
        }
        if let Some(c) = self.context.as_ref() {
            write!(f, " context: {}", c)?;
        }
        match self.cause.as_ref() {
            Some(c) => match c.downcast_ref::<BError>() {
                Some(e) => {
                    write!(f, " cause: ")?;
                    e.chain_display(Some(self), f)
                }
                None => write!(f, " cause: {}", c),
            },
            None => Ok(()),
        }
    }

    /// Return the ErrorType of the root Error
    pub fn root_etype(&self) -> &ErrorType {
        self.cause.as_ref().map_or(&self.etype, |c| {
            // Stop the recursion if the cause is not Error
            c.downcast_ref::<BError>()
                .map_or(&self.etype, |e| e.root_etype())
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chain_display(None, f)
    }
}

impl ErrorTrait for Error {}

/// Helper trait to add more context to a given error
pub trait Context<T> {
    /// Wrap the `Err(E)` in [Result] with more context, the existing E will be the cause.
    fn err_context<C: Into<ErrStr>, F: FnOnce() -> C>(self, context: F) -> Result<T, BError>;
}

impl<T> Context<T> for Result<T, BError> {
    fn err_context<C: Into<ErrStr>, F: FnOnce() -> C>(self, context: F) -> Result<T, BError> {
        self.map_err(|e| e.more_context(context()))
    }
}

/// Helper trait to chain errors with context
pub trait OrErr<T, E> {
    /// Wrap the E in [Result] with new [ErrorType] and context, the existing E will be the cause.
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>;

    /// Similar to or_err(), but takes a closure, which is useful for constructing String.
    fn or_err_with<C: Into<ErrStr>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>;

    /// Replace the E in [Result] with a new [Error] generated from the current error
    fn explain_err<C: Into<ErrStr>, F: FnOnce(E) -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>;
}

impl<T, E> OrErr<T, E> for Result<T, E> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>,
    {
        self.map_err(|e| Error::because(et, context, e))
    }

    fn or_err_with<C: Into<ErrStr>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>,
    {
        self.map_err(|e| Error::because(et, context(), e))
    }

    fn explain_err<C: Into<ErrStr>, F: FnOnce(E) -> C>(
        self,
        et: ErrorType,
        exp: F,
    ) -> Result<T, BError> {
        self.map_err(|e| Error::explain(et, exp(e)))
    }
}

/// Helper trait to convert an [Option] to an [Error] with context.
pub trait OkOrErr<T> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError>;

    fn or_err_with<C: Into<ErrStr>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>;
}

impl<T> OkOrErr<T> for Option<T> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError> {
        self.ok_or_else(|| Error::explain(et, context))
    }

    fn or_err_with<C: Into<ErrStr>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError> {
        self.ok_or_else(|| Error::explain(et, context()))
    }
}
