// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by meshbus operations.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by meshbus operations.
///
/// Covers the whole taxonomy: argument validation, wire codec failures,
/// transport errors, missing handlers, and request timeouts. No
/// exception-like control flow escapes the core; every public operation
/// surfaces one of these.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Argument errors
    // ========================================================================
    /// Topic or service name does not match the accepted grammar.
    InvalidTopic(String),
    /// Partition or namespace string is not a valid namespace.
    InvalidNamespace(String),
    /// Publishing on a topic this node never advertised.
    NotAdvertised(String),

    // ========================================================================
    // Codec errors
    // ========================================================================
    /// A discovery packet could not be encoded (incomplete fields).
    IncompletePacket(&'static str),
    /// A discovery packet could not be decoded (truncation, bad lengths,
    /// unknown type byte).
    MalformedPacket(&'static str),
    /// Destination buffer shorter than the encoded length.
    BufferTooSmall,
    /// Payload (de)serialization failed in the external codec seam.
    Serialization(String),

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// I/O error on the discovery datagram socket.
    Io(std::io::Error),
    /// Error on a stream-transport socket.
    Socket(zmq::Error),
    /// The runtime could not be constructed (socket bind, host IP
    /// determination). The process is expected to exit.
    InitFailed(String),

    // ========================================================================
    // Service call errors
    // ========================================================================
    /// No handler registered for an incoming request or response.
    NoHandler(String),
    /// The responder executed the request and reported failure.
    ServiceFailed(String),
    /// A blocking request expired before a response arrived.
    RequestTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTopic(t) => write!(f, "invalid topic name [{}]", t),
            Error::InvalidNamespace(ns) => write!(f, "invalid namespace [{}]", ns),
            Error::NotAdvertised(t) => {
                write!(f, "topic [{}] not advertised by this node", t)
            }
            Error::IncompletePacket(what) => {
                write!(f, "cannot pack incomplete discovery message: {}", what)
            }
            Error::MalformedPacket(what) => {
                write!(f, "malformed discovery message: {}", what)
            }
            Error::BufferTooSmall => write!(f, "buffer too small for encoded message"),
            Error::Serialization(msg) => write!(f, "payload serialization error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Socket(e) => write!(f, "socket error: {}", e),
            Error::InitFailed(msg) => write!(f, "initialization failed: {}", msg),
            Error::NoHandler(t) => write!(f, "no handler registered for [{}]", t),
            Error::ServiceFailed(t) => write!(f, "service call on [{}] reported failure", t),
            Error::RequestTimeout => write!(f, "service request timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Socket(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<zmq::Error> for Error {
    fn from(e: zmq::Error) -> Self {
        Error::Socket(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_informative() {
        let e = Error::InvalidTopic("foo bar".to_string());
        assert!(e.to_string().contains("foo bar"));

        let e = Error::NotAdvertised("/chatter".to_string());
        assert!(e.to_string().contains("/chatter"));
    }

    #[test]
    fn io_errors_expose_a_source() {
        use std::error::Error as _;
        let e = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
    }
}
