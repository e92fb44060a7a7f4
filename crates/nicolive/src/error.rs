//! Error types for the comment channel and its control-plane collaborators.

use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::lifecycle::SessionState;

/// Errors raised while establishing a comment session.
///
/// All variants are fatal to [`CommentSession::open`](crate::CommentSession::open);
/// no partial session is returned.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to comment server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to comment server {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("failed to write thread handshake: {source}")]
    Handshake {
        #[source]
        source: io::Error,
    },

    #[error("failed to encode thread handshake: {0}")]
    Encode(#[from] EncodeError),
}

/// A frame that could not be turned into an event, or a failed read.
///
/// Delivered to the consumer as [`CommentEvent::DecodeError`](crate::CommentEvent::DecodeError).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("read from comment server failed: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended inside a frame ({len} bytes without terminator)")]
    PartialFrame { len: usize },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLong { len: usize, max: usize },

    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed XML record: {reason}")]
    Xml { reason: String },

    #[error("invalid `{name}` attribute on <{element}>: {value:?}")]
    InvalidAttribute {
        element: &'static str,
        name: String,
        value: String,
    },

    #[error("no data from comment server for {after:?}")]
    ReadTimeout { after: Duration },
}

impl DecodeError {
    pub(crate) fn xml(reason: impl ToString) -> Self {
        Self::Xml {
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::PartialFrame { .. } | Self::ReadTimeout { .. }
        )
    }
}

/// An outgoing record could not be serialized.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct EncodeError {
    reason: String,
}

impl EncodeError {
    pub(crate) fn new(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// Errors from a single [`CommentSession::post`](crate::CommentSession::post) call.
#[derive(Debug, Error)]
pub enum PostError {
    #[error("failed to obtain post key: {0}")]
    PostKey(#[source] ApiError),

    #[error("session is not open (state: {state})")]
    NotOpen { state: SessionState },

    #[error("session was opened without a post key provider")]
    NoPoster,

    #[error("failed to encode comment: {0}")]
    Encode(#[from] EncodeError),

    #[error("session was closed before the comment was written")]
    Cancelled,

    #[error("failed to write comment: {source}")]
    Write {
        #[source]
        source: io::Error,
    },
}

/// Errors from the control-plane HTTP calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("malformed response: {reason}")]
    Xml { reason: String },

    #[error("server returned status `{status}`: {code}")]
    Status { status: String, code: String },

    #[error("post key is empty")]
    EmptyPostKey,

    #[error("{reason}")]
    Other { reason: String },
}

impl ApiError {
    pub fn other(reason: impl Into<String>) -> Self {
        Self::Other {
            reason: reason.into(),
        }
    }
}
