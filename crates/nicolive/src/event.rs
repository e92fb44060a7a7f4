//! Events delivered to the consumer of a comment session.

use crate::error::DecodeError;
use crate::record::{Chat, HandshakeAck, PostAck, Record};

/// One item of a session's event stream, in wire order.
#[derive(Debug)]
pub enum CommentEvent {
    HandshakeAck(HandshakeAck),
    Chat(Chat),
    PostAck(PostAck),
    /// A frame that could not be decoded, or a failed read.
    ///
    /// Read failures are terminal: the stream ends right after them.
    DecodeError(DecodeError),
}

impl CommentEvent {
    pub fn as_chat(&self) -> Option<&Chat> {
        match self {
            Self::Chat(chat) => Some(chat),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::DecodeError(_))
    }
}

impl From<Record> for CommentEvent {
    fn from(record: Record) -> Self {
        match record {
            Record::HandshakeAck(ack) => Self::HandshakeAck(ack),
            Record::Chat(chat) => Self::Chat(chat),
            Record::PostAck(ack) => Self::PostAck(ack),
        }
    }
}

impl From<DecodeError> for CommentEvent {
    fn from(err: DecodeError) -> Self {
        Self::DecodeError(err)
    }
}
