//! Session configuration.

use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_LENGTH;

/// Configurable options for a [`CommentSession`](crate::CommentSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed for the TCP connection to be established.
    pub connect_timeout: Duration,

    /// Maximum silence tolerated from the server before the session fails.
    ///
    /// `None` waits forever. Cancellation does not depend on this; it only
    /// bounds how long a dead peer can go unnoticed.
    pub read_timeout: Option<Duration>,

    /// Capacity of the event channel between the reader task and the consumer.
    pub event_buffer: usize,

    /// Frames longer than this are skipped and reported.
    pub max_frame_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            event_buffer: 100,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl SessionConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        // mpsc::channel panics on zero capacity
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }
}
